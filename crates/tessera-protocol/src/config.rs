//! Round timing configuration
//!
//! Durations are in blocks. Computation-only states take no blocks and are
//! not configurable.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::{ProtocolError, Result};

/// Key generation round durations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DkgTiming {
    /// Join announcements
    pub join_blocks: u64,
    /// Ephemeral public key exchange
    pub ephemeral_key_blocks: u64,
    /// Commitments and encrypted shares
    pub commitment_blocks: u64,
    /// Each accusation round
    pub accusation_blocks: u64,
    /// Public key share points
    pub points_blocks: u64,
    /// Ephemeral private key reveals
    pub reveal_blocks: u64,
}

impl Default for DkgTiming {
    fn default() -> Self {
        Self {
            join_blocks: 5,
            ephemeral_key_blocks: 5,
            commitment_blocks: 10,
            accusation_blocks: 5,
            points_blocks: 5,
            reveal_blocks: 5,
        }
    }
}

/// Signing round durations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningTiming {
    /// Ephemeral public key exchange
    pub ephemeral_key_blocks: u64,
    /// Each signing round
    pub round_blocks: u64,
}

impl Default for SigningTiming {
    fn default() -> Self {
        Self {
            ephemeral_key_blocks: 5,
            round_blocks: 10,
        }
    }
}

/// Timing for both protocols
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Key generation timing
    pub dkg: DkgTiming,
    /// Signing timing
    pub signing: SigningTiming,
}

impl ProtocolConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ProtocolError::config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Every message-bearing round needs at least one block
    pub fn validate(&self) -> Result<()> {
        let rounds = [
            ("dkg.join_blocks", self.dkg.join_blocks),
            ("dkg.ephemeral_key_blocks", self.dkg.ephemeral_key_blocks),
            ("dkg.commitment_blocks", self.dkg.commitment_blocks),
            ("dkg.accusation_blocks", self.dkg.accusation_blocks),
            ("dkg.points_blocks", self.dkg.points_blocks),
            ("dkg.reveal_blocks", self.dkg.reveal_blocks),
            ("signing.ephemeral_key_blocks", self.signing.ephemeral_key_blocks),
            ("signing.round_blocks", self.signing.round_blocks),
        ];

        match rounds.iter().find(|(_, blocks)| *blocks == 0) {
            Some((key, _)) => Err(ProtocolError::config(format!("{key} must be at least 1 block"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProtocolConfig::from_toml_str(
            r#"
            [dkg]
            commitment_blocks = 20

            [signing]
            round_blocks = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.dkg.commitment_blocks, 20);
        assert_eq!(config.dkg.join_blocks, DkgTiming::default().join_blocks);
        assert_eq!(config.signing.round_blocks, 3);
    }

    #[test]
    fn test_zero_duration_is_rejected() {
        let error = ProtocolConfig::from_toml_str("[signing]\nround_blocks = 0\n").unwrap_err();
        assert_matches!(error, ProtocolError::Config { message } if message.contains("signing.round_blocks"));
    }

    #[test]
    fn test_malformed_toml_is_a_config_error() {
        assert_matches!(
            ProtocolConfig::from_toml_str("[dkg\n"),
            Err(ProtocolError::Config { .. })
        );
    }
}
