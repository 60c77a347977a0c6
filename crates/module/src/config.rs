//! Protocol configuration.
//!
//! The auction script identity and network parameters are injected into the
//! protocol components from here rather than living as globals.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use auction_types::{Address, Credential, KeyHash, Lovelace, NetworkId, ScriptHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolver::{AddressBook, DerivedResolver, PayoutResolver};

/// Smallest amount by which a bid must exceed the current highest bid.
pub const DEFAULT_MIN_INCREMENT: Lovelace = 1_000_000;

/// Value locked at the script address by the opening transaction.
pub const DEFAULT_MIN_ESCROW: Lovelace = 2_000_000;

/// Configuration shared by the bid, close and reconciliation components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Hash of the auction validator script
    pub script_hash: ScriptHash,
    /// Network the script address and payout addresses live on
    pub network: NetworkId,
    pub min_increment: Lovelace,
    pub min_escrow: Lovelace,
    /// Upper bound on every ledger round trip
    pub ledger_timeout_ms: u64,
    /// Total attempts for a bid that loses a race
    pub max_bid_attempts: u32,
    /// How payout addresses are found for refunds and settlement
    pub payouts: PayoutConfig,
}

/// Payout address resolution policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PayoutConfig {
    /// Enterprise address derived from the key hash
    Derive,
    /// Only identities registered here can be paid
    AddressBook { entries: Vec<AddressBookEntry> },
}

/// A registered payout destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub identity: KeyHash,
    pub address: Address,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            script_hash: default_script_hash(),
            network: NetworkId::Testnet,
            min_increment: DEFAULT_MIN_INCREMENT,
            min_escrow: DEFAULT_MIN_ESCROW,
            ledger_timeout_ms: 10_000,
            max_bid_attempts: 3,
            payouts: PayoutConfig::Derive,
        }
    }
}

impl ProtocolConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Address holding every live auction output.
    pub fn script_address(&self) -> Address {
        Address::script(self.network, self.script_hash)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    /// Build the resolver selected by [`PayoutConfig`].
    pub fn payout_resolver(&self) -> Arc<dyn PayoutResolver> {
        match &self.payouts {
            PayoutConfig::Derive => Arc::new(DerivedResolver::new(self.network)),
            PayoutConfig::AddressBook { entries } => {
                let book = AddressBook::new();
                for entry in entries {
                    book.insert(entry.identity, entry.address);
                }
                Arc::new(book)
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_increment == 0 {
            return Err(ConfigError::Invalid(
                "Minimum bid increment cannot be zero".into(),
            ));
        }
        if self.min_escrow == 0 {
            return Err(ConfigError::Invalid("Minimum escrow cannot be zero".into()));
        }
        if self.ledger_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Ledger timeout cannot be zero".into()));
        }
        if self.max_bid_attempts == 0 {
            return Err(ConfigError::Invalid(
                "At least one bid attempt is required".into(),
            ));
        }

        if let PayoutConfig::AddressBook { entries } = &self.payouts {
            for entry in entries {
                if entry.address.network != self.network {
                    return Err(ConfigError::AddressBook {
                        identity: entry.identity,
                        reason: "address is on another network",
                    });
                }
                if entry.address.payment != Credential::Key(entry.identity) {
                    return Err(ConfigError::AddressBook {
                        identity: entry.identity,
                        reason: "payment credential does not match identity",
                    });
                }
            }
        }

        Ok(())
    }
}

/// Hash identifying the bundled auction validator.
pub fn default_script_hash() -> ScriptHash {
    let digest = Sha256::digest(b"AUCTION_VALIDATOR_V1");
    let mut hash = [0u8; 28];
    hash.copy_from_slice(&digest[..28]);
    ScriptHash(hash)
}

/// Errors loading or validating configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(String),

    #[error("Cannot parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid address book entry for {identity}: {reason}")]
    AddressBook {
        identity: KeyHash,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.script_address().is_script());
        assert_eq!(config.ledger_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_increment_rejected() {
        let config = ProtocolConfig {
            min_increment: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = ProtocolConfig {
            max_bid_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_address_book_entry_must_match_identity() {
        let identity = KeyHash([4; 28]);
        let config = ProtocolConfig {
            payouts: PayoutConfig::AddressBook {
                entries: vec![AddressBookEntry {
                    identity,
                    address: Address::key(NetworkId::Testnet, KeyHash([5; 28])),
                }],
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressBook { .. })
        ));
    }

    #[test]
    fn test_address_book_entry_network_mismatch() {
        let identity = KeyHash([4; 28]);
        let config = ProtocolConfig {
            payouts: PayoutConfig::AddressBook {
                entries: vec![AddressBookEntry {
                    identity,
                    address: Address::key(NetworkId::Mainnet, identity),
                }],
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressBook { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{"min_increment": 500000, "payouts": {"mode": "derive"}}"#)
                .unwrap();
        assert_eq!(config.min_increment, 500_000);
        assert_eq!(config.min_escrow, DEFAULT_MIN_ESCROW);
        assert_eq!(config.payouts, PayoutConfig::Derive);
    }
}
