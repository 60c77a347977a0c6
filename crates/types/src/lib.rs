//! Core type definitions for the UTXO-backed ascending auction.
//!
//! This crate provides the data structures shared across the auction system:
//! ledger primitives (key hashes, addresses, output references), the on-chain
//! auction datum and redeemer, transaction plans, and the off-chain mirror
//! record used for listing.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use thiserror::Error;

pub mod datum;
pub mod tx;

pub use datum::{AuctionDatum, AuctionRedeemer, DecodeError};
pub use tx::{LedgerOutput, ScriptInput, TxOutput, TxPlan};

// =========================
// LEDGER PRIMITIVES
// =========================

/// Amount in the smallest settlement unit.
pub type Lovelace = u64;

/// Absolute instant in milliseconds since the Unix epoch.
pub type PosixMillis = i64;

/// Hash of a payment verification key (28 bytes)
#[serde_as]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct KeyHash(#[serde_as(as = "Hex")] pub [u8; 28]);

/// Hash of a validator script (28 bytes)
#[serde_as]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ScriptHash(#[serde_as(as = "Hex")] pub [u8; 28]);

/// Transaction identifier (32 bytes)
#[serde_as]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TxId(#[serde_as(as = "Hex")] pub [u8; 32]);

/// Errors parsing textual identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid output reference {0:?}: expected <txid>#<index>")]
    InvalidOutputRef(String),
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
    let bytes =
        hex::decode(s.trim_start_matches("0x")).map_err(|e| ParseError::InvalidHex(e.to_string()))?;
    let got = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseError::InvalidLength { expected: N, got })
}

macro_rules! hex_display {
    ($name:ident, $len:expr) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_fixed::<$len>(s).map($name)
            }
        }
    };
}

hex_display!(KeyHash, 28);
hex_display!(ScriptHash, 28);
hex_display!(TxId, 32);

/// Reference to a transaction output: `txid#index`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct OutputRef {
    pub tx_id: TxId,
    pub index: u32,
}

impl OutputRef {
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_id, self.index)
    }
}

impl FromStr for OutputRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tx, index) = s
            .split_once('#')
            .ok_or_else(|| ParseError::InvalidOutputRef(s.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidOutputRef(s.to_string()))?;
        Ok(Self {
            tx_id: tx.parse()?,
            index,
        })
    }
}

/// Network an address belongs to.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,
    #[default]
    Testnet,
}

/// Payment credential of an address.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// Spending requires a signature from this key
    Key(KeyHash),
    /// Spending is guarded by this validator script
    Script(ScriptHash),
}

/// Payable address (payment part only, no staking part).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Address {
    pub network: NetworkId,
    pub payment: Credential,
}

impl Address {
    /// Enterprise address paying to a key.
    pub fn key(network: NetworkId, key_hash: KeyHash) -> Self {
        Self {
            network,
            payment: Credential::Key(key_hash),
        }
    }

    /// Address guarded by a script.
    pub fn script(network: NetworkId, script_hash: ScriptHash) -> Self {
        Self {
            network,
            payment: Credential::Script(script_hash),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self.payment, Credential::Script(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let network = match self.network {
            NetworkId::Mainnet => "mainnet",
            NetworkId::Testnet => "testnet",
        };
        match &self.payment {
            Credential::Key(k) => write!(f, "{network}:key:{k}"),
            Credential::Script(s) => write!(f, "{network}:script:{s}"),
        }
    }
}

// =========================
// MIRROR TYPES
// =========================

/// Mirror-side lifecycle status of an auction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    /// Live output exists on-chain
    Open,
    /// Settled, terminal
    Closed,
}

/// Descriptive listing data, never inspected by the protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionMetadata {
    pub title: String,
    pub description: String,
    pub image: Option<String>,
}

/// Off-chain mirror row for one auction.
///
/// Advisory only: the bid fields are a denormalized copy for listing and are
/// never used to validate a new action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub id: u64,
    pub metadata: AuctionMetadata,
    pub min_bid: Lovelace,
    pub seller: KeyHash,
    pub deadline: PosixMillis,
    /// Output currently holding the auction datum; cleared on close
    pub live_ref: Option<OutputRef>,
    pub status: AuctionStatus,
    pub highest_bid: Lovelace,
    pub highest_bidder: KeyHash,
    pub created_at: PosixMillis,
}

impl AuctionRecord {
    /// Build the first mirror row from the draft submitted with the opening
    /// transaction.
    pub fn from_draft(id: u64, draft: AuctionDraft) -> Self {
        Self {
            id,
            metadata: draft.metadata,
            min_bid: draft.min_bid,
            seller: draft.seller,
            deadline: draft.deadline,
            live_ref: Some(draft.live_ref),
            status: AuctionStatus::Open,
            highest_bid: 0,
            highest_bidder: draft.seller,
            created_at: draft.created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == AuctionStatus::Open
    }

    /// Apply a mirror update in place.
    pub fn apply(&mut self, update: &AuctionUpdate) {
        match update {
            AuctionUpdate::Bid {
                live_ref,
                highest_bid,
                highest_bidder,
            } => {
                self.live_ref = Some(*live_ref);
                self.highest_bid = *highest_bid;
                self.highest_bidder = *highest_bidder;
            }
            AuctionUpdate::Closed => {
                self.live_ref = None;
                self.status = AuctionStatus::Closed;
            }
        }
    }
}

/// Mirror row before the store has assigned an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionDraft {
    pub metadata: AuctionMetadata,
    pub min_bid: Lovelace,
    pub seller: KeyHash,
    pub deadline: PosixMillis,
    pub live_ref: OutputRef,
    pub created_at: PosixMillis,
}

/// Field changes written to the mirror after a confirmed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionUpdate {
    /// The auction moved to a new output (accepted bid or drift repair)
    Bid {
        live_ref: OutputRef,
        highest_bid: Lovelace,
        highest_bidder: KeyHash,
    },
    /// Settlement confirmed; the live reference is cleared
    Closed,
}

impl AuctionUpdate {
    /// Update pointing the mirror at `live_ref` holding `datum`.
    pub fn from_datum(live_ref: OutputRef, datum: &AuctionDatum) -> Self {
        Self::Bid {
            live_ref,
            highest_bid: datum.highest_bid,
            highest_bidder: datum.highest_bidder,
        }
    }
}
