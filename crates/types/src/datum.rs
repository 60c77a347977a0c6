//! On-chain auction datum and redeemer with their canonical encoding.
//!
//! Both types use the Borsh layout: fields in declaration order, fixed-width
//! little-endian integers, fixed-length key hashes, and a one-byte variant tag
//! for the redeemer. There are no optional fields and the decoder accepts no
//! alternate orderings or trailing bytes.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{KeyHash, Lovelace, PosixMillis};

/// Encoded size of an [`AuctionDatum`]: seller (28) + deadline (8) +
/// highest bid (8) + highest bidder (28).
pub const DATUM_LEN: usize = 72;

/// Encoded size of [`AuctionRedeemer::PlaceBid`]: tag (1) + amount (8) +
/// bidder (28).
pub const PLACE_BID_LEN: usize = 37;

const PLACE_BID_TAG: u8 = 0;
const CLOSE_AUCTION_TAG: u8 = 1;

/// Errors decoding on-chain state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Output carries no datum")]
    MissingDatum,

    #[error("Invalid datum length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Malformed encoding: {0}")]
    Malformed(String),

    #[error("Zero highest bid must name the seller as highest bidder")]
    ZeroBidForeignBidder,
}

/// Auction state carried by the script output.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AuctionDatum {
    pub seller: KeyHash,
    pub deadline: PosixMillis,
    pub highest_bid: Lovelace,
    pub highest_bidder: KeyHash,
}

impl AuctionDatum {
    /// State written by the opening transaction: no bids, seller holds the
    /// highest-bidder slot.
    pub fn opening(seller: KeyHash, deadline: PosixMillis) -> Self {
        Self {
            seller,
            deadline,
            highest_bid: 0,
            highest_bidder: seller,
        }
    }

    /// Successor state after `bidder` bids `amount`.
    pub fn outbid(&self, amount: Lovelace, bidder: KeyHash) -> Self {
        Self {
            seller: self.seller,
            deadline: self.deadline,
            highest_bid: amount,
            highest_bidder: bidder,
        }
    }

    /// Whether replacing this state owes the current highest bidder a refund.
    pub fn refund_due(&self) -> bool {
        self.highest_bid != 0 && self.highest_bidder != self.seller
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.highest_bid == 0 && self.highest_bidder != self.seller {
            return Err(DecodeError::ZeroBidForeignBidder);
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DATUM_LEN);
        out.extend_from_slice(&self.seller.0);
        out.extend_from_slice(&self.deadline.to_le_bytes());
        out.extend_from_slice(&self.highest_bid.to_le_bytes());
        out.extend_from_slice(&self.highest_bidder.0);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != DATUM_LEN {
            return Err(DecodeError::InvalidLength {
                expected: DATUM_LEN,
                got: bytes.len(),
            });
        }
        let datum: Self =
            borsh::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        datum.validate()?;
        Ok(datum)
    }

    /// Decode the optional inline datum of a ledger output.
    pub fn decode_inline(datum: Option<&[u8]>) -> Result<Self, DecodeError> {
        Self::decode(datum.ok_or(DecodeError::MissingDatum)?)
    }
}

/// Action tag supplied when spending the auction output.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionRedeemer {
    /// Replace the highest bid
    PlaceBid { amount: Lovelace, bidder: KeyHash },
    /// Settle to the seller after the deadline
    CloseAuction,
}

impl AuctionRedeemer {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::PlaceBid { amount, bidder } => {
                let mut out = Vec::with_capacity(PLACE_BID_LEN);
                out.push(PLACE_BID_TAG);
                out.extend_from_slice(&amount.to_le_bytes());
                out.extend_from_slice(&bidder.0);
                out
            }
            Self::CloseAuction => vec![CLOSE_AUCTION_TAG],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        borsh::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}
