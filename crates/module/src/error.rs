//! Auction protocol error types.

use thiserror::Error;

use auction_types::{DecodeError, Lovelace, OutputRef, PosixMillis};

/// Errors surfaced by the auction protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuctionError {
    #[error("Auction not found: {0}")]
    NotFound(u64),

    #[error("Stale reference: output {0} is no longer live")]
    StaleReference(OutputRef),

    #[error("Invalid on-chain state: {0}")]
    Decode(#[from] DecodeError),

    #[error("Auction ended at {deadline}")]
    AuctionEnded { deadline: PosixMillis },

    #[error("Auction not ended, deadline is {deadline}")]
    AuctionNotEnded { deadline: PosixMillis },

    #[error("Bid too low: {got} is below current {highest_bid} plus increment {min_increment}")]
    BidTooLow {
        highest_bid: Lovelace,
        min_increment: Lovelace,
        got: Lovelace,
    },

    #[error("Not authorized: only the seller may close")]
    Unauthorized,

    #[error("Deadline {deadline} is not in the future")]
    InvalidDeadline { deadline: PosixMillis },

    #[error("Lost race for output {0}")]
    Conflict(OutputRef),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Submission outcome unknown: {0}")]
    CommitUnknown(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger rejected transaction: {0}")]
    Ledger(String),

    #[error("Mirror error: {0}")]
    Mirror(String),
}

impl AuctionError {
    /// Whether the caller may refresh ground truth and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::StaleReference(_))
    }
}
