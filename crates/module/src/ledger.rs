//! Ledger client interface.
//!
//! The ledger is the only serialization point of the protocol: an output can
//! be consumed by at most one confirmed transaction, which acts as a
//! compare-and-swap on the auction's output reference.

use std::time::Duration;

use async_trait::async_trait;
use auction_types::{Address, LedgerOutput, OutputRef, TxId, TxPlan};
use thiserror::Error;
use tracing::warn;

use crate::error::AuctionError;

/// Errors returned when submitting a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Input {0} already consumed")]
    InputConsumed(OutputRef),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Error returned when querying ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Ledger query failed: {0}")]
pub struct QueryError(pub String);

/// Capabilities the protocol consumes from the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// All outputs currently unspent at `address`.
    async fn query_outputs_at(&self, address: &Address) -> Result<Vec<LedgerOutput>, QueryError>;

    /// Submit a plan and wait for confirmation.
    async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxId, SubmitError>;
}

/// Query with a bounded wait.
pub async fn query_bounded(
    ledger: &dyn LedgerClient,
    address: &Address,
    limit: Duration,
) -> Result<Vec<LedgerOutput>, AuctionError> {
    match tokio::time::timeout(limit, ledger.query_outputs_at(address)).await {
        Ok(Ok(outputs)) => Ok(outputs),
        Ok(Err(e)) => Err(AuctionError::LedgerUnavailable(e.to_string())),
        Err(_) => Err(AuctionError::LedgerUnavailable(format!(
            "query timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Submit with a bounded wait.
///
/// A timeout leaves the outcome unknown: the transaction may still confirm, so
/// it is reported as [`AuctionError::CommitUnknown`] and must not be resubmitted
/// blindly.
pub async fn submit_bounded(
    ledger: &dyn LedgerClient,
    plan: &TxPlan,
    limit: Duration,
) -> Result<TxId, AuctionError> {
    match tokio::time::timeout(limit, ledger.submit_transaction(plan)).await {
        Ok(Ok(tx_id)) => Ok(tx_id),
        Ok(Err(SubmitError::InputConsumed(out_ref))) => Err(AuctionError::Conflict(out_ref)),
        Ok(Err(SubmitError::Rejected(reason))) => Err(AuctionError::Ledger(reason)),
        Ok(Err(SubmitError::Transport(reason))) => {
            // The request may have reached the ledger before the transport failed.
            Err(AuctionError::CommitUnknown(reason))
        }
        Err(_) => {
            warn!(
                consumes = ?plan.consumes().map(|r| r.to_string()),
                timeout_ms = limit.as_millis() as u64,
                "Submission timed out, outcome unknown"
            );
            Err(AuctionError::CommitUnknown(format!(
                "submission timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
