//! RPC-facing types for the mock chain.
//!
//! Ledger and mirror payloads reuse the serde forms of the core types, with
//! byte fields hex-encoded.

use auction_module::SubmitError;
use auction_types::Address;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

/// Generic server-side failure.
pub const SERVER_ERROR_CODE: i32 = -32000;

/// Submission spent an already consumed output; data is the output reference.
pub const INPUT_CONSUMED_CODE: i32 = -32001;

/// Chain info response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Confirmed transactions so far
    pub height: u64,
    pub utxo_count: u64,
    /// Address holding live auction outputs
    pub script_address: Address,
}

pub fn rpc_error(msg: impl ToString) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(SERVER_ERROR_CODE, msg.to_string(), None::<()>)
}

/// Map a rejected submission, keeping consumed inputs recoverable.
pub fn submit_error(err: SubmitError) -> ErrorObjectOwned {
    match &err {
        SubmitError::InputConsumed(out_ref) => ErrorObjectOwned::owned(
            INPUT_CONSUMED_CODE,
            err.to_string(),
            Some(out_ref.to_string()),
        ),
        SubmitError::Rejected(_) | SubmitError::Transport(_) => rpc_error(err),
    }
}
