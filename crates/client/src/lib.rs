//! Client SDK for the UTXO auction.
//!
//! [`RpcChain`] talks to a mock chain node and implements both the ledger and
//! the mirror interfaces, so an [`auction_module::AuctionService`] can run
//! against a remote node exactly as it does against the in-memory stores.

pub mod rpc;

pub use rpc::{ChainInfo, RpcChain, INPUT_CONSUMED_CODE, SERVER_ERROR_CODE};
