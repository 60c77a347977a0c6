//! Ledger and mirror access over the mock chain's JSON-RPC interface.

use std::time::Duration;

use async_trait::async_trait;
use auction_module::{LedgerClient, MirrorError, MirrorStore, QueryError, SubmitError};
use auction_types::{
    Address, AuctionDraft, AuctionRecord, AuctionUpdate, LedgerOutput, OutputRef, TxId, TxPlan,
};
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::{Deserialize, Serialize};

/// Generic server-side failure.
pub const SERVER_ERROR_CODE: i32 = -32000;

/// The submitted transaction spends an output that is already consumed. The
/// error data carries the output reference as text.
pub const INPUT_CONSUMED_CODE: i32 = -32001;

/// Chain summary returned by `chain_getInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub height: u64,
    pub utxo_count: u64,
    pub script_address: Address,
}

/// Client for a mock chain node, usable as both ledger and mirror.
#[derive(Clone, Debug)]
pub struct RpcChain {
    client: HttpClient,
}

impl RpcChain {
    /// Connect to `url`, bounding every request by `timeout`.
    pub fn connect(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(url)?;
        Ok(Self { client })
    }

    pub async fn chain_info(&self) -> Result<ChainInfo, ClientError> {
        self.client.request("chain_getInfo", rpc_params![]).await
    }

    /// Switch mirror writes on the node off or back on.
    pub async fn set_mirror_writes(&self, enabled: bool) -> Result<bool, ClientError> {
        self.client
            .request("admin_setMirrorWrites", rpc_params![enabled])
            .await
    }
}

/// Map a failed submission to the ledger's error kinds.
pub fn submit_error(err: ClientError) -> SubmitError {
    match err {
        ClientError::Call(obj) if obj.code() == INPUT_CONSUMED_CODE => {
            let consumed = obj
                .data()
                .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
                .and_then(|text| text.parse::<OutputRef>().ok());
            match consumed {
                Some(out_ref) => SubmitError::InputConsumed(out_ref),
                None => SubmitError::Rejected(obj.message().to_string()),
            }
        }
        ClientError::Call(obj) => SubmitError::Rejected(obj.message().to_string()),
        other => SubmitError::Transport(other.to_string()),
    }
}

fn mirror_error(err: ClientError) -> MirrorError {
    MirrorError::Unavailable(err.to_string())
}

#[async_trait]
impl LedgerClient for RpcChain {
    async fn query_outputs_at(&self, address: &Address) -> Result<Vec<LedgerOutput>, QueryError> {
        self.client
            .request("ledger_queryOutputsAt", rpc_params![address])
            .await
            .map_err(|e| QueryError(e.to_string()))
    }

    async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxId, SubmitError> {
        self.client
            .request("ledger_submitTransaction", rpc_params![plan])
            .await
            .map_err(submit_error)
    }
}

#[async_trait]
impl MirrorStore for RpcChain {
    async fn get_auction_by_id(&self, id: u64) -> Result<Option<AuctionRecord>, MirrorError> {
        self.client
            .request("mirror_getAuction", rpc_params![id])
            .await
            .map_err(mirror_error)
    }

    async fn list_open_auctions(&self) -> Result<Vec<AuctionRecord>, MirrorError> {
        self.client
            .request("mirror_listOpenAuctions", rpc_params![])
            .await
            .map_err(mirror_error)
    }

    async fn insert_auction(&self, draft: AuctionDraft) -> Result<AuctionRecord, MirrorError> {
        self.client
            .request("mirror_insertAuction", rpc_params![draft])
            .await
            .map_err(mirror_error)
    }

    async fn update_auction(
        &self,
        id: u64,
        update: AuctionUpdate,
    ) -> Result<AuctionRecord, MirrorError> {
        self.client
            .request("mirror_updateAuction", rpc_params![id, update])
            .await
            .map_err(mirror_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::types::ErrorObjectOwned;

    #[test]
    fn test_consumed_input_recovered_from_error_data() {
        let out_ref = OutputRef::new(TxId([7; 32]), 1);
        let err = ClientError::Call(ErrorObjectOwned::owned(
            INPUT_CONSUMED_CODE,
            "input consumed",
            Some(out_ref.to_string()),
        ));
        assert_eq!(submit_error(err), SubmitError::InputConsumed(out_ref));
    }

    #[test]
    fn test_other_call_errors_are_rejections() {
        let err = ClientError::Call(ErrorObjectOwned::owned(
            SERVER_ERROR_CODE,
            "bid not signed by bidder",
            None::<()>,
        ));
        assert_eq!(
            submit_error(err),
            SubmitError::Rejected("bid not signed by bidder".into())
        );

        let garbled = ClientError::Call(ErrorObjectOwned::owned(
            INPUT_CONSUMED_CODE,
            "input consumed",
            Some("not-a-ref"),
        ));
        assert!(matches!(submit_error(garbled), SubmitError::Rejected(_)));
    }

    #[test]
    fn test_timeouts_are_transport_errors() {
        assert!(matches!(
            submit_error(ClientError::RequestTimeout),
            SubmitError::Transport(_)
        ));
    }
}
