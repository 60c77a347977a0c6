//! Mock chain server for local testing of the UTXO auction.
//!
//! This provides a JSON-RPC server hosting an in-memory ledger, which
//! enforces single consumption of outputs and the auction script rules, next
//! to an in-memory mirror of auction records.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::Server;
use jsonrpsee::types::ErrorObjectOwned;
use tracing::{info, warn};

use auction_module::{LedgerClient, MemoryLedger, MemoryMirror, MirrorStore, ProtocolConfig};
use auction_types::{
    Address, AuctionDraft, AuctionRecord, AuctionUpdate, LedgerOutput, TxId, TxPlan,
};

mod types;
use types::*;

#[derive(Parser)]
#[command(name = "mock-chain")]
#[command(about = "Mock ledger and mirror node for the UTXO auction")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9944")]
    listen: SocketAddr,

    /// Protocol configuration file (JSON) for the script address
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Shared chain state.
struct ChainState {
    ledger: MemoryLedger,
    mirror: MemoryMirror,
    script_address: Address,
}

impl ChainState {
    fn new(script_address: Address) -> Self {
        Self {
            ledger: MemoryLedger::new(),
            mirror: MemoryMirror::new(),
            script_address,
        }
    }
}

/// RPC API definition for the mock chain.
#[rpc(server)]
pub trait MockChainApi {
    // ============ Admin Methods ============

    /// Enable or disable mirror writes (for drift testing).
    #[method(name = "admin_setMirrorWrites")]
    async fn admin_set_mirror_writes(&self, enabled: bool) -> Result<bool, ErrorObjectOwned>;

    // ============ Ledger Methods ============

    /// Unspent outputs at an address.
    #[method(name = "ledger_queryOutputsAt")]
    async fn ledger_query_outputs_at(
        &self,
        address: Address,
    ) -> Result<Vec<LedgerOutput>, ErrorObjectOwned>;

    /// Validate and confirm a transaction plan.
    #[method(name = "ledger_submitTransaction")]
    async fn ledger_submit_transaction(&self, plan: TxPlan) -> Result<TxId, ErrorObjectOwned>;

    // ============ Mirror Methods ============

    #[method(name = "mirror_getAuction")]
    async fn mirror_get_auction(
        &self,
        auction_id: u64,
    ) -> Result<Option<AuctionRecord>, ErrorObjectOwned>;

    #[method(name = "mirror_listOpenAuctions")]
    async fn mirror_list_open_auctions(&self) -> Result<Vec<AuctionRecord>, ErrorObjectOwned>;

    #[method(name = "mirror_insertAuction")]
    async fn mirror_insert_auction(
        &self,
        draft: AuctionDraft,
    ) -> Result<AuctionRecord, ErrorObjectOwned>;

    #[method(name = "mirror_updateAuction")]
    async fn mirror_update_auction(
        &self,
        auction_id: u64,
        update: AuctionUpdate,
    ) -> Result<AuctionRecord, ErrorObjectOwned>;

    // ============ Query Methods ============

    /// Get current chain info.
    #[method(name = "chain_getInfo")]
    async fn chain_get_info(&self) -> Result<ChainInfo, ErrorObjectOwned>;
}

/// Implementation of the mock chain RPC server.
struct MockChainServer {
    state: Arc<ChainState>,
}

impl MockChainServer {
    fn new(script_address: Address) -> Self {
        Self {
            state: Arc::new(ChainState::new(script_address)),
        }
    }
}

#[async_trait]
impl MockChainApiServer for MockChainServer {
    async fn admin_set_mirror_writes(&self, enabled: bool) -> Result<bool, ErrorObjectOwned> {
        self.state.mirror.set_fail_writes(!enabled);
        warn!(enabled, "Mirror writes toggled");
        Ok(enabled)
    }

    async fn ledger_query_outputs_at(
        &self,
        address: Address,
    ) -> Result<Vec<LedgerOutput>, ErrorObjectOwned> {
        Ok(self.state.ledger.outputs_at(&address))
    }

    async fn ledger_submit_transaction(&self, plan: TxPlan) -> Result<TxId, ErrorObjectOwned> {
        match self.state.ledger.submit_transaction(&plan).await {
            Ok(tx_id) => {
                info!(
                    tx_id = %tx_id,
                    signer = %plan.required_signer,
                    outputs = plan.outputs.len(),
                    "Transaction confirmed"
                );
                Ok(tx_id)
            }
            Err(e) => {
                info!(signer = %plan.required_signer, error = %e, "Transaction rejected");
                Err(submit_error(e))
            }
        }
    }

    async fn mirror_get_auction(
        &self,
        auction_id: u64,
    ) -> Result<Option<AuctionRecord>, ErrorObjectOwned> {
        self.state
            .mirror
            .get_auction_by_id(auction_id)
            .await
            .map_err(rpc_error)
    }

    async fn mirror_list_open_auctions(&self) -> Result<Vec<AuctionRecord>, ErrorObjectOwned> {
        self.state.mirror.list_open_auctions().await.map_err(rpc_error)
    }

    async fn mirror_insert_auction(
        &self,
        draft: AuctionDraft,
    ) -> Result<AuctionRecord, ErrorObjectOwned> {
        let record = self
            .state
            .mirror
            .insert_auction(draft)
            .await
            .map_err(rpc_error)?;
        info!(auction_id = record.id, "Auction recorded");
        Ok(record)
    }

    async fn mirror_update_auction(
        &self,
        auction_id: u64,
        update: AuctionUpdate,
    ) -> Result<AuctionRecord, ErrorObjectOwned> {
        self.state
            .mirror
            .update_auction(auction_id, update)
            .await
            .map_err(rpc_error)
    }

    async fn chain_get_info(&self) -> Result<ChainInfo, ErrorObjectOwned> {
        Ok(ChainInfo {
            height: self.state.ledger.height(),
            utxo_count: self.state.ledger.utxo_count() as u64,
            script_address: self.state.script_address,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mock_chain=info".parse()?)
                .add_directive("jsonrpsee=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ProtocolConfig::from_json_file(path)?,
        None => ProtocolConfig::default(),
    };

    info!("Starting mock chain server on {}", args.listen);
    info!("Auction script address: {}", config.script_address());

    let server = Server::builder().build(args.listen).await?;
    let handle = server.start(MockChainServer::new(config.script_address()).into_rpc());

    info!("Mock chain server running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    handle.stop()?;
    handle.stopped().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_types::{
        AuctionDatum, AuctionMetadata, AuctionRedeemer, KeyHash, OutputRef, ScriptInput, TxOutput,
    };

    const SELLER: KeyHash = KeyHash([1; 28]);

    fn opening_plan(script: Address) -> TxPlan {
        TxPlan {
            script_input: None,
            outputs: vec![TxOutput::with_datum(
                script,
                2_000_000,
                AuctionDatum::opening(SELLER, 10_000).encode(),
            )],
            required_signer: SELLER,
        }
    }

    #[tokio::test]
    async fn test_double_spend_reports_consumed_input() {
        let script = ProtocolConfig::default().script_address();
        let server = MockChainServer::new(script);
        let tx = server
            .ledger_submit_transaction(opening_plan(script))
            .await
            .unwrap();
        let opening = OutputRef::new(tx, 0);

        let close = TxPlan {
            script_input: Some(ScriptInput {
                out_ref: opening,
                redeemer: AuctionRedeemer::CloseAuction,
            }),
            outputs: vec![TxOutput::payment(Address::key(script.network, SELLER), 2_000_000)],
            required_signer: SELLER,
        };
        server.ledger_submit_transaction(close.clone()).await.unwrap();

        let err = server.ledger_submit_transaction(close).await.unwrap_err();
        assert_eq!(err.code(), INPUT_CONSUMED_CODE);

        let info = server.chain_get_info().await.unwrap();
        assert_eq!(info.height, 2);
        assert_eq!(info.utxo_count, 1);
    }

    #[tokio::test]
    async fn test_mirror_writes_toggle() {
        let script = ProtocolConfig::default().script_address();
        let server = MockChainServer::new(script);
        let draft = AuctionDraft {
            metadata: AuctionMetadata::default(),
            min_bid: 2_000_000,
            seller: SELLER,
            deadline: 10_000,
            live_ref: OutputRef::new(TxId([1; 32]), 0),
            created_at: 0,
        };

        server.admin_set_mirror_writes(false).await.unwrap();
        let err = server.mirror_insert_auction(draft.clone()).await.unwrap_err();
        assert_eq!(err.code(), SERVER_ERROR_CODE);

        server.admin_set_mirror_writes(true).await.unwrap();
        let record = server.mirror_insert_auction(draft).await.unwrap();
        assert_eq!(
            server.mirror_list_open_auctions().await.unwrap(),
            vec![record]
        );
    }
}
