//! Auction service: the entry points used by the CLI and RPC front ends.

use std::sync::Arc;

use auction_types::{
    AuctionDatum, AuctionDraft, AuctionMetadata, AuctionRecord, KeyHash, Lovelace, OutputRef,
    PosixMillis, TxOutput, TxPlan,
};
use tracing::{info, warn};

use crate::bid::{BidProtocol, BidReceipt};
use crate::clock::Clock;
use crate::close::{CloseProtocol, CloseReceipt};
use crate::config::ProtocolConfig;
use crate::error::AuctionError;
use crate::ledger::{submit_bounded, LedgerClient};
use crate::mirror::MirrorStore;
use crate::reconcile::{AuctionRepository, ResolvedAuction};
use crate::resolver::PayoutResolver;

pub struct AuctionService {
    config: Arc<ProtocolConfig>,
    repo: AuctionRepository,
    bids: BidProtocol,
    close: CloseProtocol,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
}

impl AuctionService {
    pub fn new(
        config: ProtocolConfig,
        ledger: Arc<dyn LedgerClient>,
        mirror: Arc<dyn MirrorStore>,
        resolver: Arc<dyn PayoutResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            repo: AuctionRepository::new(&config, ledger.clone(), mirror),
            bids: BidProtocol::new(config.clone(), ledger.clone(), resolver.clone()),
            close: CloseProtocol::new(config.clone(), ledger.clone(), resolver),
            config,
            ledger,
            clock,
        }
    }

    /// Build a service using the payout policy from `config`.
    pub fn from_config(
        config: ProtocolConfig,
        ledger: Arc<dyn LedgerClient>,
        mirror: Arc<dyn MirrorStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = config.payout_resolver();
        Self::new(config, ledger, mirror, resolver, clock)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn repository(&self) -> &AuctionRepository {
        &self.repo
    }

    /// Open an auction by locking the minimum escrow at the script address.
    pub async fn create_auction(
        &self,
        seller: KeyHash,
        metadata: AuctionMetadata,
        deadline: PosixMillis,
        min_bid: Lovelace,
    ) -> Result<AuctionRecord, AuctionError> {
        let now = self.clock.now_ms();
        if deadline <= now {
            return Err(AuctionError::InvalidDeadline { deadline });
        }

        let datum = AuctionDatum::opening(seller, deadline);
        let plan = TxPlan {
            script_input: None,
            outputs: vec![TxOutput::with_datum(
                self.repo.script_address(),
                self.config.min_escrow,
                datum.encode(),
            )],
            required_signer: seller,
        };
        let tx_id = submit_bounded(self.ledger.as_ref(), &plan, self.config.ledger_timeout()).await?;
        let live_ref = OutputRef::new(tx_id, 0);

        let record = self
            .repo
            .insert_record(AuctionDraft {
                metadata,
                min_bid,
                seller,
                deadline,
                live_ref,
                created_at: now,
            })
            .await?;

        info!(
            auction_id = record.id,
            seller = %seller,
            deadline,
            live_ref = %live_ref,
            "Auction opened"
        );
        Ok(record)
    }

    /// Place a bid and return the new live output.
    pub async fn place_bid(
        &self,
        id: u64,
        bidder: KeyHash,
        amount: Lovelace,
    ) -> Result<OutputRef, AuctionError> {
        self.place_bid_receipt(id, bidder, amount)
            .await
            .map(|receipt| receipt.out_ref)
    }

    pub async fn place_bid_receipt(
        &self,
        id: u64,
        bidder: KeyHash,
        amount: Lovelace,
    ) -> Result<BidReceipt, AuctionError> {
        self.bids
            .place_bid(&self.repo, id, bidder, amount, self.clock.now_ms())
            .await
    }

    /// Place a bid, refreshing and retrying after a lost race.
    ///
    /// A stale reference is retried once; conflicts up to
    /// `max_bid_attempts` attempts in total.
    pub async fn place_bid_with_retry(
        &self,
        id: u64,
        bidder: KeyHash,
        amount: Lovelace,
    ) -> Result<OutputRef, AuctionError> {
        let mut attempt = 1;
        let mut stale_retried = false;
        loop {
            let err = match self.place_bid(id, bidder, amount).await {
                Ok(out_ref) => return Ok(out_ref),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.config.max_bid_attempts {
                return Err(err);
            }
            if matches!(err, AuctionError::StaleReference(_)) {
                if stale_retried {
                    return Err(err);
                }
                stale_retried = true;
            }

            warn!(auction_id = id, attempt, error = %err, "Bid lost, retrying with fresh state");
            self.repo.refresh(id).await?;
            attempt += 1;
        }
    }

    /// Settle an ended auction to its seller and return the payout output.
    pub async fn close_auction(
        &self,
        id: u64,
        caller: KeyHash,
    ) -> Result<OutputRef, AuctionError> {
        self.close_auction_receipt(id, caller)
            .await
            .map(|receipt| receipt.payout_ref)
    }

    pub async fn close_auction_receipt(
        &self,
        id: u64,
        caller: KeyHash,
    ) -> Result<CloseReceipt, AuctionError> {
        self.close
            .close_auction(&self.repo, id, caller, self.clock.now_ms())
            .await
    }

    pub async fn list_auctions(&self) -> Result<Vec<AuctionRecord>, AuctionError> {
        self.repo.list_auctions().await
    }

    pub async fn refresh(&self, id: u64) -> Result<AuctionRecord, AuctionError> {
        self.repo.refresh(id).await
    }

    /// Mirror row for `id`, regardless of status.
    pub async fn get_auction(&self, id: u64) -> Result<AuctionRecord, AuctionError> {
        self.repo.load(id).await
    }

    /// Mirror row and live on-chain state for an open auction.
    pub async fn resolve(&self, id: u64) -> Result<ResolvedAuction, AuctionError> {
        self.repo.resolve(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use auction_types::{Address, LedgerOutput, NetworkId, TxId};
    use tokio::sync::Barrier;

    use crate::clock::ManualClock;
    use crate::ledger::{QueryError, SubmitError};
    use crate::mirror::MemoryMirror;
    use crate::resolver::DerivedResolver;
    use crate::state::MemoryLedger;

    const SELLER: KeyHash = KeyHash([1; 28]);
    const BIDDER_B: KeyHash = KeyHash([2; 28]);
    const BIDDER_C: KeyHash = KeyHash([3; 28]);
    const DEADLINE: PosixMillis = 100_000;

    struct Harness {
        service: AuctionService,
        mirror: Arc<MemoryMirror>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: ProtocolConfig, ledger: Arc<dyn LedgerClient>) -> Harness {
        let mirror = Arc::new(MemoryMirror::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let service = AuctionService::new(
            config,
            ledger,
            mirror.clone(),
            Arc::new(DerivedResolver::new(NetworkId::Testnet)),
            clock.clone(),
        );
        Harness {
            service,
            mirror,
            clock,
        }
    }

    async fn open(h: &Harness) -> AuctionRecord {
        h.service
            .create_auction(SELLER, AuctionMetadata::default(), DEADLINE, 2_000_000)
            .await
            .unwrap()
    }

    /// Holds the first two submissions until both have arrived.
    struct GatedLedger {
        inner: MemoryLedger,
        armed: AtomicBool,
        barrier: Barrier,
    }

    #[async_trait]
    impl LedgerClient for GatedLedger {
        async fn query_outputs_at(
            &self,
            address: &Address,
        ) -> Result<Vec<LedgerOutput>, QueryError> {
            self.inner.query_outputs_at(address).await
        }

        async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxId, SubmitError> {
            if self.armed.load(Ordering::SeqCst) {
                self.barrier.wait().await;
                self.armed.store(false, Ordering::SeqCst);
            }
            self.inner.submit_transaction(plan).await
        }
    }

    /// Accepts queries but never answers a submission.
    struct SilentLedger {
        inner: MemoryLedger,
        silent: AtomicBool,
    }

    #[async_trait]
    impl LedgerClient for SilentLedger {
        async fn query_outputs_at(
            &self,
            address: &Address,
        ) -> Result<Vec<LedgerOutput>, QueryError> {
            self.inner.query_outputs_at(address).await
        }

        async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxId, SubmitError> {
            if self.silent.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            self.inner.submit_transaction(plan).await
        }
    }

    #[tokio::test]
    async fn test_create_rejects_past_deadline() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let result = h
            .service
            .create_auction(SELLER, AuctionMetadata::default(), 1_000, 0)
            .await;
        assert_eq!(result, Err(AuctionError::InvalidDeadline { deadline: 1_000 }));
        assert!(h.mirror.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_create_opens_with_escrow() {
        let ledger = Arc::new(MemoryLedger::new());
        let h = harness(ProtocolConfig::default(), ledger.clone());
        let record = open(&h).await;

        assert_eq!(record.highest_bid, 0);
        assert_eq!(record.highest_bidder, SELLER);
        assert_eq!(record.created_at, 1_000);

        let outputs = ledger.outputs_at(&h.service.config().script_address());
        assert_eq!(outputs.len(), 1);
        assert_eq!(Some(outputs[0].out_ref), record.live_ref);
        assert_eq!(outputs[0].value, 2_000_000);
    }

    #[tokio::test]
    async fn test_concurrent_bids_one_wins() {
        let ledger = Arc::new(GatedLedger {
            inner: MemoryLedger::new(),
            armed: AtomicBool::new(false),
            barrier: Barrier::new(2),
        });
        let h = harness(ProtocolConfig::default(), ledger.clone());
        let record = open(&h).await;
        ledger.armed.store(true, Ordering::SeqCst);

        let (b, c) = tokio::join!(
            h.service.place_bid(record.id, BIDDER_B, 5_000_000),
            h.service.place_bid(record.id, BIDDER_C, 6_000_000),
        );

        let (winner, amount) = match (&b, &c) {
            (Ok(_), Err(AuctionError::Conflict(_))) => (BIDDER_B, 5_000_000),
            (Err(AuctionError::Conflict(_)), Ok(_)) => (BIDDER_C, 6_000_000),
            other => panic!("expected exactly one winner, got {other:?}"),
        };

        let stored = h.service.get_auction(record.id).await.unwrap();
        assert_eq!(stored.highest_bidder, winner);
        assert_eq!(stored.highest_bid, amount);
        let resolved = h.service.resolve(record.id).await.unwrap();
        assert_eq!(resolved.output.datum.highest_bid, amount);
    }

    #[tokio::test]
    async fn test_submit_timeout_is_commit_unknown() {
        let ledger = Arc::new(SilentLedger {
            inner: MemoryLedger::new(),
            silent: AtomicBool::new(false),
        });
        let config = ProtocolConfig {
            ledger_timeout_ms: 20,
            ..Default::default()
        };
        let h = harness(config, ledger.clone());
        let record = open(&h).await;
        ledger.silent.store(true, Ordering::SeqCst);

        let result = h.service.place_bid(record.id, BIDDER_B, 5_000_000).await;
        assert!(matches!(result, Err(AuctionError::CommitUnknown(_))));
        assert_eq!(h.mirror.snapshot(), vec![record]);
    }

    #[tokio::test]
    async fn test_retry_repairs_stale_reference() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let record = open(&h).await;

        h.mirror.set_fail_writes(true);
        h.service
            .place_bid(record.id, BIDDER_B, 5_000_000)
            .await
            .unwrap();
        h.mirror.set_fail_writes(false);

        assert!(matches!(
            h.service.place_bid(record.id, BIDDER_C, 6_500_000).await,
            Err(AuctionError::StaleReference(_))
        ));

        let live = h
            .service
            .place_bid_with_retry(record.id, BIDDER_C, 6_500_000)
            .await
            .unwrap();
        let stored = h.service.get_auction(record.id).await.unwrap();
        assert_eq!(stored.live_ref, Some(live));
        assert_eq!(stored.highest_bidder, BIDDER_C);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_validation_errors() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let record = open(&h).await;
        h.clock.set(DEADLINE);
        assert_eq!(
            h.service
                .place_bid_with_retry(record.id, BIDDER_B, 5_000_000)
                .await,
            Err(AuctionError::AuctionEnded { deadline: DEADLINE })
        );
    }

    #[tokio::test]
    async fn test_close_marks_mirror_closed() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let record = open(&h).await;
        h.service
            .place_bid(record.id, BIDDER_B, 5_000_000)
            .await
            .unwrap();

        assert_eq!(
            h.service.close_auction(record.id, SELLER).await,
            Err(AuctionError::AuctionNotEnded { deadline: DEADLINE })
        );

        h.clock.advance(DEADLINE);
        let receipt = h
            .service
            .close_auction_receipt(record.id, SELLER)
            .await
            .unwrap();
        assert_eq!(receipt.payout.value, 5_000_000);
        assert!(h.service.list_auctions().await.unwrap().is_empty());
        assert_eq!(
            h.service.close_auction(record.id, SELLER).await,
            Err(AuctionError::NotFound(record.id))
        );
    }

    #[tokio::test]
    async fn test_close_drift_repaired_by_listing() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let record = open(&h).await;
        h.service
            .place_bid(record.id, BIDDER_B, 5_000_000)
            .await
            .unwrap();
        h.clock.advance(DEADLINE);

        h.mirror.set_fail_writes(true);
        h.service.close_auction(record.id, SELLER).await.unwrap();
        h.mirror.set_fail_writes(false);
        assert!(h.service.get_auction(record.id).await.unwrap().is_open());

        assert!(h.service.list_auctions().await.unwrap().is_empty());
        assert!(!h.service.get_auction(record.id).await.unwrap().is_open());
        assert_eq!(
            h.service.close_auction(record.id, SELLER).await,
            Err(AuctionError::NotFound(record.id))
        );
        assert_eq!(
            h.service.refresh(record.id).await,
            Err(AuctionError::NotFound(record.id))
        );
    }

    #[tokio::test]
    async fn test_close_after_drift_reports_not_found() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let record = open(&h).await;
        h.clock.advance(DEADLINE);

        h.mirror.set_fail_writes(true);
        h.service.close_auction(record.id, SELLER).await.unwrap();
        h.mirror.set_fail_writes(false);

        // A second close repairs the row instead of reporting a stale reference.
        assert_eq!(
            h.service.close_auction(record.id, SELLER).await,
            Err(AuctionError::NotFound(record.id))
        );
        assert!(!h.service.get_auction(record.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_close_follows_unmirrored_bid() {
        let h = harness(ProtocolConfig::default(), Arc::new(MemoryLedger::new()));
        let record = open(&h).await;

        h.mirror.set_fail_writes(true);
        h.service
            .place_bid(record.id, BIDDER_B, 5_000_000)
            .await
            .unwrap();
        h.mirror.set_fail_writes(false);

        h.clock.advance(DEADLINE);
        let receipt = h
            .service
            .close_auction_receipt(record.id, SELLER)
            .await
            .unwrap();
        assert_eq!(receipt.payout.value, 5_000_000);
        assert!(!h.service.get_auction(record.id).await.unwrap().is_open());
    }
}
