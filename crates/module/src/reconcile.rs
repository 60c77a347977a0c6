//! Reconciliation between the ledger and the mirror.
//!
//! The ledger is authoritative. Mirror rows only say where to look: every
//! mutating action re-reads the live output before acting, and the mirror is
//! rewritten after a confirmed commit on a best-effort basis.

use std::sync::Arc;
use std::time::Duration;

use auction_types::{
    Address, AuctionDatum, AuctionDraft, AuctionRecord, AuctionUpdate, LedgerOutput, Lovelace,
    OutputRef,
};
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::error::AuctionError;
use crate::ledger::{query_bounded, LedgerClient};
use crate::mirror::MirrorStore;

/// A live auction output decoded from the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub out_ref: OutputRef,
    pub value: Lovelace,
    pub datum: AuctionDatum,
}

impl ResolvedOutput {
    fn decode(output: &LedgerOutput) -> Result<Self, AuctionError> {
        let datum = AuctionDatum::decode_inline(output.datum.as_deref())?;
        Ok(Self {
            out_ref: output.out_ref,
            value: output.value,
            datum,
        })
    }
}

/// Mirror row together with the ground truth it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAuction {
    pub record: AuctionRecord,
    pub output: ResolvedOutput,
}

/// Where a mirror row stands against one ledger snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciled {
    Live(ResolvedOutput),
    /// The output was consumed without a successor, which only a close does.
    Closed,
}

/// Read-through view of auctions over the ledger and the mirror.
pub struct AuctionRepository {
    ledger: Arc<dyn LedgerClient>,
    mirror: Arc<dyn MirrorStore>,
    script_address: Address,
    timeout: Duration,
}

impl AuctionRepository {
    pub fn new(
        config: &ProtocolConfig,
        ledger: Arc<dyn LedgerClient>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Self {
        Self {
            ledger,
            mirror,
            script_address: config.script_address(),
            timeout: config.ledger_timeout(),
        }
    }

    pub fn script_address(&self) -> Address {
        self.script_address
    }

    // =========================
    // MIRROR READS
    // =========================

    /// Load a mirror row.
    pub async fn load(&self, id: u64) -> Result<AuctionRecord, AuctionError> {
        self.mirror
            .get_auction_by_id(id)
            .await
            .map_err(|e| AuctionError::Mirror(e.to_string()))?
            .ok_or(AuctionError::NotFound(id))
    }

    /// Load an open row and its live reference.
    pub async fn load_live(&self, id: u64) -> Result<(AuctionRecord, OutputRef), AuctionError> {
        let record = self.load(id).await?;
        match record.live_ref {
            Some(live_ref) if record.is_open() => Ok((record, live_ref)),
            _ => Err(AuctionError::NotFound(id)),
        }
    }

    // =========================
    // LEDGER READS
    // =========================

    /// Every output currently held at the script address.
    pub async fn script_outputs(&self) -> Result<Vec<LedgerOutput>, AuctionError> {
        query_bounded(self.ledger.as_ref(), &self.script_address, self.timeout).await
    }

    /// Locate and decode the output at `out_ref`.
    pub async fn resolve_utxo(&self, out_ref: &OutputRef) -> Result<ResolvedOutput, AuctionError> {
        let outputs = self.script_outputs().await?;
        let output = outputs
            .iter()
            .find(|o| &o.out_ref == out_ref)
            .ok_or(AuctionError::StaleReference(*out_ref))?;
        ResolvedOutput::decode(output)
    }

    /// Load an auction and resolve its live output.
    pub async fn resolve(&self, id: u64) -> Result<ResolvedAuction, AuctionError> {
        let (record, live_ref) = self.load_live(id).await?;
        let output = self.resolve_utxo(&live_ref).await?;
        Ok(ResolvedAuction { record, output })
    }

    // =========================
    // DRIFT REPAIR
    // =========================

    /// Find the output `record` should point at within `outputs`.
    ///
    /// The referenced output wins when it is still live. Otherwise the record
    /// follows exactly one output with the same seller and deadline whose bid
    /// is at least the mirrored one. When no output with that seller and
    /// deadline remains at all, the auction has been closed.
    pub fn reconcile_against(
        record: &AuctionRecord,
        outputs: &[LedgerOutput],
    ) -> Result<Reconciled, AuctionError> {
        let live_ref = record.live_ref.ok_or(AuctionError::NotFound(record.id))?;

        if let Some(output) = outputs.iter().find(|o| o.out_ref == live_ref) {
            return ResolvedOutput::decode(output).map(Reconciled::Live);
        }

        let candidates: Vec<ResolvedOutput> = outputs
            .iter()
            .filter_map(|o| ResolvedOutput::decode(o).ok())
            .filter(|r| r.datum.seller == record.seller && r.datum.deadline == record.deadline)
            .collect();
        if candidates.is_empty() {
            return Ok(Reconciled::Closed);
        }

        let mut successors = candidates
            .into_iter()
            .filter(|r| r.datum.highest_bid >= record.highest_bid);
        match (successors.next(), successors.next()) {
            (Some(only), None) => Ok(Reconciled::Live(only)),
            _ => Err(AuctionError::StaleReference(live_ref)),
        }
    }

    /// Re-read ground truth for one auction and rewrite its mirror row.
    ///
    /// An auction found closed on the ledger is marked closed and reported
    /// as [`AuctionError::NotFound`].
    pub async fn refresh(&self, id: u64) -> Result<AuctionRecord, AuctionError> {
        let (record, _) = self.load_live(id).await?;
        let outputs = self.script_outputs().await?;
        match Self::reconcile_against(&record, &outputs)? {
            Reconciled::Live(resolved) => self
                .sync_row(record, &resolved)
                .await
                .map_err(|e| AuctionError::Mirror(e.to_string())),
            Reconciled::Closed => {
                info!(auction_id = id, "Live output consumed by a close, marking row closed");
                self.mirror
                    .update_auction(id, AuctionUpdate::Closed)
                    .await
                    .map_err(|e| AuctionError::Mirror(e.to_string()))?;
                Err(AuctionError::NotFound(id))
            }
        }
    }

    /// Write `resolved` into the row if it differs.
    async fn sync_row(
        &self,
        record: AuctionRecord,
        resolved: &ResolvedOutput,
    ) -> Result<AuctionRecord, crate::mirror::MirrorError> {
        let update = AuctionUpdate::from_datum(resolved.out_ref, &resolved.datum);
        let mut expected = record.clone();
        expected.apply(&update);
        if expected == record {
            return Ok(record);
        }

        info!(
            auction_id = record.id,
            from = ?record.live_ref.map(|r| r.to_string()),
            to = %resolved.out_ref,
            highest_bid = resolved.datum.highest_bid,
            "Repointing mirror row"
        );
        self.mirror.update_auction(record.id, update).await
    }

    // =========================
    // MIRROR WRITES
    // =========================

    /// Store the row for a freshly opened auction.
    pub async fn insert_record(&self, draft: AuctionDraft) -> Result<AuctionRecord, AuctionError> {
        let live_ref = draft.live_ref;
        self.mirror.insert_auction(draft).await.map_err(|e| {
            warn!(live_ref = %live_ref, error = %e, "Mirror drift: opened auction not recorded");
            AuctionError::Mirror(format!("{e} (auction opened at {live_ref})"))
        })
    }

    /// Record a confirmed bid. Failures are logged and not returned.
    pub async fn mirror_after_commit(
        &self,
        record: &AuctionRecord,
        new_ref: OutputRef,
        datum: &AuctionDatum,
    ) {
        let update = AuctionUpdate::from_datum(new_ref, datum);
        match self.mirror.update_auction(record.id, update).await {
            Ok(_) => debug!(auction_id = record.id, live_ref = %new_ref, "Mirror updated"),
            Err(e) => warn!(
                auction_id = record.id,
                live_ref = %new_ref,
                highest_bid = datum.highest_bid,
                error = %e,
                "Mirror drift: bid confirmed on-chain but not mirrored"
            ),
        }
    }

    /// Record a confirmed close. Failures are logged and not returned.
    pub async fn mirror_close(&self, record: &AuctionRecord) {
        match self.mirror.update_auction(record.id, AuctionUpdate::Closed).await {
            Ok(_) => debug!(auction_id = record.id, "Mirror marked closed"),
            Err(e) => warn!(
                auction_id = record.id,
                error = %e,
                "Mirror drift: close confirmed on-chain but not mirrored"
            ),
        }
    }

    // =========================
    // LISTING
    // =========================

    /// Open auctions, newest first, reconciled against one ledger snapshot.
    ///
    /// When the ledger cannot be reached the mirror rows are returned as-is.
    pub async fn list_auctions(&self) -> Result<Vec<AuctionRecord>, AuctionError> {
        let rows = self
            .mirror
            .list_open_auctions()
            .await
            .map_err(|e| AuctionError::Mirror(e.to_string()))?;

        let mut listed = match self.script_outputs().await {
            Ok(outputs) => {
                let mut listed = Vec::with_capacity(rows.len());
                for row in rows {
                    if let Some(view) = self.refresh_row(row, &outputs).await {
                        listed.push(view);
                    }
                }
                listed
            }
            Err(e) => {
                warn!(error = %e, "Listing from mirror without ledger refresh");
                rows
            }
        };

        listed.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(listed)
    }

    /// Reconciled view of an open row, or `None` once it is closed.
    async fn refresh_row(
        &self,
        row: AuctionRecord,
        outputs: &[LedgerOutput],
    ) -> Option<AuctionRecord> {
        let resolved = match Self::reconcile_against(&row, outputs) {
            Ok(Reconciled::Live(resolved)) => resolved,
            Ok(Reconciled::Closed) => {
                info!(auction_id = row.id, "Live output consumed by a close, marking row closed");
                self.mirror_close(&row).await;
                return None;
            }
            Err(e) => {
                warn!(auction_id = row.id, error = %e, "Cannot reconcile mirror row");
                return Some(row);
            }
        };

        let update = AuctionUpdate::from_datum(resolved.out_ref, &resolved.datum);
        let mut view = row.clone();
        view.apply(&update);
        if let Err(e) = self.sync_row(row, &resolved).await {
            warn!(auction_id = view.id, error = %e, "Mirror drift persists after listing refresh");
        }
        Some(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MemoryMirror;
    use crate::state::MemoryLedger;
    use auction_types::{
        AuctionMetadata, AuctionRedeemer, KeyHash, ScriptInput, TxId, TxOutput, TxPlan,
    };

    const SELLER: KeyHash = KeyHash([1; 28]);
    const BIDDER: KeyHash = KeyHash([2; 28]);

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        mirror: Arc<MemoryMirror>,
        repo: AuctionRepository,
    }

    fn fixture() -> Fixture {
        let config = ProtocolConfig::default();
        let ledger = Arc::new(MemoryLedger::new());
        let mirror = Arc::new(MemoryMirror::new());
        let repo = AuctionRepository::new(&config, ledger.clone(), mirror.clone());
        Fixture {
            ledger,
            mirror,
            repo,
        }
    }

    fn output(out_ref: OutputRef, address: Address, datum: &AuctionDatum) -> LedgerOutput {
        LedgerOutput {
            out_ref,
            address,
            value: datum.highest_bid.max(2_000_000),
            datum: Some(datum.encode()),
        }
    }

    async fn open(f: &Fixture, created_at: i64) -> AuctionRecord {
        let datum = AuctionDatum::opening(SELLER, 10_000);
        let tx = f
            .ledger
            .submit_transaction(&TxPlan {
                script_input: None,
                outputs: vec![TxOutput::with_datum(
                    f.repo.script_address(),
                    2_000_000,
                    datum.encode(),
                )],
                required_signer: SELLER,
            })
            .await
            .unwrap();
        f.repo
            .insert_record(AuctionDraft {
                metadata: AuctionMetadata::default(),
                min_bid: 2_000_000,
                seller: SELLER,
                deadline: 10_000,
                live_ref: OutputRef::new(tx, 0),
                created_at,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_live_output() {
        let f = fixture();
        let record = open(&f, 1).await;
        let resolved = f.repo.resolve(record.id).await.unwrap();
        assert_eq!(resolved.output.datum, AuctionDatum::opening(SELLER, 10_000));
        assert_eq!(resolved.output.value, 2_000_000);
    }

    #[tokio::test]
    async fn test_resolve_unknown_reference_is_stale() {
        let f = fixture();
        open(&f, 1).await;
        let ghost = OutputRef::new(TxId([0xcc; 32]), 0);
        assert_eq!(
            f.repo.resolve_utxo(&ghost).await,
            Err(AuctionError::StaleReference(ghost))
        );
    }

    #[tokio::test]
    async fn test_unknown_or_closed_is_not_found() {
        let f = fixture();
        assert_eq!(f.repo.resolve(42).await, Err(AuctionError::NotFound(42)));

        let record = open(&f, 1).await;
        f.repo.mirror_close(&record).await;
        assert_eq!(
            f.repo.resolve(record.id).await,
            Err(AuctionError::NotFound(record.id))
        );
    }

    #[test]
    fn test_reconcile_follows_single_successor() {
        let f = fixture();
        let address = f.repo.script_address();
        let record = AuctionRecord::from_draft(
            1,
            AuctionDraft {
                metadata: AuctionMetadata::default(),
                min_bid: 0,
                seller: SELLER,
                deadline: 10_000,
                live_ref: OutputRef::new(TxId([1; 32]), 0),
                created_at: 0,
            },
        );
        let next = AuctionDatum::opening(SELLER, 10_000).outbid(5_000_000, BIDDER);
        let next_ref = OutputRef::new(TxId([2; 32]), 0);
        let other = AuctionDatum::opening(SELLER, 20_000);

        let outputs = vec![
            output(next_ref, address, &next),
            output(OutputRef::new(TxId([3; 32]), 0), address, &other),
        ];
        let Reconciled::Live(resolved) =
            AuctionRepository::reconcile_against(&record, &outputs).unwrap()
        else {
            panic!("expected a live successor");
        };
        assert_eq!(resolved.out_ref, next_ref);
        assert_eq!(resolved.datum, next);

        // Two candidates are ambiguous.
        let twin = OutputRef::new(TxId([4; 32]), 0);
        let mut ambiguous = outputs.clone();
        ambiguous.push(output(twin, address, &next));
        assert_eq!(
            AuctionRepository::reconcile_against(&record, &ambiguous),
            Err(AuctionError::StaleReference(OutputRef::new(TxId([1; 32]), 0)))
        );
    }

    #[test]
    fn test_reconcile_ignores_lower_bids() {
        let f = fixture();
        let address = f.repo.script_address();
        let mut record = AuctionRecord::from_draft(
            1,
            AuctionDraft {
                metadata: AuctionMetadata::default(),
                min_bid: 0,
                seller: SELLER,
                deadline: 10_000,
                live_ref: OutputRef::new(TxId([1; 32]), 0),
                created_at: 0,
            },
        );
        record.highest_bid = 7_000_000;
        let lower = AuctionDatum::opening(SELLER, 10_000).outbid(5_000_000, BIDDER);
        let outputs = vec![output(OutputRef::new(TxId([2; 32]), 0), address, &lower)];
        assert!(matches!(
            AuctionRepository::reconcile_against(&record, &outputs),
            Err(AuctionError::StaleReference(_))
        ));
    }

    #[tokio::test]
    async fn test_mirror_failure_is_swallowed() {
        let f = fixture();
        let record = open(&f, 1).await;
        f.mirror.set_fail_writes(true);

        let datum = AuctionDatum::opening(SELLER, 10_000).outbid(5_000_000, BIDDER);
        f.repo
            .mirror_after_commit(&record, OutputRef::new(TxId([9; 32]), 0), &datum)
            .await;
        f.repo.mirror_close(&record).await;

        assert_eq!(f.repo.load(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let f = fixture();
        let a = open(&f, 5).await;
        let b = open(&f, 9).await;
        let c = open(&f, 9).await;

        let ids: Vec<u64> = f
            .repo
            .list_auctions()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn test_reconcile_without_candidates_is_closed() {
        let f = fixture();
        let address = f.repo.script_address();
        let record = AuctionRecord::from_draft(
            1,
            AuctionDraft {
                metadata: AuctionMetadata::default(),
                min_bid: 0,
                seller: SELLER,
                deadline: 10_000,
                live_ref: OutputRef::new(TxId([1; 32]), 0),
                created_at: 0,
            },
        );
        let unrelated = AuctionDatum::opening(BIDDER, 10_000);
        let outputs = vec![output(OutputRef::new(TxId([2; 32]), 0), address, &unrelated)];
        assert_eq!(
            AuctionRepository::reconcile_against(&record, &outputs),
            Ok(Reconciled::Closed)
        );
    }

    #[tokio::test]
    async fn test_unmirrored_close_repaired_by_listing() {
        let f = fixture();
        let record = open(&f, 1).await;
        let live_ref = record.live_ref.unwrap();

        // Closed on the ledger while the mirror is down
        f.mirror.set_fail_writes(true);
        f.ledger
            .submit_transaction(&TxPlan {
                script_input: Some(ScriptInput {
                    out_ref: live_ref,
                    redeemer: AuctionRedeemer::CloseAuction,
                }),
                outputs: vec![TxOutput::payment(
                    Address::key(f.repo.script_address().network, SELLER),
                    2_000_000,
                )],
                required_signer: SELLER,
            })
            .await
            .unwrap();
        f.repo.mirror_close(&record).await;
        f.mirror.set_fail_writes(false);
        assert!(f.repo.load(record.id).await.unwrap().is_open());

        assert!(f.repo.list_auctions().await.unwrap().is_empty());
        assert!(!f.repo.load(record.id).await.unwrap().is_open());
        assert_eq!(
            f.repo.refresh(record.id).await,
            Err(AuctionError::NotFound(record.id))
        );
    }

    #[tokio::test]
    async fn test_refresh_marks_closed_row() {
        let f = fixture();
        let record = open(&f, 1).await;
        f.ledger
            .submit_transaction(&TxPlan {
                script_input: Some(ScriptInput {
                    out_ref: record.live_ref.unwrap(),
                    redeemer: AuctionRedeemer::CloseAuction,
                }),
                outputs: vec![TxOutput::payment(
                    Address::key(f.repo.script_address().network, SELLER),
                    2_000_000,
                )],
                required_signer: SELLER,
            })
            .await
            .unwrap();

        assert_eq!(
            f.repo.refresh(record.id).await,
            Err(AuctionError::NotFound(record.id))
        );
        assert!(!f.repo.load(record.id).await.unwrap().is_open());
    }
}
