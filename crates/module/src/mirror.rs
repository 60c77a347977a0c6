//! Off-chain mirror store interface and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use auction_types::{AuctionDraft, AuctionRecord, AuctionUpdate};
use parking_lot::RwLock;
use thiserror::Error;

/// Errors from the mirror store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    #[error("Auction {0} not in mirror")]
    Missing(u64),

    #[error("Mirror unavailable: {0}")]
    Unavailable(String),
}

/// Keyed storage for auction records.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get_auction_by_id(&self, id: u64) -> Result<Option<AuctionRecord>, MirrorError>;

    async fn list_open_auctions(&self) -> Result<Vec<AuctionRecord>, MirrorError>;

    /// Store a new record and assign its id.
    async fn insert_auction(&self, draft: AuctionDraft) -> Result<AuctionRecord, MirrorError>;

    async fn update_auction(
        &self,
        id: u64,
        update: AuctionUpdate,
    ) -> Result<AuctionRecord, MirrorError>;
}

#[derive(Debug)]
struct MirrorTables {
    next_id: u64,
    records: BTreeMap<u64, AuctionRecord>,
}

/// In-memory mirror.
///
/// Writes can be switched off to simulate an unreachable backend.
#[derive(Debug)]
pub struct MemoryMirror {
    tables: RwLock<MirrorTables>,
    fail_writes: AtomicBool,
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self {
            tables: RwLock::new(MirrorTables {
                next_id: 1,
                records: BTreeMap::new(),
            }),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert/update fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All records regardless of status.
    pub fn snapshot(&self) -> Vec<AuctionRecord> {
        self.tables.read().records.values().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), MirrorError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MirrorError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    async fn get_auction_by_id(&self, id: u64) -> Result<Option<AuctionRecord>, MirrorError> {
        Ok(self.tables.read().records.get(&id).cloned())
    }

    async fn list_open_auctions(&self) -> Result<Vec<AuctionRecord>, MirrorError> {
        Ok(self
            .tables
            .read()
            .records
            .values()
            .filter(|r| r.is_open())
            .cloned()
            .collect())
    }

    async fn insert_auction(&self, draft: AuctionDraft) -> Result<AuctionRecord, MirrorError> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let id = tables.next_id;
        tables.next_id += 1;
        let record = AuctionRecord::from_draft(id, draft);
        tables.records.insert(id, record.clone());
        Ok(record)
    }

    async fn update_auction(
        &self,
        id: u64,
        update: AuctionUpdate,
    ) -> Result<AuctionRecord, MirrorError> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let record = tables.records.get_mut(&id).ok_or(MirrorError::Missing(id))?;
        record.apply(&update);
        Ok(record.clone())
    }
}
