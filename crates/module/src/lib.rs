//! Off-chain protocol for the UTXO-backed ascending auction.
//!
//! Each auction lives in exactly one unspent output at the auction script
//! address. A bid consumes that output and produces its successor; a close
//! consumes it and pays the seller. The ledger is the only serialization
//! point: two actions racing for the same output cannot both confirm.
//!
//! # Architecture
//!
//! - `ledger`: ledger client interface with bounded waits
//! - `mirror`: off-chain index of auctions used for listing
//! - `reconcile`: resolves mirror rows against ledger ground truth
//! - `bid` / `close`: the two state transitions of a live auction
//! - `service`: entry points combining the above
//! - `state`: in-memory ledger enforcing the script rules
//! - `config`, `resolver`, `clock`: injected parameters
//!
//! # Example
//!
//! ```ignore
//! use auction_module::{AuctionService, MemoryLedger, MemoryMirror, ProtocolConfig, SystemClock};
//!
//! let service = AuctionService::from_config(
//!     ProtocolConfig::default(),
//!     Arc::new(MemoryLedger::new()),
//!     Arc::new(MemoryMirror::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let record = service.create_auction(seller, metadata, deadline, 2_000_000).await?;
//! service.place_bid(record.id, bidder, 5_000_000).await?;
//! ```

pub mod bid;
pub mod clock;
pub mod close;
pub mod config;
pub mod error;
pub mod ledger;
pub mod mirror;
pub mod reconcile;
pub mod resolver;
pub mod service;
pub mod state;

pub use bid::{BidProtocol, BidReceipt};
pub use clock::{Clock, ManualClock, SystemClock};
pub use close::{CloseProtocol, CloseReceipt};
pub use config::{AddressBookEntry, ConfigError, PayoutConfig, ProtocolConfig};
pub use error::AuctionError;
pub use ledger::{LedgerClient, QueryError, SubmitError};
pub use mirror::{MemoryMirror, MirrorError, MirrorStore};
pub use reconcile::{AuctionRepository, Reconciled, ResolvedAuction, ResolvedOutput};
pub use resolver::{AddressBook, DerivedResolver, PayoutResolver};
pub use service::AuctionService;
pub use state::{LedgerState, MemoryLedger};
