//! End-to-end integration tests for the UTXO auction.
//!
//! These tests exercise the full auction lifecycle against the in-memory
//! ledger and mirror:
//! 1. Opening an auction
//! 2. Bidding, with refunds to outbid bidders
//! 3. Closing and paying the seller
//! 4. Recovering from mirror drift and lost races

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use auction_module::{
    AddressBookEntry, AuctionError, AuctionService, ManualClock, MemoryLedger, MemoryMirror,
    PayoutConfig, ProtocolConfig,
};
use auction_types::{
    Address, AuctionDatum, AuctionMetadata, AuctionRecord, KeyHash, Lovelace, NetworkId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SELLER: KeyHash = KeyHash([0x5e; 28]);
const BIDDER_B: KeyHash = KeyHash([0xb0; 28]);
const BIDDER_C: KeyHash = KeyHash([0xc0; 28]);
const DEADLINE: i64 = 1_700_000_000_000;

struct World {
    ledger: Arc<MemoryLedger>,
    mirror: Arc<MemoryMirror>,
    clock: Arc<ManualClock>,
    service: Arc<AuctionService>,
}

fn world(config: ProtocolConfig) -> World {
    let ledger = Arc::new(MemoryLedger::new());
    let mirror = Arc::new(MemoryMirror::new());
    let clock = Arc::new(ManualClock::new(DEADLINE - 3_600_000));
    let service = Arc::new(AuctionService::from_config(
        config,
        ledger.clone(),
        mirror.clone(),
        clock.clone(),
    ));
    World {
        ledger,
        mirror,
        clock,
        service,
    }
}

fn key_address(key: KeyHash) -> Address {
    Address::key(NetworkId::Testnet, key)
}

/// Total value held at `key`'s enterprise address.
fn balance(world: &World, key: KeyHash) -> Lovelace {
    world
        .ledger
        .outputs_at(&key_address(key))
        .iter()
        .map(|o| o.value)
        .sum()
}

/// The single live script output, decoded.
fn script_state(world: &World) -> (Lovelace, AuctionDatum) {
    let outputs = world
        .ledger
        .outputs_at(&world.service.config().script_address());
    assert_eq!(outputs.len(), 1, "expected exactly one live auction output");
    let datum = AuctionDatum::decode_inline(outputs[0].datum.as_deref()).unwrap();
    (outputs[0].value, datum)
}

async fn open(world: &World, title: &str) -> AuctionRecord {
    world
        .service
        .create_auction(
            SELLER,
            AuctionMetadata {
                title: title.into(),
                ..Default::default()
            },
            DEADLINE,
            2_000_000,
        )
        .await
        .unwrap()
}

/// Test the complete auction flow.
#[tokio::test]
async fn test_full_auction_flow() {
    let world = world(ProtocolConfig::default());

    // ========================================
    // Phase 1: Seller opens the auction
    // ========================================

    let record = open(&world, "lot 1").await;
    let (value, state) = script_state(&world);
    assert_eq!(value, 2_000_000);
    assert_eq!(state, AuctionDatum::opening(SELLER, DEADLINE));

    println!("Auction {} opened at {:?}", record.id, record.live_ref);

    // ========================================
    // Phase 2: First bid, nothing to refund
    // ========================================

    let receipt = world
        .service
        .place_bid_receipt(record.id, BIDDER_B, 5_000_000)
        .await
        .unwrap();
    assert_eq!(receipt.refund, None);
    assert_eq!(
        receipt.state,
        AuctionDatum {
            seller: SELLER,
            deadline: DEADLINE,
            highest_bid: 5_000_000,
            highest_bidder: BIDDER_B,
        }
    );
    assert_eq!(script_state(&world).0, 5_000_000);
    assert_eq!(balance(&world, BIDDER_B), 0);

    println!("B bid 5,000,000");

    // ========================================
    // Phase 3: C outbids B, B is refunded
    // ========================================

    let live = world
        .service
        .place_bid(record.id, BIDDER_C, 6_500_000)
        .await
        .unwrap();
    assert_eq!(balance(&world, BIDDER_B), 5_000_000);
    let (value, state) = script_state(&world);
    assert_eq!(value, 6_500_000);
    assert_eq!(state.highest_bidder, BIDDER_C);

    let mirrored = world.service.get_auction(record.id).await.unwrap();
    assert_eq!(mirrored.live_ref, Some(live));
    assert_eq!(mirrored.highest_bid, 6_500_000);

    println!("C bid 6,500,000, B refunded");

    // ========================================
    // Phase 4: Deadline passes, seller closes
    // ========================================

    assert!(matches!(
        world.service.close_auction(record.id, SELLER).await,
        Err(AuctionError::AuctionNotEnded { .. })
    ));

    world.clock.set(DEADLINE);
    assert_eq!(
        world.service.place_bid(record.id, BIDDER_B, 50_000_000).await,
        Err(AuctionError::AuctionEnded { deadline: DEADLINE })
    );

    world.service.close_auction(record.id, SELLER).await.unwrap();
    assert_eq!(balance(&world, SELLER), 6_500_000);
    assert!(world
        .ledger
        .outputs_at(&world.service.config().script_address())
        .is_empty());

    println!("Auction closed, seller paid 6,500,000");

    // ========================================
    // Phase 5: Late close by a bidder
    // ========================================

    assert_eq!(
        world.service.close_auction(record.id, BIDDER_B).await,
        Err(AuctionError::NotFound(record.id))
    );
    assert!(world.service.list_auctions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bidder_cannot_close_after_deadline() {
    let world = world(ProtocolConfig::default());
    let record = open(&world, "lot").await;
    world
        .service
        .place_bid(record.id, BIDDER_B, 5_000_000)
        .await
        .unwrap();

    world.clock.set(DEADLINE + 1);
    assert_eq!(
        world.service.close_auction(record.id, BIDDER_B).await,
        Err(AuctionError::Unauthorized)
    );
    assert_eq!(script_state(&world).0, 5_000_000);
}

#[tokio::test]
async fn test_mirror_drift_repaired_by_listing() {
    let world = world(ProtocolConfig::default());
    let record = open(&world, "lot").await;

    // Bid confirms on-chain while the mirror is down
    world.mirror.set_fail_writes(true);
    let live = world
        .service
        .place_bid(record.id, BIDDER_B, 5_000_000)
        .await
        .unwrap();
    world.mirror.set_fail_writes(false);

    let stale = world.service.get_auction(record.id).await.unwrap();
    assert_eq!(stale, record);

    let listed = world.service.list_auctions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].live_ref, Some(live));
    assert_eq!(listed[0].highest_bid, 5_000_000);
    assert_eq!(listed[0].highest_bidder, BIDDER_B);

    // The repair was written back
    assert_eq!(
        world.service.get_auction(record.id).await.unwrap(),
        listed[0]
    );
}

#[tokio::test]
async fn test_unmirrored_close_repaired_by_listing() {
    let world = world(ProtocolConfig::default());
    let record = open(&world, "lot").await;
    world
        .service
        .place_bid(record.id, BIDDER_B, 5_000_000)
        .await
        .unwrap();
    world.clock.set(DEADLINE + 1);

    // Close confirms on-chain while the mirror is down
    world.mirror.set_fail_writes(true);
    world.service.close_auction(record.id, SELLER).await.unwrap();
    world.mirror.set_fail_writes(false);
    assert_eq!(balance(&world, SELLER), 5_000_000);
    assert!(world.service.get_auction(record.id).await.unwrap().is_open());

    assert!(world.service.list_auctions().await.unwrap().is_empty());
    assert!(!world.service.get_auction(record.id).await.unwrap().is_open());
    assert_eq!(
        world.service.close_auction(record.id, SELLER).await,
        Err(AuctionError::NotFound(record.id))
    );
}

#[tokio::test]
async fn test_missing_refund_destination_submits_nothing() {
    let config = ProtocolConfig {
        payouts: PayoutConfig::AddressBook {
            entries: [SELLER, BIDDER_C]
                .into_iter()
                .map(|identity| AddressBookEntry {
                    identity,
                    address: key_address(identity),
                })
                .collect(),
        },
        ..Default::default()
    };
    config.validate().unwrap();
    let world = world(config);
    let record = open(&world, "lot").await;

    world
        .service
        .place_bid(record.id, BIDDER_B, 5_000_000)
        .await
        .unwrap();
    let height = world.ledger.height();

    assert!(matches!(
        world.service.place_bid(record.id, BIDDER_C, 6_500_000).await,
        Err(AuctionError::Configuration(_))
    ));
    assert_eq!(world.ledger.height(), height);
    assert_eq!(script_state(&world).1.highest_bidder, BIDDER_B);
}

#[tokio::test]
async fn test_auctions_are_independent() {
    let world = world(ProtocolConfig::default());
    let first = open(&world, "first").await;
    world.clock.advance(1);
    let second = open(&world, "second").await;

    world
        .service
        .place_bid(first.id, BIDDER_B, 5_000_000)
        .await
        .unwrap();
    world
        .service
        .place_bid(second.id, BIDDER_C, 3_000_000)
        .await
        .unwrap();

    let listed = world.service.list_auctions().await.unwrap();
    let titles: Vec<_> = listed.iter().map(|r| r.metadata.title.as_str()).collect();
    assert_eq!(titles, vec!["second", "first"]);
    assert_eq!(listed[0].highest_bid, 3_000_000);
    assert_eq!(listed[1].highest_bid, 5_000_000);
    assert_eq!(balance(&world, BIDDER_B), 0);
    assert_eq!(balance(&world, BIDDER_C), 0);
}

/// Random bid sequences keep the ledger and the refunds consistent.
#[tokio::test]
async fn test_random_bid_sequences() {
    let mut rng = StdRng::seed_from_u64(0xa0c7);
    let bidders: Vec<KeyHash> = (1..=5u8).map(|i| KeyHash([i; 28])).collect();

    for round in 0..4 {
        let world = world(ProtocolConfig::default());
        let record = open(&world, &format!("round {round}")).await;

        let mut highest: Lovelace = 0;
        let mut leader: Option<KeyHash> = None;
        let mut refunds: HashMap<KeyHash, Lovelace> = HashMap::new();

        for _ in 0..30 {
            let bidder = bidders[rng.gen_range(0..bidders.len())];
            let amount = rng.gen_range(highest.saturating_sub(2_000_000)..=highest + 4_000_000);
            let result = world.service.place_bid(record.id, bidder, amount).await;

            if amount >= highest + 1_000_000 {
                assert!(result.is_ok(), "bid of {amount} over {highest} failed: {result:?}");
                if let Some(previous) = leader {
                    *refunds.entry(previous).or_default() += highest;
                }
                highest = amount;
                leader = Some(bidder);
            } else {
                assert!(
                    matches!(result, Err(AuctionError::BidTooLow { .. })),
                    "bid of {amount} over {highest} accepted"
                );
            }
        }

        let (value, state) = script_state(&world);
        if leader.is_some() {
            assert_eq!(value, highest);
            assert_eq!(state.highest_bid, highest);
        }
        for bidder in &bidders {
            assert_eq!(
                balance(&world, *bidder),
                refunds.get(bidder).copied().unwrap_or(0)
            );
        }
    }
}

/// Many bidders racing for one auction.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bidders_settle_consistently() {
    let world = world(ProtocolConfig {
        max_bid_attempts: 8,
        ..Default::default()
    });
    let id = open(&world, "contested").await.id;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let service = world.service.clone();
        let bidder = KeyHash([0x10 + i; 28]);
        let amount = 3_000_000 + u64::from(i) * 1_000_000;
        tasks.push(tokio::spawn(async move {
            let result = service
                .place_bid_with_retry(id, bidder, amount)
                .await;
            (bidder, amount, result)
        }));
    }

    let mut accepted = Vec::new();
    for task in tasks {
        let (bidder, amount, result) = task.await.unwrap();
        match result {
            Ok(_) => accepted.push((bidder, amount)),
            Err(e) => assert!(
                e.is_retryable() || matches!(e, AuctionError::BidTooLow { .. }),
                "unexpected error {e:?}"
            ),
        }
    }
    assert!(!accepted.is_empty());

    let (winner, top) = accepted
        .iter()
        .copied()
        .max_by_key(|(_, amount)| *amount)
        .unwrap();
    let (value, state) = script_state(&world);
    assert_eq!(value, top);
    assert_eq!(state.highest_bidder, winner);

    // Every accepted bid other than the winning one was refunded in full.
    for (bidder, amount) in &accepted {
        let expected = if *bidder == winner { 0 } else { *amount };
        assert_eq!(balance(&world, *bidder), expected);
    }

    // Listing brings the mirror in line with the ledger.
    let listed = world.service.list_auctions().await.unwrap();
    assert_eq!(listed[0].highest_bid, top);
    assert_eq!(listed[0].highest_bidder, winner);
}
