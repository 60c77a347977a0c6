//! Bid protocol: moves an open auction to a higher bid.

use std::sync::Arc;

use auction_types::{
    AuctionDatum, AuctionRedeemer, KeyHash, Lovelace, OutputRef, PosixMillis, ScriptInput,
    TxOutput, TxPlan,
};
use tracing::info;

use crate::config::ProtocolConfig;
use crate::error::AuctionError;
use crate::ledger::{submit_bounded, LedgerClient};
use crate::reconcile::{AuctionRepository, ResolvedOutput};
use crate::resolver::PayoutResolver;

/// Outcome of a confirmed bid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BidReceipt {
    /// New live output holding the auction
    pub out_ref: OutputRef,
    pub state: AuctionDatum,
    /// Payment returned to the outbid bidder
    pub refund: Option<TxOutput>,
}

pub struct BidProtocol {
    config: Arc<ProtocolConfig>,
    ledger: Arc<dyn LedgerClient>,
    resolver: Arc<dyn PayoutResolver>,
}

impl BidProtocol {
    pub fn new(
        config: Arc<ProtocolConfig>,
        ledger: Arc<dyn LedgerClient>,
        resolver: Arc<dyn PayoutResolver>,
    ) -> Self {
        Self {
            config,
            ledger,
            resolver,
        }
    }

    /// Check a bid against the current state.
    pub fn validate(
        &self,
        state: &AuctionDatum,
        amount: Lovelace,
        now: PosixMillis,
    ) -> Result<(), AuctionError> {
        if now >= state.deadline {
            return Err(AuctionError::AuctionEnded {
                deadline: state.deadline,
            });
        }

        let too_low = AuctionError::BidTooLow {
            highest_bid: state.highest_bid,
            min_increment: self.config.min_increment,
            got: amount,
        };
        let floor = state
            .highest_bid
            .checked_add(self.config.min_increment)
            .ok_or_else(|| too_low.clone())?;
        if amount < floor {
            return Err(too_low);
        }
        Ok(())
    }

    /// Refund owed to the current highest bidder, if any.
    pub fn refund_output(&self, state: &AuctionDatum) -> Result<Option<TxOutput>, AuctionError> {
        if !state.refund_due() {
            return Ok(None);
        }
        let address = self.resolver.resolve(&state.highest_bidder).ok_or_else(|| {
            AuctionError::Configuration(format!(
                "no payout address for previous bidder {}",
                state.highest_bidder
            ))
        })?;
        Ok(Some(TxOutput::payment(address, state.highest_bid)))
    }

    /// Validate and build the plan for a bid on `resolved`.
    pub fn build_plan(
        &self,
        resolved: &ResolvedOutput,
        bidder: KeyHash,
        amount: Lovelace,
        now: PosixMillis,
    ) -> Result<(TxPlan, AuctionDatum, Option<TxOutput>), AuctionError> {
        let current = &resolved.datum;
        self.validate(current, amount, now)?;
        let refund = self.refund_output(current)?;

        let next = current.outbid(amount, bidder);
        let mut outputs = vec![TxOutput::with_datum(
            self.config.script_address(),
            amount,
            next.encode(),
        )];
        outputs.extend(refund.clone());

        let plan = TxPlan {
            script_input: Some(ScriptInput {
                out_ref: resolved.out_ref,
                redeemer: AuctionRedeemer::PlaceBid { amount, bidder },
            }),
            outputs,
            required_signer: bidder,
        };
        Ok((plan, next, refund))
    }

    /// Place a bid on auction `id`.
    pub async fn place_bid(
        &self,
        repo: &AuctionRepository,
        id: u64,
        bidder: KeyHash,
        amount: Lovelace,
        now: PosixMillis,
    ) -> Result<BidReceipt, AuctionError> {
        let resolved = repo.resolve(id).await?;
        let (plan, state, refund) = self.build_plan(&resolved.output, bidder, amount, now)?;

        let tx_id = submit_bounded(self.ledger.as_ref(), &plan, self.config.ledger_timeout()).await?;
        let out_ref = OutputRef::new(tx_id, 0);

        info!(
            auction_id = id,
            bidder = %bidder,
            amount,
            live_ref = %out_ref,
            refunded = refund.as_ref().map(|r| r.value).unwrap_or(0),
            "Bid confirmed"
        );

        repo.mirror_after_commit(&resolved.record, out_ref, &state).await;
        Ok(BidReceipt {
            out_ref,
            state,
            refund,
        })
    }
}
