//! Close protocol: settles an ended auction to its seller.

use std::sync::Arc;

use auction_types::{
    AuctionDatum, AuctionRedeemer, KeyHash, OutputRef, PosixMillis, ScriptInput, TxOutput, TxPlan,
};
use tracing::info;

use crate::config::ProtocolConfig;
use crate::error::AuctionError;
use crate::ledger::{submit_bounded, LedgerClient};
use crate::reconcile::{AuctionRepository, ResolvedOutput};
use crate::resolver::PayoutResolver;

/// Outcome of a confirmed close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReceipt {
    /// Output paying the seller
    pub payout_ref: OutputRef,
    pub payout: TxOutput,
}

pub struct CloseProtocol {
    config: Arc<ProtocolConfig>,
    ledger: Arc<dyn LedgerClient>,
    resolver: Arc<dyn PayoutResolver>,
}

impl CloseProtocol {
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

    pub fn validate(
        &self,
        state: &AuctionDatum,
        caller: &KeyHash,
        now: PosixMillis,
    ) -> Result<(), AuctionError> {
        // Only the seller settles
        if caller != &state.seller {
            return Err(AuctionError::Unauthorized);
        }

        // Bidding must be over
        if now < state.deadline {
            return Err(AuctionError::AuctionNotEnded {
                deadline: state.deadline,
            });
        }
        Ok(())
    }

    /// Validate and build the settlement plan, paying the full locked value
    /// to the seller.
    pub fn build_plan(
        &self,
        resolved: &ResolvedOutput,
        caller: &KeyHash,
        now: PosixMillis,
    ) -> Result<TxPlan, AuctionError> {
        let state = &resolved.datum;
        self.validate(state, caller, now)?;

        let seller_address = self.resolver.resolve(&state.seller).ok_or_else(|| {
            AuctionError::Configuration(format!("no payout address for seller {}", state.seller))
        })?;

        Ok(TxPlan {
            script_input: Some(ScriptInput {
                out_ref: resolved.out_ref,
                redeemer: AuctionRedeemer::CloseAuction,
            }),
            outputs: vec![TxOutput::payment(seller_address, resolved.value)],
            required_signer: state.seller,
        })
    }

    /// Close auction `id` on behalf of `caller`.
    pub async fn close_auction(
        &self,
        repo: &AuctionRepository,
        id: u64,
        caller: KeyHash,
        now: PosixMillis,
    ) -> Result<CloseReceipt, AuctionError> {
        let resolved = match repo.resolve(id).await {
            // Catch up with drift first; a row whose output is already gone
            // turns into NotFound here.
            Err(AuctionError::StaleReference(_)) => {
                repo.refresh(id).await?;
                repo.resolve(id).await?
            }
            other => other?,
        };
        let plan = self.build_plan(&resolved.output, &caller, now)?;

        let tx_id = submit_bounded(self.ledger.as_ref(), &plan, self.config.ledger_timeout()).await?;
        let payout_ref = OutputRef::new(tx_id, 0);
        let payout = plan.outputs[0].clone();

        info!(
            auction_id = id,
            seller = %caller,
            paid = payout.value,
            winner = %resolved.output.datum.highest_bidder,
            payout_ref = %payout_ref,
            "Auction closed"
        );

        repo.mirror_close(&resolved.record).await;
        Ok(CloseReceipt { payout_ref, payout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{AddressBook, DerivedResolver};
    use auction_types::{Address, NetworkId, TxId};

    const SELLER: KeyHash = KeyHash([1; 28]);
    const BIDDER: KeyHash = KeyHash([2; 28]);

    fn protocol(resolver: Arc<dyn PayoutResolver>) -> CloseProtocol {
        CloseProtocol::new(
            Arc::new(ProtocolConfig::default()),
            Arc::new(crate::state::MemoryLedger::new()),
            resolver,
        )
    }

    fn won() -> ResolvedOutput {
        ResolvedOutput {
            out_ref: OutputRef::new(TxId([5; 32]), 0),
            value: 6_500_000,
            datum: AuctionDatum::opening(SELLER, 1_000).outbid(6_500_000, BIDDER),
        }
    }

    #[test]
    fn test_non_seller_rejected_after_deadline() {
        let close = protocol(Arc::new(DerivedResolver::new(NetworkId::Testnet)));
        let state = won().datum;
        assert_eq!(
            close.validate(&state, &BIDDER, 5_000),
            Err(AuctionError::Unauthorized)
        );
    }

    #[test]
    fn test_seller_rejected_before_deadline() {
        let close = protocol(Arc::new(DerivedResolver::new(NetworkId::Testnet)));
        let state = won().datum;
        assert_eq!(
            close.validate(&state, &SELLER, 999),
            Err(AuctionError::AuctionNotEnded { deadline: 1_000 })
        );
        assert!(close.validate(&state, &SELLER, 1_000).is_ok());
    }

    #[test]
    fn test_plan_pays_full_value_to_seller() {
        let close = protocol(Arc::new(DerivedResolver::new(NetworkId::Testnet)));
        let plan = close.build_plan(&won(), &SELLER, 1_000).unwrap();

        assert_eq!(
            plan.outputs,
            vec![TxOutput::payment(
                Address::key(NetworkId::Testnet, SELLER),
                6_500_000
            )]
        );
        assert_eq!(plan.required_signer, SELLER);
        assert_eq!(
            plan.script_input.unwrap().redeemer,
            AuctionRedeemer::CloseAuction
        );
    }

    #[test]
    fn test_unknown_seller_address() {
        let close = protocol(Arc::new(AddressBook::new()));
        assert!(matches!(
            close.build_plan(&won(), &SELLER, 1_000),
            Err(AuctionError::Configuration(_))
        ));
    }
}
