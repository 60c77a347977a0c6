//! In-memory unspent-output ledger.
//!
//! Applies transaction plans atomically: every consumed output must still be
//! unspent, and spending an auction script output must satisfy the script's
//! rules for the supplied redeemer. Time is never evaluated here.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use auction_types::{
    Address, AuctionDatum, AuctionRedeemer, Credential, KeyHash, LedgerOutput, Lovelace,
    OutputRef, ScriptInput, TxId, TxPlan,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::ledger::{LedgerClient, QueryError, SubmitError};

/// Ledger state.
#[derive(Debug, Default)]
pub struct LedgerState {
    /// Unspent outputs by reference
    pub utxos: BTreeMap<OutputRef, LedgerOutput>,

    /// Outputs consumed by a confirmed transaction
    pub spent: HashSet<OutputRef>,

    /// Confirmed transactions, used to derive unique ids
    pub sequence: u64,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unspent outputs held at `address`.
    pub fn outputs_at(&self, address: &Address) -> Vec<LedgerOutput> {
        self.utxos
            .values()
            .filter(|o| &o.address == address)
            .cloned()
            .collect()
    }

    /// Validate and apply a plan, returning the new transaction id.
    pub fn apply(&mut self, plan: &TxPlan) -> Result<TxId, SubmitError> {
        let consumed = match &plan.script_input {
            Some(input) => {
                let output = self
                    .utxos
                    .get(&input.out_ref)
                    .ok_or_else(|| self.missing_input(&input.out_ref))?;
                check_script_spend(output, input, plan)?;
                Some(input.out_ref)
            }
            None => None,
        };

        for output in plan.outputs.iter().filter(|o| o.address.is_script()) {
            AuctionDatum::decode_inline(output.datum.as_deref())
                .map_err(|e| SubmitError::Rejected(format!("script output datum: {e}")))?;
        }

        let tx_id = self.next_tx_id(plan)?;
        if let Some(out_ref) = consumed {
            self.utxos.remove(&out_ref);
            self.spent.insert(out_ref);
        }
        for (index, output) in plan.outputs.iter().enumerate() {
            let out_ref = OutputRef::new(tx_id, index as u32);
            self.utxos.insert(
                out_ref,
                LedgerOutput {
                    out_ref,
                    address: output.address,
                    value: output.value,
                    datum: output.datum.clone(),
                },
            );
        }

        debug!(
            tx_id = %tx_id,
            consumed = ?consumed.map(|r| r.to_string()),
            outputs = plan.outputs.len(),
            "Transaction applied"
        );
        Ok(tx_id)
    }

    fn missing_input(&self, out_ref: &OutputRef) -> SubmitError {
        if self.spent.contains(out_ref) {
            SubmitError::InputConsumed(*out_ref)
        } else {
            SubmitError::Rejected(format!("unknown input {out_ref}"))
        }
    }

    fn next_tx_id(&mut self, plan: &TxPlan) -> Result<TxId, SubmitError> {
        let body = borsh::to_vec(plan).map_err(|e| rejected(format!("unencodable plan: {e}")))?;
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(&body);
        hasher.update(self.sequence.to_le_bytes());
        Ok(TxId(hasher.finalize().into()))
    }
}

fn rejected(reason: impl Into<String>) -> SubmitError {
    SubmitError::Rejected(reason.into())
}

/// Value `plan` pays to addresses whose payment key is `key`.
fn paid_to_key(plan: &TxPlan, key: &KeyHash) -> Lovelace {
    plan.outputs
        .iter()
        .filter(|o| o.address.payment == Credential::Key(*key))
        .map(|o| o.value)
        .sum()
}

/// The auction validator.
fn check_script_spend(
    consumed: &LedgerOutput,
    input: &ScriptInput,
    plan: &TxPlan,
) -> Result<(), SubmitError> {
    let current = AuctionDatum::decode_inline(consumed.datum.as_deref())
        .map_err(|e| rejected(format!("spent datum: {e}")))?;
    let continuing: Vec<_> = plan
        .outputs
        .iter()
        .filter(|o| o.address == consumed.address)
        .collect();

    match &input.redeemer {
        AuctionRedeemer::PlaceBid { amount, bidder } => {
            if plan.required_signer != *bidder {
                return Err(rejected("bid not signed by bidder"));
            }
            if *amount <= current.highest_bid {
                return Err(rejected("bid does not exceed highest bid"));
            }
            let [next] = continuing.as_slice() else {
                return Err(rejected("bid must produce exactly one script output"));
            };
            if next.value != *amount {
                return Err(rejected("script output value differs from bid"));
            }
            let next_datum = AuctionDatum::decode_inline(next.datum.as_deref())
                .map_err(|e| rejected(format!("continuing datum: {e}")))?;
            if next_datum != current.outbid(*amount, *bidder) {
                return Err(rejected("continuing datum is not the outbid state"));
            }
            if current.refund_due()
                && paid_to_key(plan, &current.highest_bidder) < current.highest_bid
            {
                return Err(rejected("previous bidder not refunded"));
            }
        }
        AuctionRedeemer::CloseAuction => {
            if plan.required_signer != current.seller {
                return Err(rejected("close not signed by seller"));
            }
            if !continuing.is_empty() {
                return Err(rejected("close must not produce a script output"));
            }
            if paid_to_key(plan, &current.seller) < consumed.value {
                return Err(rejected("seller not paid the locked value"));
            }
        }
    }
    Ok(())
}

/// [`LedgerClient`] backed by a [`LedgerState`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unspent outputs.
    pub fn utxo_count(&self) -> usize {
        self.state.lock().utxos.len()
    }

    /// Number of confirmed transactions.
    pub fn height(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Unspent outputs paying to `address`.
    pub fn outputs_at(&self, address: &Address) -> Vec<LedgerOutput> {
        self.state.lock().outputs_at(address)
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn query_outputs_at(&self, address: &Address) -> Result<Vec<LedgerOutput>, QueryError> {
        Ok(self.outputs_at(address))
    }

    async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxId, SubmitError> {
        self.state.lock().apply(plan)
    }
}
