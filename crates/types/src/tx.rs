//! Ledger outputs and transaction plans.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use crate::{Address, AuctionRedeemer, KeyHash, Lovelace, OutputRef};

/// Unspent output as reported by the ledger.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutput {
    pub out_ref: OutputRef,
    pub address: Address,
    pub value: Lovelace,
    /// Inline datum bytes, if any
    #[serde_as(as = "Option<Hex>")]
    pub datum: Option<Vec<u8>>,
}

/// Output created by a transaction.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub value: Lovelace,
    #[serde_as(as = "Option<Hex>")]
    pub datum: Option<Vec<u8>>,
}

impl TxOutput {
    /// Plain payment without a datum.
    pub fn payment(address: Address, value: Lovelace) -> Self {
        Self {
            address,
            value,
            datum: None,
        }
    }

    /// Script output carrying an inline datum.
    pub fn with_datum(address: Address, value: Lovelace, datum: Vec<u8>) -> Self {
        Self {
            address,
            value,
            datum: Some(datum),
        }
    }
}

/// Script output being spent together with the redeemer justifying it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ScriptInput {
    pub out_ref: OutputRef,
    pub redeemer: AuctionRedeemer,
}

/// Unsigned transaction description handed to the ledger client.
///
/// Fee balancing and change come from the signer's wallet and are not part of
/// the plan.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TxPlan {
    /// The auction output consumed, absent for the opening transaction
    pub script_input: Option<ScriptInput>,
    pub outputs: Vec<TxOutput>,
    pub required_signer: KeyHash,
}

impl TxPlan {
    /// Index of the first output paying to `address`.
    pub fn output_index_at(&self, address: &Address) -> Option<u32> {
        self.outputs
            .iter()
            .position(|o| &o.address == address)
            .map(|i| i as u32)
    }

    /// Sum of value paid to `address`.
    pub fn paid_to(&self, address: &Address) -> Lovelace {
        self.outputs
            .iter()
            .filter(|o| &o.address == address)
            .map(|o| o.value)
            .sum()
    }

    pub fn consumes(&self) -> Option<&OutputRef> {
        self.script_input.as_ref().map(|i| &i.out_ref)
    }
}
