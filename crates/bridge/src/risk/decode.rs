//! Local heuristic decoding of well known token calls and permits, used when no simulation is
//! available.
//!
//! Amounts that can't be read from the payload are reported as [`Amount::Unknown`], never as
//! zero.

use crate::reputation::Simulation;
use alloy_dyn_abi::TypedData;
use alloy_primitives::{Address, TxKind, U256};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{SolInterface, sol};
use provider_bridge_core::risk::{Amount, ApprovalGrant, Asset, BalanceChange};
use serde_json::Value;

sol! {
    interface ITokenApprovals {
        function transfer(address to, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function increaseAllowance(address spender, uint256 addedValue) external returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
    }
}

use ITokenApprovals::ITokenApprovalsCalls;

/// Derives the effects of a transaction from its value and calldata.
pub fn decode_transaction(tx: &TransactionRequest) -> Simulation {
    let mut effects = Simulation::default();
    if let Some(value) = tx.value &&
        !value.is_zero()
    {
        effects.changes.send.push(BalanceChange::new(Asset::Native, Amount::Known(value)));
    }

    let Some(token) = tx.to.as_ref().and_then(TxKind::to).copied() else { return effects };
    let Some(input) = tx.input.input() else { return effects };
    let Ok(call) = ITokenApprovalsCalls::abi_decode(input) else { return effects };

    match call {
        ITokenApprovalsCalls::transfer(call) => {
            effects
                .changes
                .send
                .push(BalanceChange::new(Asset::Erc20(token), Amount::Known(call.amount)));
        }
        ITokenApprovalsCalls::transferFrom(_) => {
            // shares its selector with ERC-721, the last word may be a token id
            effects.changes.send.push(BalanceChange::new(Asset::Erc20(token), Amount::Unknown));
        }
        ITokenApprovalsCalls::approve(call) => {
            effects.approvals.push(ApprovalGrant {
                token,
                spender: call.spender,
                amount: Amount::Known(call.amount),
            });
        }
        ITokenApprovalsCalls::increaseAllowance(call) => {
            effects.approvals.push(ApprovalGrant {
                token,
                spender: call.spender,
                amount: Amount::Known(call.addedValue),
            });
        }
        ITokenApprovalsCalls::setApprovalForAll(call) => {
            if call.approved {
                effects.approvals.push(ApprovalGrant {
                    token,
                    spender: call.operator,
                    amount: Amount::Unknown,
                });
            }
        }
    }
    effects
}

/// Extracts the allowances granted by an EIP-2612 `Permit` or a Permit2 `PermitSingle` /
/// `PermitBatch` typed data payload.
pub fn permit_approvals(data: &TypedData) -> Vec<ApprovalGrant> {
    let message = &data.message;
    let spender = address_at(&message["spender"]);
    match data.primary_type.as_str() {
        "Permit" => vec![ApprovalGrant {
            token: data.domain.verifying_contract.unwrap_or_default(),
            spender,
            amount: amount_at(&message["value"]),
        }],
        "PermitSingle" => vec![permit_details(&message["details"], spender)],
        "PermitBatch" => message["details"]
            .as_array()
            .map(|details| {
                details.iter().map(|details| permit_details(details, spender)).collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn permit_details(details: &Value, spender: Address) -> ApprovalGrant {
    ApprovalGrant {
        token: address_at(&details["token"]),
        spender,
        amount: amount_at(&details["amount"]),
    }
}

fn address_at(value: &Value) -> Address {
    value.as_str().and_then(|s| s.parse().ok()).unwrap_or_default()
}

/// Typed data carries numbers as JSON numbers, decimal strings or hex strings.
fn amount_at(value: &Value) -> Amount {
    let amount = match value {
        Value::String(s) => s.parse::<U256>().ok(),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    };
    amount.map(Amount::Known).unwrap_or(Amount::Unknown)
}
