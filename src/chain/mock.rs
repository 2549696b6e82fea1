//! In-memory stand-in for the token and bulk-transfer contracts.
//!
//! Mirrors the contract's revert conditions and applies transfers atomically
//! per batch. Failure modes can be injected per batch index so tests can drive
//! the run into every fatal path.

use super::{
    BulkTransferContract, ReceiptWaiter, TokenApprover, TokenReader, TxHash, TxStatus,
};
use crate::error::{Result, RpcError};
use crate::partition::Batch;
use alloy::primitives::{keccak256, Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

const BPS_DENOMINATOR: u64 = 10_000;
const BASE_GAS: u64 = 21_000;
const GAS_PER_RECIPIENT: u64 = 30_000;

/// A state-changing transaction sent to the mock, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWrite {
    Approve {
        spender: Address,
        amount: U256,
    },
    BulkTransfer {
        batch_index: usize,
        recipients: usize,
        gas_limit: Option<u64>,
    },
}

#[derive(Debug)]
struct MockState {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    receipts: HashMap<TxHash, TxStatus>,
    writes: Vec<MockWrite>,
    tx_counter: u64,
    simulated: Vec<usize>,
    recipient_limit: usize,
    failing_simulations: HashSet<usize>,
    reverting_batches: HashSet<usize>,
    gas_estimation_fails: bool,
    transfer_fee_bps: u64,
    rejects_nonzero_approve: bool,
    approval_cap: Option<U256>,
}

#[derive(Debug)]
pub struct MockChain {
    sender: Address,
    contract: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(sender: Address, contract: Address) -> Self {
        Self {
            sender,
            contract,
            state: Mutex::new(MockState {
                balances: HashMap::new(),
                allowances: HashMap::new(),
                receipts: HashMap::new(),
                writes: Vec::new(),
                tx_counter: 0,
                simulated: Vec::new(),
                recipient_limit: 500,
                failing_simulations: HashSet::new(),
                reverting_batches: HashSet::new(),
                gas_estimation_fails: false,
                transfer_fee_bps: 0,
                rejects_nonzero_approve: false,
                approval_cap: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicked test thread must not hide the state from the assertions after it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_balance(self, owner: Address, amount: U256) -> Self {
        self.state().balances.insert(owner, amount);
        self
    }

    /// Sets the sender's existing allowance towards the bulk contract.
    pub fn with_allowance(self, amount: U256) -> Self {
        let key = (self.sender, self.contract);
        self.state().allowances.insert(key, amount);
        self
    }

    pub fn with_recipient_limit(self, limit: usize) -> Self {
        self.state().recipient_limit = limit;
        self
    }

    pub fn fail_simulation_at(self, batch_index: usize) -> Self {
        self.state().failing_simulations.insert(batch_index);
        self
    }

    /// The submission for `batch_index` is mined with a reverted status.
    pub fn revert_batch(self, batch_index: usize) -> Self {
        self.state().reverting_batches.insert(batch_index);
        self
    }

    pub fn fail_gas_estimation(self) -> Self {
        self.state().gas_estimation_fails = true;
        self
    }

    /// Skims `bps` basis points off every credited amount, like a fee-on-transfer token.
    pub fn with_transfer_fee_bps(self, bps: u64) -> Self {
        self.state().transfer_fee_bps = bps.min(BPS_DENOMINATOR);
        self
    }

    /// Reverts any approve that changes a nonzero allowance to another nonzero value.
    pub fn reject_nonzero_approve(self) -> Self {
        self.state().rejects_nonzero_approve = true;
        self
    }

    /// Approvals silently grant at most `cap`.
    pub fn cap_approvals(self, cap: U256) -> Self {
        self.state().approval_cap = Some(cap);
        self
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }

    pub fn submitted_batches(&self) -> Vec<usize> {
        self.state()
            .writes
            .iter()
            .filter_map(|write| match write {
                MockWrite::BulkTransfer { batch_index, .. } => Some(*batch_index),
                MockWrite::Approve { .. } => None,
            })
            .collect()
    }

    pub fn simulated_batches(&self) -> Vec<usize> {
        self.state().simulated.clone()
    }

    pub fn balance(&self, owner: Address) -> U256 {
        self.state()
            .balances
            .get(&owner)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn current_allowance(&self) -> U256 {
        self.state().allowance(self.sender, self.contract)
    }
}

impl MockState {
    fn balance(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or(U256::ZERO)
    }

    fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn next_hash(&mut self) -> TxHash {
        self.tx_counter += 1;
        keccak256(self.tx_counter.to_be_bytes())
    }

    /// Same checks, same order, same reasons as the deployed contract.
    fn check_bulk(
        &self,
        sender: Address,
        contract: Address,
        batch: &Batch<'_>,
    ) -> std::result::Result<U256, &'static str> {
        if batch.is_empty() {
            return Err("Empty array");
        }
        if batch.len() > self.recipient_limit {
            return Err("Exceeds recipient limit");
        }
        let mut total = U256::ZERO;
        for entry in batch.entries {
            if entry.address == Address::ZERO {
                return Err("Invalid recipient");
            }
            if entry.amount.is_zero() {
                return Err("Amount must be greater than 0");
            }
            total = total.checked_add(entry.amount).ok_or("Insufficient balance")?;
        }
        if self.allowance(sender, contract) < total {
            return Err("Insufficient allowance");
        }
        if self.balance(sender) < total {
            return Err("Insufficient balance");
        }
        Ok(total)
    }

    fn apply_bulk(&mut self, sender: Address, contract: Address, batch: &Batch<'_>, total: U256) {
        let fee_bps = U256::from(self.transfer_fee_bps);
        let denominator = U256::from(BPS_DENOMINATOR);
        let remaining_balance = self.balance(sender) - total;
        self.balances.insert(sender, remaining_balance);
        let remaining_allowance = self.allowance(sender, contract) - total;
        self.allowances.insert((sender, contract), remaining_allowance);
        for entry in batch.entries {
            let credited = entry.amount - entry.amount * fee_bps / denominator;
            let balance = self.balance(entry.address).saturating_add(credited);
            self.balances.insert(entry.address, balance);
        }
    }
}

#[async_trait]
impl TokenReader for MockChain {
    async fn balance_of(&self, owner: Address) -> Result<U256> {
        Ok(self.state().balance(owner))
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        Ok(self.state().allowance(owner, spender))
    }
}

#[async_trait]
impl TokenApprover for MockChain {
    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash> {
        let mut state = self.state();
        let hash = state.next_hash();
        state.writes.push(MockWrite::Approve { spender, amount });
        let current = state.allowance(self.sender, spender);
        let status = if state.rejects_nonzero_approve && !current.is_zero() && !amount.is_zero() {
            TxStatus::Reverted
        } else {
            let granted = state.approval_cap.map_or(amount, |cap| amount.min(cap));
            state.allowances.insert((self.sender, spender), granted);
            TxStatus::Success
        };
        state.receipts.insert(hash, status);
        Ok(hash)
    }
}

#[async_trait]
impl BulkTransferContract for MockChain {
    fn address(&self) -> Address {
        self.contract
    }

    async fn recipient_limit(&self) -> Result<usize> {
        Ok(self.state().recipient_limit)
    }

    async fn simulate(&self, batch: &Batch<'_>) -> Result<()> {
        let mut state = self.state();
        state.simulated.push(batch.index);
        if state.failing_simulations.contains(&batch.index) {
            return Err(RpcError::ExecutionReverted("injected simulation failure".to_string()).into());
        }
        state
            .check_bulk(self.sender, self.contract, batch)
            .map(|_| ())
            .map_err(|reason| RpcError::ExecutionReverted(reason.to_string()).into())
    }

    async fn estimate_gas(&self, batch: &Batch<'_>) -> Result<u64> {
        if self.state().gas_estimation_fails {
            return Err(RpcError::Transport("eth_estimateGas unavailable".to_string()).into());
        }
        Ok(BASE_GAS + GAS_PER_RECIPIENT * batch.len() as u64)
    }

    async fn submit(&self, batch: &Batch<'_>, gas_limit: Option<u64>) -> Result<TxHash> {
        let mut state = self.state();
        let hash = state.next_hash();
        state.writes.push(MockWrite::BulkTransfer {
            batch_index: batch.index,
            recipients: batch.len(),
            gas_limit,
        });
        let status = match state.check_bulk(self.sender, self.contract, batch) {
            Ok(total) if !state.reverting_batches.contains(&batch.index) => {
                state.apply_bulk(self.sender, self.contract, batch, total);
                TxStatus::Success
            }
            _ => TxStatus::Reverted,
        };
        state.receipts.insert(hash, status);
        Ok(hash)
    }
}

#[async_trait]
impl ReceiptWaiter for MockChain {
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxStatus> {
        self.state()
            .receipts
            .get(&hash)
            .copied()
            .ok_or_else(|| RpcError::UnknownTransaction(hash).into())
    }
}
