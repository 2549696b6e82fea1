//! Capability interfaces for the on-chain collaborators.
//!
//! Each component depends only on the operations it needs: the guard reads and
//! approves, the driver simulates and submits, the verifier only reads. Every
//! write is followed by [`ReceiptWaiter::wait_for_receipt`] before the next one.

pub mod mock;
pub mod rpc;

use crate::error::{BatchError, Result};
use crate::partition::Batch;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

pub use mock::{MockChain, MockWrite};
pub use rpc::{ReceiptSettings, RpcChain};

pub type TxHash = B256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted,
}

/// ERC20 view calls.
#[async_trait]
pub trait TokenReader: Send + Sync {
    async fn balance_of(&self, owner: Address) -> Result<U256>;
    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256>;
}

/// ERC20 `approve` from the sender account.
#[async_trait]
pub trait TokenApprover: Send + Sync {
    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash>;
}

/// The bulk-transfer contract's `bulkSendERC20Different` entry point.
#[async_trait]
pub trait BulkTransferContract: Send + Sync {
    /// Contract address; also the spender the allowance is granted to.
    fn address(&self) -> Address;
    async fn recipient_limit(&self) -> Result<usize>;
    /// Dry-runs the call; `Err` carries the revert reason when one is available.
    async fn simulate(&self, batch: &Batch<'_>) -> Result<()>;
    async fn estimate_gas(&self, batch: &Batch<'_>) -> Result<u64>;
    async fn submit(&self, batch: &Batch<'_>, gas_limit: Option<u64>) -> Result<TxHash>;
}

#[async_trait]
pub trait ReceiptWaiter: Send + Sync {
    /// Blocks until the transaction is mined (one confirmation).
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxStatus>;
}

/// Waits for `hash` and turns a reverted receipt into a fatal error.
pub async fn confirm<W: ReceiptWaiter + ?Sized>(waiter: &W, hash: TxHash) -> Result<()> {
    match waiter.wait_for_receipt(hash).await? {
        TxStatus::Success => Ok(()),
        TxStatus::Reverted => Err(BatchError::TransactionReverted { hash }.into()),
    }
}
