use crate::error::BatchError;
use crate::ledger::{total_amount, TransferEntry};
use alloy::primitives::{Address, U256};

/// A contiguous run of transfer entries sent in one bulk call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    pub index: usize,
    pub entries: &'a [TransferEntry],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn recipients(&self) -> Vec<Address> {
        self.entries.iter().map(|entry| entry.address).collect()
    }

    pub fn amounts(&self) -> Vec<U256> {
        self.entries.iter().map(|entry| entry.amount).collect()
    }

    pub fn total(&self) -> crate::error::Result<U256> {
        Ok(total_amount(self.entries)?)
    }

    /// Sum of every amount this batch sends to `address`.
    pub fn amount_for(&self, address: Address) -> U256 {
        self.entries
            .iter()
            .filter(|entry| entry.address == address)
            .fold(U256::ZERO, |acc, entry| acc.saturating_add(entry.amount))
    }
}

/// Splits `entries` into batches of `batch_size`; only the last may be shorter.
pub fn partition(
    entries: &[TransferEntry],
    batch_size: usize,
) -> Result<Vec<Batch<'_>>, BatchError> {
    if batch_size == 0 {
        return Err(BatchError::InvalidBatchSize);
    }
    Ok(entries
        .chunks(batch_size)
        .enumerate()
        .map(|(index, entries)| Batch { index, entries })
        .collect())
}

/// The contract reverts with "Exceeds recipient limit" past this bound.
pub fn validate_batch_size(batch_size: usize, limit: usize) -> Result<(), BatchError> {
    if batch_size == 0 {
        return Err(BatchError::InvalidBatchSize);
    }
    if batch_size > limit {
        return Err(BatchError::BatchSizeExceedsLimit { batch_size, limit });
    }
    Ok(())
}
