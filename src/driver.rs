//! Sequential batch execution.
//!
//! The driver owns the sender's write path for the whole run: batches go out
//! one at a time and each submission is confirmed before the next simulation.
//! Reads inside a batch (sampling) may fan out.

use crate::chain::{confirm, BulkTransferContract, ReceiptWaiter, TokenApprover, TokenReader, TxHash};
use crate::error::{BatchError, BulkError, Result, RunError};
use crate::guard::AllowanceGuard;
use crate::ledger::{total_amount, TransferEntry};
use crate::partition::{partition, validate_batch_size, Batch};
use crate::report::{self, DistributionReport};
use crate::sampling::{IndexSampler, SamplingVerifier};
use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::time::Instant;

pub const DEFAULT_GAS_BUFFER_PERCENT: u64 = 10;

/// Adds `percent` to a gas estimate, saturating at `u64::MAX`.
pub fn pad_gas(estimate: u64, percent: u64) -> u64 {
    let padded = u128::from(estimate) * u128::from(100 + percent) / 100;
    u64::try_from(padded).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub gas_buffer_percent: u64,
    pub sampling: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            gas_buffer_percent: DEFAULT_GAS_BUFFER_PERCENT,
            sampling: true,
        }
    }
}

/// Outcome of one confirmed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub index: usize,
    pub recipients: usize,
    #[serde(with = "report::decimal_u256")]
    pub amount: U256,
    #[serde(with = "report::hex_b256")]
    pub tx_hash: TxHash,
    /// `None` when gas estimation failed and the node picked the limit.
    pub gas_limit: Option<u64>,
    pub samples_verified: usize,
}

pub struct BatchDriver<'a, C: ?Sized, S: ?Sized> {
    chain: &'a C,
    sampler: &'a mut S,
    settings: DriverSettings,
}

impl<'a, C, S> BatchDriver<'a, C, S>
where
    C: TokenReader + BulkTransferContract + ReceiptWaiter + ?Sized,
    S: IndexSampler + ?Sized,
{
    pub fn new(chain: &'a C, sampler: &'a mut S, settings: DriverSettings) -> Self {
        Self {
            chain,
            sampler,
            settings,
        }
    }

    /// Runs every batch in order and stops at the first failure.
    ///
    /// Batches confirmed before the failure stay final on-chain; their reports
    /// travel inside the returned [`RunError`].
    pub async fn run(&mut self, batches: &[Batch<'_>]) -> std::result::Result<Vec<BatchReport>, RunError> {
        let mut completed = Vec::with_capacity(batches.len());
        for batch in batches {
            match self.execute_batch(batch).await {
                Ok(report) => completed.push(report),
                Err(source) => {
                    tracing::error!(
                        "[BATCH] halting at batch {} after {} confirmed: {source}",
                        batch.index,
                        completed.len()
                    );
                    return Err(RunError {
                        failed_batch: Some(batch.index),
                        completed,
                        source,
                    });
                }
            }
        }
        Ok(completed)
    }

    pub async fn execute_batch(&mut self, batch: &Batch<'_>) -> Result<BatchReport> {
        let amount = batch.total()?;
        tracing::info!(
            "[BATCH] batch {}: {} recipients, {} tokens",
            batch.index,
            batch.len(),
            amount
        );

        self.chain
            .simulate(batch)
            .await
            .map_err(|err| BatchError::SimulationFailed {
                batch_index: batch.index,
                reason: simulation_reason(err),
            })?;

        let gas_limit = match self.chain.estimate_gas(batch).await {
            Ok(estimate) => Some(pad_gas(estimate, self.settings.gas_buffer_percent)),
            Err(err) => {
                tracing::warn!(
                    "[BATCH] batch {} gas estimation failed, submitting without a limit: {err}",
                    batch.index
                );
                None
            }
        };

        let verifier = SamplingVerifier::new(self.chain);
        let samples = if self.settings.sampling {
            verifier.capture(batch, &mut *self.sampler).await?
        } else {
            Vec::new()
        };

        let started = Instant::now();
        let tx_hash = self.chain.submit(batch, gas_limit).await?;
        tracing::info!("[BATCH] batch {} submitted: {tx_hash:#x}", batch.index);
        confirm(self.chain, tx_hash).await?;
        tracing::info!(
            "[BATCH] batch {} confirmed in {}ms",
            batch.index,
            started.elapsed().as_millis()
        );

        let samples_verified = verifier.verify(&samples).await?;
        Ok(BatchReport {
            index: batch.index,
            recipients: batch.len(),
            amount,
            tx_hash,
            gas_limit,
            samples_verified,
        })
    }
}

fn simulation_reason(err: BulkError) -> String {
    match err {
        BulkError::Net(crate::error::RpcError::ExecutionReverted(reason)) => reason,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionSettings {
    pub batch_size: usize,
    pub driver: DriverSettings,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            driver: DriverSettings::default(),
        }
    }
}

/// Full orchestration: recipient-limit check, partition, guard on the grand
/// total, then the batches.
pub struct Distribution<'a, C: ?Sized> {
    chain: &'a C,
    sender: Address,
    settings: DistributionSettings,
}

impl<'a, C> Distribution<'a, C>
where
    C: TokenReader + TokenApprover + BulkTransferContract + ReceiptWaiter + ?Sized,
{
    pub fn new(chain: &'a C, sender: Address, settings: DistributionSettings) -> Self {
        Self {
            chain,
            sender,
            settings,
        }
    }

    pub async fn execute<S: IndexSampler + ?Sized>(
        &self,
        entries: &[TransferEntry],
        sampler: &mut S,
    ) -> std::result::Result<DistributionReport, RunError> {
        let total = total_amount(entries).map_err(RunError::before_batches)?;
        self.check_recipient_limit()
            .await
            .map_err(RunError::before_batches)?;
        let batches =
            partition(entries, self.settings.batch_size).map_err(RunError::before_batches)?;
        let guard = AllowanceGuard::new(self.chain, self.sender, self.chain.address())
            .ensure(total)
            .await
            .map_err(RunError::before_batches)?;
        tracing::info!(
            "[BATCH] distributing {total} tokens to {} recipients in {} batches",
            entries.len(),
            batches.len()
        );

        let mut driver = BatchDriver::new(self.chain, sampler, self.settings.driver);
        let reports = driver.run(&batches).await?;
        Ok(DistributionReport::completed(
            self.chain.address(),
            entries.len(),
            total,
            batches.len(),
            guard,
            reports,
        ))
    }

    async fn check_recipient_limit(&self) -> Result<()> {
        let limit = self.chain.recipient_limit().await?;
        validate_batch_size(self.settings.batch_size, limit)?;
        tracing::info!(
            "[BATCH] batch size {} within recipient limit {limit}",
            self.settings.batch_size
        );
        Ok(())
    }
}
