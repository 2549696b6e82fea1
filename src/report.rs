//! Persisted run outputs.
//!
//! Reports are pretty-printed JSON. Big integers are written as decimal strings
//! so no consumer ever rounds them through a float.

use crate::driver::BatchReport;
use crate::error::{Result, RunError};
use crate::guard::{AllowanceWrite, GuardReport};
use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::path::Path;

pub const DISTRIBUTION_REPORT_FILE: &str = "distribution_report.json";
pub const RECONCILIATION_REPORT_FILE: &str = "reconciliation_report.json";

/// Writes `value` to `path`, replacing any previous report.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

pub mod decimal_u256 {
    use alloy::primitives::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }
}

pub mod decimal_u256_opt {
    use alloy::primitives::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }
}

pub mod decimal_i256 {
    use alloy::primitives::I256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }
}

pub mod decimal_i256_opt {
    use alloy::primitives::I256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<I256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }
}

pub mod hex_address {
    use alloy::primitives::Address;
    use serde::Serializer;

    /// Lowercase `0x` form, matching the snapshot files.
    pub fn serialize<S: Serializer>(value: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{value:#x}"))
    }
}

pub mod hex_b256 {
    use alloy::primitives::B256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &B256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{value:#x}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowanceSummary {
    #[serde(with = "decimal_u256")]
    pub sender_balance: U256,
    #[serde(with = "decimal_u256")]
    pub initial_allowance: U256,
    #[serde(with = "decimal_u256")]
    pub final_allowance: U256,
    pub writes: Vec<String>,
}

impl From<GuardReport> for AllowanceSummary {
    fn from(report: GuardReport) -> Self {
        Self {
            sender_balance: report.balance,
            initial_allowance: report.initial_allowance,
            final_allowance: report.final_allowance,
            writes: report
                .writes
                .iter()
                .map(|write| match write {
                    AllowanceWrite::Reset => "reset to 0".to_string(),
                    AllowanceWrite::Approve(amount) => format!("approve {amount}"),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    /// `None` when the run stopped before the first batch.
    pub batch_index: Option<usize>,
    pub error: String,
}

/// What a `distribute` run did, including partial progress on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    #[serde(with = "hex_address")]
    pub bulk_contract: Address,
    pub recipients: usize,
    #[serde(with = "decimal_u256_opt")]
    pub total_amount: Option<U256>,
    pub batch_count: usize,
    pub allowance: Option<AllowanceSummary>,
    pub batches: Vec<BatchReport>,
    pub confirmed_recipients: usize,
    #[serde(with = "decimal_u256")]
    pub confirmed_amount: U256,
    pub failure: Option<FailureSummary>,
}

impl DistributionReport {
    pub fn completed(
        bulk_contract: Address,
        recipients: usize,
        total_amount: U256,
        batch_count: usize,
        guard: GuardReport,
        batches: Vec<BatchReport>,
    ) -> Self {
        let mut report = Self {
            bulk_contract,
            recipients,
            total_amount: Some(total_amount),
            batch_count,
            allowance: Some(guard.into()),
            batches: Vec::new(),
            confirmed_recipients: 0,
            confirmed_amount: U256::ZERO,
            failure: None,
        };
        report.record(batches);
        report
    }

    /// Report for a halted run. Confirmed batches are final on-chain and are
    /// listed as such.
    pub fn failed(
        bulk_contract: Address,
        recipients: usize,
        total_amount: Option<U256>,
        batch_count: usize,
        err: &RunError,
    ) -> Self {
        let mut report = Self {
            bulk_contract,
            recipients,
            total_amount,
            batch_count,
            allowance: None,
            batches: Vec::new(),
            confirmed_recipients: 0,
            confirmed_amount: U256::ZERO,
            failure: Some(FailureSummary {
                batch_index: err.failed_batch,
                error: err.source.to_string(),
            }),
        };
        report.record(err.completed.clone());
        report
    }

    fn record(&mut self, batches: Vec<BatchReport>) {
        self.confirmed_recipients = batches.iter().map(|batch| batch.recipients).sum();
        self.confirmed_amount = batches
            .iter()
            .fold(U256::ZERO, |acc, batch| acc.saturating_add(batch.amount));
        self.batches = batches;
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}
