use alloy::primitives::{Address, B256, I256, U256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BulkError>;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("input error: {0}")]
    Load(#[from] LoadError),
    #[error("precondition failed: {0}")]
    Guard(#[from] GuardError),
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),
    #[error("network error: {0}")]
    Net(#[from] RpcError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("report output failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("report encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rejections raised while reading recipient lists and balance snapshots.
///
/// `row` is the 1-based line number in the source file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("row {row}: malformed amount `{raw}`")]
    MalformedAmount { row: u64, raw: String },
    #[error("row {row}: invalid address `{raw}`")]
    InvalidAddress { row: u64, raw: String },
    #[error("row {row}: expected `address, amount`")]
    IncompleteRow { row: u64 },
    #[error("row {row}: amount must be greater than zero")]
    NonPositiveAmount { row: u64 },
    #[error("transfer list is empty")]
    EmptySource,
    #[error("amount total overflows uint256")]
    TotalOverflow,
    #[error("failed to open ledger source: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ledger source: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("insufficient token balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },
    #[error("approval did not take effect: expected at least {expected}, allowance is {actual}")]
    ApprovalFailed { expected: U256, actual: U256 },
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch {batch_index} simulation failed: {reason}")]
    SimulationFailed { batch_index: usize, reason: String },
    #[error("transaction {hash:#x} reverted")]
    TransactionReverted { hash: B256 },
    #[error("transaction {hash:#x} not confirmed after {waited_ms}ms")]
    ConfirmationTimeout { hash: B256, waited_ms: u64 },
    #[error("balance delta mismatch for {address:#x}: expected {expected}, observed {actual}")]
    VerificationMismatch {
        address: Address,
        expected: U256,
        actual: I256,
    },
    #[error("batch size {batch_size} exceeds on-chain recipient limit {limit}")]
    BatchSizeExceedsLimit { batch_size: usize, limit: usize },
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("execution reverted: {0}")]
    ExecutionReverted(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("unknown transaction {0:#x}")]
    UnknownTransaction(B256),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Fatal outcome of a distribution run.
///
/// Carries the batches that were confirmed before the failure, since those
/// transfers are final on-chain and must still be reported.
#[derive(Debug, Error)]
#[error("{}: {source}", describe_stage(.failed_batch))]
pub struct RunError {
    /// `None` when the run failed before the first batch was attempted.
    pub failed_batch: Option<usize>,
    pub completed: Vec<crate::driver::BatchReport>,
    #[source]
    pub source: BulkError,
}

impl RunError {
    pub fn before_batches(source: impl Into<BulkError>) -> Self {
        Self {
            failed_batch: None,
            completed: Vec::new(),
            source: source.into(),
        }
    }
}

fn describe_stage(failed_batch: &Option<usize>) -> String {
    match failed_batch {
        Some(index) => format!("distribution halted at batch {index}"),
        None => "distribution aborted before the first batch".to_string(),
    }
}
