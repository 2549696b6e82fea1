use crate::chain::TokenReader;
use crate::error::{ConfigError, Result};
use crate::ledger::LedgerMap;
use alloy::primitives::Address;
use futures::stream::{self, StreamExt, TryStreamExt};

/// Reads the current balance of every address, at most `concurrency` at a time.
///
/// The returned map follows the order of `addresses`; repeated addresses are
/// read once.
pub async fn capture_balances<R>(
    reader: &R,
    addresses: &[Address],
    concurrency: usize,
) -> Result<LedgerMap>
where
    R: TokenReader + ?Sized,
{
    if concurrency == 0 {
        return Err(ConfigError::InvalidConfig(
            "balance query concurrency must be greater than zero".to_string(),
        )
        .into());
    }
    let unique = LedgerMap::from_iter(addresses.iter().map(|a| (*a, Default::default())));
    let balances: Vec<_> = stream::iter(unique.addresses().iter().copied())
        .map(|address| async move { reader.balance_of(address).await.map(|b| (address, b)) })
        .buffered(concurrency)
        .try_collect()
        .await?;
    tracing::info!("[LOAD] captured {} balances", balances.len());
    Ok(balances.into_iter().collect())
}
