//! Per-batch spot checks of recipient balance deltas.
//!
//! Before a batch is submitted a random subset of its recipients is snapshotted;
//! after confirmation the same addresses are re-read and each delta must equal
//! what the batch sent them. This is probabilistic assurance only, the full
//! reconciliation pass is what covers every address.

use crate::chain::TokenReader;
use crate::error::{BatchError, Result};
use crate::partition::Batch;
use alloy::primitives::{Address, I256, U256};
use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

pub const SAMPLE_PERCENT: usize = 10;
pub const MIN_SAMPLES: usize = 1;
pub const MAX_SAMPLES: usize = 10;

/// `clamp(ceil(10% of len), 1, 10)`, never more than `len`.
pub fn sample_size(batch_len: usize) -> usize {
    if batch_len == 0 {
        return 0;
    }
    (batch_len * SAMPLE_PERCENT)
        .div_ceil(100)
        .clamp(MIN_SAMPLES, MAX_SAMPLES)
        .min(batch_len)
}

/// Chooses `amount` distinct indices from `0..len`.
pub trait IndexSampler: Send {
    fn sample(&mut self, len: usize, amount: usize) -> Vec<usize>;
}

/// Uniform sampling without replacement.
#[derive(Debug)]
pub struct RandomIndexSampler {
    rng: StdRng,
}

impl RandomIndexSampler {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl IndexSampler for RandomIndexSampler {
    fn sample(&mut self, len: usize, amount: usize) -> Vec<usize> {
        rand::seq::index::sample(&mut self.rng, len, amount.min(len)).into_vec()
    }
}

/// Replays a fixed index list; out-of-range and repeated indices are skipped.
#[derive(Debug, Clone)]
pub struct FixedIndexSampler {
    indices: Vec<usize>,
}

impl FixedIndexSampler {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }
}

impl IndexSampler for FixedIndexSampler {
    fn sample(&mut self, len: usize, amount: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.indices
            .iter()
            .copied()
            .filter(|idx| *idx < len && seen.insert(*idx))
            .take(amount)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationSample {
    pub address: Address,
    pub expected_amount: U256,
    pub initial_balance: U256,
}

pub struct SamplingVerifier<'a, R: ?Sized> {
    reader: &'a R,
}

impl<'a, R> SamplingVerifier<'a, R>
where
    R: TokenReader + ?Sized,
{
    pub fn new(reader: &'a R) -> Self {
        Self { reader }
    }

    /// Pre-phase. Must run before the batch transaction is sent.
    ///
    /// An address listed more than once in the batch is sampled once, with the
    /// sum of its amounts as the expected delta.
    pub async fn capture<S: IndexSampler + ?Sized>(
        &self,
        batch: &Batch<'_>,
        sampler: &mut S,
    ) -> Result<Vec<VerificationSample>> {
        let indices = sampler.sample(batch.len(), sample_size(batch.len()));
        let mut seen = HashSet::new();
        let addresses: Vec<Address> = indices
            .into_iter()
            .filter_map(|idx| batch.entries.get(idx))
            .map(|entry| entry.address)
            .filter(|address| seen.insert(*address))
            .collect();

        let balances = try_join_all(
            addresses
                .iter()
                .map(|address| self.reader.balance_of(*address)),
        )
        .await?;

        let samples: Vec<VerificationSample> = addresses
            .into_iter()
            .zip(balances)
            .map(|(address, initial_balance)| VerificationSample {
                address,
                expected_amount: batch.amount_for(address),
                initial_balance,
            })
            .collect();
        tracing::debug!(
            "[VERIFY] batch {} captured {} samples",
            batch.index,
            samples.len()
        );
        Ok(samples)
    }

    /// Post-phase. Fails on the first sample whose delta differs from its amount.
    pub async fn verify(&self, samples: &[VerificationSample]) -> Result<usize> {
        let balances = try_join_all(
            samples
                .iter()
                .map(|sample| self.reader.balance_of(sample.address)),
        )
        .await?;

        for (sample, current) in samples.iter().zip(balances) {
            let delta = signed_delta(current, sample.initial_balance);
            if delta != I256::try_from(sample.expected_amount).unwrap_or(I256::MAX) {
                return Err(BatchError::VerificationMismatch {
                    address: sample.address,
                    expected: sample.expected_amount,
                    actual: delta,
                }
                .into());
            }
            tracing::debug!(
                "[VERIFY] {:#x} received {} as expected",
                sample.address,
                sample.expected_amount
            );
        }
        Ok(samples.len())
    }
}

/// `current - initial` as a signed value, saturating at the I256 bounds.
pub(crate) fn signed_delta(current: U256, initial: U256) -> I256 {
    if current >= initial {
        I256::try_from(current - initial).unwrap_or(I256::MAX)
    } else {
        I256::try_from(initial - current)
            .map(|magnitude| -magnitude)
            .unwrap_or(I256::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BulkTransferContract, MockChain};
    use crate::error::BulkError;
    use crate::ledger::TransferEntry;
    use crate::partition::partition;

    #[test]
    fn sample_size_bounds() {
        assert_eq!(sample_size(0), 0);
        assert_eq!(sample_size(1), 1);
        assert_eq!(sample_size(9), 1);
        assert_eq!(sample_size(10), 1);
        assert_eq!(sample_size(11), 2);
        assert_eq!(sample_size(55), 6);
        assert_eq!(sample_size(100), 10);
        assert_eq!(sample_size(5_000), 10);
    }

    #[test]
    fn random_sampler_yields_distinct_in_range_indices() {
        let mut sampler = RandomIndexSampler::seeded(7);
        for len in 1..60 {
            let picked = sampler.sample(len, sample_size(len));
            let unique: HashSet<_> = picked.iter().copied().collect();
            assert_eq!(unique.len(), picked.len());
            assert_eq!(picked.len(), sample_size(len));
            assert!(picked.iter().all(|idx| *idx < len));
        }
    }

    #[test]
    fn fixed_sampler_skips_invalid_and_repeated() {
        let mut sampler = FixedIndexSampler::new(vec![4, 9, 4, 1, 2]);
        assert_eq!(sampler.sample(5, 3), vec![4, 1, 2]);
    }

    #[test]
    fn signed_delta_handles_decrease() {
        assert_eq!(
            signed_delta(U256::from(5u64), U256::from(8u64)),
            I256::try_from(-3i64).unwrap()
        );
        assert_eq!(signed_delta(U256::from(8u64), U256::from(8u64)), I256::ZERO);
    }

    fn setup(fee_bps: u64) -> (MockChain, Vec<TransferEntry>) {
        let sender = Address::with_last_byte(0xaa);
        let contract = Address::with_last_byte(0xbb);
        let chain = MockChain::new(sender, contract)
            .with_balance(sender, U256::from(1_000u64))
            .with_allowance(U256::from(1_000u64))
            .with_balance(Address::with_last_byte(2), U256::from(50u64))
            .with_transfer_fee_bps(fee_bps);
        let entries = (1..=4)
            .map(|i| TransferEntry {
                address: Address::with_last_byte(i),
                amount: U256::from(100u64),
            })
            .collect();
        (chain, entries)
    }

    #[tokio::test]
    async fn deltas_match_after_clean_transfer() {
        let (chain, entries) = setup(0);
        let batch = partition(&entries, 4).unwrap()[0];
        let verifier = SamplingVerifier::new(&chain);
        let mut sampler = FixedIndexSampler::new(vec![1]);

        let samples = verifier.capture(&batch, &mut sampler).await.unwrap();
        assert_eq!(
            samples,
            vec![VerificationSample {
                address: Address::with_last_byte(2),
                expected_amount: U256::from(100u64),
                initial_balance: U256::from(50u64),
            }]
        );
        chain.submit(&batch, None).await.unwrap();
        assert_eq!(verifier.verify(&samples).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fee_on_transfer_is_caught() {
        let (chain, entries) = setup(100);
        let batch = partition(&entries, 4).unwrap()[0];
        let verifier = SamplingVerifier::new(&chain);
        let samples = verifier
            .capture(&batch, &mut FixedIndexSampler::new(vec![0]))
            .await
            .unwrap();
        chain.submit(&batch, None).await.unwrap();

        let err = verifier.verify(&samples).await.unwrap_err();
        match err {
            BulkError::Batch(BatchError::VerificationMismatch {
                address,
                expected,
                actual,
            }) => {
                assert_eq!(address, Address::with_last_byte(1));
                assert_eq!(expected, U256::from(100u64));
                assert_eq!(actual, I256::try_from(99i64).unwrap());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_recipient_expects_summed_amount() {
        let (chain, mut entries) = setup(0);
        entries.push(entries[0]);
        let batch = partition(&entries, 5).unwrap()[0];
        let verifier = SamplingVerifier::new(&chain);
        let samples = verifier
            .capture(&batch, &mut FixedIndexSampler::new(vec![4]))
            .await
            .unwrap();
        assert_eq!(samples[0].expected_amount, U256::from(200u64));
        chain.submit(&batch, None).await.unwrap();
        assert!(verifier.verify(&samples).await.is_ok());
    }

    struct OverreachingSampler;

    impl IndexSampler for OverreachingSampler {
        fn sample(&mut self, _len: usize, _amount: usize) -> Vec<usize> {
            vec![0, 99]
        }
    }

    #[tokio::test]
    async fn out_of_range_indices_are_skipped() {
        let (chain, entries) = setup(0);
        let batch = partition(&entries, 4).unwrap()[0];
        let verifier = SamplingVerifier::new(&chain);
        let samples = verifier
            .capture(&batch, &mut OverreachingSampler)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].address, Address::with_last_byte(1));
    }
}
