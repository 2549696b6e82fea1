use alloy::primitives::{Address, U256};
use bulk_sender::chain::MockChain;
use bulk_sender::driver::{Distribution, DistributionSettings};
use bulk_sender::ledger::{expected_transfers, LedgerMap, TransferEntry};
use bulk_sender::partition::partition;
use bulk_sender::reconcile::{reconcile, ReconciliationReport};
use bulk_sender::sampling::RandomIndexSampler;
use std::time::Instant;

const PERF_BUDGET_MS: u128 = 2_000;
const BENCH_ROUNDS: usize = 5;
const RECIPIENTS: usize = 20_000;
const BATCH_SIZE: usize = 200;

fn entries() -> Vec<TransferEntry> {
    (0..RECIPIENTS)
        .map(|i| {
            let mut bytes = [0u8; 20];
            bytes[12..20].copy_from_slice(&(i as u64 + 1).to_be_bytes());
            TransferEntry {
                address: Address::from(bytes),
                amount: U256::from(1_000 + i as u64),
            }
        })
        .collect()
}

fn median_ms(mut samples: Vec<u128>) -> u128 {
    if samples.is_empty() {
        return 0;
    }
    samples.sort_unstable();
    samples[samples.len() / 2]
}

async fn run_single_round(round: usize, list: &[TransferEntry]) -> Result<u128, String> {
    let sender = Address::with_last_byte(0xaa);
    let chain = MockChain::new(sender, Address::with_last_byte(0xbb))
        .with_balance(sender, U256::MAX)
        .with_recipient_limit(BATCH_SIZE);
    let settings = DistributionSettings {
        batch_size: BATCH_SIZE,
        ..DistributionSettings::default()
    };

    let started = Instant::now();
    let batches = partition(list, BATCH_SIZE).map_err(|err| err.to_string())?;
    let mut sampler = RandomIndexSampler::seeded(round as u64);
    Distribution::new(&chain, sender, settings)
        .execute(list, &mut sampler)
        .await
        .map_err(|err| err.to_string())?;

    let expected = expected_transfers(list).map_err(|err| err.to_string())?;
    let end: LedgerMap = list
        .iter()
        .map(|entry| (entry.address, chain.balance(entry.address)))
        .collect();
    let report = ReconciliationReport::from_results(reconcile(&LedgerMap::new(), &end, &expected));
    if !report.all_match() || batches.len() != RECIPIENTS / BATCH_SIZE {
        return Err(format!(
            "round {round}: {} mismatches over {} batches",
            report.mismatched,
            batches.len()
        ));
    }
    Ok(started.elapsed().as_millis())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("[BENCH][FAIL] failed to construct Tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    let list = entries();
    let mut rounds = Vec::with_capacity(BENCH_ROUNDS);
    for round in 0..BENCH_ROUNDS {
        match runtime.block_on(run_single_round(round, &list)) {
            Ok(elapsed_ms) => rounds.push(elapsed_ms),
            Err(err) => {
                eprintln!("[BENCH][FAIL] {err}");
                std::process::exit(1);
            }
        }
    }

    let median = median_ms(rounds.clone());
    println!(
        "[BENCH] pipeline_throughput recipients={} rounds_ms={:?} median_ms={} budget_ms={}",
        RECIPIENTS, rounds, median, PERF_BUDGET_MS
    );

    if median > PERF_BUDGET_MS {
        eprintln!(
            "[BENCH][FAIL] pipeline median {}ms exceeded {}ms budget",
            median, PERF_BUDGET_MS
        );
        std::process::exit(1);
    }

    println!(
        "[BENCH][PASS] pipeline median {}ms within {}ms budget",
        median, PERF_BUDGET_MS
    );
}
