//! Operator binary: distribute, snapshot, reconcile.
//!
//! Logs go to stderr; stdout carries only the final summaries.

use alloy::primitives::Address;
use bulk_sender::chain::rpc::{connect_http, connect_read_only};
use bulk_sender::chain::BulkTransferContract;
use bulk_sender::driver::Distribution;
use bulk_sender::ledger::{
    expected_transfers, load_balance_file, load_transfer_file, total_amount,
    write_balance_snapshot,
};
use bulk_sender::reconcile::{reconcile, ReconciliationReport};
use bulk_sender::report::{
    write_json, DistributionReport, DISTRIBUTION_REPORT_FILE, RECONCILIATION_REPORT_FILE,
};
use bulk_sender::runtime::{parse_command, Command, USAGE};
use bulk_sender::sampling::RandomIndexSampler;
use bulk_sender::snapshot::capture_balances;
use bulk_sender::utils::Config;
use std::path::Path;

const SUMMARY_MISMATCHES: usize = 20;
const SUMMARY_MATCHES: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = parse_command()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = Config::load()?;
    tracing::info!("[STARTUP] running `{}`", command.as_str());
    match command {
        Command::Distribute { recipients } => distribute(&config, &recipients).await,
        Command::Snapshot { recipients, output } => snapshot(&config, &recipients, &output).await,
        Command::Reconcile {
            start,
            end,
            recipients,
        } => run_reconcile(&config, &start, &end, &recipients),
        Command::RecipientLimit => recipient_limit(&config).await,
        Command::Help => Ok(()),
    }
}

async fn distribute(config: &Config, recipients: &Path) -> anyhow::Result<()> {
    let entries = load_transfer_file(recipients)?;
    let chain = connect_http(
        config.require_rpc_url()?,
        config.require_private_key()?,
        config.require_token_address()?,
        config.require_bulk_sender_address()?,
        config.receipt_settings(),
    )?;
    let settings = config.distribution_settings();
    let report_path = config.report_dir.join(DISTRIBUTION_REPORT_FILE);
    tracing::info!(
        "[STARTUP] sender {:#x}, {} recipients from {}",
        chain.sender(),
        entries.len(),
        recipients.display()
    );

    let mut sampler = RandomIndexSampler::from_entropy();
    let outcome = Distribution::new(&chain, chain.sender(), settings)
        .execute(&entries, &mut sampler)
        .await;
    match outcome {
        Ok(report) => {
            write_json(&report_path, &report)?;
            println!(
                "distributed {} tokens to {} recipients in {} batches; report at {}",
                report.confirmed_amount,
                report.confirmed_recipients,
                report.batches.len(),
                report_path.display()
            );
            for batch in &report.batches {
                println!(
                    "  batch {:>4}: {:>5} recipients, tx {:#x}",
                    batch.index, batch.recipients, batch.tx_hash
                );
            }
            Ok(())
        }
        Err(err) => {
            let report = DistributionReport::failed(
                chain.address(),
                entries.len(),
                total_amount(&entries).ok(),
                entries.len().div_ceil(settings.batch_size),
                &err,
            );
            if let Err(write_err) = write_json(&report_path, &report) {
                tracing::error!("[REPORT] failed to write {}: {write_err}", report_path.display());
            }
            println!(
                "distribution halted: {} of {} recipients confirmed; report at {}",
                report.confirmed_recipients,
                report.recipients,
                report_path.display()
            );
            Err(err.into())
        }
    }
}

async fn snapshot(config: &Config, recipients: &Path, output: &Path) -> anyhow::Result<()> {
    let entries = load_transfer_file(recipients)?;
    let chain = connect_read_only(
        config.require_rpc_url()?,
        config.require_token_address()?,
        config.bulk_sender_address.unwrap_or(Address::ZERO),
    )?;
    let addresses: Vec<Address> = entries.iter().map(|entry| entry.address).collect();
    let balances =
        capture_balances(&chain, &addresses, config.balance_query_concurrency).await?;
    write_balance_snapshot(output, &balances)?;
    println!("captured {} balances into {}", balances.len(), output.display());
    Ok(())
}

fn run_reconcile(config: &Config, start: &Path, end: &Path, recipients: &Path) -> anyhow::Result<()> {
    let start_balances = load_balance_file(start, false)?;
    let end_balances = load_balance_file(end, true)?;
    let expected = expected_transfers(&load_transfer_file(recipients)?)?;

    let report =
        ReconciliationReport::from_results(reconcile(&start_balances, &end_balances, &expected));
    let report_path = config.report_dir.join(RECONCILIATION_REPORT_FILE);
    write_json(&report_path, &report)?;
    print!("{}", report.render_summary(SUMMARY_MISMATCHES, SUMMARY_MATCHES));
    println!("report at {}", report_path.display());
    Ok(())
}

async fn recipient_limit(config: &Config) -> anyhow::Result<()> {
    let chain = connect_read_only(
        config.require_rpc_url()?,
        config.token_address.unwrap_or(Address::ZERO),
        config.require_bulk_sender_address()?,
    )?;
    let limit = chain.recipient_limit().await?;
    println!("recipient limit: {limit}");
    if config.batch_size > limit {
        tracing::warn!(
            "[BATCH] configured BATCH_SIZE {} exceeds the recipient limit",
            config.batch_size
        );
    }
    Ok(())
}
