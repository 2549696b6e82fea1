//! Recipient lists and balance snapshots.
//!
//! Both sources are delimiter-separated `address, amount` rows. Recipient lists
//! have no header and reject zero amounts; balance snapshots may carry a header
//! and accept zero. Addresses are held as [`Address`], so comparisons are
//! case-insensitive while the bytes sent on-chain are exactly what the row named.

use crate::error::{LoadError, Result};
use alloy::primitives::{Address, U256};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ADDRESS_HEX_LEN: usize = 40;

/// One row of a recipient list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEntry {
    pub address: Address,
    pub amount: U256,
}

/// Insertion-ordered `address -> amount` mapping.
///
/// Re-inserting an address keeps its original position and takes the newer value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerMap {
    order: Vec<Address>,
    values: HashMap<Address, U256>,
}

impl LedgerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: Address, amount: U256) -> Option<U256> {
        let previous = self.values.insert(address, amount);
        if previous.is_none() {
            self.order.push(address);
        }
        previous
    }

    /// Adds `amount` to the address's running total, keeping its first position.
    pub fn accumulate(
        &mut self,
        address: Address,
        amount: U256,
    ) -> std::result::Result<U256, LoadError> {
        let total = self
            .get_or_zero(&address)
            .checked_add(amount)
            .ok_or(LoadError::TotalOverflow)?;
        self.insert(address, total);
        Ok(total)
    }

    pub fn get(&self, address: &Address) -> Option<U256> {
        self.values.get(address).copied()
    }

    /// Missing addresses read as zero.
    pub fn get_or_zero(&self, address: &Address) -> U256 {
        self.get(address).unwrap_or(U256::ZERO)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.values.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.order
            .iter()
            .map(move |address| (*address, self.get_or_zero(address)))
    }

    pub fn addresses(&self) -> &[Address] {
        &self.order
    }
}

/// Per-address amount a recipient list sends; repeated rows are summed.
pub fn expected_transfers(entries: &[TransferEntry]) -> std::result::Result<LedgerMap, LoadError> {
    let mut expected = LedgerMap::new();
    for entry in entries {
        expected.accumulate(entry.address, entry.amount)?;
    }
    Ok(expected)
}

impl FromIterator<(Address, U256)> for LedgerMap {
    fn from_iter<I: IntoIterator<Item = (Address, U256)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (address, amount) in iter {
            map.insert(address, amount);
        }
        map
    }
}

/// Parses an amount cell: whitespace, quotes and thousands separators are
/// stripped, and what remains must be plain decimal digits fitting in uint256.
pub fn parse_amount(row: u64, raw: &str) -> std::result::Result<U256, LoadError> {
    let malformed = || LoadError::MalformedAmount {
        row,
        raw: raw.to_string(),
    };
    let cleaned: String = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    U256::from_str_radix(cleaned, 10).map_err(|_| malformed())
}

/// Parses a `0x`-prefixed 20-byte hex address in any letter case.
pub fn parse_address(row: u64, raw: &str) -> std::result::Result<Address, LoadError> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    let invalid = || LoadError::InvalidAddress {
        row,
        raw: raw.to_string(),
    };
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(invalid)?;
    if hex.len() != ADDRESS_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    hex.parse::<Address>().map_err(|_| invalid())
}

fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(source)
}

fn row_number(record: &csv::StringRecord, fallback: u64) -> u64 {
    record
        .position()
        .map(|pos| pos.line())
        .unwrap_or(fallback)
}

/// Splits a row into its address and amount cells.
///
/// An unquoted amount with thousands separators arrives as several cells
/// (`1`, `000`, `000`); trailing cells that are exact 3-digit groups are
/// joined back onto the amount.
fn split_row(
    record: &csv::StringRecord,
    row: u64,
) -> std::result::Result<(&str, Cow<'_, str>), LoadError> {
    let (address, amount) = match (record.get(0), record.get(1)) {
        (Some(address), Some(amount)) if !address.is_empty() && !amount.is_empty() => {
            (address, amount)
        }
        _ => return Err(LoadError::IncompleteRow { row }),
    };
    if record.len() == 2 {
        return Ok((address, Cow::Borrowed(amount)));
    }
    let groups: Vec<&str> = record.iter().skip(1).collect();
    let joined = groups.join(",");
    let grouped = groups[1..]
        .iter()
        .all(|group| group.len() == 3 && group.bytes().all(|b| b.is_ascii_digit()));
    if !grouped {
        return Err(LoadError::MalformedAmount { row, raw: joined });
    }
    Ok((address, Cow::Owned(joined)))
}

/// Loads a recipient list, failing on the first bad row.
pub fn load_transfer_list<R: Read>(source: R) -> Result<Vec<TransferEntry>> {
    let mut reader = csv_reader(source);
    let mut entries = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(LoadError::from)?;
        let row = row_number(&record, idx as u64 + 1);
        let (address_raw, amount_raw) = split_row(&record, row)?;
        let address = parse_address(row, address_raw)?;
        let amount = parse_amount(row, &amount_raw)?;
        if amount.is_zero() {
            return Err(LoadError::NonPositiveAmount { row }.into());
        }
        entries.push(TransferEntry { address, amount });
    }
    if entries.is_empty() {
        return Err(LoadError::EmptySource.into());
    }
    tracing::info!("[LOAD] {} transfer entries loaded", entries.len());
    Ok(entries)
}

pub fn load_transfer_file(path: impl AsRef<Path>) -> Result<Vec<TransferEntry>> {
    let file = File::open(path.as_ref()).map_err(LoadError::from)?;
    load_transfer_list(file)
}

const SNAPSHOT_HEADER: [&str; 2] = ["address", "balance"];

fn is_snapshot_header(record: &csv::StringRecord) -> bool {
    record.len() == SNAPSHOT_HEADER.len()
        && record
            .iter()
            .zip(SNAPSHOT_HEADER)
            .all(|(cell, name)| cell.eq_ignore_ascii_case(name))
}

/// Loads a balance snapshot. Zero balances are kept.
///
/// With `has_header = false` the first row is still skipped when it is the
/// exact `address,balance` header written by [`write_balance_snapshot`].
pub fn load_balance_snapshot<R: Read>(source: R, has_header: bool) -> Result<LedgerMap> {
    let mut reader = csv_reader(source);
    let mut snapshot = LedgerMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(LoadError::from)?;
        if idx == 0 && (has_header || is_snapshot_header(&record)) {
            continue;
        }
        let row = row_number(&record, idx as u64 + 1);
        let (address_raw, amount_raw) = split_row(&record, row)?;
        let address = parse_address(row, address_raw)?;
        let balance = parse_amount(row, &amount_raw)?;
        snapshot.insert(address, balance);
    }
    tracing::debug!("[LOAD] balance snapshot with {} addresses", snapshot.len());
    Ok(snapshot)
}

pub fn load_balance_file(path: impl AsRef<Path>, has_header: bool) -> Result<LedgerMap> {
    let file = File::open(path.as_ref()).map_err(LoadError::from)?;
    load_balance_snapshot(file, has_header)
}

/// Writes a snapshot in the headed `address,balance` layout. [`load_balance_file`]
/// reads it back with either header setting. Overwrites existing files.
pub fn write_balance_snapshot(path: impl AsRef<Path>, snapshot: &LedgerMap) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(LoadError::from)?;
    writer
        .write_record(SNAPSHOT_HEADER)
        .map_err(LoadError::from)?;
    for (address, balance) in snapshot.iter() {
        writer
            .write_record([format!("{address:#x}"), balance.to_string()])
            .map_err(LoadError::from)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn total_amount(entries: &[TransferEntry]) -> std::result::Result<U256, LoadError> {
    entries.iter().try_fold(U256::ZERO, |acc, entry| {
        acc.checked_add(entry.amount).ok_or(LoadError::TotalOverflow)
    })
}
