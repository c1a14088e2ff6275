//! Roster balance check: look up the native balance of every wallet in the
//! roster and write it back as `lottery_balance`, marking the row finished.
//!
//! Every column the check does not own is copied through byte for byte. A
//! row whose wallet is missing, malformed or unreadable is left untouched and
//! counted as failed; the rest of the roster is still processed.

use crate::error::Result;
use crate::gateway::ChainGateway;
use crate::roster::WALLET_COLUMN;
use crate::utils::{format_ether, parse_address};
use csv::ByteRecord;
use log::{info, warn};
use std::io::{Read, Write};
use std::path::Path;

pub const BALANCE_COLUMN: &str = "lottery_balance";
pub const STATUS_COLUMN: &str = "lottery_status";
pub const CHECKED_STATUS: &str = "Finished";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceReport {
    pub total_rows: usize,
    pub updated: usize,
    /// (line number, reason); line 1 is the header
    pub failed: Vec<(usize, String)>,
}

fn column(headers: &mut ByteRecord, name: &str) -> usize {
    match headers.iter().position(|h| h == name.as_bytes()) {
        Some(i) => i,
        None => {
            headers.push_field(name.as_bytes());
            headers.len() - 1
        }
    }
}

/// Copy the roster from `input` to `output`, filling in balances.
pub async fn update_balances<G, R, W>(gw: &G, input: R, output: W) -> Result<BalanceReport>
where
    G: ChainGateway + ?Sized,
    R: Read,
    W: Write,
{
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let mut headers = reader.byte_headers()?.clone();
    let wallet_idx = headers.iter().position(|h| h == WALLET_COLUMN.as_bytes());
    let balance_idx = column(&mut headers, BALANCE_COLUMN);
    let status_idx = column(&mut headers, STATUS_COLUMN);

    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);
    writer.write_byte_record(&headers)?;

    let mut report = BalanceReport::default();
    for (index, row) in reader.byte_records().enumerate() {
        let row = row?;
        let line = row.position().map(|p| p.line() as usize).unwrap_or(index + 2);
        report.total_rows += 1;

        let mut fields: Vec<Vec<u8>> = row.iter().map(<[u8]>::to_vec).collect();
        fields.resize(headers.len(), Vec::new());

        let wallet = wallet_idx
            .and_then(|i| row.get(i))
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(str::trim)
            .unwrap_or_default();
        let outcome = if wallet.is_empty() {
            Err(format!("no {}", WALLET_COLUMN))
        } else {
            match parse_address(wallet) {
                Some(address) => gw.balance(address).await.map_err(|e| e.to_string()),
                None => Err(format!("invalid address {:?}", wallet)),
            }
        };
        match outcome {
            Ok(balance) => {
                info!("line {} {} balance {} ETH", line, wallet, format_ether(balance));
                fields[balance_idx] = format_ether(balance).into_bytes();
                fields[status_idx] = CHECKED_STATUS.as_bytes().to_vec();
                report.updated += 1;
            }
            Err(reason) => {
                warn!("line {} balance not updated: {}", line, reason);
                report.failed.push((line, reason));
            }
        }
        writer.write_byte_record(&ByteRecord::from(fields))?;
    }
    writer.flush()?;

    info!(
        "balance check rows={} updated={} failed={}",
        report.total_rows,
        report.updated,
        report.failed.len()
    );
    Ok(report)
}

/// Rewrite the roster at `input` into `output`, which may be the same file.
pub async fn update_balances_at<G: ChainGateway + ?Sized>(gw: &G, input: &Path, output: &Path) -> Result<BalanceReport> {
    let file = crate::roster::open_roster(input)?;
    let mut buf = Vec::new();
    let report = update_balances(gw, file, &mut buf).await?;
    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(output, buf)?;
    info!("roster with balances written to {}", output.display());
    Ok(report)
}
