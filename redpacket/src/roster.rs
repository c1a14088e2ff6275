//! Participant roster loading.
//!
//! Each data row goes through four checks and stops at the first failure:
//! required fields present, `user_id` a positive integer, `wallet_address`
//! well formed, and (optionally) no contract code at the address. The last
//! check costs one chain read per row.

use crate::error::{Error, RejectReason, Result};
use crate::gateway::ChainGateway;
use crate::utils::parse_address;
use crate::FailurePolicy;
use log::{info, warn};
use std::io::Read;
use std::path::Path;
use web3::types::{Address, U256};

pub const USER_ID_COLUMN: &str = "user_id";
pub const WALLET_COLUMN: &str = "wallet_address";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub employee_id: u64,
    pub wallet_address: Address,
}

impl ParticipantRecord {
    pub fn employee_id_u256(&self) -> U256 {
        U256::from(self.employee_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterPolicy {
    pub eoa_check: bool,
    pub on_invalid: FailurePolicy,
}

impl Default for RosterPolicy {
    fn default() -> Self {
        Self {
            eoa_check: true,
            on_invalid: FailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(ParticipantRecord),
    Rejected { reason: RejectReason, line: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSummary {
    pub total_rows: usize,
    /// in input order, duplicates included
    pub accepted: Vec<ParticipantRecord>,
    /// (line number, reason); line 1 is the header
    pub rejected: Vec<(usize, RejectReason)>,
}

impl RosterSummary {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Checks that need no chain access.
pub fn check_fields(user_id: Option<&str>, wallet: Option<&str>) -> std::result::Result<ParticipantRecord, RejectReason> {
    let user_id = user_id.map(str::trim).filter(|v| !v.is_empty());
    let wallet = wallet.map(str::trim).filter(|v| !v.is_empty());
    let (user_id, wallet) = match (user_id, wallet) {
        (None, _) => return Err(RejectReason::MissingField(USER_ID_COLUMN)),
        (_, None) => return Err(RejectReason::MissingField(WALLET_COLUMN)),
        (Some(u), Some(w)) => (u, w),
    };
    let employee_id = match user_id.parse::<u64>() {
        Ok(id) if id > 0 && user_id.chars().all(|c| c.is_ascii_digit()) => id,
        _ => return Err(RejectReason::InvalidIdentifier(user_id.to_string())),
    };
    let wallet_address = parse_address(wallet).ok_or_else(|| RejectReason::InvalidAddress(wallet.to_string()))?;
    Ok(ParticipantRecord {
        employee_id,
        wallet_address,
    })
}

/// Run all checks for one row.
pub async fn validate_row<G: ChainGateway + ?Sized>(
    gw: &G,
    user_id: Option<&str>,
    wallet: Option<&str>,
    line: usize,
    eoa_check: bool,
) -> Result<ValidationOutcome> {
    let record = match check_fields(user_id, wallet) {
        Ok(record) => record,
        Err(reason) => return Ok(ValidationOutcome::Rejected { reason, line }),
    };
    if eoa_check && !gw.code_at(record.wallet_address).await?.is_empty() {
        return Ok(ValidationOutcome::Rejected {
            reason: RejectReason::NotEoa(record.wallet_address),
            line,
        });
    }
    Ok(ValidationOutcome::Accepted(record))
}

/// Decode the two columns the loader reads. Other columns are
/// never decoded, so stray bytes there cannot fail a row.
fn decode_fields<'a>(
    user_id: Option<&'a [u8]>,
    wallet: Option<&'a [u8]>,
) -> std::result::Result<(&'a str, &'a str), RejectReason> {
    let (user_id, wallet) = match (user_id.filter(|v| !v.is_empty()), wallet.filter(|v| !v.is_empty())) {
        (None, _) => return Err(RejectReason::MissingField(USER_ID_COLUMN)),
        (_, None) => return Err(RejectReason::MissingField(WALLET_COLUMN)),
        (Some(u), Some(w)) => (u, w),
    };
    let user_id = std::str::from_utf8(user_id)
        .map_err(|_| RejectReason::InvalidIdentifier(String::from_utf8_lossy(user_id).into_owned()))?;
    let wallet =
        std::str::from_utf8(wallet).map_err(|_| RejectReason::InvalidAddress(String::from_utf8_lossy(wallet).into_owned()))?;
    Ok((user_id, wallet))
}

pub async fn load_participants<G, R>(gw: &G, input: R, policy: RosterPolicy) -> Result<RosterSummary>
where
    G: ChainGateway + ?Sized,
    R: Read,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);
    let headers = reader.byte_headers()?.clone();
    let user_idx = headers.iter().position(|h| h == USER_ID_COLUMN.as_bytes());
    let wallet_idx = headers.iter().position(|h| h == WALLET_COLUMN.as_bytes());
    if user_idx.is_none() || wallet_idx.is_none() {
        warn!("roster header lacks {} or {}, every row will be rejected", USER_ID_COLUMN, WALLET_COLUMN);
    }

    let mut summary = RosterSummary::default();
    for (index, row) in reader.byte_records().enumerate() {
        let row = row?;
        let line = row.position().map(|p| p.line() as usize).unwrap_or(index + 2);
        summary.total_rows += 1;
        let outcome = match decode_fields(user_idx.and_then(|i| row.get(i)), wallet_idx.and_then(|i| row.get(i))) {
            Ok((user_id, wallet)) => validate_row(gw, Some(user_id), Some(wallet), line, policy.eoa_check).await?,
            Err(reason) => ValidationOutcome::Rejected { reason, line },
        };
        match outcome {
            ValidationOutcome::Accepted(record) => summary.accepted.push(record),
            ValidationOutcome::Rejected { reason, line } => {
                if !policy.on_invalid.is_skip() {
                    return Err(Error::Validation { line, reason });
                }
                warn!("skip line {}: {}", line, reason);
                summary.rejected.push((line, reason));
            }
        }
    }

    info!(
        "roster rows={} accepted={} rejected={}",
        summary.total_rows,
        summary.accepted.len(),
        summary.rejected_count()
    );
    Ok(summary)
}

pub fn open_roster(path: &Path) -> Result<std::fs::File> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Config(format!("CSV_PATH {}: {}", path.display(), e)))?;
    info!("reading roster {}", path.display());
    Ok(file)
}
