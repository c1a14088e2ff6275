//! Allocation reconciliation: fold the contract's `Allocation` events over a
//! block range into one overwrite statement per participant address.
//!
//! Amounts are summed per address whether or not the on-chain transfer
//! succeeded; `success` only feeds the reported counters.

use crate::error::{Error, Result};
use crate::events::{self, AllocationEvent};
use crate::gateway::ChainGateway;
use crate::utils::address_hex;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use web3::types::{Address, U256};

/// How an update statement finds its row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SqlKey {
    /// `WHERE LOWER(wallet_address) = LOWER(..)`
    Address,
    /// resolve the `user_id` of the row holding the address first
    UserId,
}

impl Default for SqlKey {
    fn default() -> Self {
        SqlKey::Address
    }
}

impl std::str::FromStr for SqlKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "address" => Ok(SqlKey::Address),
            "user-id" | "user_id" => Ok(SqlKey::UserId),
            other => Err(Error::Config(format!("unknown sql key {:?}, use address or user-id", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub from_block: u64,
    pub to_block: u64,
    /// ascending by address
    pub totals: BTreeMap<Address, U256>,
    pub total_events: usize,
    pub success_events: usize,
    pub failed_events: usize,
    /// matched the topic but did not decode
    pub undecoded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlOptions {
    pub table: String,
    pub status_marker: String,
    pub key: SqlKey,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            table: crate::config::DEFAULT_TABLE.to_string(),
            status_marker: crate::config::DEFAULT_STATUS_MARKER.to_string(),
            key: SqlKey::Address,
        }
    }
}

/// Fold events into per-address totals. Order does not matter. A total that
/// no longer fits in 256 bits is an error, never a wrap.
pub fn aggregate<'a, I>(events: I) -> Result<Reconciliation>
where
    I: IntoIterator<Item = &'a AllocationEvent>,
{
    let mut rec = Reconciliation::default();
    for event in events {
        let total = rec.totals.entry(event.participant).or_default();
        *total = total.checked_add(event.amount).ok_or_else(|| {
            Error::Collaborator(format!(
                "Allocation total for {} overflows uint256",
                address_hex(&event.participant)
            ))
        })?;
        rec.total_events += 1;
        if event.success {
            rec.success_events += 1;
        } else {
            rec.failed_events += 1;
        }
    }
    Ok(rec)
}

/// Scan `[from_block, to_block]` with one log query. `to_block` defaults to
/// the current head. Ranges the node refuses must be split by the caller.
pub async fn reconcile<G: ChainGateway + ?Sized>(gw: &G, from_block: u64, to_block: Option<u64>) -> Result<Reconciliation> {
    let to_block = match to_block {
        Some(b) => b,
        None => gw.block_number().await?,
    };
    if from_block > to_block {
        return Err(Error::Config(format!(
            "FROM_BLOCK {} is after TO_BLOCK {}",
            from_block, to_block
        )));
    }
    info!("scanning Allocation events in blocks {}-{}", from_block, to_block);

    let logs = gw.logs(events::allocation_topic(), from_block, to_block).await?;
    let mut decoded = Vec::with_capacity(logs.len());
    let mut undecoded = 0;
    for entry in &logs {
        match events::decode_allocation(entry) {
            Some(event) => decoded.push(event),
            None => {
                undecoded += 1;
                warn!("undecodable Allocation log at block {:?}", entry.block_number);
            }
        }
    }

    let mut rec = aggregate(&decoded)?;
    rec.from_block = from_block;
    rec.to_block = to_block;
    rec.undecoded = undecoded;
    info!(
        "events={} success={} failed={} addresses={}",
        rec.total_events,
        rec.success_events,
        rec.failed_events,
        rec.totals.len()
    );
    Ok(rec)
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Table names go into the script verbatim, so only plain identifiers pass.
pub fn check_table_name(table: &str) -> Result<()> {
    let plain = !table.is_empty()
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !plain {
        return Err(Error::Config(format!(
            "SQL table name {:?} must be letters, digits and underscores",
            table
        )));
    }
    Ok(())
}

fn update_statement(address: &Address, amount: U256, opts: &SqlOptions) -> String {
    let address = address_hex(address);
    let table = &opts.table;
    let set = format!(
        "UPDATE {} SET lottery_status = '{}', lottery_balance = '{}'",
        table,
        escape(&opts.status_marker),
        amount
    );
    match opts.key {
        SqlKey::Address => format!("{} WHERE LOWER(wallet_address) = LOWER('{}');", set, address),
        SqlKey::UserId => format!(
            "{} WHERE user_id = (SELECT user_id FROM {} WHERE LOWER(wallet_address) = LOWER('{}') LIMIT 1);",
            set, table, address
        ),
    }
}

/// Render the update script: a comment header, then one statement per address.
pub fn render_sql(rec: &Reconciliation, opts: &SqlOptions, contract: Address, generated_at: DateTime<Utc>) -> Result<String> {
    check_table_name(&opts.table)?;
    let mut out = String::from("-- UPDATE statements generated from Allocation events\n");
    out.push_str(&format!(
        "-- generated at: {}\n",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    out.push_str(&format!("-- contract: {}\n", address_hex(&contract)));
    out.push_str(&format!("-- blocks: {}-{}\n", rec.from_block, rec.to_block));
    out.push_str(&format!("-- events: {}\n", rec.total_events));
    out.push_str(&format!("-- successful transfers: {}\n", rec.success_events));
    out.push_str(&format!("-- failed transfers: {}\n", rec.failed_events));
    out.push('\n');
    for (address, amount) in &rec.totals {
        out.push_str(&update_statement(address, *amount, opts));
        out.push('\n');
    }
    Ok(out)
}

pub fn write_sql(path: &Path, sql: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, sql)?;
    info!("update script written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;
    use chrono::TimeZone;

    fn alloc(who: u8, amount: u64, success: bool) -> AllocationEvent {
        AllocationEvent {
            participant: Address::repeat_byte(who),
            amount: U256::from(amount),
            success,
        }
    }

    #[test]
    fn sums_regardless_of_success() {
        let rec = aggregate(&[alloc(0xa, 100, true), alloc(0xb, 50, false), alloc(0xa, 25, true)]).unwrap();
        assert_eq!(rec.totals.len(), 2);
        assert_eq!(rec.totals[&Address::repeat_byte(0xa)], U256::from(125u64));
        assert_eq!(rec.totals[&Address::repeat_byte(0xb)], U256::from(50u64));
        assert_eq!((rec.success_events, rec.failed_events), (2, 1));
    }

    #[test]
    fn order_does_not_change_totals() {
        let mut events = vec![alloc(3, 7, true), alloc(1, 9, false), alloc(3, 1, false), alloc(2, 4, true)];
        let forward = aggregate(&events).unwrap();
        events.reverse();
        assert_eq!(aggregate(&events).unwrap(), forward);
    }

    #[test]
    fn overflowing_total_is_an_error() {
        let huge = AllocationEvent {
            participant: Address::repeat_byte(0xa),
            amount: U256::MAX,
            success: true,
        };
        let err = aggregate(&[huge, alloc(0xa, 1, false)]).unwrap_err();
        assert!(matches!(err, Error::Collaborator(ref e) if e.contains("0x0a0a")));
        // other addresses near the limit are fine on their own
        let rec = aggregate(&[huge, alloc(0xb, 1, true)]).unwrap();
        assert_eq!(rec.totals[&Address::repeat_byte(0xa)], U256::MAX);
    }

    #[test]
    fn statements_follow_the_key_choice() {
        let who = Address::repeat_byte(0xab);
        let amount = U256::from(125u64);
        assert_eq!(
            update_statement(&who, amount, &SqlOptions::default()),
            "UPDATE lottery_participants SET lottery_status = 'FINISHED', lottery_balance = '125' \
             WHERE LOWER(wallet_address) = LOWER('0xabababababababababababababababababababab');"
        );
        let by_user = SqlOptions {
            key: SqlKey::UserId,
            ..Default::default()
        };
        assert_eq!(
            update_statement(&who, amount, &by_user),
            "UPDATE lottery_participants SET lottery_status = 'FINISHED', lottery_balance = '125' \
             WHERE user_id = (SELECT user_id FROM lottery_participants \
             WHERE LOWER(wallet_address) = LOWER('0xabababababababababababababababababababab') LIMIT 1);"
        );
        assert_eq!("user-id".parse::<SqlKey>().unwrap(), SqlKey::UserId);
        assert!("email".parse::<SqlKey>().is_err());
    }

    #[test]
    fn script_is_sorted_and_deterministic() {
        let mut rec = aggregate(&[alloc(0xbb, 50, false), alloc(0xaa, 125, true)]).unwrap();
        rec.from_block = 10;
        rec.to_block = 20;
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let contract = Address::repeat_byte(0xcc);
        let sql = render_sql(&rec, &SqlOptions::default(), contract, at).unwrap();
        assert_eq!(sql, render_sql(&rec, &SqlOptions::default(), contract, at).unwrap());
        assert!(sql.contains("-- generated at: 2023-11-14T22:13:20.000Z"));
        assert!(sql.contains("-- blocks: 10-20"));
        assert!(sql.contains("-- failed transfers: 1"));
        let statements: Vec<_> = sql.lines().filter(|l| l.starts_with("UPDATE")).collect();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("'125'") && statements[0].contains("0xaaaa"));
        assert!(statements[1].contains("'50'") && statements[1].contains("0xbbbb"));
    }

    #[test]
    fn table_name_must_be_a_plain_identifier() {
        let rec = aggregate(&[alloc(0xaa, 1, true)]).unwrap();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for bad in ["", "users; DROP TABLE users", "lottery-participants", "1st", "t'x"] {
            let opts = SqlOptions {
                table: bad.to_string(),
                ..Default::default()
            };
            assert!(matches!(
                render_sql(&rec, &opts, Address::zero(), at),
                Err(Error::Config(_))
            ));
        }
        let opts = SqlOptions {
            table: "Lottery_2024".to_string(),
            ..Default::default()
        };
        let sql = render_sql(&rec, &opts, Address::zero(), at).unwrap();
        assert!(sql.contains("UPDATE Lottery_2024 SET"));
    }

    #[tokio::test]
    async fn reconcile_scans_the_range_once() {
        let gw = MockGateway::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xcc));
        gw.emit_allocation(alloc(1, 100, true)); // block 101
        gw.emit_allocation(alloc(2, 50, false)); // block 102
        gw.emit_allocation(alloc(1, 25, true)); // block 103
        gw.emit_allocation(alloc(3, 999, true)); // block 104

        let first = reconcile(&gw, 101, Some(103)).await.unwrap();
        assert_eq!(gw.with_state(|s| s.logs_requests), 1);
        assert_eq!(first.totals[&Address::repeat_byte(1)], U256::from(125u64));
        assert!(!first.totals.contains_key(&Address::repeat_byte(3)));
        assert_eq!(first.total_events, 3);
        assert_eq!(reconcile(&gw, 101, Some(103)).await.unwrap(), first);

        let to_head = reconcile(&gw, 0, None).await.unwrap();
        assert_eq!(to_head.to_block, 104);
        assert_eq!(to_head.totals.len(), 3);

        assert!(matches!(reconcile(&gw, 50, Some(10)).await, Err(Error::Config(_))));
    }
}
