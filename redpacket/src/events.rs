//! Red packet contract events and best-effort decoding of receipt logs.

use crate::gateway::LogEntry;
use web3::ethabi::{self, Event, EventParam, Log, ParamType, RawLog, Token};
use web3::types::{Address, H256, U256};

pub const DRAW_REQUESTED: &str = "DrawRequested";
pub const DRAW_COMPLETED: &str = "DrawCompleted";
pub const ALLOCATION: &str = "Allocation";
pub const ADMIN_ADDED: &str = "AdminAdded";
pub const PARTICIPANT_SET: &str = "ParticipantSet";

fn param(name: &str, kind: ParamType, indexed: bool) -> EventParam {
    EventParam {
        name: name.to_string(),
        kind,
        indexed,
    }
}

pub fn event(name: &str) -> Option<Event> {
    let inputs = match name {
        DRAW_REQUESTED => vec![param("requestId", ParamType::Uint(256), true)],
        DRAW_COMPLETED => vec![
            param("requestId", ParamType::Uint(256), true),
            param("totalAmount", ParamType::Uint(256), false),
            param("participantCount", ParamType::Uint(256), false),
        ],
        ALLOCATION => vec![
            param("participant", ParamType::Address, true),
            param("amount", ParamType::Uint(256), false),
            param("success", ParamType::Bool, false),
        ],
        ADMIN_ADDED => vec![param("admin", ParamType::Address, true)],
        PARTICIPANT_SET => vec![
            param("employeeId", ParamType::Uint(256), true),
            param("participant", ParamType::Address, true),
        ],
        _ => return None,
    };
    Some(Event {
        name: name.to_string(),
        inputs,
        anonymous: false,
    })
}

/// topic0 of the named event
pub fn topic(name: &str) -> Option<H256> {
    event(name).map(|e| e.signature())
}

pub fn allocation_topic() -> H256 {
    event(ALLOCATION).map(|e| e.signature()).unwrap_or_default()
}

fn decode_with(event: &Event, entry: &LogEntry) -> Option<Log> {
    if entry.topics.first() != Some(&event.signature()) {
        return None;
    }
    event
        .parse_log(RawLog {
            topics: entry.topics.clone(),
            data: entry.data.clone(),
        })
        .ok()
}

/// First log in `logs` that decodes as the named event. Anything that does not
/// decode is skipped, never an error.
pub fn find_event(logs: &[LogEntry], name: &str) -> Option<Log> {
    let event = event(name)?;
    logs.iter().find_map(|entry| decode_with(&event, entry))
}

fn uint(log: &Log, name: &str) -> Option<U256> {
    log.params
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| p.value.clone().into_uint())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRequested {
    pub request_id: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCompleted {
    pub request_id: U256,
    pub total_amount: U256,
    pub participant_count: U256,
}

/// One on-chain payout emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationEvent {
    pub participant: Address,
    pub amount: U256,
    pub success: bool,
}

pub fn draw_requested(logs: &[LogEntry]) -> Option<DrawRequested> {
    let log = find_event(logs, DRAW_REQUESTED)?;
    Some(DrawRequested {
        request_id: uint(&log, "requestId")?,
    })
}

pub fn draw_completed(logs: &[LogEntry]) -> Option<DrawCompleted> {
    let log = find_event(logs, DRAW_COMPLETED)?;
    Some(DrawCompleted {
        request_id: uint(&log, "requestId")?,
        total_amount: uint(&log, "totalAmount")?,
        participant_count: uint(&log, "participantCount")?,
    })
}

pub fn admin_added(logs: &[LogEntry]) -> Option<Address> {
    let log = find_event(logs, ADMIN_ADDED)?;
    log.params.into_iter().find(|p| p.name == "admin")?.value.into_address()
}

/// Decode a single `Allocation` log. Returns `None` for anything else.
pub fn decode_allocation(entry: &LogEntry) -> Option<AllocationEvent> {
    let event = event(ALLOCATION)?;
    let log = decode_with(&event, entry)?;
    let mut participant = None;
    let mut amount = None;
    let mut success = None;
    for p in log.params {
        match p.name.as_str() {
            "participant" => participant = p.value.into_address(),
            "amount" => amount = p.value.into_uint(),
            "success" => success = p.value.into_bool(),
            _ => {}
        }
    }
    Some(AllocationEvent {
        participant: participant?,
        amount: amount?,
        success: success?,
    })
}

fn address_topic(address: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256::from(word)
}

fn uint_topic(value: U256) -> H256 {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    H256::from(word)
}

/// Build the log entry the contract emits for one payout.
pub fn allocation_log(contract: Address, payout: &AllocationEvent, block_number: u64) -> LogEntry {
    LogEntry {
        address: contract,
        topics: vec![allocation_topic(), address_topic(payout.participant)],
        data: ethabi::encode(&[Token::Uint(payout.amount), Token::Bool(payout.success)]),
        block_number: Some(block_number),
    }
}

pub fn draw_requested_log(contract: Address, request_id: U256) -> LogEntry {
    LogEntry {
        address: contract,
        topics: vec![topic(DRAW_REQUESTED).unwrap_or_default(), uint_topic(request_id)],
        data: Vec::new(),
        block_number: None,
    }
}

pub fn draw_completed_log(contract: Address, completed: &DrawCompleted) -> LogEntry {
    LogEntry {
        address: contract,
        topics: vec![topic(DRAW_COMPLETED).unwrap_or_default(), uint_topic(completed.request_id)],
        data: ethabi::encode(&[
            Token::Uint(completed.total_amount),
            Token::Uint(completed.participant_count),
        ]),
        block_number: None,
    }
}

pub fn admin_added_log(contract: Address, admin: Address) -> LogEntry {
    LogEntry {
        address: contract,
        topics: vec![topic(ADMIN_ADDED).unwrap_or_default(), address_topic(admin)],
        data: Vec::new(),
        block_number: None,
    }
}
