//! The narrow chain surface the controllers depend on.
//!
//! Every method is one round trip to the node; nothing here caches. The
//! controllers call a guard read immediately before each transition, so an
//! implementation must always answer from live chain state.

use crate::error::{Error, Result};
use async_trait::async_trait;
use web3::types::{Address, H256, U256};

/// A state-changing call against the red packet contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    AddAdmin(Address),
    SetParticipantsBatch {
        employee_ids: Vec<U256>,
        participants: Vec<Address>,
    },
    RequestDraw,
    Distribute,
    EmergencyFulfill(Vec<U256>),
    /// plain value transfer to the contract
    Deposit(U256),
}

impl ContractCall {
    /// ABI function name, `None` for a plain transfer.
    pub fn function(&self) -> Option<&'static str> {
        match self {
            ContractCall::AddAdmin(_) => Some("addAdmin"),
            ContractCall::SetParticipantsBatch { .. } => Some("setParticipantsBatch"),
            ContractCall::RequestDraw => Some("requestDraw"),
            ContractCall::Distribute => Some("distribute"),
            ContractCall::EmergencyFulfill(_) => Some("emergencyFulfillRandomWords"),
            ContractCall::Deposit(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.function().unwrap_or("deposit")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
    /// false when the transaction was included but reverted
    pub status: bool,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VrfParams {
    pub wrapper: Address,
    pub callback_gas_limit: u32,
    pub num_words: u32,
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// address that signs every submitted call
    fn signer(&self) -> Address;

    fn contract_address(&self) -> Address;

    async fn block_number(&self) -> Result<u64>;

    async fn code_at(&self, address: Address) -> Result<Vec<u8>>;

    async fn balance(&self, address: Address) -> Result<U256>;

    async fn draw_in_progress(&self) -> Result<bool>;

    async fn random_ready(&self) -> Result<bool>;

    async fn last_random_word(&self) -> Result<U256>;

    async fn owner(&self) -> Result<Address>;

    async fn is_admin(&self, who: Address) -> Result<bool>;

    async fn vrf_params(&self) -> Result<VrfParams>;

    /// native-token price quoted by the VRF wrapper for one request
    async fn request_price(&self, params: &VrfParams) -> Result<U256>;

    /// One `eth_getLogs` call filtered on the contract address and `topic0`.
    /// Range limits imposed by the node are the caller's concern.
    async fn logs(&self, topic0: H256, from_block: u64, to_block: u64) -> Result<Vec<LogEntry>>;

    /// Sign, send and wait for inclusion. A reverted transaction comes back as
    /// `Ok` with `status == false`.
    async fn submit(&self, call: ContractCall) -> Result<TxReceipt>;
}

/// Submit `call` and require a successful receipt: a reverted inclusion
/// becomes `Error::Submission`.
pub async fn submit_included<G: ChainGateway + ?Sized>(gw: &G, call: ContractCall) -> Result<TxReceipt> {
    let name = call.name();
    let receipt = gw.submit(call).await?;
    if !receipt.status {
        return Err(Error::Submission {
            call: name.to_string(),
            reason: format!("reverted in tx {:?} at block {}", receipt.tx_hash, receipt.block_number),
        });
    }
    Ok(receipt)
}
