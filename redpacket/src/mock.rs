//! In-memory [`ChainGateway`] that mimics the red packet contract's state
//! machine closely enough to drive the controllers in tests.

use crate::error::{Error, Result};
use crate::events::{self, AllocationEvent, DrawCompleted};
use crate::gateway::{ChainGateway, ContractCall, LogEntry, TxReceipt, VrfParams};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use web3::types::{Address, H256, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// the node rejects the call before inclusion
    Reject(String),
    /// the call is included but reverts
    Revert,
    /// the node is unreachable
    Transport(String),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub block_number: u64,
    pub draw_in_progress: bool,
    pub random_ready: bool,
    pub last_random_word: U256,
    pub request_id: U256,
    pub owner: Address,
    pub admins: HashSet<Address>,
    pub code: HashMap<Address, Vec<u8>>,
    pub balances: HashMap<Address, U256>,
    pub vrf: VrfParams,
    pub price: U256,
    pub participants: BTreeMap<U256, Address>,
    pub logs: Vec<LogEntry>,
    /// emergencyFulfillRandomWords stores the word but never flips randomReady
    pub fulfill_leaves_unready: bool,
    /// every call that reached the node, in order, including failed ones
    pub submitted: Vec<ContractCall>,
    /// failures keyed by the zero-based index of the submission
    pub failures: HashMap<usize, Failure>,
    pub code_reads: usize,
    pub logs_requests: usize,
}

#[derive(Debug)]
pub struct MockGateway {
    signer: Address,
    contract: Address,
    pub state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(signer: Address, contract: Address) -> Self {
        let wrapper = Address::repeat_byte(0xee);
        let mut code = HashMap::new();
        code.insert(contract, vec![0x60, 0x80]);
        code.insert(wrapper, vec![0x60, 0x80]);
        let state = MockState {
            block_number: 100,
            owner: signer,
            code,
            vrf: VrfParams {
                wrapper,
                callback_gas_limit: 2_500_000,
                num_words: 1,
            },
            price: U256::from(1_000_000_000_000_000u64),
            ..Default::default()
        };
        Self {
            signer,
            contract,
            state: Mutex::new(state),
        }
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn fail_submission(&self, index: usize, failure: Failure) {
        self.with_state(|s| s.failures.insert(index, failure));
    }

    pub fn submitted(&self) -> Vec<ContractCall> {
        self.with_state(|s| s.submitted.clone())
    }

    /// Append a payout event at the current head.
    pub fn emit_allocation(&self, payout: AllocationEvent) {
        let contract = self.contract;
        self.with_state(|s| {
            s.block_number += 1;
            let entry = events::allocation_log(contract, &payout, s.block_number);
            s.logs.push(entry);
        });
    }

    fn apply(&self, s: &mut MockState, call: &ContractCall) -> std::result::Result<Vec<LogEntry>, ()> {
        let contract = self.contract;
        match call {
            ContractCall::AddAdmin(who) => {
                if s.owner != self.signer {
                    return Err(());
                }
                s.admins.insert(*who);
                Ok(vec![events::admin_added_log(contract, *who)])
            }
            ContractCall::SetParticipantsBatch {
                employee_ids,
                participants,
            } => {
                if s.draw_in_progress || employee_ids.len() != participants.len() {
                    return Err(());
                }
                for (id, who) in employee_ids.iter().zip(participants) {
                    s.participants.insert(*id, *who);
                }
                Ok(Vec::new())
            }
            ContractCall::RequestDraw => {
                if s.draw_in_progress || s.participants.is_empty() {
                    return Err(());
                }
                s.draw_in_progress = true;
                s.random_ready = false;
                s.request_id += U256::one();
                Ok(vec![events::draw_requested_log(contract, s.request_id)])
            }
            ContractCall::EmergencyFulfill(words) => {
                if !s.draw_in_progress || words.is_empty() {
                    return Err(());
                }
                s.last_random_word = words[0];
                s.random_ready = !s.fulfill_leaves_unready;
                Ok(Vec::new())
            }
            ContractCall::Distribute => {
                if !s.random_ready {
                    return Err(());
                }
                let pot = s.balances.get(&contract).copied().unwrap_or_default();
                let count = U256::from(s.participants.len());
                let share = if count.is_zero() { U256::zero() } else { pot / count };
                let block = s.block_number + 1;
                let mut logs = Vec::new();
                for who in s.participants.values() {
                    let payout = AllocationEvent {
                        participant: *who,
                        amount: share,
                        success: true,
                    };
                    logs.push(events::allocation_log(contract, &payout, block));
                }
                s.logs.extend(logs.iter().cloned());
                s.draw_in_progress = false;
                s.random_ready = false;
                logs.push(events::draw_completed_log(
                    contract,
                    &DrawCompleted {
                        request_id: s.request_id,
                        total_amount: share * count,
                        participant_count: count,
                    },
                ));
                Ok(logs)
            }
            ContractCall::Deposit(amount) => {
                let from = s.balances.entry(self.signer).or_default();
                if *from < *amount {
                    return Err(());
                }
                *from -= *amount;
                *s.balances.entry(contract).or_default() += *amount;
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn signer(&self) -> Address {
        self.signer
    }

    fn contract_address(&self) -> Address {
        self.contract
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.with_state(|s| s.block_number))
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>> {
        Ok(self.with_state(|s| {
            s.code_reads += 1;
            s.code.get(&address).cloned().unwrap_or_default()
        }))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.with_state(|s| s.balances.get(&address).copied().unwrap_or_default()))
    }

    async fn draw_in_progress(&self) -> Result<bool> {
        Ok(self.with_state(|s| s.draw_in_progress))
    }

    async fn random_ready(&self) -> Result<bool> {
        Ok(self.with_state(|s| s.random_ready))
    }

    async fn last_random_word(&self) -> Result<U256> {
        Ok(self.with_state(|s| s.last_random_word))
    }

    async fn owner(&self) -> Result<Address> {
        Ok(self.with_state(|s| s.owner))
    }

    async fn is_admin(&self, who: Address) -> Result<bool> {
        Ok(self.with_state(|s| s.admins.contains(&who)))
    }

    async fn vrf_params(&self) -> Result<VrfParams> {
        Ok(self.with_state(|s| s.vrf))
    }

    async fn request_price(&self, _params: &VrfParams) -> Result<U256> {
        Ok(self.with_state(|s| s.price))
    }

    async fn logs(&self, topic0: H256, from_block: u64, to_block: u64) -> Result<Vec<LogEntry>> {
        let contract = self.contract;
        Ok(self.with_state(|s| {
            s.logs_requests += 1;
            s.logs
                .iter()
                .filter(|l| l.address == contract && l.topics.first() == Some(&topic0))
                .filter(|l| matches!(l.block_number, Some(b) if b >= from_block && b <= to_block))
                .cloned()
                .collect()
        }))
    }

    async fn submit(&self, call: ContractCall) -> Result<TxReceipt> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let index = s.submitted.len();
        s.submitted.push(call.clone());
        match s.failures.remove(&index) {
            Some(Failure::Reject(reason)) => {
                return Err(Error::Submission {
                    call: call.name().to_string(),
                    reason,
                })
            }
            Some(Failure::Transport(reason)) => return Err(Error::Collaborator(reason)),
            Some(Failure::Revert) => {
                s.block_number += 1;
                return Ok(TxReceipt {
                    tx_hash: H256::from_low_u64_be(index as u64 + 1),
                    block_number: s.block_number,
                    gas_used: U256::from(21_000u64),
                    status: false,
                    logs: Vec::new(),
                });
            }
            None => {}
        }
        let outcome = self.apply(&mut s, &call);
        s.block_number += 1;
        let (status, logs) = match outcome {
            Ok(logs) => (true, logs),
            Err(()) => (false, Vec::new()),
        };
        Ok(TxReceipt {
            tx_hash: H256::from_low_u64_be(index as u64 + 1),
            block_number: s.block_number,
            gas_used: U256::from(50_000u64),
            status,
            logs,
        })
    }
}
