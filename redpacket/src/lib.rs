pub mod admin;
pub mod balances;
pub mod batch;
pub mod config;
pub mod contract;
pub mod draw;
pub mod error;
pub mod events;
pub mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod reconcile;
pub mod roster;
pub mod utils;

use crate::{
    config::Config,
    contract::RedPacketContract,
    error::{Error, Result},
    utils::extract_keypair_from_str,
};
use log::info;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tokio::runtime::Runtime;
use web3::{transports::Http, types::Address};

pub use gateway::{ChainGateway, ContractCall, LogEntry, TxReceipt, VrfParams};

pub const DEFAULT_TIMEOUT: u64 = 30;

/// What to do when one unit of work fails: a roster row, a submission chunk,
/// or the readiness check after an emergency fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// stop at the first failure and return it
    Abort,
    /// record the failure and carry on
    Skip,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

impl FailurePolicy {
    pub fn from_force_flag(force: bool) -> Self {
        if force {
            FailurePolicy::Skip
        } else {
            FailurePolicy::Abort
        }
    }

    pub fn is_skip(&self) -> bool {
        *self == FailurePolicy::Skip
    }
}

pub struct BlockClient {
    pub web3: web3::Web3<Http>,
    pub root_sk: web3::signing::SecretKey,
    pub root_addr: Address,
    pub config: Config,
    rt: Runtime,
}

impl BlockClient {
    pub fn setup(config: &Config, timeout: Option<u64>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.unwrap_or(config.chain.timeout)))
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        let url = Url::parse(config.chain.endpoint.as_str())
            .map_err(|e| Error::Config(format!("RPC_URL {:?}: {}", config.chain.endpoint, e)))?;
        let transport = Http::with_client(client, url);
        let web3 = web3::Web3::new(transport);
        let (root_sk, root_addr) = extract_keypair_from_str(&config.root_secret)?;
        // single logical thread of control, every rpc is awaited in turn
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            web3,
            root_sk,
            root_addr,
            rt,
            config: config.clone(),
        })
    }

    pub fn chain_id(&self) -> Result<u64> {
        Ok(self.rt.block_on(self.web3.eth().chain_id())?.low_u64())
    }

    pub fn block_number(&self) -> Result<u64> {
        Ok(self.rt.block_on(self.web3.eth().block_number())?.as_u64())
    }

    /// Check the node answers and, when configured, serves the expected chain.
    pub fn check_chain(&self) -> Result<()> {
        let chain_id = self.chain_id()?;
        let height = self.block_number()?;
        if let Some(expected) = self.config.chain.chain_id {
            if expected != chain_id {
                return Err(Error::Config(format!(
                    "endpoint serves chain {} but config expects {}",
                    chain_id, expected
                )));
            }
        }
        info!(
            "chain={} chain_id={} endpoint={} height={} signer={:?}",
            self.config.chain.name, chain_id, self.config.chain.endpoint, height, self.root_addr
        );
        Ok(())
    }

    pub fn red_packet(&self) -> Result<RedPacketContract> {
        let contract_addr = self.config.red_packet_address()?;
        RedPacketContract::new(self.web3.clone(), contract_addr, self.root_sk, self.root_addr)
    }

    /// Drive one controller to completion on the client's runtime.
    pub fn run<F: Future>(&self, f: F) -> F::Output {
        self.rt.block_on(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_force_flag() {
        assert_eq!(FailurePolicy::from_force_flag(true), FailurePolicy::Skip);
        assert_eq!(FailurePolicy::from_force_flag(false), FailurePolicy::Abort);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Abort);
        assert_eq!(serde_json::to_string(&FailurePolicy::Skip).unwrap(), "\"skip\"");
    }

    #[test]
    fn setup_rejects_a_bad_endpoint() {
        let mut config = Config::default();
        config.chain.endpoint = "not a url".to_string();
        config.root_secret = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string();
        assert!(matches!(BlockClient::setup(&config, Some(1)), Err(Error::Config(_))));
    }
}
