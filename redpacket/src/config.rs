use crate::error::{Error, Result};
use crate::reconcile::SqlKey;
use crate::utils::{extract_keypair_from_str, parse_address, parse_u256};
use crate::{FailurePolicy, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use web3::types::{Address, U256};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CSV_PATH: &str = "data/participants.csv";
pub const DEFAULT_SQL_PATH: &str = "data/update_allocations.sql";
pub const DEFAULT_TABLE: &str = "lottery_participants";
pub const DEFAULT_STATUS_MARKER: &str = "FINISHED";
// 0.001 ether
pub const DEFAULT_DEPOSIT_WEI: &str = "1000000000000000";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub chain: Chain,
    #[serde(rename = "rootSecret")]
    pub root_secret: String,
    #[serde(rename = "redPacket")]
    pub red_packet: String,
    pub register: RegisterOpts,
    pub draw: DrawOpts,
    pub export: ExportOpts,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Chain {
    pub name: String,
    #[serde(rename = "chainId")]
    pub chain_id: Option<u64>,
    pub endpoint: String,
    /// http request timeout, seconds
    pub timeout: u64,
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            name: String::new(),
            chain_id: None,
            endpoint: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RegisterOpts {
    #[serde(rename = "csvPath")]
    pub csv_path: PathBuf,
    #[serde(rename = "batchSize")]
    pub batch_size: usize,
    /// skip bad rows and failed chunks instead of aborting
    #[serde(rename = "forceSubmit")]
    pub force_submit: bool,
    #[serde(rename = "eoaCheck")]
    pub eoa_check: bool,
}

impl Default for RegisterOpts {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            force_submit: false,
            eoa_check: true,
        }
    }
}

impl RegisterOpts {
    pub fn policy(&self) -> FailurePolicy {
        FailurePolicy::from_force_flag(self.force_submit)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DrawOpts {
    /// decimal or 0x-hex wei, unlimited when absent
    #[serde(rename = "maxVrfFeeWei")]
    pub max_vrf_fee_wei: Option<String>,
    /// emergency fallback word, current unix time when absent
    #[serde(rename = "randomWord")]
    pub random_word: Option<String>,
    #[serde(rename = "depositWei")]
    pub deposit_wei: String,
}

impl Default for DrawOpts {
    fn default() -> Self {
        Self {
            max_vrf_fee_wei: None,
            random_word: None,
            deposit_wei: DEFAULT_DEPOSIT_WEI.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExportOpts {
    #[serde(rename = "fromBlock")]
    pub from_block: u64,
    /// chain head when absent
    #[serde(rename = "toBlock")]
    pub to_block: Option<u64>,
    #[serde(rename = "sqlPath")]
    pub sql_path: PathBuf,
    pub table: String,
    #[serde(rename = "statusMarker")]
    pub status_marker: String,
    pub key: SqlKey,
}

impl Default for ExportOpts {
    fn default() -> Self {
        Self {
            from_block: 0,
            to_block: None,
            sql_path: PathBuf::from(DEFAULT_SQL_PATH),
            table: DEFAULT_TABLE.to_string(),
            status_marker: DEFAULT_STATUS_MARKER.to_string(),
            key: SqlKey::default(),
        }
    }
}

impl Config {
    /// Read the JSON config. A missing file yields the defaults so that a
    /// purely environment-driven run works.
    pub fn parse_from_file(file: &Path) -> Result<Self> {
        if !file.exists() {
            return Ok(Self::default());
        }
        let confstr = std::fs::read_to_string(file)?;
        serde_json::from_str(&confstr)
            .map_err(|e| Error::Config(format!("{}: {}", file.display(), e)))
    }

    /// File, then process environment.
    pub fn load(file: &Path) -> Result<Self> {
        let mut config = Self::parse_from_file(file)?;
        config.apply_env_from(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))?;
        Ok(config)
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RPC_URL") {
            self.chain.endpoint = v;
        }
        if let Some(v) = lookup("PRIVATE_KEY") {
            self.root_secret = v;
        }
        if let Some(v) = lookup("RED_PACKET") {
            self.red_packet = v;
        }
        if let Some(v) = lookup("BATCH_SIZE") {
            self.register.batch_size = parse_env("BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("CSV_PATH") {
            self.register.csv_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORCE_SUBMIT") {
            self.register.force_submit = v.trim() == "1";
        }
        if let Some(v) = lookup("EOA_CHECK") {
            self.register.eoa_check = v.trim() != "0";
        }
        if let Some(v) = lookup("MAX_VRF_FEE_WEI") {
            self.draw.max_vrf_fee_wei = Some(v);
        }
        if let Some(v) = lookup("RANDOM_WORD") {
            self.draw.random_word = Some(v);
        }
        if let Some(v) = lookup("DEPOSIT_WEI") {
            self.draw.deposit_wei = v;
        }
        if let Some(v) = lookup("FROM_BLOCK") {
            self.export.from_block = parse_env("FROM_BLOCK", &v)?;
        }
        if let Some(v) = lookup("TO_BLOCK") {
            self.export.to_block = Some(parse_env("TO_BLOCK", &v)?);
        }
        if let Some(v) = lookup("SQL_OUTPUT_PATH") {
            self.export.sql_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Everything a signing run needs: endpoint, key and contract.
    pub fn validate(&self) -> Result<()> {
        if self.chain.endpoint.trim().is_empty() {
            return Err(Error::Config("missing RPC_URL (chain.endpoint)".to_string()));
        }
        if self.root_secret.trim().is_empty() {
            return Err(Error::Config("missing PRIVATE_KEY (rootSecret)".to_string()));
        }
        extract_keypair_from_str(&self.root_secret)?;
        self.red_packet_address()?;
        if self.register.batch_size == 0 {
            return Err(Error::Config("BATCH_SIZE must be at least 1".to_string()));
        }
        crate::reconcile::check_table_name(&self.export.table)?;
        Ok(())
    }

    pub fn red_packet_address(&self) -> Result<Address> {
        if self.red_packet.trim().is_empty() {
            return Err(Error::Config("missing RED_PACKET (redPacket)".to_string()));
        }
        parse_address(self.red_packet.trim())
            .ok_or_else(|| Error::Config(format!("RED_PACKET {:?} is not an address", self.red_packet)))
    }

    pub fn max_vrf_fee(&self) -> Result<Option<U256>> {
        self.draw.max_vrf_fee_wei.as_deref().map(parse_u256).transpose()
    }

    pub fn random_word(&self) -> Result<Option<U256>> {
        self.draw.random_word.as_deref().map(parse_u256).transpose()
    }

    pub fn deposit_amount(&self) -> Result<U256> {
        parse_u256(&self.draw.deposit_wei)
    }

    pub fn show() {
        let de: Self = Default::default();
        match serde_json::to_string_pretty(&de) {
            Ok(s) => println!("{}", s),
            Err(e) => log::error!("config template: {}", e),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}={:?} is not a number", key, value)))
}
