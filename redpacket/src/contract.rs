use crate::error::{Error, Result};
use crate::gateway::{ChainGateway, ContractCall, LogEntry, TxReceipt, VrfParams};
use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use web3::{
    self,
    contract::{
        tokens::{Detokenize, Tokenizable, Tokenize},
        Contract, Options,
    },
    ethabi::Token,
    signing::SecretKey,
    transports::Http,
    types::{
        Address, BlockNumber, CallRequest, FilterBuilder, Log, TransactionParameters, TransactionReceipt, H256,
        U256, U64,
    },
    Web3,
};

pub const RED_PACKET_ABI: &str = include_str!("../abi/RedPacketVRF.json");
pub const VRF_WRAPPER_ABI: &str = include_str!("../abi/VRFV2PlusWrapper.json");

const CONFIRMATIONS: usize = 1;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
// estimate_gas plus 20%
const GAS_PAD_NUM: u64 = 12;
const GAS_PAD_DEN: u64 = 10;

#[derive(Debug, Clone, Default)]
pub struct ParticipantsBatchData {
    pub employee_ids: Vec<U256>,
    pub participants: Vec<Address>,
}

impl Tokenize for ParticipantsBatchData {
    fn into_tokens(self) -> Vec<Token> {
        let mut res: Vec<Token> = Vec::new();
        res.push(Token::Array(self.employee_ids.into_iter().map(Token::Uint).collect()));
        res.push(Token::Array(self.participants.into_iter().map(Token::Address).collect()));
        res
    }
}

#[derive(Debug, Clone, Default)]
pub struct RandomWordsData {
    pub words: Vec<U256>,
}

impl Tokenize for RandomWordsData {
    fn into_tokens(self) -> Vec<Token> {
        vec![Token::Array(self.words.into_iter().map(Token::Uint).collect())]
    }
}

/// web3 proxy for one deployed red packet contract, signing with one key.
#[derive(Debug, Clone)]
pub struct RedPacketContract {
    web3: Web3<Http>,
    contract: Contract<Http>,
    sec_key: SecretKey,
    signer: Address,
}

impl RedPacketContract {
    pub fn new(web3: Web3<Http>, contract_addr: Address, sec_key: SecretKey, signer: Address) -> Result<Self> {
        let contract = Contract::from_json(web3.eth(), contract_addr, RED_PACKET_ABI.as_bytes())?;
        Ok(Self {
            web3,
            contract,
            sec_key,
            signer,
        })
    }

    async fn query<R: Detokenize, P: Tokenize>(&self, func: &str, params: P) -> Result<R> {
        let result = self
            .contract
            .query(func, params, self.signer, Options::default(), None)
            .await?;
        Ok(result)
    }

    async fn options_for<P: Tokenize>(&self, func: &str, params: P) -> Result<Options> {
        // a revert during estimation surfaces here, before anything is signed
        let gas = self
            .contract
            .estimate_gas(func, params, self.signer, Options::default())
            .await
            .map_err(|e| submission_error(func, e))?;
        let gas_price = self.web3.eth().gas_price().await?;
        debug!("{} estimated gas {} at gas price {}", func, gas, gas_price);
        Ok(Options {
            gas: Some(gas * GAS_PAD_NUM / GAS_PAD_DEN),
            gas_price: Some(gas_price),
            ..Default::default()
        })
    }

    async fn signed_call<P: Tokenize + Clone>(&self, func: &str, params: P) -> Result<TransactionReceipt> {
        let opt = self.options_for(func, params.clone()).await?;
        let receipt = self
            .contract
            .signed_call_with_confirmations(func, params, opt, CONFIRMATIONS, &self.sec_key)
            .await
            .map_err(|e| Error::from(e).in_call(func))?;
        Ok(receipt)
    }

    async fn transfer(&self, amount: U256) -> Result<TransactionReceipt> {
        let eth = self.web3.eth();
        let request = CallRequest {
            from: Some(self.signer),
            to: Some(self.contract.address()),
            value: Some(amount),
            ..Default::default()
        };
        let gas = eth.estimate_gas(request, None).await.map_err(|e| Error::from(e).in_call("deposit"))?;
        let gas_price = eth.gas_price().await?;
        let tx = TransactionParameters {
            to: Some(self.contract.address()),
            value: amount,
            gas: gas * GAS_PAD_NUM / GAS_PAD_DEN,
            gas_price: Some(gas_price),
            ..Default::default()
        };
        let signed = self.web3.accounts().sign_transaction(tx, &self.sec_key).await?;
        info!("deposit signed, tx={:?}", signed.transaction_hash);
        let receipt = self
            .web3
            .send_raw_transaction_with_confirmation(signed.raw_transaction, POLL_INTERVAL, CONFIRMATIONS)
            .await
            .map_err(|e| Error::from(e).in_call("deposit"))?;
        Ok(receipt)
    }
}

fn submission_error(func: &str, e: web3::contract::Error) -> Error {
    Error::from(e).in_call(func)
}

fn convert_log(log: Log) -> LogEntry {
    LogEntry {
        address: log.address,
        topics: log.topics,
        data: log.data.0,
        block_number: log.block_number.map(|n| n.as_u64()),
    }
}

fn convert_receipt(receipt: TransactionReceipt) -> TxReceipt {
    TxReceipt {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        gas_used: receipt.gas_used.unwrap_or_default(),
        // pre-byzantium receipts carry no status, treat inclusion as success
        status: receipt.status.map_or(true, |s| s == U64::one()),
        logs: receipt.logs.into_iter().map(convert_log).collect(),
    }
}

#[async_trait]
impl ChainGateway for RedPacketContract {
    fn signer(&self) -> Address {
        self.signer
    }

    fn contract_address(&self) -> Address {
        self.contract.address()
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.web3.eth().block_number().await?.as_u64())
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>> {
        Ok(self.web3.eth().code(address, None).await?.0)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.web3.eth().balance(address, None).await?)
    }

    async fn draw_in_progress(&self) -> Result<bool> {
        self.query("drawInProgress", ()).await
    }

    async fn random_ready(&self) -> Result<bool> {
        self.query("randomReady", ()).await
    }

    async fn last_random_word(&self) -> Result<U256> {
        self.query("lastRandomWord", ()).await
    }

    async fn owner(&self) -> Result<Address> {
        self.query("owner", ()).await
    }

    async fn is_admin(&self, who: Address) -> Result<bool> {
        self.query("isAdmin", who.into_token()).await
    }

    async fn vrf_params(&self) -> Result<VrfParams> {
        let wrapper: Address = self.query("vrfWrapper", ()).await?;
        let callback_gas_limit: U256 = self.query("callbackGasLimit", ()).await?;
        let num_words: U256 = self.query("numWords", ()).await?;
        Ok(VrfParams {
            wrapper,
            callback_gas_limit: callback_gas_limit.low_u32(),
            num_words: num_words.low_u32(),
        })
    }

    async fn request_price(&self, params: &VrfParams) -> Result<U256> {
        let wrapper = Contract::from_json(self.web3.eth(), params.wrapper, VRF_WRAPPER_ABI.as_bytes())?;
        let price: U256 = wrapper
            .query(
                "calculateRequestPriceNative",
                (U256::from(params.callback_gas_limit), U256::from(params.num_words)),
                None,
                Options::default(),
                None,
            )
            .await?;
        Ok(price)
    }

    async fn logs(&self, topic0: H256, from_block: u64, to_block: u64) -> Result<Vec<LogEntry>> {
        let filter = FilterBuilder::default()
            .address(vec![self.contract.address()])
            .topics(Some(vec![topic0]), None, None, None)
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)))
            .build();
        let logs = self.web3.eth().logs(filter).await?;
        Ok(logs.into_iter().map(convert_log).collect())
    }

    async fn submit(&self, call: ContractCall) -> Result<TxReceipt> {
        let func = call.name();
        let receipt = match call {
            ContractCall::AddAdmin(admin) => self.signed_call(func, admin.into_token()).await?,
            ContractCall::SetParticipantsBatch {
                employee_ids,
                participants,
            } => {
                let data = ParticipantsBatchData {
                    employee_ids,
                    participants,
                };
                self.signed_call(func, data).await?
            }
            ContractCall::RequestDraw | ContractCall::Distribute => self.signed_call(func, ()).await?,
            ContractCall::EmergencyFulfill(words) => self.signed_call(func, RandomWordsData { words }).await?,
            ContractCall::Deposit(amount) => self.transfer(amount).await?,
        };
        info!(
            "{} included, tx={:?} block={:?} gas_used={:?}",
            func, receipt.transaction_hash, receipt.block_number, receipt.gas_used
        );
        Ok(convert_receipt(receipt))
    }
}
