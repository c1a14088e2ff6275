use crate::error::{Error, Precondition, Result};
use crate::gateway::{submit_included, ChainGateway, ContractCall, TxReceipt};
use crate::utils::{format_ether, parse_address};
use log::{info, warn};
use web3::types::{Address, U256};

#[derive(Debug, Clone)]
pub enum AdminOutcome {
    AlreadyAdmin(Address),
    Added {
        admin: Address,
        receipt: TxReceipt,
        /// `isAdmin` read back after inclusion
        verified: bool,
    },
}

/// Grant the admin role. Only the owner may do this.
pub async fn add_admin<G: ChainGateway + ?Sized>(gw: &G, raw_admin: &str) -> Result<AdminOutcome> {
    let admin = parse_address(raw_admin)
        .ok_or_else(|| Error::Config(format!("admin {:?} is not an address", raw_admin)))?;

    let owner = gw.owner().await?;
    let signer = gw.signer();
    if owner != signer {
        return Err(Precondition::NotOwner { owner, signer }.into());
    }
    if gw.is_admin(admin).await? {
        warn!("{:?} is already an admin", admin);
        return Ok(AdminOutcome::AlreadyAdmin(admin));
    }

    let receipt = submit_included(gw, ContractCall::AddAdmin(admin)).await?;
    let verified = gw.is_admin(admin).await?;
    if verified {
        info!("admin {:?} added", admin);
    } else {
        warn!("addAdmin included in {:?} but isAdmin is still false", receipt.tx_hash);
    }
    Ok(AdminOutcome::Added {
        admin,
        receipt,
        verified,
    })
}

#[derive(Debug, Clone)]
pub struct DepositOutcome {
    pub amount: U256,
    pub balance_before: U256,
    pub balance_after: U256,
    pub receipt: TxReceipt,
}

/// Fund the contract with a plain transfer from the signer.
pub async fn deposit<G: ChainGateway + ?Sized>(gw: &G, amount: U256) -> Result<DepositOutcome> {
    if amount.is_zero() {
        return Err(Error::Config("deposit amount must be positive".to_string()));
    }
    let signer = gw.signer();
    let balance_before = gw.balance(signer).await?;
    info!(
        "deposit {} ETH to {:?}, signer balance {} ETH",
        format_ether(amount),
        gw.contract_address(),
        format_ether(balance_before)
    );
    let receipt = submit_included(gw, ContractCall::Deposit(amount)).await?;
    let balance_after = gw.balance(signer).await?;
    info!("signer balance after deposit {} ETH", format_ether(balance_after));
    Ok(DepositOutcome {
        amount,
        balance_before,
        balance_after,
        receipt,
    })
}
