use crate::error::{Error, Result};
use sha3::{Digest, Keccak256};
use std::str::FromStr;
use web3::contract::Error as ContractError;
use web3::types::{Address, H256, U256};

const WEI_DECIMALS: usize = 18;

/// Derive the signer address from a hex secret key (with or without `0x`).
pub fn extract_keypair_from_str(sk_str: &str) -> Result<(web3::signing::SecretKey, Address)> {
    let trimmed = sk_str.trim();
    let root_sk = secp256k1::SecretKey::from_str(trimmed.trim_start_matches("0x"))
        .map_err(|e| Error::Config(format!("invalid signing key: {}", e)))?;
    let s = secp256k1::Secp256k1::signing_only();
    let root_pk = secp256k1::PublicKey::from_secret_key(&s, &root_sk);
    let mut res = [0u8; 64];
    res.copy_from_slice(&root_pk.serialize_uncompressed()[1..65]);
    let root_addr = Address::from(H256::from_slice(Keccak256::digest(&res).as_slice()));
    Ok((root_sk, root_addr))
}

#[inline(always)]
pub fn handle_error(error: ContractError) -> String {
    match error {
        ContractError::InvalidOutputType(s) => format!("Invalid output type: {}", s),
        ContractError::Abi(e) => format!("Abi error: {}", e),
        ContractError::Api(e) => format!("Api error: {}", e),
        ContractError::Deployment(e) => format!("Deployment error: {}", e),
        ContractError::InterfaceUnsupported => "Contract does not support this interface.".to_string(),
    }
}

/// Parse a 20-byte hex address. The `0x` prefix is optional; a mixed-case
/// input must carry a valid EIP-55 checksum.
pub fn parse_address(raw: &str) -> Option<Address> {
    let body = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = eth_checksum::checksum(&format!("0x{}", body.to_lowercase()));
        if expected[2..] != *body {
            return None;
        }
    }
    let bytes = hex::decode(body).ok()?;
    Some(Address::from_slice(&bytes))
}

/// Lower-case `0x`-prefixed rendering, the form used in generated scripts.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

pub fn parse_u256(raw: &str) -> Result<U256> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x") {
        Some(h) => U256::from_str_radix(h, 16).ok(),
        None => U256::from_dec_str(raw).ok(),
    };
    parsed.ok_or_else(|| Error::Config(format!("{:?} is not an unsigned integer", raw)))
}

/// Render a wei amount as ether with trailing zeros removed.
pub fn format_ether(wei: U256) -> String {
    let (int, frac) = wei.div_mod(U256::exp10(WEI_DECIMALS));
    if frac.is_zero() {
        return int.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = WEI_DECIMALS);
    format!("{}.{}", int, frac.trim_end_matches('0'))
}

pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_from_well_known_key() {
        // first default anvil / hardhat account
        let (_, addr) =
            extract_keypair_from_str("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80").unwrap();
        assert_eq!(address_hex(&addr), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        assert!(matches!(extract_keypair_from_str("nope"), Err(Error::Config(_))));
    }

    #[test]
    fn derived_key_signs_through_web3() {
        use web3::signing::{Key, SecretKeyRef};
        let (sk, addr) =
            extract_keypair_from_str("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80").unwrap();
        assert_eq!(SecretKeyRef::new(&sk).address(), addr);
        assert!(SecretKeyRef::new(&sk).sign_message(&[7u8; 32]).is_ok());
    }

    #[test]
    fn address_syntax_and_checksum() {
        assert!(parse_address("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").is_some());
        assert!(parse_address("F39FD6E51AAD88F6F4CE6AB8827279CFFFB92266").is_some());
        assert!(parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").is_some());
        // checksum broken by flipping the case of one letter
        assert!(parse_address("0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266").is_none());
        assert!(parse_address("0x1234").is_none());
        assert!(parse_address("0xzz9fd6e51aad88f6f4ce6ab8827279cfffb92266").is_none());
    }

    #[test]
    fn ether_formatting() {
        assert_eq!(format_ether(U256::exp10(18)), "1");
        assert_eq!(format_ether(U256::exp10(15)), "0.001");
        assert_eq!(format_ether(U256::from(1_500_000_000_000_000_000u128)), "1.5");
        assert_eq!(format_ether(U256::zero()), "0");
    }

    #[test]
    fn u256_parsing() {
        assert_eq!(parse_u256("1000").unwrap(), U256::from(1000u64));
        assert_eq!(parse_u256("0xff").unwrap(), U256::from(255u64));
        assert!(parse_u256("-1").is_err());
    }
}
