// ============================================================================
// EIP-712 Typed-Data Signing
// Struct hashing and signer recovery for orders and cancellation requests
// ============================================================================

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SignatureError;
use crate::interfaces::SignatureVerifier;
use crate::numeric::{Amount, Price};

pub const DOMAIN_NAME: &str = "Foresight Market";
pub const DOMAIN_VERSION: &str = "1";

pub const DOMAIN_TYPEHASH: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const ORDER_TYPEHASH: &str =
    "Order(address maker,uint256 outcomeIndex,bool isBuy,uint256 price,uint256 amount,uint256 salt,uint256 expiry)";
pub const CANCEL_SALT_TYPEHASH: &str = "CancelSaltRequest(address maker,uint256 salt)";

/// Parse a hex address. Case is ignored; checksums are not enforced.
pub fn parse_address(value: &str) -> Result<Address, SignatureError> {
    let trimmed = value.trim();
    let hex = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"));
    match hex {
        Some(hex) if hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            Address::from_str(hex).map_err(|e| SignatureError::InvalidField {
                field: "address",
                reason: e.to_string(),
            })
        },
        _ => Err(SignatureError::InvalidField {
            field: "address",
            reason: format!("not a 20-byte hex address: {value}"),
        }),
    }
}

/// Parse a base-10 uint256.
pub fn parse_uint256(field: &'static str, value: &str) -> Result<U256, SignatureError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SignatureError::InvalidField {
            field,
            reason: format!("not a decimal integer: {value}"),
        });
    }
    U256::from_dec_str(value).map_err(|e| SignatureError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDataDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

impl TypedDataDomain {
    pub fn new(chain_id: u64, verifying_contract: &str) -> Self {
        Self {
            name: DOMAIN_NAME.to_string(),
            version: DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract: verifying_contract.to_lowercase(),
        }
    }

    pub fn separator(&self) -> Result<H256, SignatureError> {
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPEHASH.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(parse_address(&self.verifying_contract)?),
        ]);
        Ok(H256::from(keccak256(encoded)))
    }
}

/// Signed order terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTypedData {
    pub maker: String,
    pub outcome_index: u32,
    pub is_buy: bool,
    pub price: Price,
    pub amount: Amount,
    pub salt: String,
    pub expiry: u64,
}

impl OrderTypedData {
    pub fn struct_hash(&self) -> Result<H256, SignatureError> {
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(keccak256(ORDER_TYPEHASH.as_bytes()).to_vec()),
            Token::Address(parse_address(&self.maker)?),
            Token::Uint(U256::from(self.outcome_index)),
            Token::Bool(self.is_buy),
            Token::Uint(U256::from(self.price.raw())),
            Token::Uint(U256::from(self.amount.raw())),
            Token::Uint(parse_uint256("salt", &self.salt)?),
            Token::Uint(U256::from(self.expiry)),
        ]);
        Ok(H256::from(keccak256(encoded)))
    }
}

/// Request to cancel the order identified by `(maker, salt)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSaltTypedData {
    pub maker: String,
    pub salt: String,
}

impl CancelSaltTypedData {
    pub fn struct_hash(&self) -> Result<H256, SignatureError> {
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(keccak256(CANCEL_SALT_TYPEHASH.as_bytes()).to_vec()),
            Token::Address(parse_address(&self.maker)?),
            Token::Uint(parse_uint256("salt", &self.salt)?),
        ]);
        Ok(H256::from(keccak256(encoded)))
    }
}

/// `keccak256("\x19\x01" || domainSeparator || structHash)`
pub fn typed_data_hash(domain: &TypedDataDomain, struct_hash: H256) -> Result<H256, SignatureError> {
    let mut data = Vec::with_capacity(66);
    data.extend_from_slice(&[0x19, 0x01]);
    data.extend_from_slice(domain.separator()?.as_bytes());
    data.extend_from_slice(struct_hash.as_bytes());
    Ok(H256::from(keccak256(&data)))
}

pub fn recover_signer(digest: H256, signature: &str) -> Result<Address, SignatureError> {
    let sig = Signature::from_str(signature.trim().trim_start_matches("0x"))
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    sig.recover(digest)
        .map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// Whether `signature` over `struct_hash` was produced by `expected`.
pub fn verify_typed_signature(
    domain: &TypedDataDomain,
    struct_hash: H256,
    signature: &str,
    expected: &str,
) -> Result<bool, SignatureError> {
    let digest = typed_data_hash(domain, struct_hash)?;
    let recovered = recover_signer(digest, signature)?;
    Ok(recovered == parse_address(expected)?)
}

/// Local ECDSA verifier over the order and cancellation schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct Eip712Verifier;

#[async_trait]
impl SignatureVerifier for Eip712Verifier {
    async fn verify_order(
        &self,
        domain: &TypedDataDomain,
        order: &OrderTypedData,
        signature: &str,
    ) -> Result<bool, SignatureError> {
        verify_typed_signature(domain, order.struct_hash()?, signature, &order.maker)
    }

    async fn verify_cancel(
        &self,
        domain: &TypedDataDomain,
        cancel: &CancelSaltTypedData,
        signature: &str,
    ) -> Result<bool, SignatureError> {
        verify_typed_signature(domain, cancel.struct_hash()?, signature, &cancel.maker)
    }
}

#[cfg(test)]
pub(crate) mod test_signer {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    pub const KEY_A: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    pub const KEY_B: &str = "0x8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";

    pub fn wallet(key: &str) -> LocalWallet {
        key.parse::<LocalWallet>().unwrap()
    }

    pub fn address(wallet: &LocalWallet) -> String {
        format!("{:?}", wallet.address())
    }

    pub fn sign(wallet: &LocalWallet, domain: &TypedDataDomain, struct_hash: H256) -> String {
        let digest = typed_data_hash(domain, struct_hash).unwrap();
        let sig = wallet.sign_hash(digest).unwrap();
        format!("0x{sig}")
    }
}

#[cfg(test)]
mod tests {
    use super::test_signer::*;
    use super::*;

    const CONTRACT: &str = "0x00000000000000000000000000000000000000cc";

    fn order_for(maker: &str) -> OrderTypedData {
        OrderTypedData {
            maker: maker.to_string(),
            outcome_index: 1,
            is_buy: true,
            price: Price(550_000),
            amount: Amount(2_000_000_000_000_000_000),
            salt: "123456789012345678901234567890".to_string(),
            expiry: 0,
        }
    }

    #[tokio::test]
    async fn test_order_signature_round_trip() {
        let w = wallet(KEY_A);
        let domain = TypedDataDomain::new(80002, CONTRACT);
        let order = order_for(&address(&w));
        let signature = sign(&w, &domain, order.struct_hash().unwrap());

        let verifier = Eip712Verifier;
        assert!(verifier.verify_order(&domain, &order, &signature).await.unwrap());

        // Any field change breaks the signature
        let mut tampered = order.clone();
        tampered.price = Price(560_000);
        assert!(!verifier.verify_order(&domain, &tampered, &signature).await.unwrap());

        // So does another chain
        let other_chain = TypedDataDomain::new(137, CONTRACT);
        assert!(!verifier.verify_order(&other_chain, &order, &signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_signature_from_other_wallet_rejected() {
        let a = wallet(KEY_A);
        let b = wallet(KEY_B);
        let domain = TypedDataDomain::new(80002, CONTRACT);
        let order = order_for(&address(&a));
        let signature = sign(&b, &domain, order.struct_hash().unwrap());

        assert!(!Eip712Verifier.verify_order(&domain, &order, &signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_signature() {
        let w = wallet(KEY_A);
        let domain = TypedDataDomain::new(80002, CONTRACT);
        let cancel = CancelSaltTypedData {
            maker: address(&w).to_lowercase(),
            salt: "42".to_string(),
        };
        let signature = sign(&w, &domain, cancel.struct_hash().unwrap());
        assert!(Eip712Verifier.verify_cancel(&domain, &cancel, &signature).await.unwrap());

        // The order schema and the cancel schema never collide
        let order = order_for(&address(&w));
        assert!(!Eip712Verifier.verify_order(&domain, &order, &signature).await.unwrap());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("00000000000000000000000000000000000000cc").is_err());
        assert!(parse_address(CONTRACT).is_ok());
        assert!(parse_uint256("salt", "-1").is_err());
        assert!(parse_uint256("salt", "12a").is_err());
        assert!(recover_signer(H256::zero(), "0xdeadbeef").is_err());
    }
}
