//! EIP-712 hashing of direct-path transactions.
use crate::{
    consts::ACCOUNT_TX_TYPE,
    types::{FeeRefund, Transaction},
};
use ethers::{
    abi::{self, Token},
    types::{transaction::eip712::EIP712Domain, Address, H256, U256},
    utils::keccak256,
};

/// Domain separator of `account`: `EIP712Domain(uint256 chainId,address verifyingContract)`
pub fn domain_separator(chain_id: u64, account: Address) -> [u8; 32] {
    EIP712Domain {
        name: None,
        version: None,
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(account),
        salt: None,
    }
    .separator()
}

/// `hashStruct` of an `AccountTx`
pub fn account_tx_struct_hash(tx: &Transaction, refund: &FeeRefund, nonce: U256) -> [u8; 32] {
    keccak256(abi::encode(&[
        Token::FixedBytes(keccak256(ACCOUNT_TX_TYPE).to_vec()),
        Token::Address(tx.to),
        Token::Uint(tx.value),
        Token::FixedBytes(keccak256(&tx.data).to_vec()),
        Token::Uint(U256::from(tx.operation as u8)),
        Token::Uint(tx.target_tx_gas),
        Token::Uint(refund.base_gas),
        Token::Uint(refund.gas_price),
        Token::Uint(refund.token_gas_price_factor),
        Token::Address(refund.gas_token),
        Token::Address(refund.refund_receiver),
        Token::Uint(nonce),
    ]))
}

/// `0x19 0x01 || domainSeparator || hashStruct`
pub fn encode_transaction_data(
    chain_id: u64,
    account: Address,
    tx: &Transaction,
    refund: &FeeRefund,
    nonce: U256,
) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(66);
    encoded.extend_from_slice(&[0x19, 0x01]);
    encoded.extend_from_slice(&domain_separator(chain_id, account));
    encoded.extend_from_slice(&account_tx_struct_hash(tx, refund, nonce));
    encoded
}

/// The digest the account's owner signs for the direct path
pub fn transaction_hash(
    chain_id: u64,
    account: Address,
    tx: &Transaction,
    refund: &FeeRefund,
    nonce: U256,
) -> H256 {
    H256::from(keccak256(encode_transaction_data(
        chain_id, account, tx, refund, nonce,
    )))
}
