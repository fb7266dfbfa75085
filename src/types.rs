use ethers::{
    abi::{self, Token},
    types::{Address, Bytes, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

/// ERC-4337 (v0.6) user operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI-encodes every field except the signature, replacing the dynamic
    /// fields with their keccak256 hashes
    pub fn pack_for_hash(&self) -> Vec<u8> {
        abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
    }

    /// The user operation hash the entry point hands to `validateUserOp`
    ///
    /// # Arguments
    /// * `entry_point` - The entry point the operation is submitted to
    /// * `chain_id` - The chain id
    ///
    /// # Returns
    /// * `H256` - keccak256(abi.encode(keccak256(packed), entry_point, chain_id))
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(self.pack_for_hash()).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);
        H256::from(keccak256(encoded))
    }

    /// Maximum gas the operation may be charged for
    pub fn required_gas(&self) -> Option<U256> {
        self.call_gas_limit
            .checked_add(self.verification_gas_limit)?
            .checked_add(self.pre_verification_gas)
    }

    /// Maximum cost the entry point reserves from the account's deposit
    pub fn required_prefund(&self) -> Option<U256> {
        self.required_gas()?.checked_mul(self.max_fee_per_gas)
    }
}

/// Call type of a direct-path transaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    #[default]
    Call = 0,
    DelegateCall = 1,
}

/// Nonce space selector of the direct path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionType {
    /// Transactions prepared by another contract
    ContractControlled = 0,
    /// Transactions signed off-chain by an EOA owner (the forward flow)
    EoaControlled = 1,
}

impl TransactionType {
    pub fn batch_id(self) -> U256 {
        U256::from(self as u8)
    }
}

/// A transaction executed through the direct-signature path
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    /// Gas reserved for the inner call. Zero means "no limit"
    pub target_tx_gas: U256,
}

/// Refund the account pays to the relayer of a direct-path transaction
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRefund {
    pub base_gas: U256,
    pub gas_price: U256,
    pub token_gas_price_factor: U256,
    /// The zero address refunds in the native token
    pub gas_token: Address,
    /// The zero address refunds the relayer
    pub refund_receiver: Address,
}

/// Outcome of a direct-path execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectExecution {
    pub tx_hash: H256,
    pub success: bool,
    pub payment: U256,
}

/// Observable side effects. Events are the only record of outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    AccountCreation {
        account: Address,
        module: Address,
        index: U256,
    },
    ModuleEnabled {
        module: Address,
    },
    ModuleDisabled {
        module: Address,
    },
    ExecutionSuccess {
        tx_hash: H256,
        payment: U256,
    },
    ExecutionFailure {
        tx_hash: H256,
        payment: U256,
    },
    AccountHandlePayment {
        tx_hash: H256,
        payment: U256,
    },
    OwnershipTransferred {
        account: Address,
        previous_owner: Address,
        new_owner: Address,
    },
    OwnerSwapped {
        account: Address,
        old_owner: Address,
        new_owner: Address,
    },
    ThresholdChanged {
        account: Address,
        threshold: U256,
    },
    Transfer {
        from: Address,
        to: Address,
        value: U256,
    },
    Deposited {
        account: Address,
        total_deposit: U256,
    },
    UserOperationEvent {
        op_hash: H256,
        sender: Address,
        paymaster: Address,
        nonce: U256,
        success: bool,
        actual_gas_cost: U256,
        actual_gas_used: U256,
    },
    UserOperationRevertReason {
        op_hash: H256,
        sender: Address,
        nonce: U256,
        reason: String,
    },
}

/// An event together with the contract that emitted it
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Log {
    pub address: Address,
    #[serde(flatten)]
    pub event: Event,
}
