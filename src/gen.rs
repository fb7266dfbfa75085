//! ABI bindings of every contract entry point the ledger dispatches on.
use alloy_primitives::{Address as a_Address, U256 as a_U256};
use alloy_sol_types::sol;
use alloy_sol_types::SolCall;
use ethers::{
    contract::EthCall,
    types::{Address, Bytes, U256},
};

// Account

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "executeCall", abi = "executeCall(address,uint256,bytes)")]
pub struct ExecuteCallCall {
    pub dest: Address,
    pub value: U256,
    pub func: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "executeBatchCall",
    abi = "executeBatchCall(address[],uint256[],bytes[])"
)]
pub struct ExecuteBatchCallCall {
    pub dest: Vec<Address>,
    pub value: Vec<U256>,
    pub func: Vec<Bytes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "enableModule", abi = "enableModule(address)")]
pub struct EnableModuleCall {
    pub module: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "disableModule", abi = "disableModule(address)")]
pub struct DisableModuleCall {
    pub module: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "setupAndEnableModule", abi = "setupAndEnableModule(address,bytes)")]
pub struct SetupAndEnableModuleCall {
    pub module: Address,
    pub setup_data: Bytes,
}

// Factory

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "deployCounterFactualAccount",
    abi = "deployCounterFactualAccount(address,bytes,uint256)"
)]
pub struct DeployCounterFactualAccountCall {
    pub module: Address,
    pub module_setup_data: Bytes,
    pub index: U256,
}

// Entry point

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "depositTo", abi = "depositTo(address)")]
pub struct DepositToCall {
    pub account: Address,
}

// EOA ownership registry module

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "initForSmartAccount", abi = "initForSmartAccount(address)")]
pub struct InitForSmartAccountCall {
    pub owner: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "transferOwnership", abi = "transferOwnership(address)")]
pub struct TransferOwnershipCall {
    pub new_owner: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "getOwner", abi = "getOwner(address)")]
pub struct GetOwnerCall {
    pub account: Address,
}

// Multisig module

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "initForSmartAccount",
    abi = "initForSmartAccount(address[],uint256)"
)]
pub struct InitMultisigForSmartAccountCall {
    pub owners: Vec<Address>,
    pub threshold: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "swapOwner", abi = "swapOwner(address,address)")]
pub struct SwapOwnerCall {
    pub old_owner: Address,
    pub new_owner: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "changeThreshold", abi = "changeThreshold(uint256)")]
pub struct ChangeThresholdCall {
    pub threshold: U256,
}

// Token

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "transfer", abi = "transfer(address,uint256)")]
pub struct TransferCall {
    pub to: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "mint", abi = "mint(address,uint256)")]
pub struct MintCall {
    pub to: Address,
    pub amount: U256,
}

/// Splits calldata into its 4-byte selector. Empty or short calldata has none.
pub fn selector(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
}

// Account `executeCall()` function, encoded client side when building user operations
sol! {function executeCall(address dest, uint256 value, bytes calldata func);}
pub struct AccountExecute(executeCallCall);
impl AccountExecute {
    pub fn new(address: Address, value: U256, func: Bytes) -> Self {
        Self(executeCallCall {
            dest: a_Address::from(address.0),
            value: a_U256::from_limbs(value.0),
            func: func.to_vec(),
        })
    }

    /// Encodes the calldata
    pub fn encode(&self) -> Vec<u8> {
        self.0.encode()
    }
}
