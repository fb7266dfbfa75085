use ethers::{
    abi::AbiError,
    types::{Address, U256},
    utils::hex,
};
use thiserror::Error;

/// Result alias used across the account, factory, entry point and ledger
pub type Result<T, E = AccountError> = std::result::Result<T, E>;

// Error surfaced by the account, the factory and every call frame on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    /// The envelope names a module that is not enabled on the account
    #[error("module {0:?} is not enabled on this account")]
    UntrustedModule(Address),
    /// The nonce was already consumed in its space
    #[error("nonce {nonce} already used for key {key}")]
    NonceReplay { key: U256, nonce: U256 },
    /// The nonce cannot be consumed (sequence overflow)
    #[error("invalid nonce {0}")]
    InvalidNonce(U256),
    /// The module rejected the signature
    #[error("signature rejected by the authorization module")]
    BadSignature,
    /// The account (or the module state of an account) has already been initialized
    #[error("{0:?} is already initialized")]
    AlreadyInitialized(Address),
    /// The counterfactual address is already occupied
    #[error("account already deployed at {0:?}")]
    AlreadyDeployed(Address),
    /// A privileged entry point was invoked by someone else
    #[error("caller {0:?} is not allowed to call this function")]
    UnauthorizedCaller(Address),
    /// A call made on behalf of the account failed
    #[error("inner call to {target:?} reverted: {reason}")]
    InnerCallReverted {
        target: Address,
        reason: Box<AccountError>,
    },
    /// The signature blob does not decode as `(bytes, address)`
    #[error("malformed signature envelope: {0}")]
    MalformedEnvelope(String),
    /// The zero address cannot be used as a module
    #[error("invalid module address {0:?}")]
    InvalidModule(Address),
    #[error("module {0:?} is already enabled")]
    ModuleAlreadyEnabled(Address),
    #[error("module {0:?} is not enabled")]
    ModuleNotEnabled(Address),
    /// No account lives at the address
    #[error("no account deployed at {0:?}")]
    NotDeployed(Address),
    #[error("insufficient balance for {account:?}: have {balance}, need {required}")]
    InsufficientBalance {
        account: Address,
        balance: U256,
        required: U256,
    },
    #[error("unknown selector 0x{} on {target:?}", hex::encode(.selector))]
    UnknownSelector { target: Address, selector: [u8; 4] },
    #[error("abi error: {0}")]
    Abi(String),
    /// Plain revert with a reason string
    #[error("reverted: {0}")]
    Revert(String),
    #[error("operation {0} is not supported")]
    UnsupportedOperation(u8),
    #[error("invalid refund: {0}")]
    InvalidRefund(&'static str),
    #[error("batch arrays have different lengths")]
    BatchLengthMismatch,
    #[error("call depth exceeded")]
    CallDepthExceeded,
    /// Entry point rejected the user operation (ERC-4337 `FailedOp` reason codes)
    #[error("failed op: {0}")]
    FailedOp(String),
    #[error("module error: {0}")]
    Module(ModuleError),
}

impl AccountError {
    /// Whether a nonce consumed before this failure must stay consumed.
    ///
    /// A rejected signature burns the nonce so the same operation hash can not
    /// be replayed later; every other validation failure happens before the
    /// nonce is touched.
    pub fn commits_nonce(&self) -> bool {
        matches!(self, AccountError::BadSignature)
    }

    /// Wraps the failure of a call made to `target`
    pub fn inner(target: Address, reason: AccountError) -> Self {
        AccountError::InnerCallReverted {
            target,
            reason: Box::new(reason),
        }
    }
}

impl From<AbiError> for AccountError {
    fn from(e: AbiError) -> Self {
        AccountError::Abi(e.to_string())
    }
}

impl From<ethers::abi::Error> for AccountError {
    fn from(e: ethers::abi::Error) -> Self {
        AccountError::Abi(e.to_string())
    }
}

impl From<ModuleError> for AccountError {
    fn from(e: ModuleError) -> Self {
        match e {
            ModuleError::AlreadyInitialized(account) => AccountError::AlreadyInitialized(account),
            other => AccountError::Module(other),
        }
    }
}

// Error thrown by authorization modules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("module already initialized for account {0:?}")]
    AlreadyInitialized(Address),
    #[error("module not initialized for account {0:?}")]
    NotInitialized(Address),
    /// The zero address is never a valid owner
    #[error("owner cannot be the zero address")]
    ZeroOwner,
    #[error("threshold {threshold} is invalid for {owners} owners")]
    InvalidThreshold { threshold: U256, owners: usize },
    #[error("duplicate owner {0:?}")]
    DuplicateOwner(Address),
    #[error("{0:?} is not an owner")]
    OwnerNotFound(Address),
    #[error("abi error: {0}")]
    Abi(String),
    #[error("unknown selector 0x{}", hex::encode(.0))]
    UnknownSelector([u8; 4]),
}

impl From<AbiError> for ModuleError {
    fn from(e: AbiError) -> Self {
        ModuleError::Abi(e.to_string())
    }
}

impl From<ethers::abi::Error> for ModuleError {
    fn from(e: ethers::abi::Error) -> Self {
        ModuleError::Abi(e.to_string())
    }
}
