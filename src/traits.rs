use crate::{errors::ModuleError, types::Event};
use core::fmt::Debug;
use ethers::types::{Address, Bytes, H256};

/// Capability every authorization module implements.
///
/// One module instance serves many accounts and keeps its own per-account
/// state. The account only stores module addresses and always dispatches
/// through this trait.
pub trait AuthorizationScheme: Debug + Send + Sync {
    /// Human readable scheme name
    fn name(&self) -> &'static str;

    /// Registers `account` with the module
    ///
    /// # Arguments
    /// * `account` - The account being set up. It is the caller of the init calldata
    /// * `init_data` - The module specific init calldata (selector included)
    ///
    /// # Returns
    /// * `ModuleError::AlreadyInitialized` if the account is already registered
    fn init_for_account(&mut self, account: Address, init_data: &[u8]) -> Result<(), ModuleError>;

    /// Checks `signature` over `hash` against the state stored for `account`.
    /// Read-only, never fails: malformed signatures are simply invalid.
    fn is_valid_signature_for_account(&self, account: Address, hash: H256, signature: &[u8])
        -> bool;

    /// Module ABI surface reached through the ledger (init, rotation, ...).
    /// `caller` is the direct caller of the module.
    fn dispatch(
        &mut self,
        caller: Address,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<Bytes, ModuleError>;

    /// Implementing the Clone trait for trait
    fn clone_box(&self) -> Box<dyn AuthorizationScheme>;
}

impl Clone for Box<dyn AuthorizationScheme> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
