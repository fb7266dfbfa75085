use super::recover_candidates;
use crate::{
    errors::ModuleError,
    gen::{selector, GetOwnerCall, InitForSmartAccountCall, TransferOwnershipCall},
    traits::AuthorizationScheme,
    types::Event,
};
use ethers::{
    abi::{self, AbiDecode, AbiEncode, Token},
    contract::EthCall,
    types::{Address, Bytes, H256},
};
use hashbrown::HashMap;
use tracing::debug;

/// Single-owner ECDSA registry: every account it serves has exactly one EOA owner.
#[derive(Clone, Debug, Default)]
pub struct EoaOwnershipModule {
    owners: HashMap<Address, Address>,
}

impl EoaOwnershipModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Init calldata registering `owner` for the calling account
    pub fn init_calldata(owner: Address) -> Bytes {
        InitForSmartAccountCall { owner }.encode().into()
    }

    /// Calldata the account executes to hand ownership over to `new_owner`
    pub fn transfer_ownership_calldata(new_owner: Address) -> Bytes {
        TransferOwnershipCall { new_owner }.encode().into()
    }

    pub fn owner_of(&self, account: Address) -> Option<Address> {
        self.owners.get(&account).copied()
    }

    fn transfer_ownership(
        &mut self,
        account: Address,
        new_owner: Address,
    ) -> Result<Address, ModuleError> {
        if new_owner.is_zero() {
            return Err(ModuleError::ZeroOwner);
        }
        let owner = self
            .owners
            .get_mut(&account)
            .ok_or(ModuleError::NotInitialized(account))?;
        Ok(std::mem::replace(owner, new_owner))
    }
}

impl AuthorizationScheme for EoaOwnershipModule {
    fn name(&self) -> &'static str {
        "eoa-ownership-registry"
    }

    fn init_for_account(&mut self, account: Address, init_data: &[u8]) -> Result<(), ModuleError> {
        let InitForSmartAccountCall { owner } = InitForSmartAccountCall::decode(init_data)?;
        if self.owners.contains_key(&account) {
            return Err(ModuleError::AlreadyInitialized(account));
        }
        if owner.is_zero() {
            return Err(ModuleError::ZeroOwner);
        }
        self.owners.insert(account, owner);
        Ok(())
    }

    fn is_valid_signature_for_account(
        &self,
        account: Address,
        hash: H256,
        signature: &[u8],
    ) -> bool {
        let Some(owner) = self.owner_of(account) else {
            return false;
        };
        recover_candidates(hash, signature)
            .into_iter()
            .flatten()
            .any(|signer| signer == owner)
    }

    fn dispatch(
        &mut self,
        caller: Address,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<Bytes, ModuleError> {
        match selector(data) {
            Some(s) if s == InitForSmartAccountCall::selector() => {
                self.init_for_account(caller, data)?;
                let new_owner = self.owner_of(caller).unwrap_or_default();
                debug!(account = ?caller, owner = ?new_owner, "registered account owner");
                events.push(Event::OwnershipTransferred {
                    account: caller,
                    previous_owner: Address::zero(),
                    new_owner,
                });
                Ok(Bytes::new())
            }
            Some(s) if s == TransferOwnershipCall::selector() => {
                let TransferOwnershipCall { new_owner } = TransferOwnershipCall::decode(data)?;
                // keyed by caller: only the account itself can rotate its owner
                let previous_owner = self.transfer_ownership(caller, new_owner)?;
                debug!(account = ?caller, ?previous_owner, ?new_owner, "rotated account owner");
                events.push(Event::OwnershipTransferred {
                    account: caller,
                    previous_owner,
                    new_owner,
                });
                Ok(Bytes::new())
            }
            Some(s) if s == GetOwnerCall::selector() => {
                let GetOwnerCall { account } = GetOwnerCall::decode(data)?;
                let owner = self.owner_of(account).unwrap_or_default();
                Ok(abi::encode(&[Token::Address(owner)]).into())
            }
            Some(s) => Err(ModuleError::UnknownSelector(s)),
            None => Err(ModuleError::UnknownSelector([0; 4])),
        }
    }

    fn clone_box(&self) -> Box<dyn AuthorizationScheme> {
        Box::new(self.clone())
    }
}
