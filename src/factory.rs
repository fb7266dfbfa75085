//! Deterministic (CREATE2) deployment of accounts.
use crate::{
    account::AccountState,
    consts::ACCOUNT_CREATION_CODE,
    errors::{AccountError, Result},
    gen::{selector, DeployCounterFactualAccountCall},
    ledger::{Contract, Ledger},
    types::Event,
};
use ethers::{
    abi::{self, AbiDecode, AbiEncode, Token},
    contract::EthCall,
    types::{Address, Bytes, H256, U256},
    utils::{get_create2_address_from_hash, keccak256},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Everything an account address is derived from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDescriptor {
    pub module: Address,
    pub init_data: Bytes,
    pub index: U256,
}

impl DeploymentDescriptor {
    /// `keccak256(abi.encodePacked(keccak256(abi.encode(module, init_data)), uint256(index)))`
    pub fn salt(&self) -> H256 {
        let setup_hash = keccak256(abi::encode(&[
            Token::Address(self.module),
            Token::Bytes(self.init_data.to_vec()),
        ]));
        let mut index = [0u8; 32];
        self.index.to_big_endian(&mut index);

        let mut packed = setup_hash.to_vec();
        packed.extend_from_slice(&index);
        H256::from(keccak256(packed))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountFactory {
    address: Address,
    entry_point: Address,
}

impl AccountFactory {
    pub fn new(address: Address, entry_point: Address) -> Self {
        Self {
            address,
            entry_point,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Entry point every account of this factory trusts
    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// keccak256 of the account creation code with the entry point appended
    pub fn init_code_hash(&self) -> H256 {
        let mut init_code = ACCOUNT_CREATION_CODE.to_vec();
        init_code.extend(abi::encode(&[Token::Address(self.entry_point)]));
        H256::from(keccak256(init_code))
    }

    /// Counterfactual address of the account `(module, init_data, index)` deploys to
    pub fn compute_address(&self, module: Address, init_data: &[u8], index: U256) -> Address {
        let descriptor = DeploymentDescriptor {
            module,
            init_data: init_data.to_vec().into(),
            index,
        };
        self.address_of(&descriptor)
    }

    pub fn address_of(&self, descriptor: &DeploymentDescriptor) -> Address {
        get_create2_address_from_hash(self.address, descriptor.salt(), self.init_code_hash())
    }

    /// Calldata of `deployCounterFactualAccount`
    pub fn deploy_calldata(module: Address, init_data: &[u8], index: U256) -> Bytes {
        DeployCounterFactualAccountCall {
            module,
            module_setup_data: init_data.to_vec().into(),
            index,
        }
        .encode()
        .into()
    }

    /// User operation `initCode`: the factory address followed by the deploy calldata
    pub fn init_code(&self, module: Address, init_data: &[u8], index: U256) -> Bytes {
        let mut init_code = self.address.as_bytes().to_vec();
        init_code.extend_from_slice(&Self::deploy_calldata(module, init_data, index));
        init_code.into()
    }

    /// Deploys and bootstraps the account of `(module, init_data, index)`.
    ///
    /// Funds sent to the address before deployment are kept. A failing
    /// bootstrap leaves the ledger untouched.
    ///
    /// # Returns
    /// * `Address` - The new account
    /// * `AccountError::AlreadyDeployed` - Code already lives at the address
    pub fn deploy_account(
        &self,
        ledger: &mut Ledger,
        module: Address,
        init_data: &[u8],
        index: U256,
    ) -> Result<Address> {
        let account = self.compute_address(module, init_data, index);
        if ledger.has_code(account) {
            warn!(?account, "account already deployed");
            return Err(AccountError::AlreadyDeployed(account));
        }

        let checkpoint = ledger.checkpoint();
        if let Err(e) = self.bootstrap(ledger, account, module, init_data) {
            warn!(?account, ?module, error = %e, "account bootstrap failed");
            ledger.revert_to(checkpoint);
            return Err(e);
        }
        ledger.commit(checkpoint);

        ledger.emit(
            self.address,
            Event::AccountCreation {
                account,
                module,
                index,
            },
        );
        info!(?account, ?module, %index, "account deployed");
        Ok(account)
    }

    fn bootstrap(
        &self,
        ledger: &mut Ledger,
        account: Address,
        module: Address,
        init_data: &[u8],
    ) -> Result<()> {
        ledger.install(account, Contract::Account(AccountState::new(self.entry_point)))?;
        ledger.account(account)?.initialize(module, init_data)
    }

    /// Calldata entry of the factory on the ledger
    pub(crate) fn handle_call(&self, ledger: &mut Ledger, data: &[u8]) -> Result<Bytes> {
        match selector(data) {
            Some(s) if s == DeployCounterFactualAccountCall::selector() => {
                let DeployCounterFactualAccountCall {
                    module,
                    module_setup_data,
                    index,
                } = DeployCounterFactualAccountCall::decode(data)?;
                let account = self.deploy_account(ledger, module, &module_setup_data, index)?;
                Ok(abi::encode(&[Token::Address(account)]).into())
            }
            Some(s) => Err(AccountError::UnknownSelector {
                target: self.address,
                selector: s,
            }),
            None => Err(AccountError::Revert("factory has no receive".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::LedgerConfig, modules::EoaOwnershipModule};

    fn owner_init() -> Bytes {
        EoaOwnershipModule::init_calldata(Address::repeat_byte(0x0e))
    }

    #[test]
    fn addresses_depend_on_every_input() {
        let factory = AccountFactory::new(Address::repeat_byte(0xfa), Address::repeat_byte(0xee));
        let module = Address::repeat_byte(0x01);
        let base = factory.compute_address(module, &owner_init(), U256::zero());

        assert_eq!(base, factory.compute_address(module, &owner_init(), U256::zero()));
        assert_ne!(base, factory.compute_address(module, &owner_init(), U256::one()));
        assert_ne!(
            base,
            factory.compute_address(Address::repeat_byte(0x02), &owner_init(), U256::zero())
        );
        assert_ne!(
            base,
            factory.compute_address(
                module,
                &EoaOwnershipModule::init_calldata(Address::repeat_byte(0x0f)),
                U256::zero()
            )
        );
        let other_entry_point =
            AccountFactory::new(Address::repeat_byte(0xfa), Address::repeat_byte(0xef));
        assert_ne!(
            base,
            other_entry_point.compute_address(module, &owner_init(), U256::zero())
        );
    }

    #[test]
    fn init_code_starts_with_the_factory() {
        let factory = AccountFactory::new(Address::repeat_byte(0xfa), Address::repeat_byte(0xee));
        let init_code = factory.init_code(Address::repeat_byte(1), &owner_init(), U256::from(3));
        assert_eq!(&init_code[..20], factory.address().as_bytes());
        let call = DeployCounterFactualAccountCall::decode(&init_code[20..]).unwrap();
        assert_eq!(call.index, U256::from(3));
        assert_eq!(call.module_setup_data, owner_init());
    }

    #[test]
    fn failed_bootstrap_leaves_no_account() {
        let mut ledger = Ledger::new(LedgerConfig::default());
        let module = ledger.deploy_module(Address::repeat_byte(0xde), EoaOwnershipModule::new());
        let factory = ledger.factory();
        let zero_owner = EoaOwnershipModule::init_calldata(Address::zero());
        let logs = ledger.logs().len();

        let err = factory
            .deploy_account(&mut ledger, module, &zero_owner, U256::zero())
            .unwrap_err();
        assert!(matches!(err, AccountError::InnerCallReverted { target, .. } if target == module));
        let account = factory.compute_address(module, &zero_owner, U256::zero());
        assert!(!ledger.has_code(account));
        assert_eq!(ledger.logs().len(), logs);
    }

    #[test]
    fn deploys_through_calldata() {
        let mut ledger = Ledger::new(LedgerConfig::default());
        let module = ledger.deploy_module(Address::repeat_byte(0xde), EoaOwnershipModule::new());
        let factory = ledger.factory();

        let out = ledger
            .call(
                Address::repeat_byte(0x01),
                factory.address(),
                U256::zero(),
                &AccountFactory::deploy_calldata(module, &owner_init(), U256::zero()),
            )
            .unwrap();
        let expected = factory.compute_address(module, &owner_init(), U256::zero());
        assert_eq!(Address::from_slice(&out[12..]), expected);
        assert!(ledger.account_state(expected).is_some());
    }
}
