use super::{recover_candidates, ECDSA_SIGNATURE_LENGTH};
use crate::{
    errors::ModuleError,
    gen::{selector, ChangeThresholdCall, InitMultisigForSmartAccountCall, SwapOwnerCall},
    traits::AuthorizationScheme,
    types::Event,
};
use ethers::{
    abi::{AbiDecode, AbiEncode},
    contract::EthCall,
    types::{Address, Bytes, H256, U256},
};
use hashbrown::HashMap;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
struct MultisigConfig {
    /// Sorted ascending, no duplicates, no zero address
    owners: Vec<Address>,
    threshold: usize,
}

fn checked_threshold(threshold: U256, owners: usize) -> Result<usize, ModuleError> {
    if threshold.is_zero() || threshold > U256::from(owners) {
        return Err(ModuleError::InvalidThreshold { threshold, owners });
    }
    Ok(threshold.as_usize())
}

/// Threshold multisig: an account is authorized by `threshold` distinct owners.
///
/// The raw signature is `threshold` concatenated 65 byte ECDSA signatures
/// ordered by strictly ascending signer address.
#[derive(Clone, Debug, Default)]
pub struct MultisigModule {
    configs: HashMap<Address, MultisigConfig>,
}

impl MultisigModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_calldata(owners: Vec<Address>, threshold: usize) -> Bytes {
        InitMultisigForSmartAccountCall {
            owners,
            threshold: U256::from(threshold),
        }
        .encode()
        .into()
    }

    pub fn swap_owner_calldata(old_owner: Address, new_owner: Address) -> Bytes {
        SwapOwnerCall {
            old_owner,
            new_owner,
        }
        .encode()
        .into()
    }

    pub fn change_threshold_calldata(threshold: usize) -> Bytes {
        ChangeThresholdCall {
            threshold: U256::from(threshold),
        }
        .encode()
        .into()
    }

    pub fn owners_of(&self, account: Address) -> Option<&[Address]> {
        self.configs.get(&account).map(|c| c.owners.as_slice())
    }

    pub fn threshold_of(&self, account: Address) -> Option<usize> {
        self.configs.get(&account).map(|c| c.threshold)
    }

    fn config_mut(&mut self, account: Address) -> Result<&mut MultisigConfig, ModuleError> {
        self.configs
            .get_mut(&account)
            .ok_or(ModuleError::NotInitialized(account))
    }

    fn swap_owner(
        &mut self,
        account: Address,
        old_owner: Address,
        new_owner: Address,
    ) -> Result<(), ModuleError> {
        let config = self.config_mut(account)?;
        if new_owner.is_zero() {
            return Err(ModuleError::ZeroOwner);
        }
        if config.owners.contains(&new_owner) {
            return Err(ModuleError::DuplicateOwner(new_owner));
        }
        let slot = config
            .owners
            .iter_mut()
            .find(|owner| **owner == old_owner)
            .ok_or(ModuleError::OwnerNotFound(old_owner))?;
        *slot = new_owner;
        config.owners.sort();
        Ok(())
    }

    fn change_threshold(&mut self, account: Address, threshold: U256) -> Result<(), ModuleError> {
        let config = self.config_mut(account)?;
        config.threshold = checked_threshold(threshold, config.owners.len())?;
        Ok(())
    }
}

impl AuthorizationScheme for MultisigModule {
    fn name(&self) -> &'static str {
        "threshold-multisig"
    }

    fn init_for_account(&mut self, account: Address, init_data: &[u8]) -> Result<(), ModuleError> {
        let InitMultisigForSmartAccountCall {
            mut owners,
            threshold,
        } = InitMultisigForSmartAccountCall::decode(init_data)?;
        if self.configs.contains_key(&account) {
            return Err(ModuleError::AlreadyInitialized(account));
        }
        if owners.iter().any(Address::is_zero) {
            return Err(ModuleError::ZeroOwner);
        }
        owners.sort();
        if let Some(pair) = owners.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ModuleError::DuplicateOwner(pair[0]));
        }
        let threshold = checked_threshold(threshold, owners.len())?;
        self.configs
            .insert(account, MultisigConfig { owners, threshold });
        Ok(())
    }

    fn is_valid_signature_for_account(
        &self,
        account: Address,
        hash: H256,
        signature: &[u8],
    ) -> bool {
        let Some(config) = self.configs.get(&account) else {
            return false;
        };
        if signature.len() != config.threshold * ECDSA_SIGNATURE_LENGTH {
            return false;
        }

        let mut last = Address::zero();
        for chunk in signature.chunks(ECDSA_SIGNATURE_LENGTH) {
            let signer = recover_candidates(hash, chunk)
                .into_iter()
                .flatten()
                .find(|signer| config.owners.binary_search(signer).is_ok());
            match signer {
                Some(signer) if signer > last => last = signer,
                _ => return false,
            }
        }
        true
    }

    fn dispatch(
        &mut self,
        caller: Address,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<Bytes, ModuleError> {
        match selector(data) {
            Some(s) if s == InitMultisigForSmartAccountCall::selector() => {
                self.init_for_account(caller, data)?;
                debug!(account = ?caller, "registered multisig owners");
                Ok(Bytes::new())
            }
            Some(s) if s == SwapOwnerCall::selector() => {
                let SwapOwnerCall {
                    old_owner,
                    new_owner,
                } = SwapOwnerCall::decode(data)?;
                self.swap_owner(caller, old_owner, new_owner)?;
                events.push(Event::OwnerSwapped {
                    account: caller,
                    old_owner,
                    new_owner,
                });
                Ok(Bytes::new())
            }
            Some(s) if s == ChangeThresholdCall::selector() => {
                let ChangeThresholdCall { threshold } = ChangeThresholdCall::decode(data)?;
                self.change_threshold(caller, threshold)?;
                events.push(Event::ThresholdChanged {
                    account: caller,
                    threshold,
                });
                Ok(Bytes::new())
            }
            Some(s) => Err(ModuleError::UnknownSelector(s)),
            None => Err(ModuleError::UnknownSelector([0; 4])),
        }
    }

    fn clone_box(&self) -> Box<dyn AuthorizationScheme> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    fn wallets(n: usize) -> Vec<LocalWallet> {
        let mut wallets: Vec<_> = (0..n)
            .map(|_| LocalWallet::new(&mut rand::thread_rng()))
            .collect();
        wallets.sort_by_key(|w| w.address());
        wallets
    }

    fn sign(wallets: &[&LocalWallet], hash: H256) -> Vec<u8> {
        wallets
            .iter()
            .flat_map(|w| w.sign_hash(hash).unwrap().to_vec())
            .collect()
    }

    fn setup(owners: &[LocalWallet], threshold: usize) -> (MultisigModule, Address) {
        let account = Address::repeat_byte(0x5a);
        let mut module = MultisigModule::new();
        module
            .init_for_account(
                account,
                &MultisigModule::init_calldata(
                    owners.iter().map(|w| w.address()).collect(),
                    threshold,
                ),
            )
            .unwrap();
        (module, account)
    }

    #[test]
    fn two_of_three() {
        let owners = wallets(3);
        let (module, account) = setup(&owners, 2);
        let hash = H256::repeat_byte(0x33);

        assert!(module.is_valid_signature_for_account(
            account,
            hash,
            &sign(&[&owners[0], &owners[2]], hash)
        ));
        // not enough signatures
        assert!(!module.is_valid_signature_for_account(
            account,
            hash,
            &sign(&[&owners[1]], hash)
        ));
        // wrong order
        assert!(!module.is_valid_signature_for_account(
            account,
            hash,
            &sign(&[&owners[2], &owners[0]], hash)
        ));
        // the same owner twice
        assert!(!module.is_valid_signature_for_account(
            account,
            hash,
            &sign(&[&owners[1], &owners[1]], hash)
        ));

        let outsider = LocalWallet::new(&mut rand::thread_rng());
        let mut mixed = vec![&owners[0], &outsider];
        mixed.sort_by_key(|w| w.address());
        assert!(!module.is_valid_signature_for_account(account, hash, &sign(&mixed, hash)));
    }

    #[test]
    fn rejects_bad_configs() {
        let owners = wallets(2);
        let addresses: Vec<_> = owners.iter().map(|w| w.address()).collect();
        let mut module = MultisigModule::new();
        let account = Address::repeat_byte(1);

        assert!(matches!(
            module.init_for_account(account, &MultisigModule::init_calldata(addresses.clone(), 3)),
            Err(ModuleError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            module.init_for_account(account, &MultisigModule::init_calldata(addresses.clone(), 0)),
            Err(ModuleError::InvalidThreshold { .. })
        ));
        assert_eq!(
            module.init_for_account(
                account,
                &MultisigModule::init_calldata(vec![addresses[0], addresses[0]], 1)
            ),
            Err(ModuleError::DuplicateOwner(addresses[0]))
        );
        assert_eq!(
            module.init_for_account(
                account,
                &MultisigModule::init_calldata(vec![addresses[0], Address::zero()], 1)
            ),
            Err(ModuleError::ZeroOwner)
        );

        module
            .init_for_account(account, &MultisigModule::init_calldata(addresses.clone(), 2))
            .unwrap();
        assert_eq!(
            module.init_for_account(account, &MultisigModule::init_calldata(addresses, 1)),
            Err(ModuleError::AlreadyInitialized(account))
        );
    }

    #[test]
    fn swap_and_threshold_changes_are_keyed_by_caller() {
        let owners = wallets(2);
        let (mut module, account) = setup(&owners, 2);
        let replacement = LocalWallet::new(&mut rand::thread_rng());
        let mut events = Vec::new();

        let stranger = Address::repeat_byte(0x77);
        assert_eq!(
            module.dispatch(
                stranger,
                &MultisigModule::change_threshold_calldata(1),
                &mut events
            ),
            Err(ModuleError::NotInitialized(stranger))
        );

        module
            .dispatch(
                account,
                &MultisigModule::swap_owner_calldata(owners[0].address(), replacement.address()),
                &mut events,
            )
            .unwrap();
        module
            .dispatch(
                account,
                &MultisigModule::change_threshold_calldata(1),
                &mut events,
            )
            .unwrap();
        assert_eq!(module.threshold_of(account), Some(1));
        assert_eq!(events.len(), 2);

        let hash = H256::repeat_byte(9);
        assert!(module.is_valid_signature_for_account(
            account,
            hash,
            &sign(&[&replacement], hash)
        ));
        assert!(!module.is_valid_signature_for_account(
            account,
            hash,
            &sign(&[&owners[0]], hash)
        ));

        assert_eq!(
            module.dispatch(
                account,
                &MultisigModule::swap_owner_calldata(owners[0].address(), Address::zero()),
                &mut events
            ),
            Err(ModuleError::ZeroOwner)
        );
        assert_eq!(
            module.dispatch(
                account,
                &MultisigModule::swap_owner_calldata(owners[0].address(), owners[1].address()),
                &mut events
            ),
            Err(ModuleError::DuplicateOwner(owners[1].address()))
        );
    }
}
