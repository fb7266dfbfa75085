use crate::{types::UserOperation, utils::sign_user_op_hash};
use ethers::{
    signers::{LocalWallet, WalletError},
    types::{Address, Bytes, H256, U256},
};

/// Default gas limits, generous enough for any metered call on the ledger
const DEFAULT_CALL_GAS_LIMIT: u64 = 1_000_000;
const DEFAULT_VERIFICATION_GAS_LIMIT: u64 = 1_000_000;
const DEFAULT_PRE_VERIFICATION_GAS: u64 = 50_000;

/// Fluent builder of signed user operations
#[derive(Clone, Debug)]
pub struct UserOperationBuilder {
    op: UserOperation,
}

impl UserOperationBuilder {
    /// Create a new UserOperationBuilder
    ///
    /// # Arguments
    /// * `sender` - The smart account the operation is executed by
    ///
    /// # Returns
    /// * `UserOperationBuilder` - Nonce zero, empty calldata, default gas limits, zero fees
    pub fn new(sender: Address) -> Self {
        Self {
            op: UserOperation {
                sender,
                call_gas_limit: U256::from(DEFAULT_CALL_GAS_LIMIT),
                verification_gas_limit: U256::from(DEFAULT_VERIFICATION_GAS_LIMIT),
                pre_verification_gas: U256::from(DEFAULT_PRE_VERIFICATION_GAS),
                ..Default::default()
            },
        }
    }

    pub fn nonce(mut self, nonce: U256) -> Self {
        self.op.nonce = nonce;
        self
    }

    pub fn init_code(mut self, init_code: impl Into<Bytes>) -> Self {
        self.op.init_code = init_code.into();
        self
    }

    pub fn call_data(mut self, call_data: impl Into<Bytes>) -> Self {
        self.op.call_data = call_data.into();
        self
    }

    pub fn call_gas_limit(mut self, gas: U256) -> Self {
        self.op.call_gas_limit = gas;
        self
    }

    pub fn verification_gas_limit(mut self, gas: U256) -> Self {
        self.op.verification_gas_limit = gas;
        self
    }

    pub fn pre_verification_gas(mut self, gas: U256) -> Self {
        self.op.pre_verification_gas = gas;
        self
    }

    pub fn max_fee_per_gas(mut self, fee: U256) -> Self {
        self.op.max_fee_per_gas = fee;
        self
    }

    pub fn max_priority_fee_per_gas(mut self, fee: U256) -> Self {
        self.op.max_priority_fee_per_gas = fee;
        self
    }

    /// Hash of the operation as built so far
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        self.op.hash(entry_point, chain_id)
    }

    /// The unsigned operation
    pub fn build(self) -> UserOperation {
        self.op
    }

    /// Signs the operation hash with `wallet` and routes the signature to `module`
    pub fn sign(
        self,
        wallet: &LocalWallet,
        module: Address,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<UserOperation, WalletError> {
        let op_hash = self.hash(entry_point, chain_id);
        let mut op = self.op;
        op.signature = sign_user_op_hash(wallet, module, op_hash)?;
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::SignatureEnvelope, modules::recover_signer};
    use ethers::{signers::Signer, utils::hash_message};

    #[test]
    fn signature_covers_the_built_operation() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let entry_point = Address::repeat_byte(0xee);
        let module = Address::repeat_byte(0x0d);
        let builder = UserOperationBuilder::new(Address::repeat_byte(0xac))
            .nonce(U256::from(3))
            .call_data(vec![1, 2, 3])
            .max_fee_per_gas(U256::from(2));
        let op_hash = builder.hash(entry_point, 1337);

        let op = builder.sign(&wallet, module, entry_point, 1337).unwrap();
        assert_eq!(op.hash(entry_point, 1337), op_hash);
        assert_eq!(op.nonce, U256::from(3));
        assert_eq!(op.call_gas_limit, U256::from(DEFAULT_CALL_GAS_LIMIT));

        let envelope = SignatureEnvelope::decode(&op.signature).unwrap();
        assert_eq!(envelope.module, module);
        assert_eq!(
            recover_signer(hash_message(op_hash), &envelope.signature),
            Some(wallet.address())
        );
    }
}
