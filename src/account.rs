//! The modular account: signature checks are delegated to enabled
//! authorization modules, replay protection lives in the account.
use crate::{
    consts::{EIP1271_INVALID, EIP1271_MAGIC_VALUE, SIG_VALIDATION_SUCCESS},
    envelope::SignatureEnvelope,
    errors::{AccountError, Result},
    gen::{
        selector, DisableModuleCall, EnableModuleCall, ExecuteBatchCallCall, ExecuteCallCall,
        SetupAndEnableModuleCall, TransferCall,
    },
    ledger::Ledger,
    nonce::NonceManager,
    typed_data,
    types::{
        DirectExecution, Event, FeeRefund, Operation, Transaction, TransactionType, UserOperation,
    },
};
use ethers::{
    abi::{AbiDecode, AbiEncode},
    contract::EthCall,
    types::{Address, Bytes, H256, U256},
};
use hashbrown::HashSet;
use tracing::{debug, info, warn};

/// Storage of one deployed account
#[derive(Clone, Debug)]
pub struct AccountState {
    entry_point: Address,
    modules: HashSet<Address>,
    nonces: NonceManager,
    initialized: bool,
}

impl AccountState {
    pub(crate) fn new(entry_point: Address) -> Self {
        Self {
            entry_point,
            modules: HashSet::new(),
            nonces: NonceManager::default(),
            initialized: false,
        }
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn is_module_enabled(&self, module: Address) -> bool {
        self.modules.contains(&module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Address> {
        self.modules.iter()
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }
}

/// Handle on an account deployed on a ledger
#[derive(Debug)]
pub struct SmartAccount<'a> {
    ledger: &'a mut Ledger,
    address: Address,
}

impl<'a> SmartAccount<'a> {
    pub fn load(ledger: &'a mut Ledger, address: Address) -> Result<Self> {
        if ledger.account_state(address).is_none() {
            return Err(AccountError::NotDeployed(address));
        }
        Ok(Self { ledger, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn state(&self) -> Result<&AccountState> {
        self.ledger
            .account_state(self.address)
            .ok_or(AccountError::NotDeployed(self.address))
    }

    fn state_mut(&mut self) -> Result<&mut AccountState> {
        self.ledger
            .account_state_mut(self.address)
            .ok_or(AccountError::NotDeployed(self.address))
    }

    /// Bootstrap run once by the factory: enables `module` and lets it
    /// register the account with `init_data`
    pub(crate) fn initialize(&mut self, module: Address, init_data: &[u8]) -> Result<()> {
        let address = self.address;
        let state = self.state_mut()?;
        if state.initialized {
            return Err(AccountError::AlreadyInitialized(address));
        }
        state.initialized = true;
        self.enable(module)?;
        self.call(module, U256::zero(), init_data)?;
        Ok(())
    }

    /// Entry point callback of the relay path.
    ///
    /// Checks the envelope, consumes `op.nonce` then asks the module named in
    /// the envelope to check the signature over `op_hash`. Pays `missing_funds`
    /// to the entry point on success.
    ///
    /// # Returns
    /// * `U256` - `SIG_VALIDATION_SUCCESS`
    /// * `AccountError::BadSignature` - the nonce stays consumed
    pub fn validate_user_op(
        &mut self,
        caller: Address,
        op: &UserOperation,
        op_hash: H256,
        missing_funds: U256,
    ) -> Result<U256> {
        let entry_point = self.entry_point()?;
        if caller != entry_point {
            return Err(AccountError::UnauthorizedCaller(caller));
        }

        let envelope = SignatureEnvelope::decode(&op.signature)?;
        self.require_trusted(envelope.module)?;
        self.state_mut()?.nonces.use_keyed_nonce(op.nonce)?;

        if !self.check_signature(envelope.module, op_hash, &envelope.signature) {
            warn!(account = ?self.address, module = ?envelope.module, nonce = %op.nonce, "user operation signature rejected");
            return Err(AccountError::BadSignature);
        }
        debug!(account = ?self.address, nonce = %op.nonce, "user operation validated");

        if !missing_funds.is_zero() {
            self.ledger
                .call(self.address, entry_point, missing_funds, &[])?;
        }
        Ok(U256::from(SIG_VALIDATION_SUCCESS))
    }

    /// Executes one call on behalf of the account
    pub fn execute_call(
        &mut self,
        caller: Address,
        dest: Address,
        value: U256,
        func: &[u8],
    ) -> Result<Bytes> {
        self.require_entry_point_or_self(caller)?;
        self.call(dest, value, func)
    }

    /// Executes calls in order. An empty `values` sends no value with any call.
    pub fn execute_batch_call(
        &mut self,
        caller: Address,
        dests: &[Address],
        values: &[U256],
        funcs: &[Bytes],
    ) -> Result<()> {
        self.require_entry_point_or_self(caller)?;
        if dests.len() != funcs.len() || !(values.is_empty() || values.len() == dests.len()) {
            return Err(AccountError::BatchLengthMismatch);
        }
        for (i, (dest, func)) in dests.iter().zip(funcs).enumerate() {
            let value = values.get(i).copied().unwrap_or_default();
            self.call(*dest, value, func)?;
        }
        Ok(())
    }

    /// Forward flow: a relayer executes a transaction the owner signed off-chain
    pub fn exec_direct(
        &mut self,
        relayer: Address,
        tx: &Transaction,
        refund: &FeeRefund,
        signature: &[u8],
    ) -> Result<DirectExecution> {
        self.exec_transaction(relayer, tx, TransactionType::EoaControlled, refund, signature)
    }

    /// Direct path with an explicit nonce space.
    ///
    /// The inner call is best effort: its failure is reported through
    /// `ExecutionFailure` and the refund is still paid, unless neither
    /// `target_tx_gas` nor `gas_price` is set, in which case the whole
    /// execution reverts. A call that returns an error leaves no trace,
    /// except that `BadSignature` keeps the nonce consumed.
    pub fn exec_transaction(
        &mut self,
        relayer: Address,
        tx: &Transaction,
        tx_type: TransactionType,
        refund: &FeeRefund,
        signature: &[u8],
    ) -> Result<DirectExecution> {
        let nonce = self.nonce(tx_type)?;
        let tx_hash = self.get_transaction_hash(tx, refund, nonce);

        let envelope = SignatureEnvelope::decode(signature)?;
        self.require_trusted(envelope.module)?;

        // a rejected signature keeps its nonce consumed, any other failure
        // reverts the whole call
        let checkpoint = self.ledger.checkpoint();
        match self.authorize_and_execute(relayer, tx, tx_type, refund, &envelope, tx_hash) {
            Ok(execution) => {
                self.ledger.commit(checkpoint);
                info!(
                    account = ?self.address,
                    ?tx_hash,
                    success = execution.success,
                    payment = %execution.payment,
                    "direct transaction executed"
                );
                Ok(execution)
            }
            Err(e) if e.commits_nonce() => {
                self.ledger.commit(checkpoint);
                warn!(account = ?self.address, module = ?envelope.module, %nonce, "direct transaction signature rejected");
                Err(e)
            }
            Err(e) => {
                warn!(account = ?self.address, ?tx_hash, error = %e, "direct transaction reverted");
                self.ledger.revert_to(checkpoint);
                Err(e)
            }
        }
    }

    fn authorize_and_execute(
        &mut self,
        relayer: Address,
        tx: &Transaction,
        tx_type: TransactionType,
        refund: &FeeRefund,
        envelope: &SignatureEnvelope,
        tx_hash: H256,
    ) -> Result<DirectExecution> {
        self.state_mut()?.nonces.consume_batch_nonce(tx_type)?;
        if !self.check_signature(envelope.module, tx_hash, &envelope.signature) {
            return Err(AccountError::BadSignature);
        }
        self.execute_and_refund(relayer, tx, refund, tx_hash)
    }

    fn execute_and_refund(
        &mut self,
        relayer: Address,
        tx: &Transaction,
        refund: &FeeRefund,
        tx_hash: H256,
    ) -> Result<DirectExecution> {
        if tx.operation != Operation::Call {
            return Err(AccountError::UnsupportedOperation(tx.operation as u8));
        }

        let checkpoint = self.ledger.checkpoint();
        let gas_before = self.ledger.gas_used();
        let mut result = self.ledger.call(self.address, tx.to, tx.value, &tx.data);
        let gas_used = self.ledger.gas_used() - gas_before;

        if result.is_ok() && !tx.target_tx_gas.is_zero() && U256::from(gas_used) > tx.target_tx_gas
        {
            self.ledger.revert_to(checkpoint);
            result = Err(AccountError::Revert("target tx gas exceeded".to_string()));
        } else {
            self.ledger.commit(checkpoint);
        }

        let success = match result {
            Ok(_) => true,
            Err(e) if tx.target_tx_gas.is_zero() && refund.gas_price.is_zero() => {
                return Err(AccountError::inner(tx.to, e));
            }
            Err(e) => {
                debug!(account = ?self.address, target = ?tx.to, error = %e, "inner call failed");
                false
            }
        };

        let payment = if refund.gas_price.is_zero() {
            U256::zero()
        } else {
            let payment = self.handle_payment(relayer, refund, gas_used)?;
            self.ledger
                .emit(self.address, Event::AccountHandlePayment { tx_hash, payment });
            payment
        };

        let event = if success {
            Event::ExecutionSuccess { tx_hash, payment }
        } else {
            Event::ExecutionFailure { tx_hash, payment }
        };
        self.ledger.emit(self.address, event);

        Ok(DirectExecution {
            tx_hash,
            success,
            payment,
        })
    }

    /// Pays `(gas_used + base_gas) * gas_price` to the refund receiver, in
    /// native token or in `gas_token` scaled down by `token_gas_price_factor`
    fn handle_payment(
        &mut self,
        relayer: Address,
        refund: &FeeRefund,
        gas_used: u64,
    ) -> Result<U256> {
        let receiver = if refund.refund_receiver.is_zero() {
            relayer
        } else {
            refund.refund_receiver
        };
        let cost = U256::from(gas_used)
            .checked_add(refund.base_gas)
            .and_then(|gas| gas.checked_mul(refund.gas_price))
            .ok_or(AccountError::InvalidRefund("payment overflow"))?;

        if refund.gas_token.is_zero() {
            self.ledger.transfer(self.address, receiver, cost)?;
            return Ok(cost);
        }

        if refund.token_gas_price_factor.is_zero() {
            return Err(AccountError::InvalidRefund("zero token gas price factor"));
        }
        let payment = cost / refund.token_gas_price_factor;
        let transfer = TransferCall {
            to: receiver,
            amount: payment,
        };
        self.call(refund.gas_token, U256::zero(), &transfer.encode())?;
        Ok(payment)
    }

    /// ERC-1271 check routed through the module named in the envelope
    ///
    /// # Returns
    /// * `EIP1271_MAGIC_VALUE` on a valid signature, `EIP1271_INVALID` otherwise
    /// * `AccountError::UntrustedModule` if the module is not enabled
    pub fn is_valid_signature(&self, hash: H256, signature: &[u8]) -> Result<[u8; 4]> {
        let envelope = SignatureEnvelope::decode(signature)?;
        self.require_trusted(envelope.module)?;
        if self.check_signature(envelope.module, hash, &envelope.signature) {
            Ok(EIP1271_MAGIC_VALUE)
        } else {
            Ok(EIP1271_INVALID)
        }
    }

    pub fn enable_module(&mut self, caller: Address, module: Address) -> Result<()> {
        self.require_self(caller)?;
        self.enable(module)
    }

    pub fn disable_module(&mut self, caller: Address, module: Address) -> Result<()> {
        self.require_self(caller)?;
        if !self.state_mut()?.modules.remove(&module) {
            return Err(AccountError::ModuleNotEnabled(module));
        }
        info!(account = ?self.address, ?module, "module disabled");
        self.ledger
            .emit(self.address, Event::ModuleDisabled { module });
        Ok(())
    }

    /// Enables `module` then calls it with `setup_data` from the account
    pub fn setup_and_enable_module(
        &mut self,
        caller: Address,
        module: Address,
        setup_data: &[u8],
    ) -> Result<()> {
        self.require_self(caller)?;
        self.enable(module)?;
        self.call(module, U256::zero(), setup_data)?;
        Ok(())
    }

    fn enable(&mut self, module: Address) -> Result<()> {
        if module.is_zero() {
            return Err(AccountError::InvalidModule(module));
        }
        if !self.state_mut()?.modules.insert(module) {
            return Err(AccountError::ModuleAlreadyEnabled(module));
        }
        info!(account = ?self.address, ?module, "module enabled");
        self.ledger
            .emit(self.address, Event::ModuleEnabled { module });
        Ok(())
    }

    /// Calldata entry of the account on the ledger
    pub(crate) fn handle_call(&mut self, caller: Address, value: U256, data: &[u8]) -> Result<Bytes> {
        if data.is_empty() {
            debug!(account = ?self.address, from = ?caller, %value, "received funds");
            return Ok(Bytes::new());
        }
        let Some(s) = selector(data) else {
            return Err(AccountError::Abi("calldata shorter than a selector".to_string()));
        };

        if s == ExecuteCallCall::selector() {
            let ExecuteCallCall { dest, value, func } = ExecuteCallCall::decode(data)?;
            self.execute_call(caller, dest, value, &func)
        } else if s == ExecuteBatchCallCall::selector() {
            let ExecuteBatchCallCall { dest, value, func } = ExecuteBatchCallCall::decode(data)?;
            self.execute_batch_call(caller, &dest, &value, &func)?;
            Ok(Bytes::new())
        } else if s == EnableModuleCall::selector() {
            let EnableModuleCall { module } = EnableModuleCall::decode(data)?;
            self.enable_module(caller, module)?;
            Ok(Bytes::new())
        } else if s == DisableModuleCall::selector() {
            let DisableModuleCall { module } = DisableModuleCall::decode(data)?;
            self.disable_module(caller, module)?;
            Ok(Bytes::new())
        } else if s == SetupAndEnableModuleCall::selector() {
            let SetupAndEnableModuleCall { module, setup_data } =
                SetupAndEnableModuleCall::decode(data)?;
            self.setup_and_enable_module(caller, module, &setup_data)?;
            Ok(Bytes::new())
        } else {
            Err(AccountError::UnknownSelector {
                target: self.address,
                selector: s,
            })
        }
    }

    /// Call made by the account, failures wrapped with the callee
    fn call(&mut self, target: Address, value: U256, data: &[u8]) -> Result<Bytes> {
        self.ledger
            .call(self.address, target, value, data)
            .map_err(|e| AccountError::inner(target, e))
    }

    fn check_signature(&self, module: Address, hash: H256, signature: &[u8]) -> bool {
        // an enabled address without module code never validates
        self.ledger
            .module(module)
            .map(|m| m.is_valid_signature_for_account(self.address, hash, signature))
            .unwrap_or(false)
    }

    fn require_trusted(&self, module: Address) -> Result<()> {
        if !self.state()?.is_module_enabled(module) {
            warn!(account = ?self.address, ?module, "untrusted module");
            return Err(AccountError::UntrustedModule(module));
        }
        Ok(())
    }

    fn require_self(&self, caller: Address) -> Result<()> {
        if caller != self.address {
            return Err(AccountError::UnauthorizedCaller(caller));
        }
        Ok(())
    }

    fn require_entry_point_or_self(&self, caller: Address) -> Result<()> {
        if caller != self.address && caller != self.entry_point()? {
            return Err(AccountError::UnauthorizedCaller(caller));
        }
        Ok(())
    }

    pub fn entry_point(&self) -> Result<Address> {
        Ok(self.state()?.entry_point)
    }

    pub fn is_module_enabled(&self, module: Address) -> Result<bool> {
        Ok(self.state()?.is_module_enabled(module))
    }

    /// Current entry point nonce of `key`
    pub fn entry_point_nonce(&self, key: U256) -> Result<U256> {
        Ok(self.state()?.nonces.keyed_nonce(key))
    }

    /// Next direct-path nonce of `tx_type`, the value bound into the typed-data
    /// digest.
    ///
    /// This is not the raw counter: the transaction type sits above the low
    /// 64 bits (`batch_id << 64 | sequence`), so `EoaControlled` starts at
    /// `1 << 64`. Use `nonce::split_nonce` to get the sequence back.
    pub fn nonce(&self, tx_type: TransactionType) -> Result<U256> {
        Ok(self.state()?.nonces.batch_nonce(tx_type))
    }

    pub fn chain_id(&self) -> u64 {
        self.ledger.chain_id()
    }

    pub fn domain_separator(&self) -> H256 {
        H256::from(typed_data::domain_separator(self.chain_id(), self.address))
    }

    pub fn get_transaction_hash(&self, tx: &Transaction, refund: &FeeRefund, nonce: U256) -> H256 {
        typed_data::transaction_hash(self.chain_id(), self.address, tx, refund, nonce)
    }
}
