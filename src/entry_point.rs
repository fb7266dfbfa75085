//! ERC-4337 entry point: validates and executes user operations against the
//! accounts on the ledger and keeps their gas deposits.
use crate::{
    errors::{AccountError, Result},
    gen::{selector, DepositToCall},
    ledger::Ledger,
    nonce::join_nonce,
    types::{Event, UserOperation},
};
use ethers::{
    abi::{AbiDecode, AbiEncode},
    contract::EthCall,
    types::{Address, Bytes, H256, U256},
};
use hashbrown::HashMap;
use tracing::{debug, info, warn};

/// Deposits held by the entry point
#[derive(Clone, Debug, Default)]
pub struct EntryPointState {
    deposits: HashMap<Address, U256>,
}

/// Result of one operation of a `handle_ops` bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpOutcome {
    /// Validated and charged. `success` reports the execution phase
    Executed {
        op_hash: H256,
        success: bool,
        actual_gas_cost: U256,
    },
    /// Failed validation. Nothing was charged
    Rejected { op_hash: H256, error: AccountError },
}

impl OpOutcome {
    pub fn op_hash(&self) -> H256 {
        match self {
            OpOutcome::Executed { op_hash, .. } | OpOutcome::Rejected { op_hash, .. } => *op_hash,
        }
    }

    /// Validated and executed without revert
    pub fn is_success(&self) -> bool {
        matches!(self, OpOutcome::Executed { success: true, .. })
    }
}

#[derive(Debug)]
pub struct EntryPoint<'a> {
    ledger: &'a mut Ledger,
    address: Address,
}

impl<'a> EntryPoint<'a> {
    pub fn load(ledger: &'a mut Ledger, address: Address) -> Result<Self> {
        if ledger.entry_point_state(address).is_none() {
            return Err(AccountError::NotDeployed(address));
        }
        Ok(Self { ledger, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn get_user_op_hash(&self, op: &UserOperation) -> H256 {
        op.hash(self.address, self.ledger.chain_id())
    }

    /// Next nonce `sender` accepts for `key`
    pub fn get_nonce(&self, sender: Address, key: U256) -> U256 {
        self.ledger
            .account_state(sender)
            .map(|state| state.nonces().keyed_nonce(key))
            .unwrap_or_else(|| join_nonce(key, 0))
    }

    /// Deposit of `account`
    pub fn balance_of(&self, account: Address) -> U256 {
        self.ledger
            .entry_point_state(self.address)
            .and_then(|state| state.deposits.get(&account).copied())
            .unwrap_or_default()
    }

    /// Sends `amount` from `from` to the deposit of `account`
    pub fn deposit_to(&mut self, from: Address, account: Address, amount: U256) -> Result<()> {
        let calldata = DepositToCall { account }.encode();
        self.ledger.call(from, self.address, amount, &calldata)?;
        Ok(())
    }

    fn credit(&mut self, account: Address, amount: U256) -> Result<()> {
        let state = self
            .ledger
            .entry_point_state_mut(self.address)
            .ok_or(AccountError::NotDeployed(self.address))?;
        let deposit = state.deposits.entry(account).or_default();
        *deposit = deposit
            .checked_add(amount)
            .ok_or_else(|| AccountError::Revert("deposit overflow".to_string()))?;
        let total_deposit = *deposit;
        self.ledger.emit(
            self.address,
            Event::Deposited {
                account,
                total_deposit,
            },
        );
        Ok(())
    }

    fn debit(&mut self, account: Address, amount: U256) -> Result<()> {
        let state = self
            .ledger
            .entry_point_state_mut(self.address)
            .ok_or(AccountError::NotDeployed(self.address))?;
        let deposit = state.deposits.entry(account).or_default();
        *deposit = deposit
            .checked_sub(amount)
            .ok_or_else(|| AccountError::FailedOp("AA21 didn't pay prefund".to_string()))?;
        Ok(())
    }

    /// Calldata entry of the entry point on the ledger
    pub(crate) fn handle_call(&mut self, caller: Address, value: U256, data: &[u8]) -> Result<Bytes> {
        match selector(data) {
            None if data.is_empty() => self.credit(caller, value)?,
            Some(s) if s == DepositToCall::selector() => {
                let DepositToCall { account } = DepositToCall::decode(data)?;
                self.credit(account, value)?;
            }
            Some(s) => {
                return Err(AccountError::UnknownSelector {
                    target: self.address,
                    selector: s,
                })
            }
            None => return Err(AccountError::Abi("calldata shorter than a selector".to_string())),
        }
        Ok(Bytes::new())
    }

    /// Validates and executes every operation in order, then pays the
    /// collected gas cost to `beneficiary`.
    ///
    /// Operations are isolated: a rejected operation leaves no trace except
    /// a nonce burned by a bad signature, and a failing execution rolls back
    /// only its own calls.
    pub fn handle_ops(&mut self, ops: &[UserOperation], beneficiary: Address) -> Vec<OpOutcome> {
        ops.iter()
            .map(|op| {
                let outcome = self.handle_op(op, beneficiary);
                match &outcome {
                    OpOutcome::Executed {
                        op_hash,
                        success,
                        actual_gas_cost,
                    } => info!(
                        sender = ?op.sender,
                        ?op_hash,
                        success,
                        %actual_gas_cost,
                        "user operation handled"
                    ),
                    OpOutcome::Rejected { op_hash, error } => warn!(
                        sender = ?op.sender,
                        ?op_hash,
                        %error,
                        "user operation rejected"
                    ),
                }
                outcome
            })
            .collect()
    }

    fn handle_op(&mut self, op: &UserOperation, beneficiary: Address) -> OpOutcome {
        let op_hash = self.get_user_op_hash(op);
        let checkpoint = self.ledger.checkpoint();
        let gas_before = self.ledger.gas_used();

        let prefund = match self.validate(op, op_hash) {
            Ok(prefund) => prefund,
            Err(error) => {
                if error.commits_nonce() {
                    self.ledger.commit(checkpoint);
                } else {
                    self.ledger.revert_to(checkpoint);
                }
                return OpOutcome::Rejected { op_hash, error };
            }
        };

        let success = match self
            .ledger
            .call(self.address, op.sender, U256::zero(), &op.call_data)
        {
            Ok(_) => true,
            Err(e) => {
                debug!(sender = ?op.sender, ?op_hash, error = %e, "user operation execution reverted");
                self.ledger.emit(
                    self.address,
                    Event::UserOperationRevertReason {
                        op_hash,
                        sender: op.sender,
                        nonce: op.nonce,
                        reason: e.to_string(),
                    },
                );
                false
            }
        };

        match self.settle(op, op_hash, prefund, gas_before, success, beneficiary) {
            Ok(actual_gas_cost) => {
                self.ledger.commit(checkpoint);
                OpOutcome::Executed {
                    op_hash,
                    success,
                    actual_gas_cost,
                }
            }
            Err(error) => {
                self.ledger.revert_to(checkpoint);
                OpOutcome::Rejected { op_hash, error }
            }
        }
    }

    /// Deploys the sender if needed, lets the account validate, and reserves
    /// the prefund from its deposit
    fn validate(&mut self, op: &UserOperation, op_hash: H256) -> Result<U256> {
        if !op.init_code.is_empty() {
            self.create_sender(op)?;
        } else if self.ledger.account_state(op.sender).is_none() {
            return Err(AccountError::FailedOp("AA20 account not deployed".to_string()));
        }

        let prefund = op
            .required_prefund()
            .ok_or_else(|| AccountError::FailedOp("AA94 gas values overflow".to_string()))?;
        let missing_funds = prefund.saturating_sub(self.balance_of(op.sender));

        let entry_point = self.address;
        self.ledger
            .account(op.sender)?
            .validate_user_op(entry_point, op, op_hash, missing_funds)?;

        if self.balance_of(op.sender) < prefund {
            return Err(AccountError::FailedOp("AA21 didn't pay prefund".to_string()));
        }
        self.debit(op.sender, prefund)?;
        Ok(prefund)
    }

    fn create_sender(&mut self, op: &UserOperation) -> Result<()> {
        if self.ledger.has_code(op.sender) {
            return Err(AccountError::FailedOp("AA10 sender already constructed".to_string()));
        }
        if op.init_code.len() < 20 {
            return Err(AccountError::FailedOp("AA99 initCode too short".to_string()));
        }
        let factory = Address::from_slice(&op.init_code[..20]);
        let output = self
            .ledger
            .call(self.address, factory, U256::zero(), &op.init_code[20..])
            .map_err(|e| AccountError::FailedOp(format!("AA13 initCode failed: {e}")))?;

        let created = match output.get(12..32) {
            Some(word) => Address::from_slice(word),
            None => Address::zero(),
        };
        if created != op.sender {
            return Err(AccountError::FailedOp("AA14 initCode must return sender".to_string()));
        }
        debug!(sender = ?op.sender, ?factory, "sender deployed from initCode");
        Ok(())
    }

    /// Charges the metered gas (capped at the prefund) to the beneficiary and
    /// returns the rest to the sender's deposit
    fn settle(
        &mut self,
        op: &UserOperation,
        op_hash: H256,
        prefund: U256,
        gas_before: u64,
        success: bool,
        beneficiary: Address,
    ) -> Result<U256> {
        let actual_gas_used = U256::from(self.ledger.gas_used() - gas_before)
            .saturating_add(op.pre_verification_gas);
        let actual_gas_cost = actual_gas_used
            .saturating_mul(op.max_fee_per_gas)
            .min(prefund);

        self.credit(op.sender, prefund - actual_gas_cost)?;
        self.ledger
            .transfer(self.address, beneficiary, actual_gas_cost)?;
        self.ledger.emit(
            self.address,
            Event::UserOperationEvent {
                op_hash,
                sender: op.sender,
                paymaster: Address::zero(),
                nonce: op.nonce,
                success,
                actual_gas_cost,
                actual_gas_used,
            },
        );
        Ok(actual_gas_cost)
    }
}
