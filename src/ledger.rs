//! Deterministic single-writer world state the contracts run on.
//!
//! Every call frame is atomic: if it fails, all of its state changes
//! (balances, contract storage, events) are rolled back.
use crate::{
    account::{AccountState, SmartAccount},
    config::LedgerConfig,
    entry_point::{EntryPoint, EntryPointState},
    errors::{AccountError, Result},
    factory::AccountFactory,
    token::MockToken,
    traits::AuthorizationScheme,
    types::{Event, Log},
};
use ethers::{
    types::{Address, Bytes, U256},
    utils::get_contract_address,
};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Code living at an address
#[derive(Clone, Debug)]
pub enum Contract {
    Account(AccountState),
    Module(Box<dyn AuthorizationScheme>),
    Token(MockToken),
    Factory(AccountFactory),
    EntryPoint(EntryPointState),
}

#[derive(Clone, Copy)]
enum ContractKind {
    Account,
    Module,
    Token,
    Factory,
    EntryPoint,
}

impl Contract {
    fn kind(&self) -> ContractKind {
        match self {
            Contract::Account(_) => ContractKind::Account,
            Contract::Module(_) => ContractKind::Module,
            Contract::Token(_) => ContractKind::Token,
            Contract::Factory(_) => ContractKind::Factory,
            Contract::EntryPoint(_) => ContractKind::EntryPoint,
        }
    }
}

#[derive(Debug, Default)]
struct WorldState {
    balances: HashMap<Address, U256>,
    contracts: HashMap<Address, Contract>,
    /// CREATE nonce per deployer
    deployments: HashMap<Address, u64>,
    logs: Vec<Log>,
}

/// Prior value of one piece of state, restored when a checkpoint is reverted
#[derive(Debug)]
enum JournalEntry {
    Balance(Address, Option<U256>),
    Contract(Address, Option<Contract>),
    Deployments(Address, Option<u64>),
}

/// Position in the journal a failed frame is rolled back to.
///
/// Every checkpoint must be handed back through `commit` or `revert_to`.
#[derive(Debug)]
#[must_use]
pub struct Checkpoint {
    journal: usize,
    logs: usize,
}

#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    state: WorldState,
    /// Undo log of the writes made while a checkpoint is open
    journal: Vec<JournalEntry>,
    open_checkpoints: usize,
    /// Gas metered since genesis. Never rolled back.
    gas_used: u64,
    depth: usize,
}

impl Ledger {
    /// Creates a ledger with the entry point and the account factory installed
    /// at the configured addresses
    pub fn new(config: LedgerConfig) -> Self {
        let mut state = WorldState::default();
        state.contracts.insert(
            config.entry_point_address,
            Contract::EntryPoint(EntryPointState::default()),
        );
        state.contracts.insert(
            config.factory_address,
            Contract::Factory(AccountFactory::new(
                config.factory_address,
                config.entry_point_address,
            )),
        );
        info!(
            chain_id = config.chain_id,
            entry_point = ?config.entry_point_address,
            factory = ?config.factory_address,
            "ledger created"
        );
        Self {
            config,
            state,
            journal: Vec::new(),
            open_checkpoints: 0,
            gas_used: 0,
            depth: 0,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn entry_point_address(&self) -> Address {
        self.config.entry_point_address
    }

    /// The factory installed at genesis
    pub fn factory(&self) -> AccountFactory {
        AccountFactory::new(self.config.factory_address, self.config.entry_point_address)
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn logs(&self) -> &[Log] {
        &self.state.logs
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.state
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Credits native funds out of thin air
    pub fn fund(&mut self, address: Address, amount: U256) {
        let balance = self.balance(address).saturating_add(amount);
        self.set_balance(address, balance);
    }

    fn record(&mut self, entry: JournalEntry) {
        if self.open_checkpoints > 0 {
            self.journal.push(entry);
        }
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        let previous = self.state.balances.insert(address, balance);
        self.record(JournalEntry::Balance(address, previous));
    }

    fn set_contract(&mut self, address: Address, contract: Contract) {
        let previous = self.state.contracts.insert(address, contract);
        self.record(JournalEntry::Contract(address, previous));
    }

    /// Mutable access to the code at `address`, journaling its prior storage
    fn contract_mut(&mut self, address: Address) -> Option<&mut Contract> {
        if self.open_checkpoints > 0 {
            let previous = self.state.contracts.get(&address)?.clone();
            self.journal
                .push(JournalEntry::Contract(address, Some(previous)));
        }
        self.state.contracts.get_mut(&address)
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.state.contracts.contains_key(&address)
    }

    pub fn contract(&self, address: Address) -> Option<&Contract> {
        self.state.contracts.get(&address)
    }

    pub fn module(&self, address: Address) -> Option<&dyn AuthorizationScheme> {
        match self.state.contracts.get(&address) {
            Some(Contract::Module(module)) => Some(module.as_ref()),
            _ => None,
        }
    }

    pub fn token(&self, address: Address) -> Option<&MockToken> {
        match self.state.contracts.get(&address) {
            Some(Contract::Token(token)) => Some(token),
            _ => None,
        }
    }

    pub fn account_state(&self, address: Address) -> Option<&AccountState> {
        match self.state.contracts.get(&address) {
            Some(Contract::Account(state)) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn account_state_mut(&mut self, address: Address) -> Option<&mut AccountState> {
        self.account_state(address)?;
        match self.contract_mut(address) {
            Some(Contract::Account(state)) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn entry_point_state(&self, address: Address) -> Option<&EntryPointState> {
        match self.state.contracts.get(&address) {
            Some(Contract::EntryPoint(state)) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn entry_point_state_mut(
        &mut self,
        address: Address,
    ) -> Option<&mut EntryPointState> {
        self.entry_point_state(address)?;
        match self.contract_mut(address) {
            Some(Contract::EntryPoint(state)) => Some(state),
            _ => None,
        }
    }

    /// Handle on the account deployed at `address`
    pub fn account(&mut self, address: Address) -> Result<SmartAccount<'_>> {
        SmartAccount::load(self, address)
    }

    /// Handle on the entry point installed at genesis
    pub fn entry_point(&mut self) -> Result<EntryPoint<'_>> {
        let address = self.config.entry_point_address;
        EntryPoint::load(self, address)
    }

    /// Opens a checkpoint. Writes made from now on can be undone with
    /// `revert_to` until the checkpoint is committed or reverted.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.open_checkpoints += 1;
        Checkpoint {
            journal: self.journal.len(),
            logs: self.state.logs.len(),
        }
    }

    /// Keeps every write made since `checkpoint`. An enclosing checkpoint can
    /// still undo them.
    pub fn commit(&mut self, checkpoint: Checkpoint) {
        debug_assert!(self.journal.len() >= checkpoint.journal);
        self.close_checkpoint();
    }

    /// Undoes every write made since `checkpoint`, events included
    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.journal {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry {
                JournalEntry::Balance(address, Some(balance)) => {
                    self.state.balances.insert(address, balance);
                }
                JournalEntry::Balance(address, None) => {
                    self.state.balances.remove(&address);
                }
                JournalEntry::Contract(address, Some(contract)) => {
                    self.state.contracts.insert(address, contract);
                }
                JournalEntry::Contract(address, None) => {
                    self.state.contracts.remove(&address);
                }
                JournalEntry::Deployments(deployer, Some(nonce)) => {
                    self.state.deployments.insert(deployer, nonce);
                }
                JournalEntry::Deployments(deployer, None) => {
                    self.state.deployments.remove(&deployer);
                }
            }
        }
        self.state.logs.truncate(checkpoint.logs);
        self.close_checkpoint();
    }

    fn close_checkpoint(&mut self) {
        self.open_checkpoints = self.open_checkpoints.saturating_sub(1);
        if self.open_checkpoints == 0 {
            self.journal.clear();
        }
    }

    pub(crate) fn emit(&mut self, address: Address, event: Event) {
        trace!(?address, ?event, "event");
        self.state.logs.push(Log { address, event });
    }

    /// Moves native funds
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<()> {
        if value.is_zero() {
            return Ok(());
        }
        let balance = self.balance(from);
        if balance < value {
            return Err(AccountError::InsufficientBalance {
                account: from,
                balance,
                required: value,
            });
        }
        self.set_balance(from, balance - value);
        self.fund(to, value);
        Ok(())
    }

    /// Installs code at a fixed address. Funds already held there are kept.
    pub(crate) fn install(&mut self, address: Address, contract: Contract) -> Result<()> {
        if self.has_code(address) {
            return Err(AccountError::AlreadyDeployed(address));
        }
        self.set_contract(address, contract);
        Ok(())
    }

    fn next_create_address(&mut self, deployer: Address) -> Address {
        let previous = self.state.deployments.insert(deployer, 0);
        let nonce = previous.unwrap_or_default();
        self.state.deployments.insert(deployer, nonce + 1);
        self.record(JournalEntry::Deployments(deployer, previous));
        get_contract_address(deployer, nonce)
    }

    /// Deploys an authorization module at the deployer's next CREATE address
    pub fn deploy_module(
        &mut self,
        deployer: Address,
        module: impl AuthorizationScheme + 'static,
    ) -> Address {
        let address = self.next_create_address(deployer);
        info!(?address, scheme = module.name(), "module deployed");
        self.set_contract(address, Contract::Module(Box::new(module)));
        address
    }

    /// Deploys a token at the deployer's next CREATE address
    pub fn deploy_token(&mut self, deployer: Address, token: MockToken) -> Address {
        let address = self.next_create_address(deployer);
        info!(?address, symbol = token.symbol(), "token deployed");
        self.set_contract(address, Contract::Token(token));
        address
    }

    fn meter(&mut self, calldata_len: usize) {
        let gas = self
            .config
            .gas
            .calldata_byte
            .saturating_mul(calldata_len as u64)
            .saturating_add(self.config.gas.call);
        self.gas_used = self.gas_used.saturating_add(gas);
    }

    /// Executes one call frame: transfers `value` then runs the target's code.
    /// Calls to addresses without code only move funds.
    pub fn call(
        &mut self,
        caller: Address,
        target: Address,
        value: U256,
        data: &[u8],
    ) -> Result<Bytes> {
        if self.depth >= self.config.max_call_depth {
            return Err(AccountError::CallDepthExceeded);
        }
        self.meter(data.len());
        let checkpoint = self.checkpoint();

        self.depth += 1;
        let result = self
            .transfer(caller, target, value)
            .and_then(|_| self.dispatch(caller, target, value, data));
        self.depth -= 1;

        match &result {
            Ok(_) => self.commit(checkpoint),
            Err(e) => {
                debug!(?caller, ?target, error = %e, "call reverted");
                self.revert_to(checkpoint);
            }
        }
        result
    }

    fn dispatch(
        &mut self,
        caller: Address,
        target: Address,
        value: U256,
        data: &[u8],
    ) -> Result<Bytes> {
        let Some(kind) = self.state.contracts.get(&target).map(Contract::kind) else {
            return Ok(Bytes::new());
        };
        match kind {
            ContractKind::Account => self.account(target)?.handle_call(caller, value, data),
            ContractKind::EntryPoint => {
                EntryPoint::load(self, target)?.handle_call(caller, value, data)
            }
            ContractKind::Factory => {
                let factory = match self.state.contracts.get(&target) {
                    Some(Contract::Factory(factory)) => factory.clone(),
                    _ => return Err(AccountError::NotDeployed(target)),
                };
                factory.handle_call(self, data)
            }
            ContractKind::Module | ContractKind::Token => {
                if !value.is_zero() {
                    return Err(AccountError::Revert("non-payable".to_string()));
                }
                let mut events = Vec::new();
                let output = match self.contract_mut(target) {
                    Some(Contract::Module(module)) => module.dispatch(caller, data, &mut events)?,
                    Some(Contract::Token(token)) => token.dispatch(caller, data, &mut events)?,
                    _ => return Err(AccountError::NotDeployed(target)),
                };
                for event in events {
                    self.emit(target, event);
                }
                Ok(output)
            }
        }
    }
}

/// A ledger shared between threads. The mutex is the single writer: every
/// operation holds it for its whole duration, so operations on the same
/// account are totally ordered.
#[derive(Clone, Debug)]
pub struct SharedLedger(Arc<Mutex<Ledger>>);

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self(Arc::new(Mutex::new(ledger)))
    }

    /// Runs `f` atomically with respect to every other caller
    pub fn with<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut ledger = self.0.lock();
        f(&mut ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{modules::EoaOwnershipModule, token::MockToken};

    fn ledger() -> Ledger {
        Ledger::new(LedgerConfig::default())
    }

    #[test]
    fn genesis_installs_entry_point_and_factory() {
        let ledger = ledger();
        assert!(ledger.has_code(ledger.entry_point_address()));
        assert!(ledger.has_code(ledger.config().factory_address));
    }

    #[test]
    fn plain_transfers_move_funds() {
        let mut ledger = ledger();
        let (alice, bob) = (Address::repeat_byte(1), Address::repeat_byte(2));
        ledger.fund(alice, U256::from(10));
        ledger.call(alice, bob, U256::from(4), &[]).unwrap();
        assert_eq!(ledger.balance(alice), U256::from(6));
        assert_eq!(ledger.balance(bob), U256::from(4));

        let err = ledger.call(alice, bob, U256::from(7), &[]).unwrap_err();
        assert!(matches!(err, AccountError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(alice), U256::from(6));
    }

    #[test]
    fn failed_frames_roll_back_events_and_storage() {
        let mut ledger = ledger();
        let deployer = Address::repeat_byte(9);
        let token = ledger.deploy_token(deployer, MockToken::new("TST"));
        let holder = Address::repeat_byte(3);

        ledger
            .call(holder, token, U256::zero(), &MockToken::mint_calldata(holder, U256::from(5)))
            .unwrap();
        let logs = ledger.logs().len();

        let err = ledger
            .call(
                holder,
                token,
                U256::zero(),
                &MockToken::transfer_calldata(deployer, U256::from(6)),
            )
            .unwrap_err();
        assert!(matches!(err, AccountError::Revert(_)));
        assert_eq!(ledger.logs().len(), logs);
        assert_eq!(ledger.token(token).unwrap().balance_of(holder), U256::from(5));
    }

    #[test]
    fn outer_checkpoint_undoes_committed_frames() {
        let mut ledger = ledger();
        let deployer = Address::repeat_byte(9);
        let (alice, bob) = (Address::repeat_byte(1), Address::repeat_byte(2));
        ledger.fund(alice, U256::from(10));
        let logs = ledger.logs().len();

        let checkpoint = ledger.checkpoint();
        ledger.call(alice, bob, U256::from(4), &[]).unwrap();
        let token = ledger.deploy_token(deployer, MockToken::new("TST"));
        ledger
            .call(alice, token, U256::zero(), &MockToken::mint_calldata(alice, U256::from(5)))
            .unwrap();
        ledger.fund(bob, U256::one());
        ledger.revert_to(checkpoint);

        assert_eq!(ledger.balance(alice), U256::from(10));
        assert_eq!(ledger.balance(bob), U256::zero());
        assert!(!ledger.has_code(token));
        assert_eq!(ledger.logs().len(), logs);
        assert!(ledger.journal.is_empty());
        // the CREATE counter went back as well
        assert_eq!(ledger.deploy_token(deployer, MockToken::new("TST")), token);
    }

    #[test]
    fn committed_writes_stay_and_free_the_journal() {
        let mut ledger = ledger();
        let deployer = Address::repeat_byte(9);
        let holder = Address::repeat_byte(3);
        let token = ledger.deploy_token(deployer, MockToken::new("TST"));

        let outer = ledger.checkpoint();
        let inner = ledger.checkpoint();
        ledger
            .call(holder, token, U256::zero(), &MockToken::mint_calldata(holder, U256::from(7)))
            .unwrap();
        ledger.commit(inner);
        assert!(!ledger.journal.is_empty());
        ledger.commit(outer);

        assert!(ledger.journal.is_empty());
        assert_eq!(ledger.open_checkpoints, 0);
        assert_eq!(ledger.token(token).unwrap().balance_of(holder), U256::from(7));
    }

    #[test]
    fn create_addresses_follow_deployer_nonce() {
        let mut ledger = ledger();
        let deployer = Address::repeat_byte(7);
        let first = ledger.deploy_module(deployer, EoaOwnershipModule::new());
        let second = ledger.deploy_module(deployer, EoaOwnershipModule::new());
        assert_eq!(first, get_contract_address(deployer, 0u64));
        assert_eq!(second, get_contract_address(deployer, 1u64));
        assert!(ledger.module(first).is_some());
        assert!(ledger.token(first).is_none());
    }

    #[test]
    fn every_frame_is_metered() {
        let mut ledger = ledger();
        let before = ledger.gas_used();
        ledger
            .call(Address::repeat_byte(1), Address::repeat_byte(2), U256::zero(), &[0u8; 10])
            .unwrap();
        let schedule = &ledger.config().gas;
        assert_eq!(
            ledger.gas_used() - before,
            schedule.call + 10 * schedule.calldata_byte
        );
    }
}
