#![allow(dead_code)]
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, H160, H256, U256},
};
use modular_account::{
    config::LedgerConfig,
    gen::AccountExecute,
    ledger::Ledger,
    modules::EoaOwnershipModule,
    nonce::join_nonce,
    token::MockToken,
    typed_data,
    types::{Event, FeeRefund, Transaction, TransactionType, UserOperation},
    uo_builder::UserOperationBuilder,
    utils::sign_direct_transaction,
};

pub const DEPLOYER: Address = H160([0xde; 20]);
pub const BENEFICIARY: Address = H160([0xbe; 20]);
pub const RECIPIENT: Address = H160([0x4e; 20]);
pub const RELAYER: Address = H160([0x4a; 20]);

/// A ledger with one EOA-owned account holding ether and 1000 tokens
pub struct World {
    pub ledger: Ledger,
    pub module: Address,
    pub token: Address,
    pub owner: LocalWallet,
    pub account: Address,
}

pub fn world() -> World {
    let mut ledger = Ledger::new(LedgerConfig::default());
    let owner = LocalWallet::new(&mut rand::thread_rng());
    let module = ledger.deploy_module(DEPLOYER, EoaOwnershipModule::new());
    let token = ledger.deploy_token(DEPLOYER, MockToken::new("TST"));
    let account = ledger
        .factory()
        .deploy_account(
            &mut ledger,
            module,
            &EoaOwnershipModule::init_calldata(owner.address()),
            U256::zero(),
        )
        .unwrap();
    ledger.fund(account, U256::exp10(18));
    mint(&mut ledger, token, account, 1_000);
    World {
        ledger,
        module,
        token,
        owner,
        account,
    }
}

pub fn mint(ledger: &mut Ledger, token: Address, to: Address, amount: u64) {
    ledger
        .call(
            DEPLOYER,
            token,
            U256::zero(),
            &MockToken::mint_calldata(to, U256::from(amount)),
        )
        .unwrap();
}

pub fn token_balance(world: &World, holder: Address) -> U256 {
    world.ledger.token(world.token).unwrap().balance_of(holder)
}

/// Calldata making the account transfer `amount` tokens to `to`
pub fn transfer_call(world: &World, to: Address, amount: u64) -> Vec<u8> {
    AccountExecute::new(
        world.token,
        U256::zero(),
        MockToken::transfer_calldata(to, U256::from(amount)),
    )
    .encode()
}

/// A user operation of `sender` signed by `signer` through `module`
pub fn signed_op(
    world: &World,
    sender: Address,
    nonce: U256,
    call_data: Vec<u8>,
    signer: &LocalWallet,
    module: Address,
) -> UserOperation {
    UserOperationBuilder::new(sender)
        .nonce(nonce)
        .call_data(call_data)
        .max_fee_per_gas(U256::one())
        .sign(
            signer,
            module,
            world.ledger.entry_point_address(),
            world.ledger.chain_id(),
        )
        .unwrap()
}

/// A token transfer user operation signed by the owner
pub fn transfer_op(world: &World, nonce: u64, amount: u64) -> UserOperation {
    signed_op(
        world,
        world.account,
        U256::from(nonce),
        transfer_call(world, RECIPIENT, amount),
        &world.owner,
        world.module,
    )
}

/// Signs a direct-path transaction at the account's current nonce of `tx_type`
pub fn sign_direct(
    world: &World,
    tx: &Transaction,
    refund: &FeeRefund,
    tx_type: TransactionType,
    signer: &LocalWallet,
) -> Bytes {
    let nonce = world
        .ledger
        .account_state(world.account)
        .unwrap()
        .nonces()
        .batch_nonce(tx_type);
    let hash = typed_data::transaction_hash(
        world.ledger.chain_id(),
        world.account,
        tx,
        refund,
        nonce,
    );
    sign_direct_transaction(signer, world.module, hash).unwrap()
}

/// Direct-path nonce of `tx_type` after `sequence` executions
pub fn batch_nonce(tx_type: TransactionType, sequence: u64) -> U256 {
    join_nonce(tx_type.batch_id(), sequence)
}

pub fn events_of(ledger: &Ledger, address: Address) -> Vec<Event> {
    ledger
        .logs()
        .iter()
        .filter(|log| log.address == address)
        .map(|log| log.event.clone())
        .collect()
}

pub fn random_hash() -> H256 {
    H256::from(rand::random::<[u8; 32]>())
}
