use crate::{
    consts::{
        DEFAULT_CALLDATA_BYTE_GAS, DEFAULT_CALL_GAS, DEFAULT_FACTORY_ADDRESS,
        DEFAULT_MAX_CALL_DEPTH, ENTRY_POINT_ADDRESS, GETH_CHAIN_ID, SEED_PHRASE,
    },
    factory::AccountFactory,
    gen::AccountExecute,
    ledger::Ledger,
    modules::EoaOwnershipModule,
    token::MockToken,
    types::{FeeRefund, Transaction, TransactionType},
    uo_builder::UserOperationBuilder,
    utils::{build_wallet, sign_direct_transaction},
};
use anyhow::Context;
use clap::{value_parser, Parser, Subcommand};
use ethers::{
    signers::{
        coins_bip39::{English, Mnemonic},
        MnemonicBuilder, Signer,
    },
    types::{Address, U256},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "modacct")]
pub struct Opts {
    /// Command to execute
    #[clap(subcommand)]
    pub sub: Subcommands,

    /// Path of the ledger config file
    #[clap(long, short, global = true, env = "MODACCT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The verbosity level
    #[clap(long, short, global = true, default_value_t = 2, value_parser = value_parser!(u8).range(..=4))]
    verbosity: u8,
}

impl Opts {
    pub fn get_log_level(&self) -> String {
        match self.verbosity {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
        .to_string()
    }
}

#[derive(Debug, Subcommand)]
pub enum Subcommands {
    /// Generate a new signing key
    #[clap(
        about = "Generate a random key and address",
        name = "new-key",
        visible_alias = "k"
    )]
    NewKey {
        #[clap(long, default_value_t = GETH_CHAIN_ID)]
        chain_id: u64,
    },
    /// Compute a counterfactual account address
    #[clap(
        about = "Compute the counterfactual address of an account",
        name = "address",
        visible_alias = "a"
    )]
    Address {
        /// Authorization module the account is bootstrapped with
        #[clap(long)]
        module: Address,
        /// Owner registered with the EOA ownership module
        #[clap(long)]
        owner: Address,
        #[clap(long, default_value_t = 0)]
        index: u64,
    },
    /// Run both execution paths on a fresh in-memory ledger
    #[clap(
        about = "Simulate a user operation and a direct transaction",
        name = "simulate",
        visible_alias = "s"
    )]
    Simulate {
        /// Seed phrase of the account owner
        #[clap(long, env = "MODACCT_SEED", default_value = SEED_PHRASE)]
        seed: String,
    },
}

impl Subcommands {
    pub fn run(&self, config: LedgerConfig) -> anyhow::Result<()> {
        match self {
            Subcommands::NewKey { chain_id } => {
                let mut rng = rand::thread_rng();
                let mnemonic = Mnemonic::<English>::new(&mut rng);
                let phrase = mnemonic.to_phrase();
                let wallet = MnemonicBuilder::<English>::default()
                    .phrase(phrase.as_str())
                    .build()?
                    .with_chain_id(*chain_id);
                println!(
                    "Generated Wallet with Address: {:?}, Mnemonic Phrase: {}, Chain Id: {}",
                    wallet.address(),
                    phrase,
                    chain_id
                );
                Ok(())
            }
            Subcommands::Address {
                module,
                owner,
                index,
            } => {
                let factory = AccountFactory::new(config.factory_address, config.entry_point_address);
                let address = factory.compute_address(
                    *module,
                    &EoaOwnershipModule::init_calldata(*owner),
                    U256::from(*index),
                );
                println!("Account counterfactual address: {:?}", address);
                Ok(())
            }
            Subcommands::Simulate { seed } => simulate(config, seed),
        }
    }
}

/// Deploys an account for the wallet of `seed`, then moves tokens once
/// through the entry point and once through the direct path. Prints the
/// resulting event log as JSON.
fn simulate(config: LedgerConfig, seed: &str) -> anyhow::Result<()> {
    let owner = build_wallet(seed)?;
    let chain_id = config.chain_id;
    let mut ledger = Ledger::new(config);
    let deployer = Address::repeat_byte(0xde);
    let relayer = Address::repeat_byte(0xbe);

    let module = ledger.deploy_module(deployer, EoaOwnershipModule::new());
    let token = ledger.deploy_token(deployer, MockToken::new("TST"));
    let factory = ledger.factory();
    let account = factory.deploy_account(
        &mut ledger,
        module,
        &EoaOwnershipModule::init_calldata(owner.address()),
        U256::zero(),
    )?;
    ledger.fund(account, U256::exp10(18));
    ledger.call(
        deployer,
        token,
        U256::zero(),
        &MockToken::mint_calldata(account, U256::from(1_000)),
    )?;

    let entry_point = ledger.entry_point_address();
    let op = UserOperationBuilder::new(account)
        .call_data(
            AccountExecute::new(
                token,
                U256::zero(),
                MockToken::transfer_calldata(relayer, U256::from(100)),
            )
            .encode(),
        )
        .sign(&owner, module, entry_point, chain_id)?;
    let outcomes = ledger.entry_point()?.handle_ops(&[op], relayer);
    info!(success = outcomes.iter().all(|o| o.is_success()), "user operation simulated");

    let tx = Transaction {
        to: token,
        data: MockToken::transfer_calldata(relayer, U256::from(50)),
        ..Default::default()
    };
    let refund = FeeRefund {
        gas_price: U256::one(),
        ..Default::default()
    };
    let mut smart_account = ledger.account(account)?;
    let nonce = smart_account.nonce(TransactionType::EoaControlled)?;
    let tx_hash = smart_account.get_transaction_hash(&tx, &refund, nonce);
    let signature = sign_direct_transaction(&owner, module, tx_hash)?;
    let execution = smart_account.exec_direct(relayer, &tx, &refund, &signature)?;
    info!(success = execution.success, payment = %execution.payment, "direct transaction simulated");

    println!("{}", serde_json::to_string_pretty(ledger.logs())?);
    Ok(())
}

/// Gas charged by the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    /// Per call frame
    pub call: u64,
    /// Per calldata byte
    pub calldata_byte: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            call: DEFAULT_CALL_GAS,
            calldata_byte: DEFAULT_CALLDATA_BYTE_GAS,
        }
    }
}

/// Ledger config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Chain id bound into user operation hashes and typed-data domains
    pub chain_id: u64,
    /// Where the entry point is installed
    pub entry_point_address: Address,
    /// Where the account factory is installed
    pub factory_address: Address,
    pub gas: GasSchedule,
    /// Maximum nesting of call frames
    pub max_call_depth: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            chain_id: GETH_CHAIN_ID,
            entry_point_address: ENTRY_POINT_ADDRESS,
            factory_address: DEFAULT_FACTORY_ADDRESS,
            gas: GasSchedule::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl LedgerConfig {
    /// Loads a JSON config. Missing fields take their default value.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a valid ledger config", path.display()))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The explicit path if given, else `~/.modacct/config.json` if it
    /// exists, else the defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match dirs::home_dir().map(|home| home.join(".modacct").join("config.json")) {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let dir = TempDir::new("modacct").unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "chain_id": 5, "gas": { "call": 100 } }"#).unwrap();

        let config = LedgerConfig::from_file(&path).unwrap();
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.gas.call, 100);
        assert_eq!(config.gas.calldata_byte, DEFAULT_CALLDATA_BYTE_GAS);
        assert_eq!(config.entry_point_address, ENTRY_POINT_ADDRESS);
    }

    #[test]
    fn config_file_round_trip() {
        let dir = TempDir::new("modacct").unwrap();
        let path = dir.path().join("config.json");
        let config = LedgerConfig {
            chain_id: 10,
            max_call_depth: 8,
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(LedgerConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn broken_files_are_reported() {
        let dir = TempDir::new("modacct").unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(LedgerConfig::from_file(&path).is_err());
        assert!(LedgerConfig::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let opts = Opts::parse_from([
            "modacct",
            "address",
            "--module",
            "0x0000000000000000000000000000000000000001",
            "--owner",
            "0x0000000000000000000000000000000000000002",
            "-v",
            "3",
        ]);
        assert_eq!(opts.get_log_level(), "debug");
        assert!(matches!(opts.sub, Subcommands::Address { index: 0, .. }));
    }
}
