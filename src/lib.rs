pub mod account;
pub mod config;
pub mod consts;
pub mod entry_point;
pub mod envelope;
pub mod errors;
pub mod factory;
pub mod gen;
pub mod ledger;
pub mod modules;
pub mod nonce;
pub mod token;
pub mod traits;
pub mod typed_data;
pub mod types;
pub mod uo_builder;
pub mod utils;

pub use account::SmartAccount;
pub use entry_point::{EntryPoint, OpOutcome};
pub use errors::{AccountError, ModuleError};
pub use factory::AccountFactory;
pub use ledger::{Ledger, SharedLedger};
pub use traits::AuthorizationScheme;
