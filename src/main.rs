use clap::Parser;
use modular_account::config::{LedgerConfig, Opts};
use tracing::Level;

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let opts = Opts::parse();

    let level: Level = opts.get_log_level().parse()?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = LedgerConfig::load(opts.config.as_deref())?;
    opts.sub.run(config)
}
