use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use compass_kernel::account::{AccountStore, AccountSummary};
use compass_kernel::cli::{demo, Cli, Commands};
use compass_kernel::config::KernelConfig;
use compass_kernel::crypto::KeyPair;
use compass_kernel::encoding::Address;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = KernelConfig::load_or_default(&cli.config);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo { json } => {
            let store = AccountStore::open(&config.storage.db_path)?;
            let report = demo::run_demo(&config, &store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Account {}", report.account);
                for receipt in &report.receipts {
                    match &receipt.revert_reason {
                        None => println!("  op #{} ok", receipt.sequence),
                        Some(reason) => println!("  op #{} reverted: {}", receipt.sequence, reason),
                    }
                }
                println!("  escalation attempt: {}", report.rejected);
                println!("  scheduled payments: {}", report.scheduled.len());
                println!("  balance {} (payee {})", report.account_balance, report.payee_balance);
            }
        }
        Commands::Inspect { address } => {
            let store = AccountStore::open(&config.storage.db_path)?;
            match address {
                Some(address) => {
                    let address: Address = address.parse()?;
                    match store.load(&address)? {
                        Some(kernel) => println!("{}", serde_json::to_string_pretty(&AccountSummary::of(&kernel))?),
                        None => {
                            error!("no account {} in {}", address, config.storage.db_path);
                            std::process::exit(1);
                        }
                    }
                }
                None => {
                    for address in store.list()? {
                        println!("{}", address);
                    }
                }
            }
        }
        Commands::InitConfig { force } => {
            if std::path::Path::new(&cli.config).exists() && !force {
                error!("{} exists; pass --force to overwrite", cli.config);
                std::process::exit(1);
            }
            std::fs::write(&cli.config, KernelConfig::default().to_toml()?)?;
            info!("wrote default config to {}", cli.config);
        }
        Commands::Keygen => {
            let key = KeyPair::generate();
            println!("public key: {}", key.public_key_hex());
            println!("account:    {}", demo::account_address(&key));
        }
    }
    Ok(())
}
