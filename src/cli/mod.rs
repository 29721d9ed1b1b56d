pub mod demo;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "compass-kernel")]
#[command(about = "Modular smart account kernel", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "compass-kernel.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted session against an in-process chain and store the account
    Demo {
        /// Print receipts as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
    /// Show a stored account
    Inspect {
        /// Account address (hex); lists stored accounts when omitted
        address: Option<String>,
    },
    /// Write the default config to --config
    InitConfig {
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// Generate an Ed25519 owner key
    Keygen,
}
