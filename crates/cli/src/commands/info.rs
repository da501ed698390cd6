//! General chain information command.

use super::open_chain;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use hodl_storage::AccessMode;
use std::path::PathBuf;

#[derive(Args)]
pub struct InfoArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: InfoArgs) -> Result<()> {
    let chain = open_chain(&args.data_dir, AccessMode::ReadOnly)?;
    let info = chain.info();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!();
    println!("{}", info.name.bold().cyan());
    println!("  {}", info.description);
    println!();
    println!("  Consensus:       {} ({})", info.consensus.bright_cyan(), info.policy);
    println!("  Smart Contracts: {}", info.smart_contracts.bright_cyan());
    println!("  Network:         {}", info.network.bright_cyan());
    if let Some(validator) = chain.scheduled_validator()? {
        println!("  Next Validator:  {}", validator.to_hex().bright_yellow());
    }
    println!();

    Ok(())
}
