//! Chain statistics command.

use super::open_chain;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use hodl_storage::AccessMode;
use std::path::PathBuf;

#[derive(Args)]
pub struct StatsArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: StatsArgs) -> Result<()> {
    let chain = open_chain(&args.data_dir, AccessMode::ReadOnly)?;
    let stats = chain.stats()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("{}", "Chain Statistics:".bold().cyan());
    println!();
    println!("  Height:            {}", stats.height.to_string().bright_cyan());
    println!("  Blocks:            {}", stats.total_blocks.to_string().bright_cyan());
    println!("  Transactions:      {}", stats.total_transactions.to_string().bright_cyan());
    println!("  Smart Contracts:   {}", stats.total_contracts.to_string().bright_cyan());
    println!("  Difficulty:        {}", stats.difficulty.to_string().bright_cyan());
    println!("  Cumulative Weight: {}", stats.cumulative_weight.to_string().bright_cyan());
    println!("  Head:              {}", stats.head_hash.bright_yellow());
    println!();

    Ok(())
}
