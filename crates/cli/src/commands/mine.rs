//! PoW mining command.

use super::{load_config, open_chain_with, resolve_address};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use hodl_chain::{ChainError, Proposer};
use hodl_consensus::CancelToken;
use hodl_storage::AccessMode;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Args)]
pub struct MineArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Wallet name or hex address receiving fees and rewards
    #[arg(short, long)]
    beneficiary: String,

    /// Number of blocks to mine
    #[arg(short = 'n', long, default_value = "1")]
    blocks: u64,

    /// Override the configured number of search threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Give up after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,
}

pub fn run(args: MineArgs) -> Result<()> {
    let beneficiary = resolve_address(&args.data_dir, &args.beneficiary)?;
    let mut config = load_config(&args.data_dir)?;
    if let Some(workers) = args.workers {
        config.consensus.mining_workers = workers;
    }
    let chain = open_chain_with(&args.data_dir, AccessMode::ReadWrite, config)?;

    let cancel = CancelToken::new();
    if let Some(secs) = args.timeout {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            cancel.cancel();
        });
    }

    println!("{}", "Mining...".bold().cyan());
    println!("  Beneficiary: {}", beneficiary.to_hex().bright_yellow());
    println!();

    for _ in 0..args.blocks {
        let difficulty = chain.expected_difficulty(&chain.head()?)?;
        let block = match chain.produce_block(Proposer::Miner { beneficiary }, &cancel) {
            Ok(block) => block,
            Err(ChainError::Cancelled) => {
                println!("{}", "Timed out before finding a block.".yellow());
                break;
            }
            Err(e) => return Err(e).context("Failed to mine block"),
        };
        println!(
            "{}  Mined block {} {} (difficulty {})",
            "✓".green().bold(),
            format!("#{}", block.index()).bright_cyan(),
            block.hash.to_hex()[..16].bright_yellow(),
            difficulty
        );
    }

    println!();
    println!(
        "  Balance: {}",
        chain.balance(&beneficiary)?.to_string().bright_cyan()
    );
    println!();
    Ok(())
}
