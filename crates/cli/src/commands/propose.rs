//! PoS block proposal command.

use super::{load_wallet, open_chain};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use hodl_chain::{ChainError, Proposer};
use hodl_consensus::{CancelToken, ConsensusError};
use hodl_storage::AccessMode;
use std::path::PathBuf;

#[derive(Args)]
pub struct ProposeArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Validator wallet name
    #[arg(short, long)]
    validator: String,
}

pub fn run(args: ProposeArgs) -> Result<()> {
    let wallet = load_wallet(&args.data_dir, &args.validator)?;
    let chain = open_chain(&args.data_dir, AccessMode::ReadWrite)?;

    println!("{}", "Proposing block...".bold().cyan());
    println!("  Validator: {}", wallet.address().to_hex().bright_yellow());
    println!();

    let block = match chain.produce_block(Proposer::Validator(&wallet), &CancelToken::new()) {
        Ok(block) => block,
        Err(ChainError::Consensus(ConsensusError::NotSelected { expected, .. })) => {
            bail!(
                "Not scheduled for height {}; the selected validator is {}",
                chain.height()? + 1,
                expected
            )
        }
        Err(e) => return Err(e).context("Failed to propose block"),
    };

    println!("{}  Block proposed", "✓".green().bold());
    println!("    Hash:   {}", block.hash.to_hex().bright_yellow());
    println!("    Height: {}", block.index().to_string().bright_cyan());
    println!("    Stake:  {}", block.header.weight().to_string().bright_cyan());
    println!("    Txs:    {}", block.tx_count().to_string().bright_cyan());
    println!();

    Ok(())
}
