//! Block explorer command.

use super::open_chain;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use hodl_core::{Block, Hash, Payload, Seal};
use hodl_storage::AccessMode;
use std::path::PathBuf;

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// List recent blocks
    List {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: u64,
    },
    /// Show detailed block information
    Info {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Block height or hash (hex format)
        block_id: String,
    },
}

pub fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::List { data_dir, count } => list_blocks(data_dir, count),
        BlockCommand::Info { data_dir, block_id } => show_block_info(data_dir, block_id),
    }
}

fn list_blocks(data_dir: PathBuf, count: u64) -> Result<()> {
    let chain = open_chain(&data_dir, AccessMode::ReadOnly)?;

    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();

    for block in chain.store().recent_blocks(count)? {
        println!(
            "  {} {} {} {}",
            format!("#{}", block.index()).bright_black(),
            block.hash.to_hex()[..16].bright_yellow(),
            block.proposer_kind().to_string().bright_cyan(),
            format!("({} txs)", block.tx_count()).bright_black()
        );
    }

    println!();
    Ok(())
}

fn show_block_info(data_dir: PathBuf, block_id: String) -> Result<()> {
    let chain = open_chain(&data_dir, AccessMode::ReadOnly)?;

    // Try parsing as height first, then as hash
    let block = if let Ok(height) = block_id.parse::<u64>() {
        chain.get_block(height)?
    } else {
        let hash = Hash::from_hex(&block_id)
            .with_context(|| format!("Invalid block hash: {}", block_id))?;
        chain.get_block_by_hash(&hash)?
    };
    let block = block.with_context(|| format!("Block not found: {}", block_id))?;

    print_block(&block);
    Ok(())
}

fn print_block(block: &Block) {
    let header = &block.header;

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Height:       {}", header.index.to_string().bright_cyan());
    println!("  Hash:         {}", block.hash.to_hex().bright_yellow());
    println!("  Parent Hash:  {}", header.previous_hash.to_hex().bright_black());
    println!("  Txs Root:     {}", header.transactions_root.to_hex().bright_black());
    println!("  State Root:   {}", header.state_root.to_hex().bright_black());
    println!("  Timestamp:    {}", header.timestamp.to_string().bright_black());
    println!("  Difficulty:   {}", header.difficulty.to_string().bright_black());
    println!("  Beneficiary:  {}", header.beneficiary.to_hex().bright_yellow());
    match &header.seal {
        Seal::Work { nonce } => {
            println!("  Seal:         {} (nonce {})", "PoW".bright_cyan(), nonce)
        }
        Seal::Stake { stake, .. } => {
            println!("  Seal:         {} (stake {})", "PoS".bright_cyan(), stake)
        }
    }
    println!("  Weight:       {}", header.weight().to_string().bright_cyan());
    println!("  Transactions: {}", block.tx_count().to_string().bright_cyan());
    println!();

    if !block.transactions.is_empty() {
        println!("{}", "Transactions:".bold());
        println!();
        for (i, tx) in block.transactions.iter().enumerate() {
            let kind = match &tx.payload {
                None => "transfer",
                Some(Payload::Deploy { .. }) => "deploy",
                Some(Payload::Call { .. }) => "call",
                Some(Payload::Stake) => "stake",
                Some(Payload::Unstake) => "unstake",
            };
            println!(
                "  {} {} {:<8} {} -> {} amount {} fee {}",
                format!("{}.", i + 1).bright_black(),
                tx.id().to_hex()[..16].bright_yellow(),
                kind,
                tx.sender.to_hex()[..10].bright_black(),
                tx.recipient.to_hex()[..10].bright_black(),
                tx.amount,
                tx.fee
            );
        }
        println!();
    }
}
