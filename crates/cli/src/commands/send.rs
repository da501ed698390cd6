//! Transfer command.
//!
//! The pool lives only as long as the process, so the transfer is mined
//! into a block right away.

use super::{load_wallet, open_chain, resolve_address};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use hodl_chain::Proposer;
use hodl_consensus::CancelToken;
use hodl_core::Transaction;
use hodl_storage::AccessMode;
use std::path::PathBuf;

#[derive(Args)]
pub struct SendArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Sender wallet name
    #[arg(short, long)]
    from: String,

    /// Recipient wallet name or hex address
    #[arg(short, long)]
    to: String,

    /// Amount to transfer
    #[arg(short, long)]
    amount: u64,

    /// Fee paid to the block beneficiary
    #[arg(long, default_value = "0")]
    fee: u64,
}

pub fn run(args: SendArgs) -> Result<()> {
    let wallet = load_wallet(&args.data_dir, &args.from)?;
    let recipient = resolve_address(&args.data_dir, &args.to)?;
    let chain = open_chain(&args.data_dir, AccessMode::ReadWrite)?;

    let nonce = chain.account(&wallet.address())?.next_nonce();
    let tx = Transaction::transfer(&wallet, recipient, args.amount, args.fee, nonce).signed(&wallet);
    let id = chain
        .submit_transaction(tx)
        .context("Transaction rejected")?;
    println!("{}  Submitted {}", "✓".green().bold(), id.to_hex().bright_yellow());

    let block = chain
        .produce_block(
            Proposer::Miner {
                beneficiary: wallet.address(),
            },
            &CancelToken::new(),
        )
        .context("Failed to mine block")?;
    println!(
        "{}  Included in block {} {}",
        "✓".green().bold(),
        format!("#{}", block.index()).bright_cyan(),
        block.hash.to_hex()[..16].bright_yellow()
    );
    println!();
    println!(
        "  Sender balance:    {}",
        chain.balance(&wallet.address())?.to_string().bright_cyan()
    );
    println!(
        "  Recipient balance: {}",
        chain.balance(&recipient)?.to_string().bright_cyan()
    );
    println!();

    Ok(())
}
