//! Initialize chain command.

use super::{save_wallet, DB_DIR};
use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use hodl_chain::{Blockchain, ChainConfig, GenesisAllocation};
use hodl_consensus::ConsensusPolicy;
use hodl_core::{BlockHeader, Wallet};
use hodl_storage::{AccessMode, Store};
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Pow,
    Pos,
    Alternating,
    Simultaneous,
}

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Which proof kinds may produce blocks
    #[arg(short, long, value_enum, default_value = "alternating")]
    policy: PolicyArg,

    /// Epoch length for the alternating policy
    #[arg(long, default_value = "10")]
    epoch_length: u64,

    /// Initial PoW difficulty in leading zero bits
    #[arg(long, default_value = "16")]
    difficulty: u32,

    /// Genesis balance of the generated wallet
    #[arg(long, default_value = "1000000")]
    balance: u64,

    /// Genesis stake of the generated wallet
    #[arg(long, default_value = "1000")]
    stake: u64,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing hodl...".bold().cyan());
    println!();

    if args.data_dir.join(DB_DIR).exists() {
        bail!("A chain already exists in {}", args.data_dir.display());
    }
    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    println!("{}  Created data directory", "✓".green().bold());

    let wallet = Wallet::generate();
    let key_file = save_wallet(&args.data_dir, "genesis", &wallet)?;
    println!(
        "{}  Saved genesis wallet to: {}",
        "✓".green().bold(),
        key_file.display().to_string().bright_black()
    );

    let mut config = ChainConfig::default();
    config.consensus.policy = match args.policy {
        PolicyArg::Pow => ConsensusPolicy::PowOnly,
        PolicyArg::Pos => ConsensusPolicy::PosOnly,
        PolicyArg::Alternating => ConsensusPolicy::Alternating {
            epoch_length: args.epoch_length,
        },
        PolicyArg::Simultaneous => ConsensusPolicy::Simultaneous,
    };
    config.consensus.initial_difficulty = args.difficulty;
    config.genesis.timestamp = BlockHeader::current_timestamp();
    config.genesis.allocations.push(GenesisAllocation {
        address: wallet.address(),
        balance: args.balance,
        stake: args.stake,
    });
    config.save(&args.data_dir)?;
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        args.data_dir.join(hodl_chain::CONFIG_FILE).display().to_string().bright_black()
    );

    let store = Store::open(args.data_dir.join(DB_DIR), AccessMode::ReadWrite)
        .context("Failed to open store")?;
    let chain = Blockchain::initialize(store, config).context("Failed to write genesis")?;
    let genesis = chain.head()?;

    println!();
    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash:      {}", genesis.hash.to_hex().bright_yellow());
    println!("    Consensus: {}", chain.config().consensus.policy.to_string().bright_cyan());
    println!("    Allocated: {} to {}", args.balance.to_string().bright_cyan(), wallet.address().to_hex().bright_yellow());

    println!();
    println!("{}", "Chain initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!("  • Use {} to create wallets", "hodl wallet new".bright_cyan());
    println!("  • Use {} to produce PoW blocks", "hodl mine".bright_cyan());
    println!("  • Use {} to produce PoS blocks", "hodl propose".bright_cyan());
    println!("  • Use {} to explore blocks", "hodl block list".bright_cyan());

    Ok(())
}
