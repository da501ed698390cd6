//! Wallet management command.

use super::{load_wallet, open_chain, resolve_address, save_wallet, KEYS_DIR};
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use hodl_core::Wallet;
use hodl_storage::AccessMode;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct WalletArgs {
    #[command(subcommand)]
    command: WalletCommand,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generate a new wallet
    New {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Name for the wallet file
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show an account's committed state
    Show {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Wallet name or hex address
        account: String,
    },
    /// List saved wallets
    List {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

pub fn run(args: WalletArgs) -> Result<()> {
    match args.command {
        WalletCommand::New { data_dir, name } => new_wallet(data_dir, name),
        WalletCommand::Show { data_dir, account } => show(data_dir, account),
        WalletCommand::List { data_dir } => list(data_dir),
    }
}

fn new_wallet(data_dir: PathBuf, name: Option<String>) -> Result<()> {
    let wallet = Wallet::generate();
    let address = wallet.address();
    let name = name.unwrap_or_else(|| format!("wallet_{}", &address.to_hex()[2..10]));
    let key_file = save_wallet(&data_dir, &name, &wallet)?;

    println!("{}", "Generated new wallet:".bold().cyan());
    println!();
    println!("  Name:       {}", name.bright_cyan());
    println!("  Address:    {}", address.to_hex().bright_yellow());
    println!(
        "  Public Key: {}",
        hex::encode(wallet.public_key.as_bytes()).bright_black()
    );
    println!();
    println!(
        "{}  Saved to: {}",
        "✓".green().bold(),
        key_file.display().to_string().bright_black()
    );
    println!("{}", "Keep the wallet file safe; it holds the private key.".yellow().bold());

    Ok(())
}

fn show(data_dir: PathBuf, account: String) -> Result<()> {
    let address = resolve_address(&data_dir, &account)?;
    let chain = open_chain(&data_dir, AccessMode::ReadOnly)?;
    let state = chain.account(&address)?;

    println!();
    println!("{}", "Account Information:".bold().cyan());
    println!();
    println!("  Address:  {}", address.to_hex().bright_yellow());
    println!("  Balance:  {}", state.balance.to_string().bright_cyan());
    println!("  Stake:    {}", state.stake.to_string().bright_cyan());
    println!("  Nonce:    {}", state.nonce.to_string().bright_cyan());
    if let Some(contract) = chain.contract(&address)? {
        println!(
            "  Contract: {} bytes of code, {} storage slots",
            contract.code.len().to_string().bright_cyan(),
            contract.storage.len().to_string().bright_cyan()
        );
    }
    println!();

    Ok(())
}

fn list(data_dir: PathBuf) -> Result<()> {
    let keys_dir = data_dir.join(KEYS_DIR);
    if !keys_dir.exists() {
        println!("{}", "No wallets found.".yellow());
        println!("Use {} to create one.", "hodl wallet new".bright_cyan());
        return Ok(());
    }

    println!("{}", "Saved Wallets:".bold().cyan());
    println!();

    let mut names: Vec<String> = fs::read_dir(&keys_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();

    if names.is_empty() {
        println!("  {}", "No wallets found.".yellow());
    }
    for name in names {
        match load_wallet(&data_dir, &name) {
            Ok(wallet) => println!(
                "  {} {}",
                format!("{}:", name).bright_black(),
                wallet.address().to_hex().bright_yellow()
            ),
            Err(e) => println!("  {} {}", format!("{}:", name).bright_black(), e.to_string().red()),
        }
    }

    println!();
    Ok(())
}
