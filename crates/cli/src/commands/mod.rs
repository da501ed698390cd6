//! CLI commands module.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use hodl_chain::{Blockchain, ChainConfig};
use hodl_core::{Address, Wallet};
use hodl_storage::{AccessMode, Store};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod block;
mod info;
mod init;
mod mine;
mod propose;
mod send;
mod stats;
mod wallet;

/// Sled database directory inside the data dir.
const DB_DIR: &str = "db";
/// Wallet files inside the data dir.
const KEYS_DIR: &str = "keys";

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new chain
    Init(init::InitArgs),
    /// Wallet management
    Wallet(wallet::WalletArgs),
    /// Block explorer
    Block(block::BlockArgs),
    /// Transfer funds and mine the block carrying the transfer
    Send(send::SendArgs),
    /// Produce PoW blocks
    Mine(mine::MineArgs),
    /// Produce a PoS block as the scheduled validator
    Propose(propose::ProposeArgs),
    /// Chain statistics
    Stats(stats::StatsArgs),
    /// General chain information
    Info(info::InfoArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args),
        Commands::Wallet(args) => wallet::run(args),
        Commands::Block(args) => block::run(args),
        Commands::Send(args) => send::run(args),
        Commands::Mine(args) => mine::run(args),
        Commands::Propose(args) => propose::run(args),
        Commands::Stats(args) => stats::run(args),
        Commands::Info(args) => info::run(args),
    }
}

fn load_config(data_dir: &Path) -> Result<ChainConfig> {
    ChainConfig::load(data_dir).context("Failed to read config.json. Did you run 'hodl init'?")
}

/// Open the chain in `data_dir` with an already-loaded config.
fn open_chain_with(data_dir: &Path, mode: AccessMode, config: ChainConfig) -> Result<Blockchain> {
    let store = Store::open(data_dir.join(DB_DIR), mode)
        .context("Failed to open store. Did you run 'hodl init'?")?;
    Blockchain::open(store, config).context("Failed to open chain")
}

fn open_chain(data_dir: &Path, mode: AccessMode) -> Result<Blockchain> {
    open_chain_with(data_dir, mode, load_config(data_dir)?)
}

#[derive(Serialize, Deserialize)]
struct WalletFile {
    address: String,
    public_key: String,
    private_key: String,
}

fn wallet_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(KEYS_DIR).join(format!("{}.json", name))
}

fn save_wallet(data_dir: &Path, name: &str, wallet: &Wallet) -> Result<PathBuf> {
    let path = wallet_path(data_dir, name);
    if path.exists() {
        bail!("Wallet file already exists: {}", path.display());
    }
    fs::create_dir_all(data_dir.join(KEYS_DIR))?;

    let file = WalletFile {
        address: wallet.address().to_hex(),
        public_key: hex::encode(wallet.public_key.as_bytes()),
        private_key: hex::encode(wallet.private_key().to_bytes()),
    };
    fs::write(&path, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("Failed to write wallet file: {}", path.display()))?;
    Ok(path)
}

fn load_wallet(data_dir: &Path, name: &str) -> Result<Wallet> {
    let path = wallet_path(data_dir, name);
    let contents = fs::read_to_string(&path).with_context(|| {
        format!(
            "Wallet file not found: {}. Use 'hodl wallet new' to create one.",
            path.display()
        )
    })?;
    let file: WalletFile = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed wallet file: {}", path.display()))?;

    let private_key = hex::decode(&file.private_key).context("Invalid private key hex")?;
    let wallet = Wallet::from_private_bytes(&private_key).context("Invalid private key")?;
    if wallet.address().to_hex() != file.address {
        bail!(
            "Wallet file {} lists address {} but its key derives {}",
            path.display(),
            file.address,
            wallet.address()
        );
    }
    Ok(wallet)
}

/// Accept either a hex address or the name of a wallet file.
fn resolve_address(data_dir: &Path, name_or_address: &str) -> Result<Address> {
    match Address::from_hex(name_or_address) {
        Ok(address) => Ok(address),
        Err(_) => Ok(load_wallet(data_dir, name_or_address)?.address()),
    }
}
