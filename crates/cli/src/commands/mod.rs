//! CLI commands module.

use anyhow::Result;
use clap::Subcommand;

mod balance;
mod block;
mod init;
mod node;
mod pool;
mod send;
mod wallet;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new node: config, genesis wallet and mined genesis block
    Init(init::InitArgs),
    /// Wallet management
    Wallet(wallet::WalletArgs),
    /// Sign and submit a transfer
    Send(send::SendArgs),
    /// Block operations
    Block(block::BlockArgs),
    /// Show the committed balance of an address
    Balance(balance::BalanceArgs),
    /// List pending transactions
    Pool(pool::PoolArgs),
}

pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args).await,
        Commands::Wallet(args) => wallet::run(args),
        Commands::Send(args) => send::run(args).await,
        Commands::Block(args) => block::run(args).await,
        Commands::Balance(args) => balance::run(args).await,
        Commands::Pool(args) => pool::run(args).await,
    }
}
