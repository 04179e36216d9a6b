//! Wallet management command.

use super::node;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use hermes_core::Keypair;
use std::path::PathBuf;

#[derive(Args)]
pub struct WalletArgs {
    #[command(subcommand)]
    command: WalletCommand,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generate a new keypair
    New {
        /// Directory to store node data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Name of the key file (without .json)
        #[arg(short, long)]
        name: String,
    },
    /// List stored wallets
    List {
        /// Directory to store node data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Show the address of a stored wallet
    Show {
        /// Directory to store node data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        name: String,
    },
}

pub fn run(args: WalletArgs) -> Result<()> {
    match args.command {
        WalletCommand::New { data_dir, name } => new_wallet(data_dir, name),
        WalletCommand::List { data_dir } => list_wallets(data_dir),
        WalletCommand::Show { data_dir, name } => show_wallet(data_dir, name),
    }
}

fn new_wallet(data_dir: PathBuf, name: String) -> Result<()> {
    let keypair = Keypair::generate();
    let path = node::save_keypair(&data_dir, &name, &keypair)?;

    println!("{}  Generated wallet '{}'", "✓".green().bold(), name.bold());
    println!("    Address:    {}", keypair.address().to_hex().bright_yellow());
    println!("    Public Key: {}", keypair.public_key.to_hex().bright_black());
    println!(
        "    Saved to:   {}",
        path.display().to_string().bright_black()
    );
    println!();
    println!(
        "{}",
        "Keep the key file safe: it holds the private key.".yellow()
    );
    Ok(())
}

fn list_wallets(data_dir: PathBuf) -> Result<()> {
    let wallets = node::list_keypairs(&data_dir)?;
    if wallets.is_empty() {
        println!("{}", "No wallets found".yellow());
        return Ok(());
    }

    println!("{}", "Wallets".bold().cyan());
    for (name, address) in wallets {
        println!("  {:<16} {}", name.bold(), address.to_hex().bright_yellow());
    }
    Ok(())
}

fn show_wallet(data_dir: PathBuf, name: String) -> Result<()> {
    let keypair = node::load_keypair(&data_dir, &name)?;
    println!("{}", name.bold().cyan());
    println!("  Address:    {}", keypair.address().to_hex().bright_yellow());
    println!("  Public Key: {}", keypair.public_key.to_hex().bright_black());
    Ok(())
}
