//! Block operations command.

use super::node;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use hermes_core::{Block, Hash};
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
        /// Directory to store node data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
    /// Show detailed block information
    Show {
        /// Directory to store node data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Block index or hash (hex format)
        block_id: String,
    },
}

pub async fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::List { data_dir, count } => list_blocks(data_dir, count).await,
        BlockCommand::Show { data_dir, block_id } => show_block_info(data_dir, block_id).await,
    }
}

fn format_time(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn short(hex: &str) -> &str {
    &hex[..16.min(hex.len())]
}

async fn list_blocks(data_dir: PathBuf, count: usize) -> Result<()> {
    let service = node::inspect_node(&data_dir).await?;
    let blocks = service.blocks();

    println!("{}", "Recent Blocks".bold().cyan());
    println!();

    for block in blocks.iter().rev().take(count) {
        println!(
            "  {} {}  {}  {} txs",
            format!("#{}", block.index).bold(),
            short(&block.hash.to_hex()).bright_yellow(),
            format_time(block.timestamp).bright_black(),
            block.tx_count().to_string().bright_cyan()
        );
    }

    if blocks.len() > count {
        println!();
        println!(
            "  {} older blocks not shown",
            (blocks.len() - count).to_string().bright_black()
        );
    }
    Ok(())
}

async fn show_block_info(data_dir: PathBuf, block_id: String) -> Result<()> {
    let service = node::inspect_node(&data_dir).await?;

    let block = match block_id.parse::<u64>() {
        Ok(index) => service.block_at(index),
        Err(_) => {
            let hash = Hash::from_hex(block_id.trim_start_matches("0x"))
                .context("Block id is neither an index nor a hash")?;
            service.block(&hash)
        }
    }
    .with_context(|| format!("Block not found: {}", block_id))?;

    print_block(&block);
    Ok(())
}

fn print_block(block: &Block) {
    println!("{}", format!("Block #{}", block.index).bold().cyan());
    println!();
    println!("  Hash:        {}", block.hash.to_hex().bright_yellow());
    println!(
        "  Previous:    {}",
        block
            .previous_hash
            .map(|h| h.to_hex())
            .unwrap_or_else(|| "(genesis)".to_string())
            .bright_black()
    );
    println!(
        "  Merkle Root: {}",
        block
            .merkle_root
            .map(|h| h.to_hex())
            .unwrap_or_else(|| "(none)".to_string())
            .bright_black()
    );
    println!("  Timestamp:   {}", format_time(block.timestamp));
    println!("  Nonce:       {}", block.nonce);
    println!("  Accounts:    {}", block.ledger.len());

    println!();
    println!(
        "  {} ({})",
        "Transactions".bold(),
        block.tx_count().to_string().bright_cyan()
    );
    for (i, tx) in block.transactions.iter().enumerate() {
        println!(
            "    {} {}  {} -> {}  {}",
            format!("{}.", i + 1).bright_black(),
            short(&tx.hash.to_hex()).bright_yellow(),
            short(&tx.sender().to_hex()),
            short(&tx.transaction.recipient.to_hex()),
            tx.amount().to_string().bright_cyan()
        );
    }
}
