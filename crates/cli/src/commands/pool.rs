//! Pending transaction listing.

use super::node;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct PoolArgs {
    /// Directory to store node data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Only transactions sent by this address or wallet
    #[arg(short, long)]
    from: Option<String>,

    /// Only transactions paying this address or wallet
    #[arg(short, long)]
    to: Option<String>,
}

pub async fn run(args: PoolArgs) -> Result<()> {
    let from = args
        .from
        .as_deref()
        .map(|v| node::resolve_address(&args.data_dir, v))
        .transpose()?;
    let to = args
        .to
        .as_deref()
        .map(|v| node::resolve_address(&args.data_dir, v))
        .transpose()?;

    let service = node::inspect_node(&args.data_dir).await?;
    let pending: Vec<_> = service
        .mempool()
        .pending_by_timestamp()
        .into_iter()
        .filter(|tx| from.map_or(true, |a| tx.sender() == &a))
        .filter(|tx| to.map_or(true, |a| tx.transaction.recipient == a))
        .collect();

    let stats = service.mempool().stats();
    println!("{}", "Pending Transactions".bold().cyan());
    println!(
        "  {} pending from {} senders, block at {}",
        stats.total_transactions.to_string().bright_cyan(),
        stats.unique_senders.to_string().bright_cyan(),
        service.config().batch_size.to_string().bright_cyan()
    );
    println!();

    if pending.is_empty() {
        println!("{}", "  No matching transactions".yellow());
        return Ok(());
    }
    for tx in pending {
        println!("  {}", tx.hash.to_hex().bright_yellow());
        println!("    From:   {}", tx.sender().to_hex().bright_black());
        println!("    To:     {}", tx.transaction.recipient.to_hex().bright_black());
        println!("    Amount: {}", tx.amount().to_string().bright_cyan());
    }
    Ok(())
}
