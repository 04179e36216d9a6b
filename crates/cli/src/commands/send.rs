//! Send a transfer.

use super::node;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use hermes_core::Transaction;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args)]
pub struct SendArgs {
    /// Directory to store node data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Sender wallet name
    #[arg(short, long)]
    from: String,

    /// Recipient address or wallet name
    #[arg(short, long)]
    to: String,

    /// Amount to transfer
    #[arg(short, long)]
    amount: i64,
}

pub async fn run(args: SendArgs) -> Result<()> {
    if args.amount <= 0 {
        bail!("Amount must be positive");
    }

    let keypair = node::load_keypair(&args.data_dir, &args.from)?;
    let recipient = node::resolve_address(&args.data_dir, &args.to)?;
    let service = node::open_node(&args.data_dir).await?;

    let tx = Transaction::new(keypair.public_key.clone(), recipient, args.amount).sign(&keypair);
    let hash = tx.hash;
    service
        .add_transaction(tx)
        .context("Transaction rejected")?;

    println!("{}  Transaction submitted", "✓".green().bold());
    println!("    Hash:   {}", hash.to_hex().bright_yellow());
    println!("    From:   {}", keypair.address().to_hex().bright_black());
    println!("    To:     {}", recipient.to_hex().bright_black());
    println!("    Amount: {}", args.amount.to_string().bright_cyan());

    if service.is_mining() {
        println!();
        println!("{}", "Batch complete, mining block...".bold());
        while service.is_mining() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    match service.chain().blocks().iter().rev().find(|b| {
        b.transactions.iter().any(|t| t.hash == hash)
    }) {
        Some(block) => println!(
            "{}  Included in block {} ({})",
            "✓".green().bold(),
            block.index.to_string().bright_cyan(),
            block.hash.to_hex()[..16].bright_yellow()
        ),
        None => println!(
            "    Pending: {} of {} transactions before the next block",
            service.mempool().len().to_string().bright_cyan(),
            service.config().batch_size
        ),
    }

    service.flush().await.context("Failed to persist node state")?;
    Ok(())
}
