//! Balance query command.

use super::node;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct BalanceArgs {
    /// Directory to store node data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address or wallet name
    account: String,
}

pub async fn run(args: BalanceArgs) -> Result<()> {
    let address = node::resolve_address(&args.data_dir, &args.account)?;
    let service = node::inspect_node(&args.data_dir).await?;

    let committed = service.balance(&address);
    let outgoing: i64 = service
        .pending_from(&address)
        .iter()
        .map(|tx| tx.amount())
        .sum();
    let incoming: i64 = service
        .pending_to(&address)
        .iter()
        .map(|tx| tx.amount())
        .sum();

    println!("{}", address.to_hex().bold().cyan());
    println!("  Balance:          {}", committed.to_string().bright_green());
    if outgoing > 0 || incoming > 0 {
        println!("  Pending outgoing: {}", outgoing.to_string().bright_red());
        println!("  Pending incoming: {}", incoming.to_string().bright_cyan());
    }
    if let Some((index, _)) = service.tip() {
        println!("  As of block:      {}", index.to_string().bright_black());
    }
    Ok(())
}
