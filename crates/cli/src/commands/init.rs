//! Initialize node command.

use super::node;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use hermes_chain::{validate_peer_address, NodeConfig, DEFAULT_BATCH_SIZE};
use hermes_consensus::{ConsensusRule, Target};
use hermes_core::{Address, Keypair};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store node data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Balance given to the generated genesis wallet
    #[arg(short, long, default_value = "1000000")]
    supply: i64,

    /// Pending transactions that trigger mining a block
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Leading hex zeros required of block hashes (0 accepts any hash)
    #[arg(short, long, default_value = "1")]
    zeros: usize,

    /// Extra genesis balance, as ADDRESS=AMOUNT (repeatable)
    #[arg(short, long = "allocate", value_parser = parse_allocation)]
    allocations: Vec<(Address, i64)>,

    /// Seed peer URL (repeatable)
    #[arg(short, long = "peer")]
    peers: Vec<String>,
}

fn parse_allocation(value: &str) -> std::result::Result<(Address, i64), String> {
    let (address, amount) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ADDRESS=AMOUNT, got '{}'", value))?;
    let address = Address::from_hex(address).map_err(|e| e.to_string())?;
    let amount = amount
        .parse::<i64>()
        .map_err(|e| format!("invalid amount '{}': {}", amount, e))?;
    if amount < 0 {
        return Err(format!("negative allocation: {}", amount));
    }
    Ok((address, amount))
}

/// The genesis wallet's supply plus every `--allocate`, summed per address.
fn genesis_allocation(
    wallet: Address,
    supply: i64,
    allocations: &[(Address, i64)],
) -> Result<BTreeMap<Address, i64>> {
    let mut balances = BTreeMap::from([(wallet, supply)]);
    for (address, amount) in allocations {
        let balance = balances.entry(*address).or_insert(0);
        *balance = match balance.checked_add(*amount) {
            Some(total) => total,
            None => bail!("Genesis balance of {} overflows", address),
        };
    }
    Ok(balances)
}

fn consensus_rule(zeros: usize) -> ConsensusRule {
    match zeros {
        0 => ConsensusRule::Naive,
        zeros => ConsensusRule::ProofOfWork {
            target: Target::LeadingZeros { zeros },
        },
    }
}

pub async fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing hermes node...".bold().cyan());
    println!();

    if node::config_path(&args.data_dir).exists() {
        bail!(
            "A node is already initialized in {}",
            args.data_dir.display()
        );
    }
    if args.batch_size == 0 {
        bail!("Batch size must be at least 1");
    }
    if args.supply < 0 {
        bail!("Supply cannot be negative");
    }
    for peer in &args.peers {
        validate_peer_address(peer)?;
    }

    let wallet = Keypair::generate();
    let allocation = genesis_allocation(wallet.address(), args.supply, &args.allocations)?;

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    println!("{}  Created data directory", "✓".green().bold());

    let key_file = node::save_keypair(&args.data_dir, "genesis", &wallet)?;
    println!(
        "{}  Saved genesis wallet to: {}",
        "✓".green().bold(),
        key_file.display().to_string().bright_black()
    );
    println!("    Address: {}", wallet.address().to_hex().bright_yellow());

    let config = NodeConfig {
        batch_size: args.batch_size,
        consensus: consensus_rule(args.zeros),
        genesis_allocation: allocation,
        peers: args.peers,
        node_address: None,
    };
    let config_file = node::save_config(&args.data_dir, &config)?;
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        config_file.display().to_string().bright_black()
    );

    println!();
    println!("{}", "Mining genesis block...".bold());
    let service = node::open_node(&args.data_dir).await?;
    service.flush().await.context("Failed to persist genesis block")?;

    let genesis = service
        .latest_block()
        .context("Node started without a genesis block")?;
    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash:  {}", genesis.hash.to_hex().bright_yellow());
    println!("    Nonce: {}", genesis.nonce.to_string().bright_cyan());

    println!();
    println!("{}", "Node initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to create wallets",
        "hermes wallet new".bright_cyan()
    );
    println!(
        "  • Use {} to send transactions",
        "hermes send --from genesis".bright_cyan()
    );
    println!(
        "  • Use {} to explore blocks",
        "hermes block list".bright_cyan()
    );

    Ok(())
}
