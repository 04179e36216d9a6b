//! Data directory layout and helpers shared by the commands.
//!
//! ```text
//! <data_dir>/
//!   config.json     node configuration
//!   db/             sled snapshot store
//!   keys/<name>.json wallet key files
//! ```

use anyhow::{bail, Context, Result};
use hermes_chain::{BlockchainService, NodeConfig};
use hermes_core::{Address, Keypair, PublicKey};
use hermes_storage::NodeStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CONFIG_FILE: &str = "config.json";
const DB_DIR: &str = "db";
const KEYS_DIR: &str = "keys";

/// On-disk wallet format.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    address: Address,
    public_key: PublicKey,
    private_key: String,
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

pub fn load_config(data_dir: &Path) -> Result<NodeConfig> {
    let path = config_path(data_dir);
    if !path.exists() {
        bail!(
            "No config found at {}. Did you run 'hermes init'?",
            path.display()
        );
    }
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: NodeConfig = serde_json::from_str(&json).context("Failed to parse config")?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", path.display()))?;
    Ok(config)
}

pub fn save_config(data_dir: &Path, config: &NodeConfig) -> Result<PathBuf> {
    let path = config_path(data_dir);
    fs::write(&path, serde_json::to_string_pretty(config)?)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(path)
}

/// Start the node stored in `data_dir`.
pub async fn open_node(data_dir: &Path) -> Result<BlockchainService> {
    start(data_dir, false).await
}

/// Load the node stored in `data_dir` without mining or writing to it.
pub async fn inspect_node(data_dir: &Path) -> Result<BlockchainService> {
    start(data_dir, true).await
}

async fn start(data_dir: &Path, read_only: bool) -> Result<BlockchainService> {
    let config = load_config(data_dir)?;
    let store = NodeStore::open(data_dir.join(DB_DIR)).context("Failed to open storage")?;
    let mut builder = BlockchainService::builder(config).store(Arc::new(store));
    if read_only {
        builder = builder.read_only();
    }
    builder.build().await.context("Failed to start node")
}

pub fn keys_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(KEYS_DIR)
}

pub fn save_keypair(data_dir: &Path, name: &str, keypair: &Keypair) -> Result<PathBuf> {
    let dir = keys_dir(data_dir);
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{}.json", name));
    if path.exists() {
        bail!("Key file already exists: {}", path.display());
    }
    let file = KeyFile {
        address: keypair.address(),
        public_key: keypair.public_key.clone(),
        private_key: keypair.private_hex(),
    };
    fs::write(&path, serde_json::to_string_pretty(&file)?)?;
    Ok(path)
}

pub fn load_keypair(data_dir: &Path, name: &str) -> Result<Keypair> {
    let path = keys_dir(data_dir).join(format!("{}.json", name));
    if !path.exists() {
        bail!("Key file not found: {}", path.display());
    }
    let json = fs::read_to_string(&path)?;
    let file: KeyFile = serde_json::from_str(&json).context("Failed to parse key file")?;

    let keypair =
        Keypair::from_private_hex(&file.private_key).context("Invalid private key in key file")?;
    if keypair.address() != file.address {
        bail!("Key file {} does not match its address", path.display());
    }
    Ok(keypair)
}

/// Names of the stored wallets.
pub fn list_keypairs(data_dir: &Path) -> Result<Vec<(String, Address)>> {
    let dir = keys_dir(data_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut wallets = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let file: KeyFile = serde_json::from_str(&fs::read_to_string(&path)?)
            .with_context(|| format!("Failed to parse key file: {}", path.display()))?;
        wallets.push((name.to_string(), file.address));
    }
    wallets.sort();
    Ok(wallets)
}

/// Accept a hex address or the name of a stored wallet.
pub fn resolve_address(data_dir: &Path, value: &str) -> Result<Address> {
    if let Ok(address) = Address::from_hex(value) {
        return Ok(address);
    }
    load_keypair(data_dir, value)
        .map(|k| k.address())
        .with_context(|| format!("'{}' is neither an address nor a wallet name", value))
}
