//! Wallet configuration from environment variables
//!
//! Controls the Bitcoin network accounts are opened for and the directory
//! holding per-account files. Defaults to Signet.

use std::env;
use std::path::PathBuf;

use bitcoin::Network;

const DEFAULT_DATA_DIR: &str = "./wallets";

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Network accounts are created for; `AccountManager::with_config` rejects others
    pub network: Network,
    /// Base directory for account files
    pub data_dir: PathBuf,
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BITCOIN_NETWORK`: "signet" (default), "regtest", "testnet" or "bitcoin"/"mainnet"
    /// - `WALLET_DATA_DIR`: account directory root (default `./wallets`)
    pub fn from_env() -> Self {
        let network_str = env::var("BITCOIN_NETWORK")
            .unwrap_or_else(|_| "signet".to_string())
            .to_lowercase();

        let network = parse_network(&network_str);

        let data_dir = env::var("WALLET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        log::info!("Wallet data directory: {}", data_dir.display());

        Self { network, data_dir }
    }

    /// BIP44 coin type for this network
    ///
    /// - Mainnet: 0
    /// - Testnet/Signet/Regtest: 1
    pub fn coin_type(&self) -> u32 {
        coin_type(self.network)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Signet,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

pub(crate) fn coin_type(network: Network) -> u32 {
    match network {
        Network::Bitcoin => 0,
        _ => 1,
    }
}

fn parse_network(name: &str) -> Network {
    match name {
        "bitcoin" | "mainnet" => {
            log::info!("Using MAINNET network");
            Network::Bitcoin
        }
        "testnet" => {
            log::info!("Using TESTNET network");
            Network::Testnet
        }
        "regtest" => {
            log::info!("Using REGTEST network");
            Network::Regtest
        }
        "signet" | "" => {
            log::info!("Using SIGNET network");
            Network::Signet
        }
        other => {
            log::warn!("Unknown network '{}', defaulting to Signet", other);
            Network::Signet
        }
    }
}
