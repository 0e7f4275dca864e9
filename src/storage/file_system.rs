use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::models::AccountSnapshot;
use super::PersistenceGateway;
use crate::config::WalletConfig;
use crate::error::StorageError;
use crate::types::{TxRecord, Utxo};

const WALLET_FILE: &str = "wallet.json";
const UTXO_FILE: &str = "utxos.json";
const TX_FILE: &str = "transactions.json";

/// One directory per account holding keystore and ledger JSON files
#[derive(Clone, Debug)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        Self::new(config.data_dir.clone())
    }

    /// Get the base directory path for account storage
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_path
    }

    fn account_dir(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    pub fn account_exists(&self, name: &str) -> bool {
        self.account_dir(name).join(WALLET_FILE).exists()
    }

    /// Load the keystore payload of an account
    pub fn load_wallet(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.account_dir(name).join(WALLET_FILE);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        Ok(fs::read(path)?)
    }

    /// Load the UTXO ledger, or `None` if it was never written
    pub fn load_utxos(&self, name: &str) -> Result<Option<Vec<Utxo>>, StorageError> {
        read_json(&self.account_dir(name).join(UTXO_FILE))
    }

    /// Load the transaction ledger, or `None` if it was never written
    pub fn load_transactions(&self, name: &str) -> Result<Option<Vec<TxRecord>>, StorageError> {
        read_json(&self.account_dir(name).join(TX_FILE))
    }

    /// List all account names in the storage directory
    pub fn list_accounts(&self) -> Result<Vec<String>, StorageError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut accounts = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.join(WALLET_FILE).is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    accounts.push(name.to_string());
                }
            }
        }
        accounts.sort();
        Ok(accounts)
    }

    /// Delete an account and all its files
    pub fn delete_account(&self, name: &str) -> Result<(), StorageError> {
        let dir = self.account_dir(name);
        if !dir.exists() {
            return Err(StorageError::FileNotFound(dir.display().to_string()));
        }

        log::warn!("Deleting account directory: {:?}", dir);
        fs::remove_dir_all(&dir)?;
        log::info!("Account '{}' deleted", name);
        Ok(())
    }
}

impl PersistenceGateway for FileStore {
    fn flush(&self, account: &str, snapshot: &AccountSnapshot) -> Result<(), StorageError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let dir = self.account_dir(account);
        fs::create_dir_all(&dir)?;

        if let Some(wallet) = &snapshot.wallet {
            write_atomic(&dir.join(WALLET_FILE), wallet)?;
        }
        if let Some(utxos) = &snapshot.utxos {
            write_atomic(&dir.join(UTXO_FILE), &serde_json::to_vec_pretty(utxos)?)?;
        }
        if let Some(txs) = &snapshot.transactions {
            write_atomic(&dir.join(TX_FILE), &serde_json::to_vec_pretty(txs)?)?;
        }

        log::debug!("Flushed account '{}' ({:?})", account, snapshot.flags());
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&contents)?))
}

/// Write next to the target and rename over it
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
