//! Account Manager - Orchestration Layer
//!
//! Owns every open account and routes chain events from the node peer to
//! the accounts they concern.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::{BlockHash, Network, OutPoint};
use parking_lot::RwLock;

use crate::config::WalletConfig;
use crate::error::{Result, StorageError, WalletError};
use crate::ledger::{TxLedger, UtxoLedger};
use crate::storage::FileStore;
use crate::types::{encode_address, BlockStamp, ReceiveRecord, SendRecord};
use crate::wallet::{Account, HdKeystore, KeyDerivationWallet, WalletContext};

pub struct AccountManager {
    ctx: Arc<WalletContext>,
    /// Network every managed account must use, when configured
    network: Option<Network>,
    accounts: RwLock<HashMap<String, Arc<Account>>>,
}

impl AccountManager {
    // ============================================================================
    // Constructor
    // ============================================================================

    pub fn new(ctx: Arc<WalletContext>) -> Self {
        Self {
            ctx,
            network: None,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Manager that only accepts accounts on `config.network`
    pub fn with_config(ctx: Arc<WalletContext>, config: &WalletConfig) -> Self {
        Self {
            network: Some(config.network),
            ..Self::new(ctx)
        }
    }

    fn check_network(&self, name: &str, network: Network) -> Result<()> {
        match self.network {
            Some(expected) if expected != network => Err(WalletError::NetworkMismatch {
                key: format!("account '{}' on {}", name, network),
                account: expected.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn context(&self) -> &Arc<WalletContext> {
        &self.ctx
    }

    // ============================================================================
    // Account Lifecycle
    // ============================================================================

    /// Register an account and every address it owns
    pub fn insert(&self, account: Account) -> Arc<Account> {
        let account = Arc::new(account);
        let addresses = account.sorted_active_payment_addresses();
        for address in &addresses {
            self.ctx.registry.mark(address, account.name());
        }

        self.accounts
            .write()
            .insert(account.name().to_string(), Arc::clone(&account));
        log::debug!(
            "Registered account '{}' with {} addresses",
            account.name(),
            addresses.len()
        );
        account
    }

    /// Create a new account around `keystore` and persist it right away
    pub fn create(&self, name: &str, keystore: Box<dyn KeyDerivationWallet>) -> Result<Arc<Account>> {
        self.check_network(name, keystore.network())?;
        let account = Account::new(name, keystore, Arc::clone(&self.ctx));
        account.write_dirty()?;
        log::info!("Created account '{}'", name);
        Ok(self.insert(account))
    }

    /// Load an account from `store`.
    ///
    /// A missing or unreadable ledger starts empty and schedules a full rescan.
    pub fn open(&self, name: &str, store: &FileStore) -> Result<Arc<Account>> {
        let keystore = HdKeystore::from_bytes(&store.load_wallet(name)?)?;
        self.check_network(name, keystore.network())?;
        let mut full_rescan = false;

        let utxos = match store.load_utxos(name) {
            Ok(Some(utxos)) => UtxoLedger::from_vec(utxos),
            Ok(None) => {
                log::warn!("Account '{}' has no UTXO ledger, full rescan required", name);
                full_rescan = true;
                UtxoLedger::new()
            }
            Err(e) => {
                log::warn!("Cannot read UTXO ledger of '{}': {}", name, e);
                full_rescan = true;
                UtxoLedger::new()
            }
        };

        let txs = match store.load_transactions(name) {
            Ok(Some(records)) => TxLedger::from_vec(records),
            Ok(None) => {
                log::warn!(
                    "Account '{}' has no transaction ledger, full rescan required",
                    name
                );
                full_rescan = true;
                TxLedger::new()
            }
            Err(e) => {
                log::warn!("Cannot read transaction ledger of '{}': {}", name, e);
                full_rescan = true;
                TxLedger::new()
            }
        };

        let account = Account::restore(name, Box::new(keystore), utxos, txs, Arc::clone(&self.ctx));
        account.set_full_rescan(full_rescan);
        log::info!("Opened account '{}'", name);
        Ok(self.insert(account))
    }

    /// Open every account found in `store`; unreadable ones are skipped
    pub fn open_all(&self, store: &FileStore) -> std::result::Result<usize, StorageError> {
        let mut opened = 0;
        for name in store.list_accounts()? {
            match self.open(&name, store) {
                Ok(_) => opened += 1,
                Err(e) => log::error!("Failed to open account '{}': {}", name, e),
            }
        }
        Ok(opened)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Account>> {
        self.accounts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("account '{}'", name)))
    }

    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.accounts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The account owning `address`
    pub fn account_for_address(&self, address: &str) -> Result<Arc<Account>> {
        let name = self.ctx.registry.lookup(address)?;
        self.get(&name)
    }

    fn all(&self) -> Vec<Arc<Account>> {
        self.accounts.read().values().cloned().collect()
    }

    // ============================================================================
    // Chain Event Routing
    // ============================================================================

    /// Roll every account back to the chain ending at `(height, hash)`
    pub fn rollback(&self, height: i32, hash: &BlockHash) -> usize {
        self.all()
            .iter()
            .filter(|account| account.rollback(height, hash))
            .count()
    }

    pub fn block_connected(&self, bs: BlockStamp) {
        self.ctx.chain.observe_block(bs);
        for account in self.all() {
            account.block_connected(bs);
        }
    }

    /// Apply a received output to the account owning its receiver address
    pub fn route_receive(&self, record: ReceiveRecord) -> Result<bool> {
        let owner = self.all().into_iter().find(|account| {
            let address = encode_address(record.receiver_hash, account.network());
            self.ctx
                .registry
                .lookup(&address)
                .map_or(false, |owner| owner == account.name())
        });
        match owner {
            Some(account) => account.record_receive(record),
            None => Err(WalletError::NotFound(format!(
                "no account owns receiver of {}:{}",
                record.txid, record.vout
            ))),
        }
    }

    pub fn route_spend(&self, account: &str, record: SendRecord, spent: &[OutPoint]) -> Result<()> {
        self.get(account)?.record_send(record, spent);
        Ok(())
    }

    /// Remove spent outputs from whichever accounts hold them
    pub fn route_spent_outputs(&self, spent: &[OutPoint]) -> usize {
        self.all()
            .iter()
            .map(|account| account.record_spent_outputs(spent))
            .sum()
    }

    // ============================================================================
    // Node Peer Coordination
    // ============================================================================

    pub fn track_all(&self) {
        for account in self.all() {
            account.track();
        }
    }

    pub fn rescan_all(&self) {
        for account in self.all() {
            let begin = account.rescan_active_addresses();
            log::debug!("Rescan of '{}' requested from height {}", account.name(), begin);
        }
    }

    /// Flush every dirty account; returns the first failure after trying all
    pub fn flush_all(&self) -> Result<()> {
        let mut first_err = None;
        for account in self.all() {
            if let Err(e) = account.write_dirty() {
                log::error!("Cannot sync dirty account '{}': {}", account.name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
