//! Account aggregate
//!
//! An account owns its keystore and two ledgers. Locks are always taken in
//! the order account -> UTXO ledger -> transaction ledger, and only through
//! the `lock_*` helpers below. Mutations mark the touched parts dirty under
//! the lock; the flush to storage happens after every lock is released.
//! Flushes of one account are serialized by a separate flush mutex, taken
//! before any of the state locks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::hashes::Hash;
use bitcoin::{Address, BlockHash, Network, NetworkKind, OutPoint, PrivateKey, PubkeyHash};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::keystore::KeyDerivationWallet;
use super::registry::AddressRegistry;
use crate::chain::{ClientNotifier, CurrentBlockProvider, NodeNotifier};
use crate::error::{Result, WalletError};
use crate::ledger::{TxLedger, UtxoLedger};
use crate::storage::{AccountSnapshot, PersistenceGateway};
use crate::types::{
    BlockStamp, DirtyFlags, ReceiveRecord, SendRecord, TxDetail, TxRecord, Utxo,
};

/// Collaborators shared by every account in the process
pub struct WalletContext {
    pub registry: AddressRegistry,
    pub chain: Arc<dyn CurrentBlockProvider>,
    pub node: Arc<dyn NodeNotifier>,
    pub clients: Arc<dyn ClientNotifier>,
    pub store: Arc<dyn PersistenceGateway>,
}

impl WalletContext {
    pub fn new(
        chain: Arc<dyn CurrentBlockProvider>,
        node: Arc<dyn NodeNotifier>,
        clients: Arc<dyn ClientNotifier>,
        store: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            registry: AddressRegistry::new(),
            chain,
            node,
            clients,
            store,
        }
    }
}

struct AccountState {
    wallet: Box<dyn KeyDerivationWallet>,
    dirty: bool,
    full_rescan: bool,
    unlocked_until: Option<Instant>,
}

struct Tracked<T> {
    dirty: bool,
    data: T,
}

impl<T> Tracked<T> {
    fn new(data: T, dirty: bool) -> Self {
        Self { dirty, data }
    }
}

type AllGuards<'a> = (
    MutexGuard<'a, AccountState>,
    RwLockWriteGuard<'a, Tracked<UtxoLedger>>,
    RwLockWriteGuard<'a, Tracked<TxLedger>>,
);

pub struct Account {
    name: String,
    network: Network,
    state: Mutex<AccountState>,
    utxos: RwLock<Tracked<UtxoLedger>>,
    txs: RwLock<Tracked<TxLedger>>,
    /// Held from snapshot to end of write so snapshots reach storage in order
    flush: Mutex<()>,
    ctx: Arc<WalletContext>,
}

impl Account {
    /// A brand new account; everything is dirty until the first flush
    pub fn new(name: &str, wallet: Box<dyn KeyDerivationWallet>, ctx: Arc<WalletContext>) -> Self {
        Self::build(name, wallet, UtxoLedger::new(), TxLedger::new(), true, ctx)
    }

    /// An account loaded from storage, clean
    pub fn restore(
        name: &str,
        wallet: Box<dyn KeyDerivationWallet>,
        utxos: UtxoLedger,
        txs: TxLedger,
        ctx: Arc<WalletContext>,
    ) -> Self {
        Self::build(name, wallet, utxos, txs, false, ctx)
    }

    fn build(
        name: &str,
        wallet: Box<dyn KeyDerivationWallet>,
        utxos: UtxoLedger,
        txs: TxLedger,
        dirty: bool,
        ctx: Arc<WalletContext>,
    ) -> Self {
        let network = wallet.network();
        Self {
            name: name.to_string(),
            network,
            state: Mutex::new(AccountState {
                wallet,
                dirty,
                full_rescan: false,
                unlocked_until: None,
            }),
            utxos: RwLock::new(Tracked::new(utxos, dirty)),
            txs: RwLock::new(Tracked::new(txs, dirty)),
            flush: Mutex::new(()),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> Network {
        self.network
    }

    // ------------------------------------------------------------------
    // Lock ordering
    // ------------------------------------------------------------------

    fn lock_all(&self) -> AllGuards<'_> {
        let state = self.state.lock();
        let utxos = self.utxos.write();
        let txs = self.txs.write();
        (state, utxos, txs)
    }

    fn lock_ledgers(
        &self,
    ) -> (
        RwLockWriteGuard<'_, Tracked<UtxoLedger>>,
        RwLockWriteGuard<'_, Tracked<TxLedger>>,
    ) {
        let utxos = self.utxos.write();
        let txs = self.txs.write();
        (utxos, txs)
    }

    fn lock_account_and_txs(
        &self,
    ) -> (MutexGuard<'_, AccountState>, RwLockReadGuard<'_, Tracked<TxLedger>>) {
        let state = self.state.lock();
        let txs = self.txs.read();
        (state, txs)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn dirty_flags(&self) -> DirtyFlags {
        let (state, utxos, txs) = self.lock_all();
        DirtyFlags {
            wallet: state.dirty,
            utxos: utxos.dirty,
            transactions: txs.dirty,
        }
    }

    /// Write every dirty part of the account to storage.
    ///
    /// Flags are cleared while the snapshot is taken and raised again if the
    /// write fails, so a later mutation retries the flush.
    pub fn write_dirty(&self) -> Result<()> {
        let _flush = self.flush.lock();
        let snapshot = self.take_snapshot()?;
        if snapshot.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.ctx.store.flush(&self.name, &snapshot) {
            self.raise_dirty(snapshot.flags());
            return Err(e.into());
        }
        Ok(())
    }

    fn take_snapshot(&self) -> Result<AccountSnapshot> {
        let (mut state, mut utxos, mut txs) = self.lock_all();
        let mut snapshot = AccountSnapshot::default();

        if state.dirty {
            snapshot.wallet = Some(state.wallet.to_bytes()?);
            state.dirty = false;
        }
        if utxos.dirty {
            snapshot.utxos = Some(utxos.data.to_vec());
            utxos.dirty = false;
        }
        if txs.dirty {
            snapshot.transactions = Some(txs.data.to_vec());
            txs.dirty = false;
        }
        Ok(snapshot)
    }

    fn raise_dirty(&self, flags: DirtyFlags) {
        let (mut state, mut utxos, mut txs) = self.lock_all();
        state.dirty |= flags.wallet;
        utxos.dirty |= flags.utxos;
        txs.dirty |= flags.transactions;
    }

    fn flush_logged(&self) {
        if let Err(e) = self.write_dirty() {
            log::error!("Cannot sync dirty account '{}': {}", self.name, e);
        }
    }

    // ------------------------------------------------------------------
    // Lock state
    // ------------------------------------------------------------------

    /// Applies an expired unlock timeout before answering
    pub fn is_locked(&self) -> bool {
        self.with_key_material(|state| Ok(state.wallet.is_locked()))
            .unwrap_or(true)
    }

    pub fn lock(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.wallet.lock()?;
            state.unlocked_until = None;
        }
        self.ctx.clients.wallet_lock_state_changed(&self.name, true);
        Ok(())
    }

    /// Unlock the keystore for `timeout`; the account relocks lazily once it passes
    pub fn unlock(&self, passphrase: &[u8], timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.wallet.unlock(passphrase)?;
            state.unlocked_until = Instant::now().checked_add(timeout);
        }
        self.ctx.clients.wallet_lock_state_changed(&self.name, false);
        Ok(())
    }

    fn relock_if_expired(state: &mut AccountState) -> bool {
        match state.unlocked_until {
            Some(until) if Instant::now() >= until => {
                state.unlocked_until = None;
                if let Err(e) = state.wallet.lock() {
                    log::warn!("Failed to relock wallet after timeout: {}", e);
                    return false;
                }
                true
            }
            _ => false,
        }
    }

    /// Run `f` with the keystore after applying any expired unlock timeout
    fn with_key_material<R>(&self, f: impl FnOnce(&mut AccountState) -> Result<R>) -> Result<R> {
        let (relocked, result) = {
            let mut state = self.state.lock();
            let relocked = Self::relock_if_expired(&mut state);
            (relocked, f(&mut state))
        };
        if relocked {
            log::warn!("Unlock timeout expired for account '{}'", self.name);
            self.ctx.clients.wallet_lock_state_changed(&self.name, true);
        }
        result
    }

    // ------------------------------------------------------------------
    // Chain events
    // ------------------------------------------------------------------

    /// Drop ledger entries that are not on the chain ending at `(height, hash)`.
    ///
    /// Returns whether any ledger changed.
    pub fn rollback(&self, height: i32, hash: &BlockHash) -> bool {
        let modified = {
            let (mut state, mut utxos, mut txs) = self.lock_all();

            let utxos_changed = utxos.data.rollback(height, hash);
            utxos.dirty |= utxos_changed;

            let txs_changed = txs.data.rollback(height, hash);
            txs.dirty |= txs_changed;

            let synced = state.wallet.synced_with();
            if synced.height > height {
                state.wallet.set_synced_with(BlockStamp::new(height, *hash));
                state.dirty = true;
            } else if synced.height == height && synced.hash != *hash {
                // The synced block itself was replaced; its parent hash is not
                // known here, so only the height is kept for the next rescan
                state
                    .wallet
                    .set_synced_with(BlockStamp::new(height - 1, BlockHash::all_zeros()));
                state.dirty = true;
            }
            utxos_changed || txs_changed
        };

        if modified {
            log::info!(
                "Rolled back account '{}' to block {} ({})",
                self.name,
                height,
                hash
            );
        }
        self.flush_logged();
        modified
    }

    /// Record the best block this account has processed; persisted by the next flush
    pub fn block_connected(&self, bs: BlockStamp) {
        let mut state = self.state.lock();
        state.wallet.set_synced_with(bs);
        state.dirty = true;
    }

    /// Apply a received output. Returns `true` if the output was not known before.
    pub fn record_receive(&self, record: ReceiveRecord) -> Result<bool> {
        let utxo = Utxo::from(&record);
        let outpoint = utxo.outpoint;

        let is_new = {
            let (mut utxos, mut txs) = self.lock_ledgers();
            let is_new = utxos.data.insert(utxo)?;
            utxos.dirty = true;
            txs.data.push(TxRecord::Receive(record));
            txs.dirty = true;
            is_new
        };

        if is_new {
            self.request_spent_notification(&outpoint);
        }
        self.flush_logged();
        Ok(is_new)
    }

    /// Apply a transaction sent from this account and remove the outputs it spent
    pub fn record_send(&self, record: SendRecord, spent: &[OutPoint]) {
        {
            let (mut utxos, mut txs) = self.lock_ledgers();
            let removed = spent
                .iter()
                .filter(|op| utxos.data.spend(op).is_some())
                .count();
            utxos.dirty |= removed > 0;
            txs.data.push(TxRecord::Send(record));
            txs.dirty = true;
        }
        self.flush_logged();
    }

    /// Remove outputs reported spent. Returns how many were held.
    pub fn record_spent_outputs(&self, spent: &[OutPoint]) -> usize {
        let removed = {
            let mut utxos = self.utxos.write();
            let removed = spent
                .iter()
                .filter(|op| utxos.data.spend(op).is_some())
                .count();
            utxos.dirty |= removed > 0;
            removed
        };
        if removed > 0 {
            self.flush_logged();
        }
        removed
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    /// Best known height, or `None` when the chain state is unknown
    fn best_height(&self) -> Option<i32> {
        match self.ctx.chain.current_block() {
            Ok(bs) if bs.is_known() => Some(bs.height),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Current block unavailable: {}", e);
                None
            }
        }
    }

    fn require_best_height(&self) -> Result<i32> {
        self.best_height()
            .ok_or_else(|| WalletError::unavailable("best block height unknown"))
    }

    /// Spendable balance in satoshis with at least `confirmations` confirmations.
    ///
    /// Returns 0 when the best block is unknown.
    pub fn calculate_balance(&self, confirmations: u32) -> u64 {
        let Some(best) = self.best_height() else {
            log::warn!(
                "Balance of account '{}' requested with unknown chain state",
                self.name
            );
            return 0;
        };
        self.utxos.read().data.balance(best, confirmations)
    }

    pub fn calculate_address_balance(&self, address: &Address, confirmations: u32) -> u64 {
        let Some(hash) = address.pubkey_hash() else {
            return 0;
        };
        let Some(best) = self.best_height() else {
            log::warn!(
                "Balance of {} requested with unknown chain state",
                address
            );
            return 0;
        };
        self.utxos
            .read()
            .data
            .address_balance(&hash, best, confirmations)
    }

    /// Whether any recorded transaction pays to `address`
    pub fn address_used(&self, address: &Address) -> bool {
        match address.pubkey_hash() {
            Some(hash) => self.txs.read().data.address_used(&hash),
            None => false,
        }
    }

    pub fn utxos(&self) -> Vec<Utxo> {
        self.utxos.read().data.to_vec()
    }

    pub fn transactions(&self) -> Vec<TxRecord> {
        self.txs.read().data.to_vec()
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Up to `count` records, newest first, skipping the `from` newest
    pub fn list_transactions(&self, from: usize, count: usize) -> Result<Vec<TxDetail>> {
        let best = self.require_best_height()?;
        Ok(self
            .txs
            .read()
            .data
            .list_recent(&self.name, best, self.network, from, count))
    }

    /// Receive activity for any of `hashes`, oldest first
    pub fn list_address_transactions(
        &self,
        hashes: &HashSet<PubkeyHash>,
    ) -> Result<Vec<TxDetail>> {
        let best = self.require_best_height()?;
        Ok(self
            .txs
            .read()
            .data
            .list_for_addresses(&self.name, best, self.network, hashes))
    }

    pub fn list_all_transactions(&self) -> Result<Vec<TxDetail>> {
        let best = self.require_best_height()?;
        Ok(self
            .txs
            .read()
            .data
            .list_all(&self.name, best, self.network))
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    /// The last issued address, or a fresh one if it already received funds
    pub fn current_address(&self) -> Result<Address> {
        let (mut state, txs) = self.lock_account_and_txs();
        let last = state.wallet.last_chained_address();
        let used = last
            .pubkey_hash()
            .map_or(false, |hash| txs.data.address_used(&hash));
        drop(txs);

        if !used {
            return Ok(last);
        }

        // Issued while still holding the account lock so concurrent callers
        // observe the advanced frontier instead of advancing it twice.
        let address = self.issue_address(&mut state)?;
        drop(state);

        self.finish_address_issue(&address);
        Ok(address)
    }

    pub fn new_address(&self) -> Result<Address> {
        let address = {
            let mut state = self.state.lock();
            self.issue_address(&mut state)?
        };
        self.finish_address_issue(&address);
        Ok(address)
    }

    fn issue_address(&self, state: &mut AccountState) -> Result<Address> {
        let bs = self.ctx.chain.current_block()?;
        let address = state.wallet.next_chained_address(&bs)?;
        state.dirty = true;
        log::info!(
            "Issued address {} for account '{}' at height {}",
            address,
            self.name,
            bs.height
        );
        Ok(address)
    }

    fn finish_address_issue(&self, address: &Address) {
        self.flush_logged();
        self.ctx.registry.mark(&address.to_string(), &self.name);
        self.request_tx_notifications_for(address);
    }

    /// Import a WIF private key; optionally rescan the whole chain for it
    pub fn import_private_key(&self, wif: &str, rescan: bool) -> Result<Address> {
        let key =
            PrivateKey::from_wif(wif).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        if key.network != NetworkKind::from(self.network) {
            return Err(WalletError::NetworkMismatch {
                key: format!("{:?}", key.network),
                account: self.network.to_string(),
            });
        }

        // No record of when the key first mattered, so it is born at genesis
        let birth = BlockStamp::genesis();
        let address = self.with_key_material(|state| {
            let address = state.wallet.import_private_key(key, &birth)?;
            state.dirty = true;
            Ok(address)
        })?;

        self.flush_logged();
        self.ctx.registry.mark(&address.to_string(), &self.name);
        log::info!("Imported payment address {}", address);
        self.request_tx_notifications_for(&address);

        if rescan {
            let addresses = HashSet::from([address.to_string()]);
            self.request_rescan(birth.height, &addresses);
            self.flush_logged();
        }
        Ok(address)
    }

    pub fn dump_private_keys(&self) -> Result<Vec<String>> {
        self.with_key_material(|state| {
            state
                .wallet
                .active_addresses()
                .iter()
                .map(|info| {
                    let mut key = state.wallet.address_key(&info.address)?;
                    key.compressed = info.compressed;
                    Ok(key.to_wif())
                })
                .collect()
        })
    }

    pub fn dump_wif_private_key(&self, address: &Address) -> Result<String> {
        self.with_key_material(|state| {
            let mut key = state.wallet.address_key(address)?;
            key.compressed = state.wallet.address_info(address)?.compressed;
            Ok(key.to_wif())
        })
    }

    /// Encoded active addresses in issuance order
    pub fn sorted_active_payment_addresses(&self) -> Vec<String> {
        self.state
            .lock()
            .wallet
            .active_addresses()
            .iter()
            .map(|info| info.address.to_string())
            .collect()
    }

    pub fn active_payment_addresses(&self) -> HashSet<String> {
        self.sorted_active_payment_addresses().into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Node peer coordination
    // ------------------------------------------------------------------

    pub fn set_full_rescan(&self, full: bool) {
        self.state.lock().full_rescan = full;
    }

    pub fn full_rescan_requested(&self) -> bool {
        self.state.lock().full_rescan
    }

    pub fn synced_with(&self) -> BlockStamp {
        self.state.lock().wallet.synced_with()
    }

    /// Ask the node peer for transactions paying to `address` (P2PKH only)
    pub fn request_tx_notifications_for(&self, address: &Address) {
        if address.pubkey_hash().is_none() {
            return;
        }
        log::debug!("Requesting notifications of TXs sending to address {}", address);
        if let Err(e) = self.ctx.node.request_tx_notifications(&[address.to_string()]) {
            log::error!("Unable to request transaction updates for {}: {}", address, e);
        }
    }

    fn request_spent_notification(&self, outpoint: &OutPoint) {
        log::debug!(
            "Requesting spent UTXO notifications for outpoint {}",
            outpoint
        );
        if let Err(e) = self.ctx.node.request_spent_output_notification(outpoint) {
            log::error!("Unable to request spent notification for {}: {}", outpoint, e);
        }
    }

    fn request_rescan(&self, from_height: i32, addresses: &HashSet<String>) -> bool {
        match self.ctx.node.request_rescan(from_height, addresses) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Unable to request rescan for account '{}' from height {}: {}",
                    self.name,
                    from_height,
                    e
                );
                false
            }
        }
    }

    /// Re-establish the node peer's subscriptions for this account
    pub fn track(&self) {
        let addresses = self.sorted_active_payment_addresses();
        if let Err(e) = self.ctx.node.request_tx_notifications(&addresses) {
            log::error!(
                "Unable to request transaction updates for account '{}': {}",
                self.name,
                e
            );
        }

        let outpoints = self.utxos.read().data.outpoints();
        for outpoint in &outpoints {
            self.request_spent_notification(outpoint);
        }
    }

    /// Ask the node peer to rescan every active address. Returns the start height.
    pub fn rescan_active_addresses(&self) -> i32 {
        let (begin, addresses, full) = {
            let state = self.state.lock();
            let begin = if state.full_rescan {
                let height = state.wallet.earliest_block_height();
                log::debug!(
                    "Rescanning account '{}' for new transactions since block height {}",
                    self.name,
                    height
                );
                height
            } else {
                let bs = state.wallet.synced_with();
                log::debug!(
                    "Rescanning account '{}' for new transactions after block height {} hash {}",
                    self.name,
                    bs.height,
                    bs.hash
                );
                bs.height + 1
            };
            let addresses: HashSet<String> = state
                .wallet
                .active_addresses()
                .iter()
                .map(|info| info.address.to_string())
                .collect();
            (begin, addresses, state.full_rescan)
        };

        if self.request_rescan(begin, &addresses) && full {
            self.state.lock().full_rescan = false;
        }
        self.flush_logged();
        begin
    }
}
