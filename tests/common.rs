//! Common test utilities for account ledger integration tests
//!
//! This module provides shared test infrastructure including:
//! - Recording doubles for the node peer, clients and persistence
//! - Deterministic keystores and chain positions
//! - Record builders for receives and sends

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Once};

use bitcoin::hashes::Hash;
use bitcoin::{Address, BlockHash, Network, OutPoint, PubkeyHash, Txid};
use chrono::Utc;
use parking_lot::Mutex;
use wallet_ledger::{
    Account, AccountSnapshot, BlockStamp, ChainTip, ClientNotifier, HdKeystore, NodeNotifier,
    PersistenceGateway, ReceiveRecord, SendOutput, SendRecord, StorageError, WalletContext,
    WalletError,
};

pub const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const PASSPHRASE: &[u8] = b"hunter2";
pub const NETWORK: Network = Network::Regtest;

static INIT: Once = Once::new();

/// Load `.env` if present and route `log` output through the test harness
pub fn init_logging() {
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        env_logger::builder().is_test(true).try_init().ok();
    });
}

// ============================================================================
// Chain helpers
// ============================================================================

pub fn block_hash(height: i32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xb1;
    BlockHash::from_byte_array(bytes)
}

/// Hash of a competing block at `height`
pub fn fork_hash(height: i32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xf0;
    BlockHash::from_byte_array(bytes)
}

pub fn stamp(height: i32) -> BlockStamp {
    BlockStamp::new(height, block_hash(height))
}

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn hash_of(address: &Address) -> PubkeyHash {
    address.pubkey_hash().expect("test addresses are P2PKH")
}

/// Receive of `amount` to `address`; `height == -1` means mempool
pub fn receive(n: u8, vout: u32, address: &Address, amount: u64, height: i32) -> ReceiveRecord {
    ReceiveRecord {
        txid: txid(n),
        vout,
        receiver_hash: hash_of(address),
        amount,
        height,
        block_hash: (height >= 0).then(|| block_hash(height)),
        received_at: Utc::now(),
    }
}

pub fn send(n: u8, outputs: &[(PubkeyHash, u64)], fee: u64, height: i32) -> SendRecord {
    SendRecord {
        txid: txid(n),
        outputs: outputs
            .iter()
            .map(|(address_hash, amount)| SendOutput {
                address_hash: *address_hash,
                amount: *amount,
            })
            .collect(),
        fee,
        height,
        block_hash: (height >= 0).then(|| block_hash(height)),
        sent_at: Utc::now(),
    }
}

pub fn outpoint(n: u8, vout: u32) -> OutPoint {
    OutPoint::new(txid(n), vout)
}

// ============================================================================
// Recording doubles
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub tx_requests: Mutex<Vec<Vec<String>>>,
    pub spent_requests: Mutex<Vec<OutPoint>>,
    pub rescans: Mutex<Vec<(i32, HashSet<String>)>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), WalletError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WalletError::notification("node peer disconnected"));
        }
        Ok(())
    }

    pub fn requested_addresses(&self) -> Vec<String> {
        self.tx_requests.lock().iter().flatten().cloned().collect()
    }
}

impl NodeNotifier for RecordingNotifier {
    fn request_tx_notifications(&self, addresses: &[String]) -> Result<(), WalletError> {
        self.check()?;
        self.tx_requests.lock().push(addresses.to_vec());
        Ok(())
    }

    fn request_spent_output_notification(&self, outpoint: &OutPoint) -> Result<(), WalletError> {
        self.check()?;
        self.spent_requests.lock().push(*outpoint);
        Ok(())
    }

    fn request_rescan(
        &self,
        from_height: i32,
        addresses: &HashSet<String>,
    ) -> Result<(), WalletError> {
        self.check()?;
        self.rescans.lock().push((from_height, addresses.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClients {
    pub events: Mutex<Vec<(String, bool)>>,
}

impl ClientNotifier for RecordingClients {
    fn wallet_lock_state_changed(&self, account: &str, locked: bool) {
        self.events.lock().push((account.to_string(), locked));
    }
}

/// In-memory gateway that can be switched into a failing mode
#[derive(Default)]
pub struct MemoryStore {
    pub flushes: Mutex<Vec<(String, AccountSnapshot)>>,
    pub fail: AtomicBool,
}

impl MemoryStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().len()
    }
}

impl PersistenceGateway for MemoryStore {
    fn flush(&self, account: &str, snapshot: &AccountSnapshot) -> Result<(), StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.flushes
            .lock()
            .push((account.to_string(), snapshot.clone()));
        Ok(())
    }
}

/// Gateway whose first flush waits until the test releases it
pub struct GatedStore {
    pub inner: MemoryStore,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Option<Receiver<()>>>,
}

impl GatedStore {
    /// Returns the store, a receiver signalled when the first flush starts,
    /// and a sender that lets it continue
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Self {
            inner: MemoryStore::default(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        };
        (store, entered_rx, release_tx)
    }
}

impl PersistenceGateway for GatedStore {
    fn flush(&self, account: &str, snapshot: &AccountSnapshot) -> Result<(), StorageError> {
        let entered = self.entered.lock().take();
        if let Some(entered) = entered {
            entered.send(()).ok();
            let release = self.release.lock().take();
            if let Some(release) = release {
                release.recv().ok();
            }
        }
        self.inner.flush(account, snapshot)
    }
}

// ============================================================================
// Test environment
// ============================================================================

pub struct TestEnvironment {
    pub chain: Arc<ChainTip>,
    pub node: Arc<RecordingNotifier>,
    pub clients: Arc<RecordingClients>,
    pub store: Arc<MemoryStore>,
    pub ctx: Arc<WalletContext>,
}

impl TestEnvironment {
    /// Environment whose chain tip sits at `best_height`
    pub fn new(best_height: i32) -> Self {
        init_logging();
        let chain = Arc::new(ChainTip::with_block(stamp(best_height)));
        let node = Arc::new(RecordingNotifier::default());
        let clients = Arc::new(RecordingClients::default());
        let store = Arc::new(MemoryStore::default());
        let ctx = Arc::new(WalletContext::new(
            chain.clone(),
            node.clone(),
            clients.clone(),
            store.clone(),
        ));
        Self {
            chain,
            node,
            clients,
            store,
            ctx,
        }
    }

    pub fn keystore(&self, created_at: i32) -> HdKeystore {
        HdKeystore::from_mnemonic(MNEMONIC, PASSPHRASE, NETWORK, stamp(created_at))
            .expect("fixed mnemonic is valid")
    }

    /// Fresh account named `name`, born at height 100
    pub fn account(&self, name: &str) -> Account {
        Account::new(name, Box::new(self.keystore(100)), self.ctx.clone())
    }
}
