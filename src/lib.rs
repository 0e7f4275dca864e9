//! Wallet Ledger: per-account wallet state for a Bitcoin wallet backend
//!
//! This crate keeps, for every account, the unspent outputs and transaction
//! history relevant to its addresses, derived from chain events reported by a
//! node peer. It serves balance and history queries, issues and imports
//! addresses, and persists dirty state through a pluggable gateway.
//!
//! # Architecture
//!
//! - **Account**: keystore plus UTXO and transaction ledgers behind ordered locks
//! - **AddressRegistry**: process-wide address to account routing table
//! - **AccountManager**: owns open accounts and routes chain events to them
//! - **Seams**: `CurrentBlockProvider`, `NodeNotifier`, `ClientNotifier`,
//!   `PersistenceGateway` are implemented by the surrounding service
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wallet_ledger::{AccountManager, ChainTip, FileStore, HdKeystore, WalletConfig, WalletContext};
//!
//! let config = WalletConfig::from_env();
//! let store = Arc::new(FileStore::from_config(&config));
//! let ctx = Arc::new(WalletContext::new(
//!     Arc::new(ChainTip::new()),
//!     node_peer,
//!     clients,
//!     store.clone(),
//! ));
//!
//! let manager = AccountManager::new(ctx);
//! let (keystore, mnemonic) = HdKeystore::generate(b"passphrase", config.network, tip)?;
//! let account = manager.create("default", Box::new(keystore))?;
//! let address = account.current_address()?;
//! ```

// Public modules
pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod storage;
pub mod types;
pub mod wallet;

// Re-exports for convenience
pub use chain::{ChainTip, ClientNotifier, CurrentBlockProvider, NodeNotifier};
pub use config::WalletConfig;
pub use error::{Result, StorageError, WalletError};
pub use ledger::{TxLedger, UtxoLedger};
pub use manager::AccountManager;
pub use storage::{AccountSnapshot, FileStore, PersistenceGateway};
pub use types::{
    BlockStamp, Category, DirtyFlags, ReceiveRecord, SendOutput, SendRecord, TxDetail, TxRecord,
    Utxo, MEMPOOL_HEIGHT, UNKNOWN_HEIGHT,
};
pub use wallet::{
    Account, AddressInfo, AddressRegistry, HdKeystore, KeyDerivationWallet, WalletContext,
};
