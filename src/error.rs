//! Error types for account ledger operations
//!
//! `WalletError` covers everything an account operation can report.
//! Persistence and node-notification failures are also represented here,
//! but account operations only log them: in-memory state stays authoritative.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    /// Registry or account-map lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// The best block height is not known
    #[error("Chain state unavailable: {0}")]
    Unavailable(String),

    #[error("Wrong network: key targets {key}, account uses {account}")]
    NetworkMismatch { key: String, account: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Wallet is locked")]
    Locked,

    #[error("Incorrect passphrase")]
    WrongPassphrase,

    #[error("Key already in wallet: {0}")]
    DuplicateKey(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Bitcoin error: {0}")]
    Bitcoin(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

impl WalletError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
