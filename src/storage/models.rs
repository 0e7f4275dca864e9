//! Data handed to the persistence layer

use crate::types::{DirtyFlags, TxRecord, Utxo};

/// Everything that was dirty at the moment a flush was prepared.
///
/// `None` means that part of the account was clean and is not rewritten.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    /// Opaque keystore payload
    pub wallet: Option<Vec<u8>>,
    pub utxos: Option<Vec<Utxo>>,
    pub transactions: Option<Vec<TxRecord>>,
}

impl AccountSnapshot {
    pub fn flags(&self) -> DirtyFlags {
        DirtyFlags {
            wallet: self.wallet.is_some(),
            utxos: self.utxos.is_some(),
            transactions: self.transactions.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.flags().any()
    }
}
