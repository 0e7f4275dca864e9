//! Per-account ledgers
//!
//! - `utxo.rs` - unspent outputs, rollback and balance filters
//! - `tx.rs` - transaction history and listing queries

mod tx;
mod utxo;

pub use tx::TxLedger;
pub use utxo::UtxoLedger;
