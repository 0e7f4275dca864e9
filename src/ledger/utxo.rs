use bitcoin::{BlockHash, OutPoint, PubkeyHash};

use crate::error::WalletError;
use crate::types::{detached_by, Utxo};

/// Unspent outputs of one account, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoLedger {
    utxos: Vec<Utxo>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(utxos: Vec<Utxo>) -> Self {
        Self { utxos }
    }

    pub fn to_vec(&self) -> Vec<Utxo> {
        self.utxos.clone()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.iter()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.iter().find(|u| u.outpoint == *outpoint)
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.utxos.iter().map(|u| u.outpoint).collect()
    }

    /// Add an output, or refresh the block location of one already held.
    ///
    /// Returns `true` when the outpoint was not previously in the ledger.
    pub fn insert(&mut self, utxo: Utxo) -> Result<bool, WalletError> {
        if utxo.amount == 0 {
            return Err(WalletError::InvalidRecord(format!(
                "zero-value output {}",
                utxo.outpoint
            )));
        }

        if let Some(existing) = self.utxos.iter_mut().find(|u| u.outpoint == utxo.outpoint) {
            existing.height = utxo.height;
            existing.block_hash = utxo.block_hash;
            return Ok(false);
        }

        self.utxos.push(utxo);
        Ok(true)
    }

    /// Remove an output that was spent
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        let idx = self.utxos.iter().position(|u| u.outpoint == *outpoint)?;
        Some(self.utxos.remove(idx))
    }

    /// Drop every output that is not on the chain ending at `(height, hash)`.
    ///
    /// Returns whether the ledger changed.
    pub fn rollback(&mut self, height: i32, hash: &BlockHash) -> bool {
        let before = self.utxos.len();
        self.utxos
            .retain(|u| !detached_by(u.height, u.block_hash.as_ref(), height, hash));
        before != self.utxos.len()
    }

    /// Sum of outputs with at least `confirmations` confirmations at `best_height`.
    ///
    /// Zero confirmations includes mempool outputs.
    pub fn balance(&self, best_height: i32, confirmations: u32) -> u64 {
        self.sum_matching(best_height, confirmations, |_| true)
    }

    pub fn address_balance(
        &self,
        address_hash: &PubkeyHash,
        best_height: i32,
        confirmations: u32,
    ) -> u64 {
        self.sum_matching(best_height, confirmations, |u| {
            u.address_hash == *address_hash
        })
    }

    fn sum_matching<F>(&self, best_height: i32, confirmations: u32, filter: F) -> u64
    where
        F: Fn(&Utxo) -> bool,
    {
        self.utxos
            .iter()
            .filter(|u| {
                confirmations == 0
                    || (u.is_confirmed() && u.confirmations(best_height) >= confirmations)
            })
            .filter(|u| filter(u))
            .fold(0u64, |acc, u| acc.saturating_add(u.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MEMPOOL_HEIGHT;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn block(b: u8) -> BlockHash {
        BlockHash::from_byte_array([b; 32])
    }

    fn utxo(n: u8, addr: u8, amount: u64, height: i32) -> Utxo {
        Utxo {
            outpoint: OutPoint::new(Txid::from_byte_array([n; 32]), 0),
            address_hash: PubkeyHash::from_byte_array([addr; 20]),
            amount,
            height,
            block_hash: (height != MEMPOOL_HEIGHT).then(|| block(height as u8)),
        }
    }

    fn sample() -> UtxoLedger {
        UtxoLedger::from_vec(vec![
            utxo(1, 1, 1_000, 90),
            utxo(2, 1, 2_000, 99),
            utxo(3, 2, 4_000, 100),
            utxo(4, 2, 8_000, MEMPOOL_HEIGHT),
        ])
    }

    #[test]
    fn test_zero_confirmations_counts_everything() {
        let ledger = sample();
        assert_eq!(ledger.balance(100, 0), 15_000);
        // The tip does not matter when everything is included
        assert_eq!(ledger.balance(5, 0), 15_000);
    }

    #[test]
    fn test_confirmation_filter() {
        let ledger = sample();
        // Entry at the tip counts as one confirmation
        assert_eq!(ledger.balance(100, 1), 7_000);
        assert_eq!(ledger.balance(100, 2), 3_000);
        assert_eq!(ledger.balance(100, 11), 1_000);
        assert_eq!(ledger.balance(100, 12), 0);
    }

    #[test]
    fn test_address_balance() {
        let ledger = sample();
        let addr2 = PubkeyHash::from_byte_array([2; 20]);
        assert_eq!(ledger.address_balance(&addr2, 100, 0), 12_000);
        assert_eq!(ledger.address_balance(&addr2, 100, 1), 4_000);
        let unknown = PubkeyHash::from_byte_array([9; 20]);
        assert_eq!(ledger.address_balance(&unknown, 100, 0), 0);
    }

    #[test]
    fn test_insert_rejects_zero_and_dedupes() {
        let mut ledger = UtxoLedger::new();
        assert!(ledger.insert(utxo(1, 1, 0, 10)).is_err());

        assert!(ledger.insert(utxo(1, 1, 500, MEMPOOL_HEIGHT)).unwrap());
        assert!(!ledger.insert(utxo(1, 1, 500, 12)).unwrap());
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().unwrap().height, 12);
    }

    #[test]
    fn test_spend_removes_output() {
        let mut ledger = sample();
        let op = OutPoint::new(Txid::from_byte_array([2; 32]), 0);
        assert_eq!(ledger.spend(&op).map(|u| u.amount), Some(2_000));
        assert!(ledger.spend(&op).is_none());
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_rollback_removes_detached_blocks() {
        let mut ledger = sample();
        // Chain stays valid through block 98; blocks 99 and 100 are gone
        assert!(ledger.rollback(98, &block(98)));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.balance(98, 0), 9_000);

        // Idempotent
        let once = ledger.clone();
        assert!(!ledger.rollback(98, &block(98)));
        assert_eq!(ledger, once);
    }

    #[test]
    fn test_rollback_same_height_different_hash() {
        let mut ledger = sample();
        // Block 100 replaced by a competing block at the same height
        assert!(ledger.rollback(100, &block(0xaa)));
        assert!(ledger.get(&OutPoint::new(Txid::from_byte_array([3; 32]), 0)).is_none());
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_rollback_noop_cases() {
        let mut empty = UtxoLedger::new();
        assert!(!empty.rollback(0, &block(0)));

        let mut ledger = sample();
        assert!(!ledger.rollback(100, &block(100)));
        assert!(!ledger.rollback(250, &block(7)));
        assert_eq!(ledger.len(), 4);
    }
}
