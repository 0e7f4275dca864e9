use std::collections::HashSet;

use bitcoin::{BlockHash, Network, PubkeyHash};

use crate::types::{detached_by, TxDetail, TxRecord};

/// Transaction history of one account, in observation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxLedger {
    records: Vec<TxRecord>,
}

impl TxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(records: Vec<TxRecord>) -> Self {
        Self { records }
    }

    pub fn to_vec(&self) -> Vec<TxRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TxRecord> {
        self.records.iter()
    }

    /// Append a record. A record for an event already in the ledger only has
    /// its block location refreshed, and `false` is returned.
    pub fn push(&mut self, record: TxRecord) -> bool {
        if let Some(existing) = self.records.iter_mut().find(|r| r.same_event(&record)) {
            existing.set_block(record.height(), record.block_hash().copied());
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn rollback(&mut self, height: i32, hash: &BlockHash) -> bool {
        let before = self.records.len();
        self.records
            .retain(|r| !detached_by(r.height(), r.block_hash(), height, hash));
        before != self.records.len()
    }

    /// Whether any receive record pays to `address_hash`
    pub fn address_used(&self, address_hash: &PubkeyHash) -> bool {
        self.records.iter().any(|r| match r {
            TxRecord::Receive(rx) => rx.receiver_hash == *address_hash,
            TxRecord::Send(_) => false,
        })
    }

    /// Most recent first: skips the `from` newest records, then expands `count` records
    pub fn list_recent(
        &self,
        account: &str,
        best_height: i32,
        network: Network,
        from: usize,
        count: usize,
    ) -> Vec<TxDetail> {
        self.records
            .iter()
            .rev()
            .skip(from)
            .take(count)
            .flat_map(|r| r.details(account, best_height, network))
            .collect()
    }

    pub fn list_all(&self, account: &str, best_height: i32, network: Network) -> Vec<TxDetail> {
        self.records
            .iter()
            .rev()
            .flat_map(|r| r.details(account, best_height, network))
            .collect()
    }

    /// Receive records paying to any of `hashes`, oldest first
    pub fn list_for_addresses(
        &self,
        account: &str,
        best_height: i32,
        network: Network,
        hashes: &HashSet<PubkeyHash>,
    ) -> Vec<TxDetail> {
        self.records
            .iter()
            .filter(|r| match r {
                TxRecord::Receive(rx) => hashes.contains(&rx.receiver_hash),
                TxRecord::Send(_) => false,
            })
            .flat_map(|r| r.details(account, best_height, network))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, ReceiveRecord, SendOutput, SendRecord, MEMPOOL_HEIGHT};
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;
    use chrono::Utc;

    fn receive(n: u8, addr: u8, height: i32) -> TxRecord {
        TxRecord::Receive(ReceiveRecord {
            txid: Txid::from_byte_array([n; 32]),
            vout: 0,
            receiver_hash: PubkeyHash::from_byte_array([addr; 20]),
            amount: u64::from(n) * 100,
            height,
            block_hash: (height != MEMPOOL_HEIGHT).then(|| BlockHash::from_byte_array([height as u8; 32])),
            received_at: Utc::now(),
        })
    }

    fn send(n: u8, outputs: usize, height: i32) -> TxRecord {
        TxRecord::Send(SendRecord {
            txid: Txid::from_byte_array([n; 32]),
            outputs: (0..outputs)
                .map(|i| SendOutput {
                    address_hash: PubkeyHash::from_byte_array([0x50 + i as u8; 20]),
                    amount: 10,
                })
                .collect(),
            fee: 1,
            height,
            block_hash: Some(BlockHash::from_byte_array([height as u8; 32])),
            sent_at: Utc::now(),
        })
    }

    fn five_receives() -> TxLedger {
        TxLedger::from_vec((1..=5).map(|n| receive(n, n, i32::from(n))).collect())
    }

    #[test]
    fn test_list_recent_reverse_order() {
        let ledger = five_receives();
        let rows = ledger.list_recent("acct", 10, Network::Regtest, 0, 3);
        let txids: Vec<_> = rows.iter().map(|r| r.txid).collect();
        assert_eq!(
            txids,
            vec![
                Txid::from_byte_array([5; 32]),
                Txid::from_byte_array([4; 32]),
                Txid::from_byte_array([3; 32]),
            ]
        );
    }

    #[test]
    fn test_list_recent_with_offset() {
        let ledger = five_receives();
        let rows = ledger.list_recent("acct", 10, Network::Regtest, 3, 10);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].txid, Txid::from_byte_array([2; 32]));
        assert_eq!(rows[1].txid, Txid::from_byte_array([1; 32]));
    }

    #[test]
    fn test_list_all_expands_sends() {
        let mut ledger = five_receives();
        ledger.push(send(6, 3, 6));
        let rows = ledger.list_all("acct", 10, Network::Regtest);
        assert_eq!(rows.len(), 8);
        assert!(rows[..3].iter().all(|r| r.category == Category::Send));
        assert_eq!(rows.last().unwrap().txid, Txid::from_byte_array([1; 32]));
    }

    #[test]
    fn test_list_for_addresses_forward_order() {
        let mut ledger = five_receives();
        ledger.push(send(7, 1, 7));
        ledger.push(receive(8, 2, 8));

        let wanted: HashSet<_> = [2u8, 4]
            .iter()
            .map(|b| PubkeyHash::from_byte_array([*b; 20]))
            .collect();
        let rows = ledger.list_for_addresses("acct", 10, Network::Regtest, &wanted);
        let txids: Vec<_> = rows.iter().map(|r| r.txid).collect();
        assert_eq!(
            txids,
            vec![
                Txid::from_byte_array([2; 32]),
                Txid::from_byte_array([4; 32]),
                Txid::from_byte_array([8; 32]),
            ]
        );
    }

    #[test]
    fn test_address_used_ignores_sends() {
        let mut ledger = TxLedger::new();
        ledger.push(send(1, 2, 3));
        assert!(!ledger.address_used(&PubkeyHash::from_byte_array([0x50; 20])));
        ledger.push(receive(2, 0x50, 4));
        assert!(ledger.address_used(&PubkeyHash::from_byte_array([0x50; 20])));
    }

    #[test]
    fn test_push_refreshes_existing_event() {
        let mut ledger = TxLedger::new();
        assert!(ledger.push(receive(1, 1, MEMPOOL_HEIGHT)));
        assert!(!ledger.push(receive(1, 1, 20)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().unwrap().height(), 20);
    }

    #[test]
    fn test_rollback_keeps_mempool_and_prefix() {
        let mut ledger = five_receives();
        ledger.push(receive(9, 9, MEMPOOL_HEIGHT));
        assert!(ledger.rollback(3, &BlockHash::from_byte_array([3; 32])));
        assert_eq!(ledger.len(), 4);
        assert!(!ledger.rollback(3, &BlockHash::from_byte_array([3; 32])));
    }
}
