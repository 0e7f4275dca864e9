//! Ledger data model
//!
//! Block stamps, unspent outputs, transaction records and the detail rows
//! produced by history queries.

use bitcoin::hashes::Hash;
use bitcoin::{Address, BlockHash, Network, OutPoint, PubkeyHash, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Height sentinel for "no reliable current block"
pub const UNKNOWN_HEIGHT: i32 = -1;

/// Height of an output or record seen in the mempool but not yet in a block
pub const MEMPOOL_HEIGHT: i32 = -1;

/// A point in the best chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub height: i32,
    pub hash: BlockHash,
}

impl BlockStamp {
    pub fn new(height: i32, hash: BlockHash) -> Self {
        Self { height, hash }
    }

    pub fn unknown() -> Self {
        Self {
            height: UNKNOWN_HEIGHT,
            hash: BlockHash::all_zeros(),
        }
    }

    /// Height 0 with no hash, used as the birth stamp of keys with no known history
    pub fn genesis() -> Self {
        Self {
            height: 0,
            hash: BlockHash::all_zeros(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.height != UNKNOWN_HEIGHT
    }
}

/// Number of confirmations for something included at `height` when the best block is `best`
pub fn confirmations(height: i32, best: i32) -> u32 {
    if height == MEMPOOL_HEIGHT {
        return 0;
    }
    let depth = i64::from(best) - i64::from(height) + 1;
    depth.clamp(0, i64::from(u32::MAX)) as u32
}

/// Whether an entry located at `(height, block_hash)` falls off a chain that
/// remains valid up to and including `(tip_height, tip_hash)`
pub(crate) fn detached_by(
    height: i32,
    block_hash: Option<&BlockHash>,
    tip_height: i32,
    tip_hash: &BlockHash,
) -> bool {
    if height == MEMPOOL_HEIGHT {
        return false;
    }
    if height > tip_height {
        return true;
    }
    height == tip_height && block_hash.map_or(false, |h| h != tip_hash)
}

/// Unspent output owned by one of the account's addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub address_hash: PubkeyHash,
    /// Amount in satoshis, always non-zero
    pub amount: u64,
    /// Block height, or `MEMPOOL_HEIGHT`
    pub height: i32,
    #[serde(default)]
    pub block_hash: Option<BlockHash>,
}

impl Utxo {
    pub fn is_confirmed(&self) -> bool {
        self.height != MEMPOOL_HEIGHT
    }

    pub fn confirmations(&self, best_height: i32) -> u32 {
        confirmations(self.height, best_height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveRecord {
    pub txid: Txid,
    pub vout: u32,
    pub receiver_hash: PubkeyHash,
    pub amount: u64,
    pub height: i32,
    #[serde(default)]
    pub block_hash: Option<BlockHash>,
    pub received_at: DateTime<Utc>,
}

impl From<&ReceiveRecord> for Utxo {
    fn from(record: &ReceiveRecord) -> Self {
        Utxo {
            outpoint: OutPoint::new(record.txid, record.vout),
            address_hash: record.receiver_hash,
            amount: record.amount,
            height: record.height,
            block_hash: record.block_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutput {
    pub address_hash: PubkeyHash,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    pub txid: Txid,
    pub outputs: Vec<SendOutput>,
    pub fee: u64,
    pub height: i32,
    #[serde(default)]
    pub block_hash: Option<BlockHash>,
    pub sent_at: DateTime<Utc>,
}

impl SendRecord {
    /// Total sent across all outputs, fee excluded
    pub fn amount(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, out| acc.saturating_add(out.amount))
    }
}

/// A historical transaction relevant to the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TxRecord {
    Receive(ReceiveRecord),
    Send(SendRecord),
}

impl TxRecord {
    pub fn txid(&self) -> &Txid {
        match self {
            TxRecord::Receive(r) => &r.txid,
            TxRecord::Send(s) => &s.txid,
        }
    }

    pub fn height(&self) -> i32 {
        match self {
            TxRecord::Receive(r) => r.height,
            TxRecord::Send(s) => s.height,
        }
    }

    pub fn block_hash(&self) -> Option<&BlockHash> {
        match self {
            TxRecord::Receive(r) => r.block_hash.as_ref(),
            TxRecord::Send(s) => s.block_hash.as_ref(),
        }
    }

    pub(crate) fn set_block(&mut self, height: i32, block_hash: Option<BlockHash>) {
        match self {
            TxRecord::Receive(r) => {
                r.height = height;
                r.block_hash = block_hash;
            }
            TxRecord::Send(s) => {
                s.height = height;
                s.block_hash = block_hash;
            }
        }
    }

    /// Whether both records describe the same ledger event
    pub(crate) fn same_event(&self, other: &TxRecord) -> bool {
        match (self, other) {
            (TxRecord::Receive(a), TxRecord::Receive(b)) => a.txid == b.txid && a.vout == b.vout,
            (TxRecord::Send(a), TxRecord::Send(b)) => a.txid == b.txid,
            _ => false,
        }
    }

    /// Expand into detail rows: one per send output, exactly one per receive
    pub fn details(&self, account: &str, best_height: i32, network: Network) -> Vec<TxDetail> {
        match self {
            TxRecord::Receive(r) => vec![TxDetail {
                account: account.to_string(),
                category: Category::Receive,
                address: encode_address(r.receiver_hash, network),
                amount: r.amount,
                fee: None,
                txid: r.txid,
                vout: Some(r.vout),
                block_height: block_height(r.height),
                block_hash: r.block_hash,
                confirmations: confirmations(r.height, best_height),
                time: r.received_at,
            }],
            TxRecord::Send(s) => s
                .outputs
                .iter()
                .map(|out| TxDetail {
                    account: account.to_string(),
                    category: Category::Send,
                    address: encode_address(out.address_hash, network),
                    amount: out.amount,
                    fee: Some(s.fee),
                    txid: s.txid,
                    vout: None,
                    block_height: block_height(s.height),
                    block_hash: s.block_hash,
                    confirmations: confirmations(s.height, best_height),
                    time: s.sent_at,
                })
                .collect(),
        }
    }
}

fn block_height(height: i32) -> Option<i32> {
    (height != MEMPOOL_HEIGHT).then_some(height)
}

/// P2PKH encoding of a 20-byte key hash for the given network
pub fn encode_address(hash: PubkeyHash, network: Network) -> String {
    Address::p2pkh(hash, network).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Send,
    Receive,
}

/// One row of transaction history, as handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDetail {
    pub account: String,
    pub category: Category,
    pub address: String,
    pub amount: u64,
    pub fee: Option<u64>,
    pub txid: Txid,
    pub vout: Option<u32>,
    pub block_height: Option<i32>,
    pub block_hash: Option<BlockHash>,
    pub confirmations: u32,
    pub time: DateTime<Utc>,
}

/// Which parts of an account diverge from the last successful flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub wallet: bool,
    pub utxos: bool,
    pub transactions: bool,
}

impl DirtyFlags {
    pub fn any(&self) -> bool {
        self.wallet || self.utxos || self.transactions
    }
}
