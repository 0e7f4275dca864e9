//! Seams to the chain-observing node peer and to connected clients
//!
//! The RPC transport lives outside this crate; accounts only see these traits.

use std::collections::HashSet;

use bitcoin::OutPoint;
use parking_lot::RwLock;

use crate::error::{Result, WalletError};
use crate::types::BlockStamp;

/// Source of the current best block
pub trait CurrentBlockProvider: Send + Sync {
    fn current_block(&self) -> Result<BlockStamp>;

    /// Called when the node peer reports a newly connected best block
    fn observe_block(&self, _bs: BlockStamp) {}
}

/// Outbound requests to the node peer
pub trait NodeNotifier: Send + Sync {
    /// Ask for notifications of transactions paying to `addresses`
    fn request_tx_notifications(&self, addresses: &[String]) -> Result<()>;

    /// Ask to be told when `outpoint` is spent
    fn request_spent_output_notification(&self, outpoint: &OutPoint) -> Result<()>;

    /// Ask for a rescan of `addresses` from `from_height` to the best block
    fn request_rescan(&self, from_height: i32, addresses: &HashSet<String>) -> Result<()>;
}

/// Fire-and-forget notifications to connected clients
pub trait ClientNotifier: Send + Sync {
    fn wallet_lock_state_changed(&self, account: &str, locked: bool);
}

/// Best block as last reported by the node peer
#[derive(Debug, Default)]
pub struct ChainTip {
    best: RwLock<Option<BlockStamp>>,
}

impl ChainTip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(bs: BlockStamp) -> Self {
        Self {
            best: RwLock::new(Some(bs)),
        }
    }

    pub fn set(&self, bs: BlockStamp) {
        *self.best.write() = Some(bs);
    }

    /// Forget the tip, e.g. after losing the node connection
    pub fn clear(&self) {
        *self.best.write() = None;
    }
}

impl CurrentBlockProvider for ChainTip {
    fn current_block(&self) -> Result<BlockStamp> {
        match *self.best.read() {
            Some(bs) if bs.is_known() => Ok(bs),
            _ => Err(WalletError::unavailable("best block not yet known")),
        }
    }

    fn observe_block(&self, bs: BlockStamp) {
        self.set(bs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::BlockHash;

    #[test]
    fn test_chain_tip_unavailable_until_set() {
        let tip = ChainTip::new();
        assert!(matches!(
            tip.current_block(),
            Err(WalletError::Unavailable(_))
        ));

        let bs = BlockStamp::new(7, BlockHash::from_byte_array([7; 32]));
        tip.set(bs);
        assert_eq!(tip.current_block().unwrap(), bs);

        tip.clear();
        assert!(tip.current_block().is_err());
    }

    #[test]
    fn test_unknown_height_is_unavailable() {
        let tip = ChainTip::with_block(BlockStamp::unknown());
        assert!(tip.current_block().is_err());
    }
}
