use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Result, WalletError};

/// Maps encoded payment addresses to the name of the account owning them.
///
/// Read on every incoming notification, written only when an address is
/// issued or imported. Callers must not hold an account lock while writing.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    map: RwLock<HashMap<String, String>>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `address` as belonging to `account`
    pub fn mark(&self, address: &str, account: &str) {
        let previous = self
            .map
            .write()
            .insert(address.to_string(), account.to_string());

        if let Some(prev) = previous.filter(|prev| prev != account) {
            log::warn!(
                "Address {} moved from account '{}' to '{}'",
                address,
                prev,
                account
            );
        }
    }

    pub fn lookup(&self, address: &str) -> Result<String> {
        self.map
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("no account owns address {}", address)))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.map.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// All addresses owned by `account`, sorted
    pub fn addresses_for(&self, account: &str) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .map
            .read()
            .iter()
            .filter(|(_, owner)| owner.as_str() == account)
            .map(|(addr, _)| addr.clone())
            .collect();
        addrs.sort();
        addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lookup_miss_is_not_found() {
        let registry = AddressRegistry::new();
        assert!(matches!(
            registry.lookup("mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef"),
            Err(WalletError::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_and_lookup() {
        let registry = AddressRegistry::new();
        registry.mark("addr-a", "default");
        registry.mark("addr-b", "savings");
        registry.mark("addr-c", "default");

        assert_eq!(registry.lookup("addr-b").unwrap(), "savings");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.addresses_for("default"), vec!["addr-a", "addr-c"]);
    }

    #[test]
    fn test_concurrent_marks() {
        let registry = Arc::new(AddressRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        registry.mark(&format!("addr-{}-{}", t, i), &format!("acct-{}", t));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 200);
        assert_eq!(registry.lookup("addr-3-49").unwrap(), "acct-3");
    }
}
