use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::rand;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, Network, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};

use crate::config::coin_type;
use crate::error::{Result, StorageError, WalletError};
use crate::types::BlockStamp;

/// Key material backing one account.
///
/// Hands out chained payment addresses, holds imported keys and tracks the
/// block the account is synced with. Accounts treat it as opaque.
pub trait KeyDerivationWallet: Send {
    fn lock(&mut self) -> Result<()>;
    fn unlock(&mut self, passphrase: &[u8]) -> Result<()>;
    fn is_locked(&self) -> bool;

    /// Most recently issued chained address
    fn last_chained_address(&self) -> Address;

    /// Issue the next chained address, born at `bs`
    fn next_chained_address(&mut self, bs: &BlockStamp) -> Result<Address>;

    /// Every chained and imported address, in issuance order
    fn active_addresses(&self) -> Vec<AddressInfo>;

    fn address_info(&self, address: &Address) -> Result<AddressInfo>;

    /// Private key for `address`; fails while locked
    fn address_key(&self, address: &Address) -> Result<PrivateKey>;

    fn import_private_key(&mut self, key: PrivateKey, bs: &BlockStamp) -> Result<Address>;

    /// Lowest birth height of any key in the wallet
    fn earliest_block_height(&self) -> i32;

    fn synced_with(&self) -> BlockStamp;
    fn set_synced_with(&mut self, bs: BlockStamp);

    fn network(&self) -> Network;

    /// Opaque persistence payload
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub address: Address,
    pub compressed: bool,
    pub first_block: i32,
    pub imported: bool,
}

struct ChainedAddress {
    address: Address,
    first_block: i32,
}

struct ImportedKey {
    key: PrivateKey,
    address: Address,
    first_block: i32,
}

/// BIP32 keystore issuing P2PKH addresses on `m/44'/coin'/0'/0/i`.
///
/// Addresses derive from the account xpub and stay available while locked.
/// Private keys are only handed out while unlocked. Locking gates access in
/// memory only: `to_bytes` writes the account xpriv and imported keys unencrypted.
pub struct HdKeystore {
    network: Network,
    secp: Secp256k1<All>,
    account_xpriv: Xpriv,
    account_xpub: Xpub,
    passphrase_digest: sha256::Hash,
    locked: bool,
    chained: Vec<ChainedAddress>,
    imported: Vec<ImportedKey>,
    created_at: BlockStamp,
    synced_with: BlockStamp,
}

impl HdKeystore {
    /// Generate a new keystore from a random mnemonic; returns the phrase for backup
    pub fn generate(
        passphrase: &[u8],
        network: Network,
        created_at: BlockStamp,
    ) -> Result<(Self, Mnemonic)> {
        let entropy = rand::random::<[u8; 16]>();
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        let keystore = Self::from_seed(&mnemonic.to_seed(""), passphrase, network, created_at)?;
        Ok((keystore, mnemonic))
    }

    /// Restore a keystore from an existing mnemonic phrase
    pub fn from_mnemonic(
        words: &str,
        passphrase: &[u8],
        network: Network,
        created_at: BlockStamp,
    ) -> Result<Self> {
        let mnemonic =
            Mnemonic::parse(words).map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Self::from_seed(&mnemonic.to_seed(""), passphrase, network, created_at)
    }

    /// Build a keystore from raw seed bytes. Chained address 0 is issued at `created_at`.
    pub fn from_seed(
        seed: &[u8],
        passphrase: &[u8],
        network: Network,
        created_at: BlockStamp,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let master =
            Xpriv::new_master(network, seed).map_err(|e| WalletError::Bitcoin(e.to_string()))?;

        let path = DerivationPath::from_str(&format!("m/44'/{}'/0'", coin_type(network)))
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        let account_xpriv = master
            .derive_priv(&secp, &path)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;

        let mut keystore = Self::with_account_key(
            network,
            secp,
            account_xpriv,
            sha256::Hash::hash(passphrase),
            created_at,
        );
        let first = keystore.derive_address(0)?;
        keystore.chained.push(ChainedAddress {
            address: first,
            first_block: created_at.height,
        });
        Ok(keystore)
    }

    /// Load a keystore written by `to_bytes`. The result is locked.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: KeystoreFile = serde_json::from_slice(bytes).map_err(StorageError::from)?;

        let account_xpriv = Xpriv::from_str(&file.account_xpriv)
            .map_err(|e| StorageError::Corrupt(format!("account key: {}", e)))?;
        let passphrase_digest = sha256::Hash::from_str(&file.passphrase_digest)
            .map_err(|e| StorageError::Corrupt(format!("passphrase digest: {}", e)))?;

        if file.chained_births.is_empty() {
            return Err(StorageError::Corrupt("keystore has no chained addresses".into()).into());
        }

        let mut keystore = Self::with_account_key(
            file.network,
            Secp256k1::new(),
            account_xpriv,
            passphrase_digest,
            file.created_at,
        );
        keystore.synced_with = file.synced_with;

        for (index, first_block) in file.chained_births.into_iter().enumerate() {
            let address = keystore.derive_address(index as u32)?;
            keystore.chained.push(ChainedAddress {
                address,
                first_block,
            });
        }

        for entry in file.imported {
            let key = PrivateKey::from_wif(&entry.wif)
                .map_err(|e| StorageError::Corrupt(format!("imported key: {}", e)))?;
            let address = Address::p2pkh(key.public_key(&keystore.secp).pubkey_hash(), file.network);
            keystore.imported.push(ImportedKey {
                key,
                address,
                first_block: entry.first_block,
            });
        }

        Ok(keystore)
    }

    fn with_account_key(
        network: Network,
        secp: Secp256k1<All>,
        account_xpriv: Xpriv,
        passphrase_digest: sha256::Hash,
        created_at: BlockStamp,
    ) -> Self {
        let account_xpub = Xpub::from_priv(&secp, &account_xpriv);
        Self {
            network,
            secp,
            account_xpriv,
            account_xpub,
            passphrase_digest,
            locked: true,
            chained: Vec::new(),
            imported: Vec::new(),
            created_at,
            synced_with: created_at,
        }
    }

    fn chain_path(index: u32) -> Result<[ChildNumber; 2]> {
        let external = ChildNumber::from_normal_idx(0)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        Ok([external, child])
    }

    fn derive_address(&self, index: u32) -> Result<Address> {
        let derived = self
            .account_xpub
            .derive_pub(&self.secp, &Self::chain_path(index)?)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        let pubkey = PublicKey::new(derived.public_key);
        Ok(Address::p2pkh(pubkey.pubkey_hash(), self.network))
    }

    fn derive_key(&self, index: u32) -> Result<PrivateKey> {
        let derived = self
            .account_xpriv
            .derive_priv(&self.secp, &Self::chain_path(index)?)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        Ok(derived.to_priv())
    }

    /// Height the keystore was created at
    pub fn created_at(&self) -> BlockStamp {
        self.created_at
    }

    fn owns(&self, address: &Address) -> bool {
        self.chained.iter().any(|c| c.address == *address)
            || self.imported.iter().any(|i| i.address == *address)
    }
}

impl KeyDerivationWallet for HdKeystore {
    fn lock(&mut self) -> Result<()> {
        self.locked = true;
        Ok(())
    }

    fn unlock(&mut self, passphrase: &[u8]) -> Result<()> {
        if sha256::Hash::hash(passphrase) != self.passphrase_digest {
            return Err(WalletError::WrongPassphrase);
        }
        self.locked = false;
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn last_chained_address(&self) -> Address {
        // Construction always issues index 0 and loading rejects an empty chain
        self.chained[self.chained.len() - 1].address.clone()
    }

    fn next_chained_address(&mut self, bs: &BlockStamp) -> Result<Address> {
        let index = self.chained.len() as u32;
        let address = self.derive_address(index)?;
        self.chained.push(ChainedAddress {
            address: address.clone(),
            first_block: bs.height,
        });
        Ok(address)
    }

    fn active_addresses(&self) -> Vec<AddressInfo> {
        let chained = self.chained.iter().map(|c| AddressInfo {
            address: c.address.clone(),
            compressed: true,
            first_block: c.first_block,
            imported: false,
        });
        let imported = self.imported.iter().map(|i| AddressInfo {
            address: i.address.clone(),
            compressed: i.key.compressed,
            first_block: i.first_block,
            imported: true,
        });
        chained.chain(imported).collect()
    }

    fn address_info(&self, address: &Address) -> Result<AddressInfo> {
        self.active_addresses()
            .into_iter()
            .find(|info| info.address == *address)
            .ok_or_else(|| WalletError::NotFound(format!("address {} not in wallet", address)))
    }

    fn address_key(&self, address: &Address) -> Result<PrivateKey> {
        if self.locked {
            return Err(WalletError::Locked);
        }
        if let Some(index) = self.chained.iter().position(|c| c.address == *address) {
            return self.derive_key(index as u32);
        }
        self.imported
            .iter()
            .find(|i| i.address == *address)
            .map(|i| i.key)
            .ok_or_else(|| WalletError::NotFound(format!("address {} not in wallet", address)))
    }

    fn import_private_key(&mut self, key: PrivateKey, bs: &BlockStamp) -> Result<Address> {
        if self.locked {
            return Err(WalletError::Locked);
        }
        let address = Address::p2pkh(key.public_key(&self.secp).pubkey_hash(), self.network);
        if self.owns(&address) {
            return Err(WalletError::DuplicateKey(address.to_string()));
        }
        self.imported.push(ImportedKey {
            key,
            address: address.clone(),
            first_block: bs.height,
        });
        Ok(address)
    }

    fn earliest_block_height(&self) -> i32 {
        self.chained
            .iter()
            .map(|c| c.first_block)
            .chain(self.imported.iter().map(|i| i.first_block))
            .fold(self.created_at.height, i32::min)
    }

    fn synced_with(&self) -> BlockStamp {
        self.synced_with
    }

    fn set_synced_with(&mut self, bs: BlockStamp) {
        self.synced_with = bs;
    }

    fn network(&self) -> Network {
        self.network
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let file = KeystoreFile {
            network: self.network,
            account_xpriv: self.account_xpriv.to_string(),
            passphrase_digest: self.passphrase_digest.to_string(),
            chained_births: self.chained.iter().map(|c| c.first_block).collect(),
            imported: self
                .imported
                .iter()
                .map(|i| ImportedKeyFile {
                    wif: i.key.to_wif(),
                    first_block: i.first_block,
                })
                .collect(),
            created_at: self.created_at,
            synced_with: self.synced_with,
        };
        Ok(serde_json::to_vec_pretty(&file).map_err(StorageError::from)?)
    }
}

#[derive(Serialize, Deserialize)]
struct KeystoreFile {
    network: Network,
    account_xpriv: String,
    passphrase_digest: String,
    chained_births: Vec<i32>,
    imported: Vec<ImportedKeyFile>,
    created_at: BlockStamp,
    synced_with: BlockStamp,
}

#[derive(Serialize, Deserialize)]
struct ImportedKeyFile {
    wif: String,
    first_block: i32,
}
