//! Account-level wallet state
//!
//! - `account.rs` - account aggregate and shared context
//! - `keystore.rs` - key derivation wallet abstraction and HD implementation
//! - `registry.rs` - address to account registry

pub mod account;
pub mod keystore;
pub mod registry;

pub use account::{Account, WalletContext};
pub use keystore::{AddressInfo, HdKeystore, KeyDerivationWallet};
pub use registry::AddressRegistry;
