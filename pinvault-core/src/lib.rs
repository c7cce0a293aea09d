// lib.rs - PIN-gated keystore for a wallet recovery phrase

pub mod app_state;
pub mod config_store;
pub mod crypto;
pub mod errors;
pub mod lockout;
pub mod security;
pub mod session;
pub mod storage;
pub mod validation;

// Re-export common types
pub use app_state::{EntryRoute, UnlockedWallet, WalletContext};
pub use config_store::{ConfigStore, LockoutTier, ProfileConfig};
pub use crypto::{EncryptedSecret, SymmetricKey};
pub use errors::{WalletError, WalletResult};
pub use lockout::{LockStatus, LockoutPolicy, LockoutState, LockoutTracker};
pub use security::{Environment, SecurityConfig};
pub use session::{SessionKeyContext, SessionVault};
pub use storage::{
    FileStore, KeyValueStore, Keystore, MemoryStore, ProfilePaths, WalletPayload, WalletRecord,
};
pub use validation::InputValidator;
