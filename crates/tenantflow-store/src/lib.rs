pub mod cipher;
pub mod credentials;
pub mod error;
pub mod ledger;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sql_store;

// Re-export commonly used types
pub use cipher::{CipherError, SecretCipher};
pub use credentials::{CredentialError, CredentialStatus, CredentialStore, Secret};
pub use error::{StoreError, StoreResult};
pub use ledger::{IdempotencyLedger, LedgerConfig, Reservation, ReservationToken};
pub use memory::{MemoryCredentialRepository, MemoryIdempotencyStore, MemoryRunStore};

#[cfg(feature = "sqlite")]
pub use sql_store::SqlStore;
