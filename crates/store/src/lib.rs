pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{Identified, Store};
pub use types::{AuditEntry, AuditEventType, Credential, CredentialStatus};
