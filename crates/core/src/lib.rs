pub mod app_core;
pub mod credential_service;
pub mod error;
pub mod expiry_scheduler;
pub mod port_allocator;
pub mod reject_set;

pub use app_core::AppCore;
pub use credential_service::{CreateCredentialRequest, CredentialService};
pub use error::{CoreError, Result, ValidateError};
pub use expiry_scheduler::ExpiryScheduler;
pub use port_allocator::PortAllocator;
pub use reject_set::RejectSet;
