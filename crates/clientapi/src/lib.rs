//! The public-facing HTTP surface clients poll to redeem an access key and
//! discover connection details (§4.9).

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod types;

pub use error::{ClientApiError, Result};
pub use handlers::{router, ClientApiState};
pub use rate_limit::ValidateRateLimiter;
