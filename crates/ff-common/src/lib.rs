pub mod error;
pub mod fsperm;
pub mod gametype;
pub mod notify;
pub mod redact;
pub mod time;

pub use error::{Context, Error, FromMessage, Result};
pub use fsperm::{enforce_dir_mode, enforce_file_mode, DIR_MODE, FILE_MODE};
pub use gametype::GameType;
pub use notify::{BoxFuture, GroupNotification, MotdCancelFn, MotdStartFn, MotdStartRequest, NotifyFn};
pub use redact::redact_key;
pub use time::now_ms;
