//! Chat-gateway connection and command dispatcher (§4.10/§4.11).

mod dispatcher;
mod error;
mod frame;
mod transport;

pub use dispatcher::{BotDispatcher, BotDispatcherConfig};
pub use error::{BotError, Result};
pub use frame::{ApiCallFrame, ApiResponseFrame, EventFrame, IncomingFrame, MessageSegment, Sender};
pub use transport::{BotTransport, BotTransportConfig, EventHandlerFn};
