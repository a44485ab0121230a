use std::{fmt, io};

/// Catch-all error type for glue code that doesn't warrant its own
/// `thiserror` enum (mirrors the per-crate errors' `External`/`Other`
/// variants when a lower layer needs to bubble something up untyped).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    pub fn other(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Build an [`Error`] from a bare string, the way `anyhow!` builds an
/// `anyhow::Error`.
pub trait FromMessage {
    fn from_message(msg: impl Into<String>) -> Self;
}

impl FromMessage for Error {
    fn from_message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Adds `.context()`/`.with_context()` to `Result<T, E: Display>` and
/// `Option<T>`, the way `anyhow::Context` does, but targeting our own
/// [`Error`] instead of `anyhow::Error`.
pub trait Context<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Message(format!("{}: {e}", msg.into())))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Message(format!("{}: {e}", f().into())))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::Message(msg.into()))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.ok_or_else(|| Error::Message(f().into()))
    }
}
