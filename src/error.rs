use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Non-zero status byte in a reply. Carries the server code verbatim.
    #[error("Server error code {0}")]
    Server(u8),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed UTF-8 or a reply that does not match its wire shape.
    /// The connection is poisoned: byte alignment cannot be recovered.
    #[error("Malformed reply: {0}")]
    Decode(String),

    #[error("Key does not exist")]
    KeyMissing,

    #[error("Key already exists")]
    KeyExists,

    #[error("Negative result window bounds are not supported")]
    InvalidRange,

    #[error("Conditions cannot be OR-combined: {0}")]
    UnsupportedCombination(String),

    #[error("Storing a list value requires a separator in Opts")]
    SeparatorRequired,

    #[error("Bad config error: {0}")]
    BadConfig(String),

    #[error("Bad usage error: {0}")]
    BadUsage(String),

    #[error("A bug in zero-tyrant: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::LibraryBug(color_eyre::eyre::eyre!(format!("{:#?}", err)))
    }

    /// True for errors after which the connection must not be reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost | Error::Io(_) | Error::Decode(_) | Error::LibraryBug(_)
        )
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}
