//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Kinodht crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Invalid Id size, expected 20, got {0}")]
    /// Id bytes were not exactly 20 bytes long.
    InvalidIdSize(usize),

    #[error("Invalid compact encoding of {0} bytes")]
    /// A compact node or peer list had the wrong length.
    InvalidCompactSize(usize),

    #[error(transparent)]
    /// A message field was missing or had the wrong type.
    Message(#[from] crate::common::MessageError),

    #[error("Failed to spawn thread: {0}")]
    /// The runtime could not start one of its threads.
    Spawn(String),
}

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
