//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Chord crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    /// Id bytes were empty or longer than [ID_SIZE](crate::common::ID_SIZE).
    #[error("Invalid Id size, expected 1..=20 bytes, got {0}")]
    InvalidIdSize(usize),

    /// Port bytes were empty or longer than 2 bytes.
    #[error("Invalid port size, expected 1..=2 bytes, got {0}")]
    InvalidPortSize(usize),

    /// Ring width must be within `1..=160` bits.
    #[error("Invalid ring width: {0} bits, expected 1..=160")]
    InvalidBits(u32),

    #[error("Ip address is not valid UTF-8")]
    InvalidUtf8,

    #[error("Received an empty frame")]
    EmptyFrame,

    /// The first part of a request was not the `Chord` subsystem tag.
    #[error("Expected subsystem `Chord`, received {:?}", String::from_utf8_lossy(.0))]
    WrongSubsystem(Vec<u8>),

    #[error("Operation not supported: {:?}", String::from_utf8_lossy(.0))]
    UnsupportedOperation(Vec<u8>),

    /// A request had the wrong number of arguments for its operation.
    #[error("{operation} expects {expected} argument(s), got {got}")]
    MalformedRequest {
        operation: &'static str,
        expected: usize,
        got: usize,
    },

    /// A reply was addressed to a routing address the transport doesn't know.
    #[error("No connected client with routing address {0:x?}")]
    UnknownClient(Vec<u8>),

    #[error("Peer {0} did not answer")]
    PeerUnreachable(String),

    #[error("Transport was closed")]
    TransportClosed,
}

/// Alias for `Result<T, chord::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
