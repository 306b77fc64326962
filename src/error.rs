use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures while opening a stream candidate URL. These drive candidate
/// rotation in the supervisor and are routine conditions, not alarms.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// TCP pre-check to the host failed; cheap to detect, fail fast.
    #[error("host unreachable: {0}")]
    UnreachableHost(String),

    /// The server rejected the candidate URL at the protocol level.
    #[error("protocol open failed for {url}: {reason}")]
    ProtocolOpenFailed { url: String, reason: String },

    /// The URL opened but never yielded a decodable frame.
    #[error("stream opened but produced no decodable frames: {0}")]
    EmptyStream(String),
}

/// Per-frame read failures. Transient; tolerated up to the
/// consecutive-failure threshold before the supervisor reconnects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("frame read timed out after {0}ms")]
    Timeout(u64),

    #[error("stream disconnected: {0}")]
    Disconnected(String),
}
