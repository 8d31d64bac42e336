use thiserror::Error;

/// Main error type for sysconf core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot too large: {size} bytes exceeds {max}")]
    SnapshotTooLarge { size: usize, max: usize },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// A snapshot buffer whose declared sizes do not match what was received.
///
/// This is never a soft miss: the transport or the peer is broken, and none of
/// the bytes may be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptSnapshot {
    /// Received length outside `[HEADER_SIZE, MAX_BUFFER_SIZE]`
    #[error("snapshot length {len} outside [{min}, {max}]")]
    Length { len: usize, min: usize, max: usize },

    /// Header plus declared attribute length differs from the received length
    #[error("snapshot declares {declared} bytes but {received} were received")]
    AttributeLength { declared: usize, received: usize },

    /// Requested padding would grow the buffer past the maximum
    #[error("snapshot padding {padding} exceeds the {available} bytes available")]
    Padding { padding: usize, available: usize },

    /// Received length plus padding exceeds the maximum buffer size
    #[error("snapshot buffer of {len} bytes exceeds {max}")]
    BufferLength { len: usize, max: usize },
}
