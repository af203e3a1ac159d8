use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

/// Codec stage at which a seal or unseal operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    Compress,
    Decompress,
    Encrypt,
    Decrypt,
    /// Authentication failure on decrypt. Fatal, never retried.
    Auth,
}

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend I/O error: {0}")]
    BackendIo(#[source] std::io::Error),

    #[error("corrupt packfile: {0}")]
    CorruptPackfile(String),

    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("codec failure ({stage:?}): {detail}")]
    Codec { stage: CodecStage, detail: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation canceled")]
    Canceled,

    #[error("repository is locked by another process (lock: {0})")]
    Locked(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
}

impl StrataError {
    /// Shorthand constructor for codec failures.
    pub fn codec(stage: CodecStage, detail: impl Into<String>) -> Self {
        StrataError::Codec {
            stage,
            detail: detail.into(),
        }
    }

    /// Whether this error is a missing-key report rather than a transport
    /// failure. Existence checks convert these to `false`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StrataError::NotFound(_))
    }
}

impl From<std::io::Error> for StrataError {
    fn from(value: std::io::Error) -> Self {
        StrataError::BackendIo(value)
    }
}
