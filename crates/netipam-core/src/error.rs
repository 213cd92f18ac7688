use thiserror::Error;

/// Kind of a field-level validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    /// `/0` or otherwise unusable mask
    InvalidMask,
    /// Aggregate or IP range overlaps an existing one
    Overlap,
    DuplicatePrefix,
    DuplicateAddress,
    /// Network/broadcast address bound to an interface
    ReservedAddress,
    VersionMismatch,
    MaskMismatch,
    RangeTooLarge,
    /// Range end not above its start
    InvalidRange,
    VidRange,
    ScopeMismatch,
    /// Scope type without scope id or the reverse
    InvalidScope,
    InvalidStatus,
    DuplicateName,
    DuplicateVid,
    /// Reference to a record that does not exist
    UnknownReference,
}

impl std::fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValidationKind::InvalidMask => "invalid mask",
            ValidationKind::Overlap => "overlap",
            ValidationKind::DuplicatePrefix => "duplicate prefix",
            ValidationKind::DuplicateAddress => "duplicate address",
            ValidationKind::ReservedAddress => "reserved address",
            ValidationKind::VersionMismatch => "version mismatch",
            ValidationKind::MaskMismatch => "mask mismatch",
            ValidationKind::RangeTooLarge => "range too large",
            ValidationKind::InvalidRange => "invalid range",
            ValidationKind::VidRange => "VID out of range",
            ValidationKind::ScopeMismatch => "scope mismatch",
            ValidationKind::InvalidScope => "invalid scope",
            ValidationKind::InvalidStatus => "invalid status",
            ValidationKind::DuplicateName => "duplicate name",
            ValidationKind::DuplicateVid => "duplicate VID",
            ValidationKind::UnknownReference => "unknown reference",
        };
        f.write_str(name)
    }
}

/// A rejected write, naming the input attribute at fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    /// Another writer claimed the same space between snapshot and commit.
    /// Retry with a fresh snapshot.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The validation kind, if this is a validation failure.
    pub fn validation_kind(&self) -> Option<ValidationKind> {
        match self {
            Error::Validation(v) => Some(v.kind),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrentModification(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Blanket From impls for redb error types
impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Database(e.to_string())
    }
}
