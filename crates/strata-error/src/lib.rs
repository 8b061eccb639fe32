use thiserror::Error;

/// Primary error type for Strata cursor operations.
///
/// Variants are grouped by the class of failure a caller has to handle:
/// key/value state, disabled capabilities, invalid arguments, marshaling,
/// allocation and search results. Every variant maps onto an errno-style
/// [`ErrorCode`] so embedders can keep integer-returning wrappers.
///
/// The type is `Clone` because a cursor stashes the last marshaling failure
/// and reports it again from later accessors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrataError {
    // === Cursor State Errors ===
    /// Key or value accessed before one was established.
    ///
    /// `cause` carries the failure of the last `set_key`/`set_value` when
    /// there was one.
    #[error(
        "requires {what} be set{}",
        .cause.as_ref().map(|c| format!(": {c}")).unwrap_or_default()
    )]
    NotSet {
        what: &'static str,
        cause: Option<Box<StrataError>>,
    },

    /// Operation disabled on this cursor (read-only, checkpoint, sampling).
    #[error("unsupported cursor operation: {operation} ({reason})")]
    Unsupported {
        operation: &'static str,
        reason: String,
    },

    // === Argument Errors ===
    /// Generic invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Zero-length key.
    #[error("empty keys not permitted")]
    EmptyKey,

    /// Key does not fit the 32-bit size field.
    #[error("key size ({size}) out of range")]
    KeySizeOutOfRange { size: u64 },

    /// Record number key of zero.
    #[error("record numbers must be greater than zero")]
    ZeroRecordNumber,

    // === Marshaling Errors ===
    /// Malformed or unsupported format string.
    #[error("invalid format '{format}': {detail}")]
    BadFormat { format: String, detail: String },

    /// Buffer too small to pack into or unpack from.
    #[error("short buffer: need {expected} bytes, have {actual}")]
    ShortBuffer { expected: usize, actual: usize },

    /// Argument type does not match the format field.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Value does not fit the format field.
    #[error("{what} out of range: {value}")]
    ValueOutOfRange { what: String, value: String },

    /// String field holds bytes that are not UTF-8.
    #[error("invalid UTF-8 in string field: {detail}")]
    Utf8 { detail: String },

    // === Configuration Errors ===
    /// Configuration string could not be parsed.
    #[error("configuration error at offset {offset}: {detail}")]
    ConfigParse { offset: usize, detail: String },

    // === Object Errors ===
    /// No table registered under this URI.
    #[error("no such table: {name}")]
    NoSuchTable { name: String },

    /// A table with this URI already exists.
    #[error("table {name} already exists")]
    TableExists { name: String },

    // === Search Results ===
    /// Search or iteration found no matching record.
    #[error("item not found")]
    NotFound,

    /// Insert without overwrite found an existing record.
    #[error("attempt to insert an existing key")]
    DuplicateKey,

    // === Resource Errors ===
    /// Buffer growth failed.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result codes for integer-returning wrappers.
///
/// Positive values are errno numbers; negative values are engine-specific
/// codes that cannot collide with errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// No such file or object.
    NoEnt = 2,
    /// Out of memory.
    NoMem = 12,
    /// Object already exists.
    Exist = 17,
    /// Invalid argument.
    Inval = 22,
    /// Operation not supported.
    NotSup = 95,
    /// Insert found an existing key.
    DuplicateKey = -31801,
    /// Generic engine error.
    Error = -31802,
    /// Search found nothing.
    NotFound = -31803,
    /// Unrecoverable internal failure.
    Panic = -31804,
}

impl StrataError {
    /// Map this error to its result code.
    ///
    /// A not-set error reports the code of the stashed cause when one exists,
    /// so callers see why the earlier `set_*` call failed.
    #[allow(clippy::match_same_arms)]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotSet {
                cause: Some(cause), ..
            } => cause.error_code(),
            Self::NotSet { cause: None, .. } => ErrorCode::Inval,
            Self::Unsupported { .. } => ErrorCode::NotSup,
            Self::InvalidArgument(_)
            | Self::EmptyKey
            | Self::KeySizeOutOfRange { .. }
            | Self::ZeroRecordNumber
            | Self::BadFormat { .. }
            | Self::ShortBuffer { .. }
            | Self::TypeMismatch { .. }
            | Self::ValueOutOfRange { .. }
            | Self::Utf8 { .. }
            | Self::ConfigParse { .. } => ErrorCode::Inval,
            Self::NoSuchTable { .. } => ErrorCode::NoEnt,
            Self::TableExists { .. } => ErrorCode::Exist,
            Self::NotFound => ErrorCode::NotFound,
            Self::DuplicateKey => ErrorCode::DuplicateKey,
            Self::OutOfMemory { .. } => ErrorCode::NoMem,
            Self::Internal(_) => ErrorCode::Panic,
        }
    }

    /// Whether the error is an invalid-argument class failure.
    pub fn is_invalid_argument(&self) -> bool {
        self.error_code() == ErrorCode::Inval
    }

    /// Whether the error reports a disabled or unavailable operation.
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Whether the error is a search miss rather than a failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Whether the caller can likely fix this without code changes.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotSet { .. }
                | Self::EmptyKey
                | Self::ZeroRecordNumber
                | Self::KeySizeOutOfRange { .. }
                | Self::TypeMismatch { .. }
                | Self::ValueOutOfRange { .. }
                | Self::ConfigParse { .. }
                | Self::NoSuchTable { .. }
                | Self::NotFound
                | Self::DuplicateKey
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotSet { .. } => Some("Call set_key/set_value or position the cursor first"),
            Self::Unsupported { .. } => {
                Some("Open the cursor without readonly, checkpoint or next_random")
            }
            Self::EmptyKey => Some("Keys must contain at least one byte"),
            Self::ZeroRecordNumber => Some("Record numbers start at 1"),
            Self::DuplicateKey => Some("Open the cursor with overwrite=true or use update"),
            _ => None,
        }
    }

    /// Create a not-set error for the key or the value.
    pub fn not_set(what: &'static str, cause: Option<Self>) -> Self {
        Self::NotSet {
            what,
            cause: cause.map(Box::new),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            operation,
            reason: reason.into(),
        }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a format error.
    pub fn bad_format(format: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadFormat {
            format: format.into(),
            detail: detail.into(),
        }
    }

    /// Create a type-mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration parse error.
    pub fn config(offset: usize, detail: impl Into<String>) -> Self {
        Self::ConfigParse {
            offset,
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `StrataError`.
pub type Result<T> = std::result::Result<T, StrataError>;
