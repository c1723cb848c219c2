//! Common error types used throughout stowage.
//!
//! Quota failures, pass-through failures from the wrapped entities and the
//! storage backend, and persistence failures all funnel into [`Error`], which
//! knows the externally visible status for each kind via [`Error::http_status`].

/// Common error type for stowage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The owner's storage byte ceiling would be exceeded.
    #[error("{}", storage_quota_message(.attempted, .consumed, .limit))]
    StorageQuotaFull {
        /// Bytes the rejected operation wanted to add, if known.
        attempted: Option<u64>,
        /// Bytes already consumed by the owner.
        consumed: u64,
        /// Configured ceiling in bytes.
        limit: u64,
    },

    /// Too many extra properties on one image.
    #[error(
        "The limit has been exceeded on the number of allowed image properties. \
         Attempted: {attempted}, Maximum: {maximum}"
    )]
    PropertyLimitExceeded { attempted: u64, maximum: u64 },

    /// Too many tags on one image.
    #[error(
        "The limit has been exceeded on the number of allowed image tags. \
         Attempted: {attempted}, Maximum: {maximum}"
    )]
    TagLimitExceeded { attempted: u64, maximum: u64 },

    /// Too many members on one image.
    #[error(
        "The limit has been exceeded on the number of allowed image members for this image. \
         Attempted: {attempted}, Maximum: {maximum}"
    )]
    MemberLimitExceeded { attempted: u64, maximum: u64 },

    /// The storage backend has no room left.
    #[error("{0}")]
    StorageFull(String),

    /// The storage backend refused the write.
    #[error("{0}")]
    StorageWriteDenied(String),

    /// A value was rejected by the entity.
    #[error("{0}")]
    InvalidValue(String),

    /// The data or entity already exists.
    #[error("{0}")]
    Duplicate(String),

    /// The caller may not perform the operation.
    #[error("{0}")]
    Forbidden(String),

    /// The requested entity was not found.
    #[error("{0}")]
    NotFound(String),

    /// A remote transport failed while moving data.
    #[error("{0}")]
    Transport(String),

    /// A status change that the entity's lifecycle does not allow.
    #[error("Status transition from {from} to {to} is not allowed")]
    InvalidStatusTransition { from: String, to: String },

    /// A configuration option has an unusable value.
    #[error("Invalid value for option {option}: {value}")]
    InvalidOption { option: String, value: String },

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("{0}")]
    Internal(String),
}

fn storage_quota_message(attempted: &Option<u64>, consumed: &u64, limit: &u64) -> String {
    let remaining = limit.saturating_sub(*consumed);
    match attempted {
        Some(size) => format!(
            "The size of the data {size} will exceed the limit. {remaining} bytes remaining. \
             Attempted: {}, Maximum: {limit}",
            consumed.saturating_add(*size)
        ),
        None => format!(
            "The size of the data (unknown) will exceed the limit. \
             {remaining} bytes remaining. Attempted: {consumed}, Maximum: {limit}"
        ),
    }
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new InvalidValue error.
    pub fn invalid_value<S: Into<String>>(msg: S) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create a new Forbidden error.
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new InvalidStatusTransition error.
    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Map this error to the status a request layer should report.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::StorageQuotaFull { .. }
            | Error::PropertyLimitExceeded { .. }
            | Error::TagLimitExceeded { .. }
            | Error::MemberLimitExceeded { .. }
            | Error::StorageFull(_) => 413,
            Error::StorageWriteDenied(_) => 503,
            Error::InvalidValue(_) | Error::InvalidStatusTransition { .. } => 400,
            Error::Duplicate(_) => 409,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Transport(_) => 502,
            Error::InvalidOption { .. }
            | Error::Database(_)
            | Error::Io(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Whether this error is one of the quota rejections.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            Error::StorageQuotaFull { .. }
                | Error::PropertyLimitExceeded { .. }
                | Error::TagLimitExceeded { .. }
                | Error::MemberLimitExceeded { .. }
        )
    }

    /// Replace the human-readable message, keeping the error kind.
    ///
    /// Only the message-carrying pass-through kinds are rewritten; structured
    /// kinds are returned unchanged.
    pub fn with_message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self {
            Error::StorageFull(_) => Error::StorageFull(message),
            Error::StorageWriteDenied(_) => Error::StorageWriteDenied(message),
            Error::InvalidValue(_) => Error::InvalidValue(message),
            Error::Duplicate(_) => Error::Duplicate(message),
            Error::Forbidden(_) => Error::Forbidden(message),
            Error::NotFound(_) => Error::NotFound(message),
            Error::Transport(_) => Error::Transport(message),
            Error::Internal(_) => Error::Internal(message),
            other => other,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
