//! Shared error type and failure taxonomy.
//!
//! Every failure carries a [`ErrorKind`] that determines how callers react:
//! transient kinds are retried locally with backoff, permanent kinds are
//! signalled to the broker so a message is not redelivered forever, and the
//! request-scoped kinds map onto gRPC status codes at the API boundary.

use std::fmt;

/// Category of a core error.
///
/// The split mirrors how the system reacts to the failure rather than where
/// it originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input: missing required field, invalid enum, bad pattern.
    Validation,
    /// An id that is not in the catalog.
    NotFound,
    /// A uniqueness conflict (duplicate name, duplicate installation).
    AlreadyExists,
    /// A state precondition failed (live session exists, server offline,
    /// port in use).
    FailedPrecondition,
    /// Transient infrastructure failure; retried with backoff.
    Transient,
    /// Permanent failure; recorded on the affected row and never redelivered.
    Permanent,
    /// Resource exhaustion; transient if the cause clears within the retry
    /// window.
    Resource,
    /// A bug or an unclassified failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::FailedPrecondition => write!(f, "failed_precondition"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Resource => write!(f, "resource"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Core error with a taxonomy kind and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable message; safe to log, not returned verbatim over gRPC
    /// for internal kinds.
    pub message: String,
    /// Additional context (entity, routing key, query fragment).
    pub context: Option<String>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;
        if let Some(ref ctx) = self.context {
            write!(f, " [{}]", ctx)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether retrying locally may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::Resource)
    }

    /// Whether the broker must not redeliver the message that caused this.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Permanent
                | ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::FailedPrecondition
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match &err {
            E::RowNotFound => Self::not_found("row not found"),
            E::PoolTimedOut => Self::resource("connection pool timed out"),
            E::PoolClosed | E::WorkerCrashed => {
                Self::transient("database connection lost").with_context(err.to_string())
            }
            E::Io(_) | E::Tls(_) => {
                Self::transient("database connection failed").with_context(err.to_string())
            }
            E::Database(db) => {
                if db.is_unique_violation() {
                    Self::already_exists(db.to_string())
                } else if db.is_foreign_key_violation() || db.is_check_violation() {
                    Self::precondition(db.to_string())
                } else if db.code().as_deref() == Some("40P01") {
                    // Deadlock detected; retriable.
                    Self::transient(db.to_string())
                } else {
                    Self::internal(db.to_string())
                }
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<lapin::Error> for Error {
    fn from(err: lapin::Error) -> Self {
        // Broker disconnects and channel teardown are transient; protocol
        // violations are not.
        match &err {
            lapin::Error::IOError(_) | lapin::Error::InvalidConnectionState(_) => {
                Self::transient(format!("broker connection: {err}"))
            }
            _ => Self::internal(format!("broker: {err}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("malformed payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds() {
        assert!(Error::transient("broker gone").is_retriable());
        assert!(Error::resource("semaphore exhausted").is_retriable());
        assert!(!Error::permanent("image missing").is_retriable());
        assert!(!Error::not_found("no such sgc").is_retriable());
    }

    #[test]
    fn permanent_kinds_are_not_redelivered() {
        assert!(Error::permanent("image missing").is_permanent());
        assert!(Error::validation("bad enum").is_permanent());
        assert!(Error::precondition("port in use").is_permanent());
        assert!(!Error::transient("db deadlock").is_permanent());
    }

    #[test]
    fn context_is_rendered() {
        let err = Error::not_found("session 7").with_context("StopSession");
        let text = err.to_string();
        assert!(text.contains("session 7"));
        assert!(text.contains("StopSession"));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
