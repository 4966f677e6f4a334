//! Query layer error types
//!
//! A single tagged error value is threaded through canonicalization, the
//! plan cache, query settings and the command surface. The command layer
//! formats failures as `{ok: 0, code, errmsg}`.

use std::fmt;

use thiserror::Error;

/// Result type for query layer operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Error kinds used by the query core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unrecognized stage encountered while interpreting an execution plan
    InternalError,
    /// Malformed arguments, canonicalization failures, lookup misses
    BadValue,
    /// Authorization denied
    Unauthorized,
}

impl ErrorCode {
    /// Numeric code reported to clients
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::Unauthorized => 13,
        }
    }

    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::Unauthorized => "Unauthorized",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Query layer error with code and reason
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct QueryError {
    code: ErrorCode,
    message: String,
}

impl QueryError {
    /// Create a BadValue error
    pub fn bad_value(reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadValue,
            message: reason.into(),
        }
    }

    /// Create an Unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unauthorized,
            message: reason.into(),
        }
    }

    /// Create an InternalError
    pub fn internal(reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_stable() {
        assert_eq!(ErrorCode::InternalError.code(), 1);
        assert_eq!(ErrorCode::BadValue.code(), 2);
        assert_eq!(ErrorCode::Unauthorized.code(), 13);
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::bad_value("no such key in cache");
        let display = format!("{}", err);
        assert!(display.contains("BadValue"));
        assert!(display.contains("no such key in cache"));
    }
}
