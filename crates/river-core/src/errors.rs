//! Unified error type for River stream rules
//!
//! Every failure carries a machine-checkable [`ErrorCode`] plus free-form
//! key/value tags for diagnostics. Callers branch on the code, never on the
//! message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-checkable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed request or payload
    InvalidArgument,
    /// Authorization or state violation
    PermissionDenied,
    /// The stream is not in a state that permits the operation
    FailedPrecondition,
    /// Event content is inconsistent with the stream
    BadEvent,
    /// Node-only mutation created by an unknown node
    UnknownNode,
    /// Genesis events do not describe a legal stream
    BadStreamCreationParams,
    /// Event does not reference a known recent miniblock
    BadPrevMiniblockHash,
    /// Event is already present in the stream
    DuplicateEvent,
    /// Referenced entity does not exist
    NotFound,
    /// Stream id cannot be parsed or has the wrong kind
    BadStreamId,
    /// Configuration could not be loaded or is inconsistent
    BadConfig,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::BadEvent => "BAD_EVENT",
            ErrorCode::UnknownNode => "UNKNOWN_NODE",
            ErrorCode::BadStreamCreationParams => "BAD_STREAM_CREATION_PARAMS",
            ErrorCode::BadPrevMiniblockHash => "BAD_PREV_MINIBLOCK_HASH",
            ErrorCode::DuplicateEvent => "DUPLICATE_EVENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadStreamId => "BAD_STREAM_ID",
            ErrorCode::BadConfig => "BAD_CONFIG",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured domain error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}{}", format_tags(.tags, .func))]
pub struct RiverError {
    /// Classification used by callers to decide how to respond
    pub code: ErrorCode,
    /// Human readable description
    pub message: String,
    /// Diagnostic context, in insertion order
    pub tags: Vec<(String, String)>,
    /// Function that raised the error, when recorded
    pub func: Option<String>,
}

fn format_tags(tags: &[(String, String)], func: &Option<String>) -> String {
    let mut out = String::new();
    for (key, value) in tags {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    if let Some(func) = func {
        out.push_str(" func=");
        out.push_str(func);
    }
    out
}

impl RiverError {
    /// Create an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            tags: Vec::new(),
            func: None,
        }
    }

    /// Attach a diagnostic tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.tags.push((key.into(), value.to_string()));
        self
    }

    /// Record the function that raised the error.
    pub fn func(mut self, func: impl Into<String>) -> Self {
        self.func = Some(func.into());
        self
    }

    /// Look up a tag value by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Create a failed precondition error
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedPrecondition, message)
    }

    /// Create a bad event error
    pub fn bad_event(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadEvent, message)
    }

    /// Create a bad stream creation params error
    pub fn bad_creation_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadStreamCreationParams, message)
    }

    /// Create a bad stream id error
    pub fn bad_stream_id(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadStreamId, message)
    }

    /// Create a bad config error
    pub fn bad_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadConfig, message)
    }
}

/// Standard result type for River operations
pub type RiverResult<T> = std::result::Result<T, RiverError>;

impl From<std::io::Error> for RiverError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::new(ErrorCode::NotFound, err.to_string()),
            _ => Self::bad_config(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for RiverError {
    fn from(err: toml::de::Error) -> Self {
        Self::bad_config(format!("invalid TOML: {err}"))
    }
}

impl From<bincode::Error> for RiverError {
    fn from(err: bincode::Error) -> Self {
        Self::bad_event(format!("event encoding failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_code_and_tags() {
        let err = RiverError::permission_denied("creator is not a member of the stream")
            .tag("creatorId", "0xabc")
            .func("creator_is_member");
        assert_eq!(
            err.to_string(),
            "PERMISSION_DENIED: creator is not a member of the stream \
             creatorId=0xabc func=creator_is_member"
        );
        assert_eq!(err.tag_value("creatorId"), Some("0xabc"));
        assert_eq!(err.tag_value("missing"), None);
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = RiverError::from(io_err);
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_code_names() {
        assert_eq!(
            ErrorCode::BadStreamCreationParams.as_str(),
            "BAD_STREAM_CREATION_PARAMS"
        );
        assert_eq!(ErrorCode::UnknownNode.to_string(), "UNKNOWN_NODE");
    }
}
