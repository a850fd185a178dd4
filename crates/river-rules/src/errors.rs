//! Dispatch errors shared by both engines

use river_core::{Payload, RiverError};

/// Payload discriminant the engine has no rules for.
pub fn unknown_payload_type(payload: &Payload) -> RiverError {
    let err =
        RiverError::invalid_argument("unknown payload type").tag("payload", payload.type_name());
    match payload {
        Payload::Unrecognized { type_tag } => err.tag("typeTag", type_tag),
        _ => err,
    }
}

/// Content discriminant the engine has no rules for.
pub fn unknown_content_type(payload: &Payload, type_tag: u32) -> RiverError {
    RiverError::invalid_argument("unknown content type")
        .tag("payload", payload.type_name())
        .tag("typeTag", type_tag)
}

/// Content that is valid protocol but may not be appended, such as a second inception.
pub fn invalid_content_type(payload: &Payload) -> RiverError {
    RiverError::invalid_argument("invalid content type")
        .tag("payload", payload.type_name())
        .tag("content", payload.content_name())
}
