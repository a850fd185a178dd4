//! # River Core - Stream Data Model
//!
//! Identifiers, errors, configuration, protocol payloads, parsed events,
//! chain authorization descriptions and the materialized stream view consumed
//! by the admission rules in `river-rules`.

pub mod auth;
pub mod config;
pub mod errors;
pub mod events;
pub mod identifiers;
pub mod protocol;
pub mod stream_view;

pub use auth::{ChainAuthArgs, ChainAuthKind, Permission};
pub use config::{MediaStreamConfig, MembershipLimitsConfig, RecencyConstraintsConfig, StreamConfig};
pub use errors::{ErrorCode, RiverError, RiverResult};
pub use events::{EventTags, InteractionType, ParsedEvent, StreamEvent};
pub use identifiers::{
    address_from_user_id, address_hex, StreamId, StreamKind, ADDRESS_LENGTH,
    MIN_STREAM_ID_POSTFIX_LEN,
};
pub use protocol::{Membership, MembershipOp, Payload};
pub use stream_view::{MiniblockInfo, StreamState, StreamView};
