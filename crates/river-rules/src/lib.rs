//! # River Rules - Stream Admission Control
//!
//! Pure decision functions run before an event is appended to a stream or a
//! stream is created:
//!
//! - [`can_add_event`]: dispatches on payload and content kind and returns the
//!   chain authorization and parent event the caller must satisfy
//! - [`can_create_stream`]: validates genesis events and returns required
//!   memberships, users, chain authorization and derived events
//!
//! Both compose their result with the builders in [`builder`].

pub mod builder;
pub mod can_add_event;
pub mod can_create_stream;
pub mod errors;

pub use builder::{
    AddEventDecision, AddEventRuleBuilder, CreateStreamRuleBuilder, CreateStreamRules,
    DerivedEvent, RequiredParentEvent, Verdict,
};
pub use can_add_event::{can_add_event, validate_membership_transition};
pub use can_create_stream::can_create_stream;
