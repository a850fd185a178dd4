//! Stream events and payload helpers
//!
//! A [`ParsedEvent`] is an event whose signature has already been verified by
//! the transport layer. Its hash is the SHA-256 of the canonical bincode
//! encoding of the inner [`StreamEvent`].

use crate::errors::{RiverError, RiverResult};
use crate::identifiers::{address_hex, format_hash_short, StreamId, StreamKind};
use crate::protocol::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// How a message relates to earlier events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum InteractionType {
    React,
    Reply,
    Mention,
    Forward,
}

/// Client-supplied routing hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTags {
    /// Users the event mentions
    pub mentioned_user_ids: Vec<String>,
    /// Relation to an earlier event, if any
    pub interaction_type: Option<InteractionType>,
}

/// Unsigned event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Address of the account or node that created the event
    pub creator_address: Vec<u8>,
    /// Client nonce distinguishing otherwise identical events
    pub salt: Vec<u8>,
    /// Hash of the miniblock the creator last observed; absent in genesis events
    pub prev_miniblock_hash: Option<Vec<u8>>,
    /// Client clock at creation, in milliseconds since the epoch
    pub created_at_epoch_ms: i64,
    /// Event content
    pub payload: Payload,
    /// Optional routing hints
    pub tags: Option<EventTags>,
}

impl StreamEvent {
    /// Genesis-style event: no previous miniblock, empty salt.
    pub fn new(creator_address: impl Into<Vec<u8>>, payload: Payload) -> Self {
        Self {
            creator_address: creator_address.into(),
            salt: Vec::new(),
            prev_miniblock_hash: None,
            created_at_epoch_ms: 0,
            payload,
            tags: None,
        }
    }

    /// Set the miniblock the creator last observed.
    pub fn with_prev_miniblock_hash(mut self, hash: impl Into<Vec<u8>>) -> Self {
        self.prev_miniblock_hash = Some(hash.into());
        self
    }

    /// Set the client nonce.
    pub fn with_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = salt.into();
        self
    }

    /// Set the creation time in epoch milliseconds.
    pub fn with_created_at(mut self, epoch_ms: i64) -> Self {
        self.created_at_epoch_ms = epoch_ms;
        self
    }

    /// Attach routing hints.
    pub fn with_tags(mut self, tags: EventTags) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Signature-verified event with its derived hash and creator id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    /// Decoded event body
    pub event: StreamEvent,
    /// SHA-256 of the bincode encoding of `event`
    pub hash: Vec<u8>,
    /// Creator signature over `hash`
    pub signature: Vec<u8>,
    creator_user_id: String,
}

impl ParsedEvent {
    /// Hash the event and resolve its creator id.
    pub fn new(event: StreamEvent, signature: impl Into<Vec<u8>>) -> RiverResult<Self> {
        let encoded = bincode::serialize(&event)?;
        let hash = Sha256::digest(&encoded).to_vec();
        let creator_user_id = address_hex(&event.creator_address)?;
        Ok(Self {
            event,
            hash,
            signature: signature.into(),
            creator_user_id,
        })
    }

    /// Creator's user id (`0x` + hex address).
    pub fn creator_user_id(&self) -> &str {
        &self.creator_user_id
    }

    /// Event content.
    pub fn payload(&self) -> &Payload {
        &self.event.payload
    }

    /// Short hash for log fields.
    pub fn short_hash(&self) -> String {
        format_hash_short(&self.hash)
    }

    /// Reference to this event as it appears in `stream_id`.
    pub fn event_ref(&self, stream_id: StreamId) -> EventRef {
        EventRef {
            stream_id,
            hash: self.hash.clone(),
            signature: self.signature.clone(),
        }
    }
}

impl fmt::Debug for ParsedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedEvent")
            .field("hash", &self.short_hash())
            .field("creator", &self.creator_user_id)
            .field("payload", &self.event.payload.type_name())
            .field("content", &self.event.payload.content_name())
            .finish()
    }
}

impl Payload {
    /// Stream kind this payload belongs to; `None` for common and unrecognized payloads.
    pub fn kind(&self) -> Option<StreamKind> {
        match self {
            Payload::Space(_) => Some(StreamKind::Space),
            Payload::Channel(_) => Some(StreamKind::Channel),
            Payload::DmChannel(_) => Some(StreamKind::DmChannel),
            Payload::GdmChannel(_) => Some(StreamKind::GdmChannel),
            Payload::Media(_) => Some(StreamKind::Media),
            Payload::User(_) => Some(StreamKind::User),
            Payload::UserDeviceKey(_) => Some(StreamKind::UserDeviceKey),
            Payload::UserSettings(_) => Some(StreamKind::UserSettings),
            Payload::UserInbox(_) => Some(StreamKind::UserInbox),
            Payload::Common(_) | Payload::Unrecognized { .. } => None,
        }
    }

    /// Whether the payload may appear in a stream of `kind`.
    pub fn is_allowed_in(&self, kind: StreamKind) -> bool {
        match self {
            Payload::Common(_) => true,
            Payload::Unrecognized { .. } => false,
            _ => self.kind() == Some(kind),
        }
    }

    /// Payload kind name for error tags.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Space(_) => "space_payload",
            Payload::Channel(_) => "channel_payload",
            Payload::DmChannel(_) => "dm_channel_payload",
            Payload::GdmChannel(_) => "gdm_channel_payload",
            Payload::Media(_) => "media_payload",
            Payload::User(_) => "user_payload",
            Payload::UserDeviceKey(_) => "user_device_key_payload",
            Payload::UserSettings(_) => "user_settings_payload",
            Payload::UserInbox(_) => "user_inbox_payload",
            Payload::Common(_) => "common_payload",
            Payload::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Content variant name within the payload kind, for error tags and logs.
    pub fn content_name(&self) -> &'static str {
        match self {
            Payload::Space(content) => match content {
                SpacePayload::Inception(_) => "inception",
                SpacePayload::Membership(_) => "membership",
                SpacePayload::Channel(_) => "channel",
                SpacePayload::Username(_) => "username",
                SpacePayload::DisplayName(_) => "display_name",
                SpacePayload::SpaceImage(_) => "space_image",
                SpacePayload::UpdateChannelAutojoin { .. } => "update_channel_autojoin",
                SpacePayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::Channel(content) => match content {
                ChannelPayload::Inception(_) => "inception",
                ChannelPayload::Membership(_) => "membership",
                ChannelPayload::Message(_) => "message",
                ChannelPayload::Redaction { .. } => "redaction",
                ChannelPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::DmChannel(content) => match content {
                DmChannelPayload::Inception(_) => "inception",
                DmChannelPayload::Membership(_) => "membership",
                DmChannelPayload::Message(_) => "message",
                DmChannelPayload::DisplayName(_) => "display_name",
                DmChannelPayload::Username(_) => "username",
                DmChannelPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::GdmChannel(content) => match content {
                GdmChannelPayload::Inception(_) => "inception",
                GdmChannelPayload::Membership(_) => "membership",
                GdmChannelPayload::Message(_) => "message",
                GdmChannelPayload::DisplayName(_) => "display_name",
                GdmChannelPayload::Username(_) => "username",
                GdmChannelPayload::ChannelProperties(_) => "channel_properties",
                GdmChannelPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::Media(content) => match content {
                MediaPayload::Inception(_) => "inception",
                MediaPayload::Chunk(_) => "chunk",
                MediaPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::User(content) => match content {
                UserPayload::Inception(_) => "inception",
                UserPayload::UserMembership(_) => "user_membership",
                UserPayload::UserMembershipAction(_) => "user_membership_action",
                UserPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::UserDeviceKey(content) => match content {
                UserDeviceKeyPayload::Inception(_) => "inception",
                UserDeviceKeyPayload::EncryptionDevice(_) => "encryption_device",
                UserDeviceKeyPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::UserSettings(content) => match content {
                UserSettingsPayload::Inception(_) => "inception",
                UserSettingsPayload::FullyReadMarkers(_) => "fully_read_markers",
                UserSettingsPayload::UserBlock(_) => "user_block",
                UserSettingsPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::UserInbox(content) => match content {
                UserInboxPayload::Inception(_) => "inception",
                UserInboxPayload::GroupEncryptionSessions(_) => "group_encryption_sessions",
                UserInboxPayload::Ack(_) => "ack",
                UserInboxPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::Common(content) => match content {
                CommonPayload::KeySolicitation(_) => "key_solicitation",
                CommonPayload::KeyFulfillment(_) => "key_fulfillment",
                CommonPayload::Unrecognized { .. } => "unrecognized",
            },
            Payload::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Stream id declared by an inception payload.
    pub fn inception_stream_id(&self) -> Option<&StreamId> {
        match self {
            Payload::Space(SpacePayload::Inception(i)) => Some(&i.stream_id),
            Payload::Channel(ChannelPayload::Inception(i)) => Some(&i.stream_id),
            Payload::DmChannel(DmChannelPayload::Inception(i)) => Some(&i.stream_id),
            Payload::GdmChannel(GdmChannelPayload::Inception(i)) => Some(&i.stream_id),
            Payload::Media(MediaPayload::Inception(i)) => Some(&i.stream_id),
            Payload::User(UserPayload::Inception(i))
            | Payload::UserDeviceKey(UserDeviceKeyPayload::Inception(i))
            | Payload::UserSettings(UserSettingsPayload::Inception(i))
            | Payload::UserInbox(UserInboxPayload::Inception(i)) => Some(&i.stream_id),
            _ => None,
        }
    }

    /// Membership record of a space, channel, DM or GDM membership payload.
    pub fn membership(&self) -> Option<&Membership> {
        match self {
            Payload::Space(SpacePayload::Membership(m))
            | Payload::Channel(ChannelPayload::Membership(m))
            | Payload::DmChannel(DmChannelPayload::Membership(m))
            | Payload::GdmChannel(GdmChannelPayload::Membership(m)) => Some(m),
            _ => None,
        }
    }

    /// Membership payload for a joinable stream of `kind`.
    pub fn membership_for(kind: StreamKind, membership: Membership) -> RiverResult<Self> {
        match kind {
            StreamKind::Space => Ok(Payload::Space(SpacePayload::Membership(membership))),
            StreamKind::Channel => Ok(Payload::Channel(ChannelPayload::Membership(membership))),
            StreamKind::DmChannel => {
                Ok(Payload::DmChannel(DmChannelPayload::Membership(membership)))
            }
            StreamKind::GdmChannel => {
                Ok(Payload::GdmChannel(GdmChannelPayload::Membership(membership)))
            }
            other => Err(RiverError::invalid_argument("stream kind has no memberships")
                .tag("kind", other)),
        }
    }

    /// User stream record of a membership held in `stream_id`.
    pub fn user_membership(
        op: MembershipOp,
        stream_id: StreamId,
        inviter: Option<String>,
    ) -> Self {
        Payload::User(UserPayload::UserMembership(UserMembership {
            stream_id,
            op,
            inviter,
        }))
    }
}
