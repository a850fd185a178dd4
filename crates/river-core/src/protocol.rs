//! Protocol payload model
//!
//! One enum per stream kind lists every content variant that kind accepts.
//! Discriminants the wire layer could not decode are kept as `Unrecognized`
//! so the rule engines can reject them explicitly instead of guessing.

#![allow(missing_docs)]

use crate::identifiers::{StreamId, StreamKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Membership transition requested by a membership payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MembershipOp {
    #[default]
    Unspecified,
    Invite,
    Join,
    Leave,
}

impl MembershipOp {
    /// All ops, including `Unspecified`.
    pub const ALL: [MembershipOp; 4] = [
        MembershipOp::Unspecified,
        MembershipOp::Invite,
        MembershipOp::Join,
        MembershipOp::Leave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipOp::Unspecified => "UNSPECIFIED",
            MembershipOp::Invite => "INVITE",
            MembershipOp::Join => "JOIN",
            MembershipOp::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for MembershipOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership record carried by space, channel, DM and GDM payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Requested transition
    pub op: MembershipOp,
    /// Subject of the transition
    pub user_id: String,
    /// User that requested the transition
    pub initiator_id: String,
    /// Original inviter, when the transition follows an invite
    pub inviter: Option<String>,
}

impl Membership {
    pub fn new(
        op: MembershipOp,
        user_id: impl Into<String>,
        initiator_id: impl Into<String>,
    ) -> Self {
        Self {
            op,
            user_id: user_id.into(),
            initiator_id: initiator_id.into(),
            inviter: None,
        }
    }

    pub fn with_inviter(mut self, inviter: impl Into<String>) -> Self {
        self.inviter = Some(inviter.into());
        self
    }
}

/// Lifecycle operation on a space's channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelOp {
    #[default]
    Unspecified,
    Created,
    Deleted,
    Updated,
}

impl fmt::Display for ChannelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelOp::Unspecified => "UNSPECIFIED",
            ChannelOp::Created => "CREATED",
            ChannelOp::Deleted => "DELETED",
            ChannelOp::Updated => "UPDATED",
        };
        f.write_str(name)
    }
}

/// Pointer to an event in another stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub stream_id: StreamId,
    pub hash: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Opaque client-encrypted content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub ciphertext: String,
    pub algorithm: String,
    pub session_id: String,
}

impl EncryptedData {
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            ..Default::default()
        }
    }
}

// Inceptions

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceInception {
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInception {
    pub stream_id: StreamId,
    /// Space the channel belongs to
    pub space_id: StreamId,
    pub channel_properties: Option<EncryptedData>,
    /// Whether members of the space join the channel automatically
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmChannelInception {
    pub stream_id: StreamId,
    pub first_party_address: Vec<u8>,
    pub second_party_address: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdmChannelInception {
    pub stream_id: StreamId,
    pub channel_properties: Option<EncryptedData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInception {
    pub stream_id: StreamId,
    /// Channel, DM or GDM the media is attached to
    pub channel_id: StreamId,
    /// Space of `channel_id` when it is a space channel
    pub space_id: Option<StreamId>,
    pub chunk_count: i32,
}

/// Inception shared by the per-user stream kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStreamInception {
    pub stream_id: StreamId,
}

// Space

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceChannel {
    pub op: ChannelOp,
    pub channel_id: StreamId,
    /// Channel inception event this entry originates from
    pub origin_event: Option<EventRef>,
    pub channel_properties: Option<EncryptedData>,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpacePayload {
    Inception(SpaceInception),
    Membership(Membership),
    Channel(SpaceChannel),
    Username(EncryptedData),
    DisplayName(EncryptedData),
    SpaceImage(EncryptedData),
    UpdateChannelAutojoin { channel_id: StreamId, autojoin: bool },
    Unrecognized { type_tag: u32 },
}

// Channel

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelPayload {
    Inception(ChannelInception),
    Membership(Membership),
    Message(EncryptedData),
    Redaction { event_id: Vec<u8> },
    Unrecognized { type_tag: u32 },
}

// DM and GDM

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmChannelPayload {
    Inception(DmChannelInception),
    Membership(Membership),
    Message(EncryptedData),
    DisplayName(EncryptedData),
    Username(EncryptedData),
    Unrecognized { type_tag: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdmChannelPayload {
    Inception(GdmChannelInception),
    Membership(Membership),
    Message(EncryptedData),
    DisplayName(EncryptedData),
    Username(EncryptedData),
    ChannelProperties(EncryptedData),
    Unrecognized { type_tag: u32 },
}

// Media

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChunk {
    pub data: Vec<u8>,
    pub chunk_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaPayload {
    Inception(MediaInception),
    Chunk(MediaChunk),
    Unrecognized { type_tag: u32 },
}

// User

/// Record in a user's own stream of a membership held elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMembership {
    /// Stream the membership applies to
    pub stream_id: StreamId,
    pub op: MembershipOp,
    pub inviter: Option<String>,
}

/// Request, written to the actor's stream, to change another user's membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMembershipAction {
    pub op: MembershipOp,
    /// Subject of the action
    pub user_id: String,
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserPayload {
    Inception(UserStreamInception),
    UserMembership(UserMembership),
    UserMembershipAction(UserMembershipAction),
    Unrecognized { type_tag: u32 },
}

// User device keys

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionDevice {
    pub device_key: String,
    pub fallback_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserDeviceKeyPayload {
    Inception(UserStreamInception),
    EncryptionDevice(EncryptionDevice),
    Unrecognized { type_tag: u32 },
}

// User settings

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullyReadMarkers {
    pub channel_stream_id: StreamId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBlock {
    pub user_id: String,
    pub is_blocked: bool,
    pub event_num: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserSettingsPayload {
    Inception(UserStreamInception),
    FullyReadMarkers(FullyReadMarkers),
    UserBlock(UserBlock),
    Unrecognized { type_tag: u32 },
}

// User inbox

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEncryptionSessions {
    pub stream_id: StreamId,
    pub sender_key: String,
    pub session_ids: Vec<String>,
    /// Ciphertext per recipient device key
    pub ciphertexts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInboxAck {
    pub device_key: String,
    pub miniblock_num: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserInboxPayload {
    Inception(UserStreamInception),
    GroupEncryptionSessions(GroupEncryptionSessions),
    Ack(UserInboxAck),
    Unrecognized { type_tag: u32 },
}

// Common

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySolicitation {
    pub device_key: String,
    pub fallback_key: String,
    pub is_new_device: bool,
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFulfillment {
    pub user_id: String,
    pub device_key: String,
    pub session_ids: Vec<String>,
}

/// Content accepted in any stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommonPayload {
    KeySolicitation(KeySolicitation),
    KeyFulfillment(KeyFulfillment),
    Unrecognized { type_tag: u32 },
}

/// Event payload, discriminated by stream kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Space(SpacePayload),
    Channel(ChannelPayload),
    DmChannel(DmChannelPayload),
    GdmChannel(GdmChannelPayload),
    Media(MediaPayload),
    User(UserPayload),
    UserDeviceKey(UserDeviceKeyPayload),
    UserSettings(UserSettingsPayload),
    UserInbox(UserInboxPayload),
    Common(CommonPayload),
    Unrecognized { type_tag: u32 },
}
