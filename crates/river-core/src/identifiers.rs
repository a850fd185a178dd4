//! Stream and user identifiers
//!
//! Stream ids are strings of the form `<prefix>-<postfix>`, where the two
//! character hex prefix encodes the stream kind. User ids are `0x`-prefixed
//! lowercase hex renderings of 20 byte addresses; per-user streams use the
//! owner's user id as postfix.

use crate::errors::{RiverError, RiverResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length in bytes of an account or node address.
pub const ADDRESS_LENGTH: usize = 20;

/// Minimum number of characters following `<prefix>-` in a stream id.
pub const MIN_STREAM_ID_POSTFIX_LEN: usize = 4;

/// Stream kinds, discriminated by the stream id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    /// `10`
    Space,
    /// `20`
    Channel,
    /// `88`, two-party direct messages
    DmChannel,
    /// `77`, group direct messages
    GdmChannel,
    /// `ff`
    Media,
    /// `a8`, a user's memberships
    User,
    /// `ad`
    UserDeviceKey,
    /// `a5`
    UserSettings,
    /// `a1`
    UserInbox,
}

impl StreamKind {
    /// All stream kinds in prefix order.
    pub const ALL: [StreamKind; 9] = [
        StreamKind::Space,
        StreamKind::Channel,
        StreamKind::DmChannel,
        StreamKind::GdmChannel,
        StreamKind::Media,
        StreamKind::User,
        StreamKind::UserDeviceKey,
        StreamKind::UserSettings,
        StreamKind::UserInbox,
    ];

    /// Two character id prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            StreamKind::Space => "10",
            StreamKind::Channel => "20",
            StreamKind::DmChannel => "88",
            StreamKind::GdmChannel => "77",
            StreamKind::Media => "ff",
            StreamKind::User => "a8",
            StreamKind::UserDeviceKey => "ad",
            StreamKind::UserSettings => "a5",
            StreamKind::UserInbox => "a1",
        }
    }

    /// Prefix including the trailing dash, e.g. `"10-"`.
    pub fn prefix_dash(&self) -> String {
        format!("{}-", self.prefix())
    }

    /// Resolve a kind from its two character prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Whether streams of this kind track per-user membership.
    pub fn is_joinable(&self) -> bool {
        matches!(
            self,
            StreamKind::Space | StreamKind::Channel | StreamKind::DmChannel | StreamKind::GdmChannel
        )
    }

    /// Whether streams of this kind are owned by a single user.
    pub fn is_user_stream(&self) -> bool {
        matches!(
            self,
            StreamKind::User
                | StreamKind::UserDeviceKey
                | StreamKind::UserSettings
                | StreamKind::UserInbox
        )
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Space => "space",
            StreamKind::Channel => "channel",
            StreamKind::DmChannel => "dm_channel",
            StreamKind::GdmChannel => "gdm_channel",
            StreamKind::Media => "media",
            StreamKind::User => "user",
            StreamKind::UserDeviceKey => "user_device_key",
            StreamKind::UserSettings => "user_settings",
            StreamKind::UserInbox => "user_inbox",
        };
        f.write_str(name)
    }
}

/// Identifier of a stream.
///
/// Construction never fails; use [`StreamId::kind`] or [`StreamId::is_valid_for`]
/// to interpret the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wrap a raw stream id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build a stream id of the given kind from its postfix.
    pub fn from_parts(kind: StreamKind, postfix: &str) -> Self {
        Self(format!("{}-{}", kind.prefix(), postfix))
    }

    /// Underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stream kind encoded in the prefix, if the id is well formed.
    pub fn kind(&self) -> Option<StreamKind> {
        StreamKind::ALL
            .into_iter()
            .find(|kind| self.is_valid_for(*kind))
    }

    /// Whether the id carries `kind`'s prefix followed by a non-empty postfix.
    pub fn is_valid_for(&self, kind: StreamKind) -> bool {
        match self.0.strip_prefix(&kind.prefix_dash()) {
            Some(postfix) => !postfix.is_empty() && postfix.chars().all(is_id_char),
            None => false,
        }
    }

    /// Everything after the first dash; the whole id when there is none.
    pub fn postfix(&self) -> &str {
        match self.0.split_once('-') {
            Some((_, postfix)) => postfix,
            None => &self.0,
        }
    }

    /// Personal stream of `user_id`.
    pub fn user_stream(user_id: &str) -> RiverResult<Self> {
        Self::for_user(StreamKind::User, user_id)
    }

    /// Per-user stream of the given kind.
    pub fn for_user(kind: StreamKind, user_id: &str) -> RiverResult<Self> {
        if !kind.is_user_stream() {
            return Err(RiverError::bad_stream_id("stream kind is not a user stream")
                .tag("kind", kind));
        }
        if user_id.is_empty() || !user_id.chars().all(is_id_char) {
            return Err(RiverError::invalid_argument("invalid user id").tag("userId", user_id));
        }
        Ok(Self::from_parts(kind, user_id))
    }

    /// Personal stream of the account with the given address bytes.
    pub fn user_stream_from_address(address: &[u8]) -> RiverResult<Self> {
        Self::user_stream(&address_hex(address)?)
    }

    /// Deterministic DM stream id for a pair of addresses, independent of order.
    pub fn dm_between(first: &[u8], second: &[u8]) -> Self {
        let (low, high) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        let mut hasher = Sha256::new();
        hasher.update(low);
        hasher.update(high);
        let digest = hasher.finalize();
        Self::from_parts(StreamKind::DmChannel, &hex::encode(digest))
    }

    /// Whether this id is the DM stream id for the given pair of addresses.
    pub fn is_dm_between(&self, first: &[u8], second: &[u8]) -> bool {
        *self == Self::dm_between(first, second)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Render address bytes as a user id (`0x` + lowercase hex).
pub fn address_hex(address: &[u8]) -> RiverResult<String> {
    if address.len() != ADDRESS_LENGTH {
        return Err(RiverError::invalid_argument("invalid address length")
            .tag("length", address.len())
            .tag("expected", ADDRESS_LENGTH));
    }
    Ok(format!("0x{}", hex::encode(address)))
}

/// Parse a user id back into address bytes.
pub fn address_from_user_id(user_id: &str) -> RiverResult<Vec<u8>> {
    let digits = user_id.strip_prefix("0x").ok_or_else(|| {
        RiverError::invalid_argument("user id must start with 0x").tag("userId", user_id)
    })?;
    let bytes = hex::decode(digits).map_err(|e| {
        RiverError::invalid_argument(format!("user id is not hex: {e}")).tag("userId", user_id)
    })?;
    if bytes.len() != ADDRESS_LENGTH {
        return Err(RiverError::invalid_argument("invalid address length")
            .tag("userId", user_id)
            .tag("length", bytes.len()));
    }
    Ok(bytes)
}

/// Abbreviated hex rendering of a hash for log fields.
pub fn format_hash_short(hash: &[u8]) -> String {
    let encoded = hex::encode(hash);
    if encoded.len() > 12 {
        format!("{}..", &encoded[..12])
    } else {
        encoded
    }
}
