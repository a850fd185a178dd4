//! Materialized stream view
//!
//! A [`StreamView`] is derived state computed from a stream's committed
//! miniblocks and its minipool. It is immutable: [`StreamView::add_event`] and
//! [`StreamView::seal_miniblock`] return new views, so a snapshot handed to the
//! rule engines never changes underneath them.
//!
//! Per-kind data lives in [`StreamState`]; accessors that only make sense for
//! some kinds return an error on the others.

use crate::config::RecencyConstraintsConfig;
use crate::errors::{ErrorCode, RiverError, RiverResult};
use crate::events::ParsedEvent;
use crate::identifiers::{address_hex, format_hash_short, StreamId, StreamKind};
use crate::protocol::*;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::trace;

// =============================================================================
// Miniblocks
// =============================================================================

/// Committed batch of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniblockInfo {
    /// Position in the chain; genesis is 0
    pub num: i64,
    /// Chains the previous hash, number, timestamp and event hashes
    pub hash: Vec<u8>,
    /// Time the block was sealed
    pub timestamp: DateTime<Utc>,
    /// Events in append order
    pub events: Vec<ParsedEvent>,
}

impl MiniblockInfo {
    fn new(num: i64, prev_hash: &[u8], timestamp: DateTime<Utc>, events: Vec<ParsedEvent>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash);
        hasher.update(num.to_be_bytes());
        hasher.update(timestamp.timestamp_millis().to_be_bytes());
        for event in &events {
            hasher.update(&event.hash);
        }
        Self {
            num,
            hash: hasher.finalize().to_vec(),
            timestamp,
            events,
        }
    }

    fn contains(&self, hash: &[u8]) -> bool {
        self.events.iter().any(|e| e.hash == hash)
    }
}

// =============================================================================
// Per-kind state
// =============================================================================

/// Current membership record per user id.
pub type MembershipTable = BTreeMap<String, Membership>;

/// Channel entry of a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceChannelInfo {
    /// Last lifecycle op applied
    pub op: ChannelOp,
    /// Channel inception the entry was created from
    pub origin_event: Option<EventRef>,
    /// Encrypted name and topic
    pub channel_properties: Option<EncryptedData>,
    /// Whether new space members see the channel by default
    pub is_default: bool,
    /// Whether new space members join the channel automatically
    pub autojoin: bool,
}

/// Space stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceState {
    /// Genesis record
    pub inception: SpaceInception,
    /// Space members
    pub memberships: MembershipTable,
    /// Channels announced in the space, deleted ones included
    pub channels: BTreeMap<StreamId, SpaceChannelInfo>,
}

/// Channel stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    /// Genesis record, naming the parent space
    pub inception: ChannelInception,
    /// Channel members
    pub memberships: MembershipTable,
}

/// DM stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmChannelState {
    /// Genesis record, naming both parties
    pub inception: DmChannelInception,
    /// Party memberships
    pub memberships: MembershipTable,
}

/// Group DM stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdmChannelState {
    /// Genesis record
    pub inception: GdmChannelInception,
    /// Participant memberships
    pub memberships: MembershipTable,
}

/// Media stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaState {
    /// Genesis record, fixing the chunk count
    pub inception: MediaInception,
    /// Creator of the inception, the only writer of the stream
    pub creator_id: String,
    /// Chunks applied so far
    pub chunks_received: usize,
}

/// User stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserState {
    /// Genesis record
    pub inception: UserStreamInception,
    /// Memberships held in other streams, keyed by that stream's id
    pub memberships: BTreeMap<StreamId, UserMembership>,
}

/// State of the device key, settings and inbox streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStreamState {
    /// Genesis record
    pub inception: UserStreamInception,
}

/// Stream-kind-specific state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Members and channels of a space
    Space(SpaceState),
    /// Members of a channel
    Channel(ChannelState),
    /// Parties of a DM
    DmChannel(DmChannelState),
    /// Participants of a group DM
    GdmChannel(GdmChannelState),
    /// Chunk bookkeeping of a media stream
    Media(MediaState),
    /// A user's memberships in other streams
    User(UserState),
    /// Device keys published by a user
    UserDeviceKey(UserStreamState),
    /// A user's private settings
    UserSettings(UserStreamState),
    /// Encryption sessions delivered to a user
    UserInbox(UserStreamState),
}

impl StreamState {
    fn from_inception(event: &ParsedEvent) -> RiverResult<Self> {
        let state = match event.payload() {
            Payload::Space(SpacePayload::Inception(i)) => StreamState::Space(SpaceState {
                inception: i.clone(),
                memberships: MembershipTable::new(),
                channels: BTreeMap::new(),
            }),
            Payload::Channel(ChannelPayload::Inception(i)) => StreamState::Channel(ChannelState {
                inception: i.clone(),
                memberships: MembershipTable::new(),
            }),
            Payload::DmChannel(DmChannelPayload::Inception(i)) => {
                StreamState::DmChannel(DmChannelState {
                    inception: i.clone(),
                    memberships: MembershipTable::new(),
                })
            }
            Payload::GdmChannel(GdmChannelPayload::Inception(i)) => {
                StreamState::GdmChannel(GdmChannelState {
                    inception: i.clone(),
                    memberships: MembershipTable::new(),
                })
            }
            Payload::Media(MediaPayload::Inception(i)) => StreamState::Media(MediaState {
                inception: i.clone(),
                creator_id: event.creator_user_id().to_string(),
                chunks_received: 0,
            }),
            Payload::User(UserPayload::Inception(i)) => StreamState::User(UserState {
                inception: i.clone(),
                memberships: BTreeMap::new(),
            }),
            Payload::UserDeviceKey(UserDeviceKeyPayload::Inception(i)) => {
                StreamState::UserDeviceKey(UserStreamState { inception: i.clone() })
            }
            Payload::UserSettings(UserSettingsPayload::Inception(i)) => {
                StreamState::UserSettings(UserStreamState { inception: i.clone() })
            }
            Payload::UserInbox(UserInboxPayload::Inception(i)) => {
                StreamState::UserInbox(UserStreamState { inception: i.clone() })
            }
            other => {
                return Err(RiverError::bad_event("first event is not an inception")
                    .tag("payload", other.type_name())
                    .tag("content", other.content_name()))
            }
        };
        Ok(state)
    }

    /// Kind of stream this state belongs to.
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamState::Space(_) => StreamKind::Space,
            StreamState::Channel(_) => StreamKind::Channel,
            StreamState::DmChannel(_) => StreamKind::DmChannel,
            StreamState::GdmChannel(_) => StreamKind::GdmChannel,
            StreamState::Media(_) => StreamKind::Media,
            StreamState::User(_) => StreamKind::User,
            StreamState::UserDeviceKey(_) => StreamKind::UserDeviceKey,
            StreamState::UserSettings(_) => StreamKind::UserSettings,
            StreamState::UserInbox(_) => StreamKind::UserInbox,
        }
    }

    fn memberships(&self) -> Option<&MembershipTable> {
        match self {
            StreamState::Space(s) => Some(&s.memberships),
            StreamState::Channel(s) => Some(&s.memberships),
            StreamState::DmChannel(s) => Some(&s.memberships),
            StreamState::GdmChannel(s) => Some(&s.memberships),
            _ => None,
        }
    }

    fn memberships_mut(&mut self) -> Option<&mut MembershipTable> {
        match self {
            StreamState::Space(s) => Some(&mut s.memberships),
            StreamState::Channel(s) => Some(&mut s.memberships),
            StreamState::DmChannel(s) => Some(&mut s.memberships),
            StreamState::GdmChannel(s) => Some(&mut s.memberships),
            _ => None,
        }
    }

    /// Fold a non-inception event into the state. Content that carries no
    /// state is ignored.
    fn apply(&mut self, payload: &Payload) {
        if let Some(membership) = payload.membership() {
            if let Some(table) = self.memberships_mut() {
                table.insert(membership.user_id.clone(), membership.clone());
            }
            return;
        }
        match (self, payload) {
            (StreamState::Space(space), Payload::Space(SpacePayload::Channel(channel))) => {
                apply_space_channel(space, channel)
            }
            (
                StreamState::Space(space),
                Payload::Space(SpacePayload::UpdateChannelAutojoin { channel_id, autojoin }),
            ) => {
                if let Some(info) = space.channels.get_mut(channel_id) {
                    info.autojoin = *autojoin;
                }
            }
            (StreamState::User(user), Payload::User(UserPayload::UserMembership(membership))) => {
                user.memberships
                    .insert(membership.stream_id.clone(), membership.clone());
            }
            (StreamState::Media(media), Payload::Media(MediaPayload::Chunk(_))) => {
                media.chunks_received += 1;
            }
            _ => {}
        }
    }
}

fn apply_space_channel(space: &mut SpaceState, channel: &SpaceChannel) {
    match channel.op {
        ChannelOp::Created => {
            space
                .channels
                .entry(channel.channel_id.clone())
                .or_insert_with(|| SpaceChannelInfo {
                    op: ChannelOp::Created,
                    origin_event: channel.origin_event.clone(),
                    channel_properties: channel.channel_properties.clone(),
                    is_default: channel.is_default,
                    autojoin: channel.is_default,
                });
        }
        ChannelOp::Updated | ChannelOp::Deleted => {
            if let Some(info) = space.channels.get_mut(&channel.channel_id) {
                info.op = channel.op;
                if channel.channel_properties.is_some() {
                    info.channel_properties = channel.channel_properties.clone();
                }
            }
        }
        ChannelOp::Unspecified => {}
    }
}

// =============================================================================
// Key exchange
// =============================================================================

/// Devices remembered per user; older solicitations are dropped first.
const MAX_SOLICITING_DEVICES: usize = 10;

/// Outstanding key solicitations, keyed by the soliciting user.
type SolicitationTable = BTreeMap<String, Vec<KeySolicitation>>;

fn apply_key_exchange(table: &mut SolicitationTable, event: &ParsedEvent) {
    match event.payload() {
        Payload::Common(CommonPayload::KeySolicitation(solicitation)) => {
            let entries = table.entry(event.creator_user_id().to_string()).or_default();
            entries.retain(|e| e.device_key != solicitation.device_key);
            if entries.len() >= MAX_SOLICITING_DEVICES {
                entries.drain(..=entries.len() - MAX_SOLICITING_DEVICES);
            }
            entries.push(solicitation.clone());
        }
        Payload::Common(CommonPayload::KeyFulfillment(fulfillment)) => {
            let Some(entries) = table.get_mut(&fulfillment.user_id) else {
                return;
            };
            let Some(index) = entries
                .iter()
                .position(|e| e.device_key == fulfillment.device_key)
            else {
                return;
            };
            let entry = &mut entries[index];
            entry.is_new_device = false;
            entry
                .session_ids
                .retain(|id| !fulfillment.session_ids.contains(id));
            if entry.session_ids.is_empty() {
                entries.remove(index);
            }
            if entries.is_empty() {
                table.remove(&fulfillment.user_id);
            }
        }
        _ => {}
    }
}

// =============================================================================
// Stream view
// =============================================================================

/// Read-only projection of a stream's materialized state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamView {
    stream_id: StreamId,
    blocks: Vec<MiniblockInfo>,
    minipool: Vec<ParsedEvent>,
    state: StreamState,
    key_solicitations: SolicitationTable,
}

impl StreamView {
    /// Build a view from the events of a genesis miniblock.
    pub fn from_genesis(events: Vec<ParsedEvent>, timestamp: DateTime<Utc>) -> RiverResult<Self> {
        let first = events
            .first()
            .ok_or_else(|| RiverError::bad_event("genesis miniblock has no events"))?;
        let mut state = StreamState::from_inception(first)?;
        let stream_id = first
            .payload()
            .inception_stream_id()
            .cloned()
            .ok_or_else(|| RiverError::bad_event("inception has no stream id"))?;
        let mut key_solicitations = SolicitationTable::new();
        for event in &events[1..] {
            ensure_payload_kind(state.kind(), event)?;
            state.apply(event.payload());
            apply_key_exchange(&mut key_solicitations, event);
        }
        let genesis = MiniblockInfo::new(0, &[], timestamp, events);
        Ok(Self {
            stream_id,
            blocks: vec![genesis],
            minipool: Vec::new(),
            state,
            key_solicitations,
        })
    }

    /// New view with `event` materialized into the minipool.
    pub fn add_event(&self, event: ParsedEvent) -> RiverResult<Self> {
        ensure_payload_kind(self.kind(), &event)?;
        let mut next = self.clone();
        next.state.apply(event.payload());
        apply_key_exchange(&mut next.key_solicitations, &event);
        next.minipool.push(event);
        Ok(next)
    }

    /// New view with the minipool committed as the next miniblock.
    pub fn seal_miniblock(&self, timestamp: DateTime<Utc>) -> RiverResult<Self> {
        let last = self.last_block();
        if timestamp < last.timestamp {
            return Err(RiverError::bad_event("miniblock timestamp precedes the last block")
                .tag("streamId", &self.stream_id));
        }
        let block = MiniblockInfo::new(last.num + 1, &last.hash, timestamp, self.minipool.clone());
        trace!(
            stream_id = %self.stream_id,
            num = block.num,
            events = block.events.len(),
            hash = %format_hash_short(&block.hash),
            "sealed miniblock"
        );
        let mut next = self.clone();
        next.blocks.push(block);
        next.minipool.clear();
        Ok(next)
    }

    /// Id from the inception event.
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Kind fixed at inception.
    pub fn kind(&self) -> StreamKind {
        self.state.kind()
    }

    /// Materialized per-kind state.
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Committed miniblocks, genesis first.
    pub fn blocks(&self) -> &[MiniblockInfo] {
        &self.blocks
    }

    /// Events added since the last sealed miniblock.
    pub fn minipool(&self) -> &[ParsedEvent] {
        &self.minipool
    }

    /// Most recent committed miniblock; a view always has at least the genesis block.
    pub fn last_block(&self) -> &MiniblockInfo {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Solicitations from `user_id` still waiting on keys, oldest first.
    pub fn key_solicitations(&self, user_id: &str) -> &[KeySolicitation] {
        self.key_solicitations
            .get(user_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Reject payloads that do not belong in this stream.
    pub fn check_payload_kind(&self, event: &ParsedEvent) -> RiverResult<()> {
        ensure_payload_kind(self.kind(), event)
    }

    // -------------------------------------------------------------------------
    // Memberships
    // -------------------------------------------------------------------------

    fn membership_table(&self) -> RiverResult<&MembershipTable> {
        self.state.memberships().ok_or_else(|| {
            RiverError::invalid_argument("stream has no memberships")
                .tag("streamId", &self.stream_id)
                .tag("kind", self.kind())
        })
    }

    /// Current membership op of `user_id`; `Unspecified` when absent.
    pub fn get_membership(&self, user_id: &str) -> RiverResult<MembershipOp> {
        Ok(self
            .membership_table()?
            .get(user_id)
            .map(|m| m.op)
            .unwrap_or_default())
    }

    /// Number of users whose current membership is JOIN.
    pub fn joined_count(&self) -> RiverResult<usize> {
        Ok(self
            .membership_table()?
            .values()
            .filter(|m| m.op == MembershipOp::Join)
            .count())
    }

    /// Whether `user_id` counts as a member, by the rule of this stream kind.
    pub fn is_member(&self, user_id: &str) -> RiverResult<bool> {
        match &self.state {
            StreamState::Space(_) | StreamState::Channel(_) | StreamState::GdmChannel(_) => {
                Ok(self.get_membership(user_id)? == MembershipOp::Join)
            }
            StreamState::DmChannel(dm) => {
                let first = address_hex(&dm.inception.first_party_address)?;
                let second = address_hex(&dm.inception.second_party_address)?;
                Ok(user_id == first || user_id == second)
            }
            StreamState::Media(media) => Ok(media.creator_id == user_id),
            StreamState::User(_)
            | StreamState::UserDeviceKey(_)
            | StreamState::UserSettings(_)
            | StreamState::UserInbox(_) => Ok(self.stream_id.postfix() == user_id),
        }
    }

    /// Parent space of a channel; `None` for every other kind.
    pub fn stream_parent_id(&self) -> Option<&StreamId> {
        match &self.state {
            StreamState::Channel(channel) => Some(&channel.inception.space_id),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Inceptions
    //
    // Each accessor fails with INVALID_ARGUMENT on any other stream kind.
    // -------------------------------------------------------------------------

    fn wrong_kind(&self, expected: StreamKind) -> RiverError {
        RiverError::invalid_argument("wrong stream type")
            .tag("streamId", &self.stream_id)
            .tag("expected", expected)
            .tag("actual", self.kind())
    }

    /// Space genesis record.
    pub fn space_inception(&self) -> RiverResult<&SpaceInception> {
        match &self.state {
            StreamState::Space(s) => Ok(&s.inception),
            _ => Err(self.wrong_kind(StreamKind::Space)),
        }
    }

    /// Channel genesis record.
    pub fn channel_inception(&self) -> RiverResult<&ChannelInception> {
        match &self.state {
            StreamState::Channel(s) => Ok(&s.inception),
            _ => Err(self.wrong_kind(StreamKind::Channel)),
        }
    }

    /// DM genesis record.
    pub fn dm_channel_inception(&self) -> RiverResult<&DmChannelInception> {
        match &self.state {
            StreamState::DmChannel(s) => Ok(&s.inception),
            _ => Err(self.wrong_kind(StreamKind::DmChannel)),
        }
    }

    /// Group DM genesis record.
    pub fn gdm_channel_inception(&self) -> RiverResult<&GdmChannelInception> {
        match &self.state {
            StreamState::GdmChannel(s) => Ok(&s.inception),
            _ => Err(self.wrong_kind(StreamKind::GdmChannel)),
        }
    }

    /// Media genesis record.
    pub fn media_inception(&self) -> RiverResult<&MediaInception> {
        match &self.state {
            StreamState::Media(s) => Ok(&s.inception),
            _ => Err(self.wrong_kind(StreamKind::Media)),
        }
    }

    /// Channel entry of a space; `None` when the channel was never created.
    pub fn channel_info(&self, channel_id: &StreamId) -> RiverResult<Option<&SpaceChannelInfo>> {
        match &self.state {
            StreamState::Space(s) => Ok(s.channels.get(channel_id)),
            _ => Err(self.wrong_kind(StreamKind::Space)),
        }
    }

    /// Membership op the user stream records for `stream_id`.
    pub fn user_membership(&self, stream_id: &StreamId) -> RiverResult<MembershipOp> {
        match &self.state {
            StreamState::User(s) => Ok(s
                .memberships
                .get(stream_id)
                .map(|m| m.op)
                .unwrap_or_default()),
            _ => Err(self.wrong_kind(StreamKind::User)),
        }
    }

    // -------------------------------------------------------------------------
    // Next event validation
    // -------------------------------------------------------------------------

    /// Check that `event` references a known, recent miniblock and is not
    /// already part of the stream.
    pub fn validate_next_event(
        &self,
        recency: &RecencyConstraintsConfig,
        event: &ParsedEvent,
        now: DateTime<Utc>,
    ) -> RiverResult<()> {
        let prev_hash = event
            .event
            .prev_miniblock_hash
            .as_deref()
            .ok_or_else(|| RiverError::invalid_argument("event has no prev miniblock hash"))?;

        let position = self
            .blocks
            .iter()
            .rposition(|block| block.hash == prev_hash)
            .ok_or_else(|| {
                RiverError::new(ErrorCode::BadPrevMiniblockHash, "prev miniblock not found")
                    .tag("streamId", &self.stream_id)
                    .tag("prevMiniblockHash", format_hash_short(prev_hash))
                    .func("validate_next_event")
            })?;

        let later = &self.blocks[position + 1..];
        if let Some(next) = later.first() {
            let age = now.signed_duration_since(next.timestamp);
            if age > recency.max_age() {
                return Err(RiverError::new(
                    ErrorCode::BadPrevMiniblockHash,
                    "prev miniblock is too old",
                )
                .tag("streamId", &self.stream_id)
                .tag("prevMiniblockNum", self.blocks[position].num)
                .tag("ageMs", age.num_milliseconds())
                .func("validate_next_event"));
            }
            let generations = later.len() as u64;
            if recency.generations > 0 && generations > recency.generations {
                return Err(RiverError::new(
                    ErrorCode::BadPrevMiniblockHash,
                    "prev miniblock is too many generations behind",
                )
                .tag("streamId", &self.stream_id)
                .tag("generations", generations)
                .tag("maxGenerations", recency.generations)
                .func("validate_next_event"));
            }
            if let Some(block) = later.iter().find(|block| block.contains(&event.hash)) {
                return Err(duplicate_event(&self.stream_id, event).tag("miniblockNum", block.num));
            }
        }

        if self.minipool.iter().any(|e| e.hash == event.hash) {
            return Err(duplicate_event(&self.stream_id, event).tag("location", "minipool"));
        }
        Ok(())
    }
}

fn duplicate_event(stream_id: &StreamId, event: &ParsedEvent) -> RiverError {
    RiverError::new(ErrorCode::DuplicateEvent, "event is already in the stream")
        .tag("streamId", stream_id)
        .tag("eventHash", event.short_hash())
        .func("validate_next_event")
}

fn ensure_payload_kind(kind: StreamKind, event: &ParsedEvent) -> RiverResult<()> {
    if event.payload().is_allowed_in(kind) {
        Ok(())
    } else {
        Err(RiverError::invalid_argument("payload type does not match stream type")
            .tag("streamKind", kind)
            .tag("payload", event.payload().type_name()))
    }
}
