//! Add-event admission rules
//!
//! [`can_add_event`] decides whether a parsed event may be appended to a
//! stream. It first validates the event against the stream's miniblock history,
//! then dispatches on payload and content kind to compose a rule with
//! [`AddEventRuleBuilder`].

use crate::builder::{
    AddEventDecision, AddEventRuleBuilder, RequiredParentEvent, RuleCheck, Verdict,
};
use crate::errors::{invalid_content_type, unknown_content_type, unknown_payload_type};
use chrono::{DateTime, Utc};
use river_core::protocol::*;
use river_core::{
    ChainAuthArgs, ErrorCode, ParsedEvent, Permission, RiverError, RiverResult, StreamConfig,
    StreamId, StreamKind, StreamView,
};
use tracing::{debug, debug_span};

/// Decide whether `event` may be appended to the stream described by `view`.
///
/// Returns the chain authorization and parent event the caller must satisfy
/// before accepting the event, `NoOp` when the event would change nothing, or
/// the rejection.
pub fn can_add_event(
    cfg: &StreamConfig,
    valid_node_addresses: &[String],
    now: DateTime<Utc>,
    event: &ParsedEvent,
    view: &StreamView,
) -> RiverResult<AddEventDecision> {
    let span = debug_span!(
        "can_add_event",
        stream_id = %view.stream_id(),
        event_hash = %event.short_hash()
    );
    let _enter = span.enter();

    if event.event.prev_miniblock_hash.is_none() {
        return Err(RiverError::invalid_argument("event has no prev miniblock hash"));
    }
    view.validate_next_event(&cfg.recency_constraints, event, now)?;
    view.check_payload_kind(event)?;

    let params = AddEventParams {
        cfg,
        valid_node_addresses,
        event,
        view,
    };
    let builder = params.rules();
    debug!(
        ?builder,
        payload = event.payload().type_name(),
        content = event.payload().content_name(),
        "can_add_event"
    );

    let result = builder.run();
    match &result {
        Ok(decision) => debug!(%decision, "can_add_event decided"),
        Err(err) => debug!(error = %err, "can_add_event rejected"),
    }
    result
}

/// Check a requested membership op against the current one.
///
/// `INVITE → {JOIN, LEAVE}`, `JOIN → {LEAVE}`, `LEAVE → {INVITE, JOIN}` and
/// `UNSPECIFIED → {INVITE, JOIN}` accept. Repeating the current op and leaving
/// without a membership are no-ops.
pub fn validate_membership_transition(
    current: MembershipOp,
    requested: MembershipOp,
) -> RiverResult<Verdict> {
    if requested == MembershipOp::Unspecified {
        return Err(RiverError::invalid_argument("membership op is unspecified"));
    }
    if current == requested {
        return Ok(Verdict::NoOp);
    }
    match current {
        MembershipOp::Invite | MembershipOp::Leave => Ok(Verdict::Accept),
        MembershipOp::Join => {
            if requested == MembershipOp::Leave {
                Ok(Verdict::Accept)
            } else {
                Err(RiverError::permission_denied("only leave is valid from join")
                    .tag("op", requested))
            }
        }
        MembershipOp::Unspecified => Ok(Verdict::accept_if(requested != MembershipOp::Leave)),
    }
}

struct AddEventParams<'a> {
    cfg: &'a StreamConfig,
    valid_node_addresses: &'a [String],
    event: &'a ParsedEvent,
    view: &'a StreamView,
}

impl<'a> AddEventParams<'a> {
    fn rules(&self) -> AddEventRuleBuilder<'_> {
        let event: &'a ParsedEvent = self.event;
        let payload = event.payload();
        match payload {
            Payload::Channel(content) => self.channel_rules(payload, content),
            Payload::DmChannel(content) => self.dm_channel_rules(payload, content),
            Payload::GdmChannel(content) => self.gdm_channel_rules(payload, content),
            Payload::Space(content) => self.space_rules(payload, content),
            Payload::User(content) => self.user_rules(payload, content),
            Payload::UserDeviceKey(content) => match content {
                UserDeviceKeyPayload::Inception(_) => {
                    AddEventRuleBuilder::new().fail(invalid_content_type(payload))
                }
                UserDeviceKeyPayload::EncryptionDevice(_) => {
                    AddEventRuleBuilder::new().check(move || self.creator_is_member())
                }
                UserDeviceKeyPayload::Unrecognized { type_tag } => {
                    AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
                }
            },
            Payload::UserSettings(content) => match content {
                UserSettingsPayload::Inception(_) => {
                    AddEventRuleBuilder::new().fail(invalid_content_type(payload))
                }
                UserSettingsPayload::FullyReadMarkers(_) | UserSettingsPayload::UserBlock(_) => {
                    AddEventRuleBuilder::new().check(move || self.creator_is_member())
                }
                UserSettingsPayload::Unrecognized { type_tag } => {
                    AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
                }
            },
            Payload::UserInbox(content) => match content {
                UserInboxPayload::Inception(_) => {
                    AddEventRuleBuilder::new().fail(invalid_content_type(payload))
                }
                // Written by other users' clients; the inbox owner need not be involved.
                UserInboxPayload::GroupEncryptionSessions(_) => {
                    AddEventRuleBuilder::new().check(|| Ok(Verdict::Accept))
                }
                UserInboxPayload::Ack(_) => {
                    AddEventRuleBuilder::new().check(move || self.creator_is_member())
                }
                UserInboxPayload::Unrecognized { type_tag } => {
                    AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
                }
            },
            Payload::Media(content) => match content {
                MediaPayload::Inception(_) => {
                    AddEventRuleBuilder::new().fail(invalid_content_type(payload))
                }
                MediaPayload::Chunk(chunk) => {
                    AddEventRuleBuilder::new().check(move || self.can_add_media_chunk(chunk))
                }
                MediaPayload::Unrecognized { type_tag } => {
                    AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
                }
            },
            Payload::Common(content) => self.common_rules(payload, content),
            Payload::Unrecognized { .. } => {
                AddEventRuleBuilder::new().fail(unknown_payload_type(payload))
            }
        }
    }

    fn channel_rules(
        &self,
        payload: &Payload,
        content: &'a ChannelPayload,
    ) -> AddEventRuleBuilder<'_> {
        match content {
            ChannelPayload::Inception(_) => {
                AddEventRuleBuilder::new().fail(invalid_content_type(payload))
            }
            ChannelPayload::Membership(membership) => {
                let rules = MembershipRules::new(self, membership);
                AddEventRuleBuilder::new()
                    .check(move || rules.valid_transition())
                    .check(move || rules.valid_membership_limit())
                    .require_chain_auth(move || rules.channel_membership_entitlements())
                    .require_parent_event(move || rules.require_stream_parent_membership())
            }
            ChannelPayload::Message(_) => AddEventRuleBuilder::new()
                .check(move || self.creator_is_member())
                .require_chain_auth(move || self.channel_entitlements(Permission::Write)),
            ChannelPayload::Redaction { .. } => AddEventRuleBuilder::new()
                .check(move || self.creator_is_member())
                .require_chain_auth(move || self.channel_entitlements(Permission::Redact)),
            ChannelPayload::Unrecognized { type_tag } => {
                AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
            }
        }
    }

    fn dm_channel_rules(
        &self,
        payload: &Payload,
        content: &'a DmChannelPayload,
    ) -> AddEventRuleBuilder<'_> {
        match content {
            DmChannelPayload::Inception(_) => {
                AddEventRuleBuilder::new().fail(invalid_content_type(payload))
            }
            DmChannelPayload::Membership(membership) => {
                let rules = MembershipRules::new(self, membership);
                AddEventRuleBuilder::new()
                    .check(move || rules.valid_transition_for_dm())
                    .check(move || rules.valid_membership_limit())
            }
            DmChannelPayload::Message(_)
            | DmChannelPayload::DisplayName(_)
            | DmChannelPayload::Username(_) => {
                AddEventRuleBuilder::new().check(move || self.creator_is_member())
            }
            DmChannelPayload::Unrecognized { type_tag } => {
                AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
            }
        }
    }

    fn gdm_channel_rules(
        &self,
        payload: &Payload,
        content: &'a GdmChannelPayload,
    ) -> AddEventRuleBuilder<'_> {
        match content {
            GdmChannelPayload::Inception(_) => {
                AddEventRuleBuilder::new().fail(invalid_content_type(payload))
            }
            GdmChannelPayload::Membership(membership) => {
                let rules = MembershipRules::new(self, membership);
                AddEventRuleBuilder::new()
                    .check(move || rules.valid_transition_for_gdm())
                    .check(move || rules.valid_membership_limit())
            }
            GdmChannelPayload::Message(_)
            | GdmChannelPayload::DisplayName(_)
            | GdmChannelPayload::Username(_)
            | GdmChannelPayload::ChannelProperties(_) => {
                AddEventRuleBuilder::new().check(move || self.creator_is_member())
            }
            GdmChannelPayload::Unrecognized { type_tag } => {
                AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
            }
        }
    }

    fn space_rules(&self, payload: &Payload, content: &'a SpacePayload) -> AddEventRuleBuilder<'_> {
        match content {
            SpacePayload::Inception(_) => {
                AddEventRuleBuilder::new().fail(invalid_content_type(payload))
            }
            SpacePayload::Membership(membership) => {
                let rules = MembershipRules::new(self, membership);
                AddEventRuleBuilder::new()
                    .check(move || rules.valid_transition())
                    .check(move || rules.valid_membership_limit())
                    .require_chain_auth(move || rules.space_membership_entitlements())
            }
            SpacePayload::Channel(channel) => {
                // Updates come from members; creation and deletion are mirrored by nodes
                // from the channel stream and registry.
                let builder = if channel.op == ChannelOp::Updated {
                    AddEventRuleBuilder::new().check(move || self.creator_is_member())
                } else {
                    AddEventRuleBuilder::new().check(move || self.creator_is_valid_node())
                };
                builder.check(move || self.valid_space_channel_op(channel))
            }
            SpacePayload::Username(_) | SpacePayload::DisplayName(_) => {
                AddEventRuleBuilder::new().check(move || self.creator_is_member())
            }
            SpacePayload::SpaceImage(_) => AddEventRuleBuilder::new()
                .check(move || self.creator_is_member())
                .require_chain_auth(move || {
                    self.space_entitlements(Permission::ModifySpaceSettings)
                }),
            SpacePayload::UpdateChannelAutojoin { channel_id, .. } => AddEventRuleBuilder::new()
                .check(move || self.creator_is_member())
                .check(move || self.channel_exists_in_space(channel_id))
                .require_chain_auth(move || self.space_entitlements(Permission::AddRemoveChannels)),
            SpacePayload::Unrecognized { type_tag } => {
                AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
            }
        }
    }

    fn user_rules(&self, payload: &Payload, content: &'a UserPayload) -> AddEventRuleBuilder<'_> {
        match content {
            UserPayload::Inception(_) => {
                AddEventRuleBuilder::new().fail(invalid_content_type(payload))
            }
            UserPayload::UserMembership(membership) => AddEventRuleBuilder::new()
                .check_one_of([
                    Box::new(move || self.creator_is_member()) as RuleCheck<'_>,
                    Box::new(move || self.creator_is_valid_node()),
                ])
                .check(move || self.valid_user_membership_transition(membership))
                .require_parent_event(move || self.parent_event_for_user_membership(membership)),
            UserPayload::UserMembershipAction(action) => AddEventRuleBuilder::new()
                .check(move || self.creator_is_member())
                .require_parent_event(move || self.parent_event_for_user_membership_action(action)),
            UserPayload::Unrecognized { type_tag } => {
                AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
            }
        }
    }

    fn common_rules(
        &self,
        payload: &Payload,
        content: &'a CommonPayload,
    ) -> AddEventRuleBuilder<'_> {
        let member_or_invited = move || {
            [
                Box::new(move || self.creator_is_member()) as RuleCheck<'_>,
                Box::new(move || self.creator_is_invited()),
            ]
        };
        match content {
            CommonPayload::KeySolicitation(solicitation) => AddEventRuleBuilder::new()
                .check_one_of(member_or_invited())
                .check(move || valid_key_solicitation(solicitation)),
            CommonPayload::KeyFulfillment(fulfillment) => {
                let solicitations = self.view.key_solicitations(&fulfillment.user_id);
                AddEventRuleBuilder::new()
                    .check_one_of(member_or_invited())
                    .check(move || valid_key_fulfillment(fulfillment, solicitations))
            }
            CommonPayload::Unrecognized { type_tag } => {
                AddEventRuleBuilder::new().fail(unknown_content_type(payload, *type_tag))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Checks
    // -------------------------------------------------------------------------

    fn creator_id(&self) -> &str {
        self.event.creator_user_id()
    }

    fn is_valid_node(&self, user_id: &str) -> bool {
        self.valid_node_addresses.iter().any(|node| node == user_id)
    }

    fn creator_is_member(&self) -> RiverResult<Verdict> {
        let creator_id = self.creator_id();
        if !self.view.is_member(creator_id)? {
            return Err(RiverError::permission_denied("creator is not a member of the stream")
                .tag("creatorId", creator_id)
                .tag("streamId", self.view.stream_id()));
        }
        Ok(Verdict::Accept)
    }

    /// Accepts creators holding an outstanding invite; no-op otherwise.
    fn creator_is_invited(&self) -> RiverResult<Verdict> {
        if !self.view.kind().is_joinable() {
            return Ok(Verdict::NoOp);
        }
        let membership = self.view.get_membership(self.creator_id())?;
        Ok(Verdict::accept_if(membership == MembershipOp::Invite))
    }

    fn creator_is_valid_node(&self) -> RiverResult<Verdict> {
        let creator_id = self.creator_id();
        if !self.is_valid_node(creator_id) {
            return Err(RiverError::new(
                ErrorCode::UnknownNode,
                "no record for node in valid node addresses",
            )
            .tag("address", creator_id)
            .tag("nodes", self.valid_node_addresses.join(","))
            .func("check_node_is_valid"));
        }
        Ok(Verdict::Accept)
    }

    fn valid_space_channel_op(&self, channel: &SpaceChannel) -> RiverResult<Verdict> {
        let Some(current) = self.view.channel_info(&channel.channel_id)? else {
            return Ok(Verdict::accept_if(channel.op == ChannelOp::Created));
        };
        if current.op == ChannelOp::Deleted {
            return Err(RiverError::permission_denied("channel is deleted")
                .tag("channelId", &channel.channel_id));
        }
        Ok(Verdict::accept_if(channel.op != ChannelOp::Created))
    }

    fn channel_exists_in_space(&self, channel_id: &StreamId) -> RiverResult<Verdict> {
        match self.view.channel_info(channel_id)? {
            Some(_) => Ok(Verdict::Accept),
            None => Err(RiverError::new(ErrorCode::NotFound, "channel not found")
                .tag("channelId", channel_id)
                .tag("spaceId", self.view.stream_id())),
        }
    }

    fn can_add_media_chunk(&self, chunk: &MediaChunk) -> RiverResult<Verdict> {
        self.creator_is_member()?;
        let inception = self.view.media_inception()?;
        if chunk.chunk_index < 0 || chunk.chunk_index >= inception.chunk_count {
            return Err(RiverError::invalid_argument("chunk index out of bounds")
                .tag("chunkIndex", chunk.chunk_index)
                .tag("chunkCount", inception.chunk_count));
        }
        let max_chunk_size = self.cfg.media.max_chunk_size;
        if chunk.data.len() > max_chunk_size {
            return Err(
                RiverError::invalid_argument("chunk size must be less than or equal to limit")
                    .tag("maxChunkSize", max_chunk_size)
                    .tag("chunkSize", chunk.data.len()),
            );
        }
        Ok(Verdict::Accept)
    }

    fn valid_user_membership_transition(
        &self,
        membership: &UserMembership,
    ) -> RiverResult<Verdict> {
        let current = self.view.user_membership(&membership.stream_id)?;
        validate_membership_transition(current, membership.op)
    }

    // -------------------------------------------------------------------------
    // Producers
    // -------------------------------------------------------------------------

    fn space_entitlements(&self, permission: Permission) -> RiverResult<Option<ChainAuthArgs>> {
        Ok(Some(ChainAuthArgs::for_space(
            self.view.stream_id().clone(),
            self.creator_id(),
            permission,
        )))
    }

    fn channel_entitlements(&self, permission: Permission) -> RiverResult<Option<ChainAuthArgs>> {
        let inception = self.view.channel_inception()?;
        Ok(Some(ChainAuthArgs::for_channel(
            inception.space_id.clone(),
            self.view.stream_id().clone(),
            self.creator_id(),
            permission,
        )))
    }

    /// The user stream records a membership; the target stream must hold the matching one.
    fn parent_event_for_user_membership(
        &self,
        membership: &UserMembership,
    ) -> RiverResult<Option<RequiredParentEvent>> {
        let creator_id = self.creator_id();
        let user_id = self.view.stream_id().postfix();
        // Nodes relay memberships on behalf of the inviter.
        let initiator_id = match &membership.inviter {
            Some(inviter) if self.is_valid_node(creator_id) => inviter.as_str(),
            _ => creator_id,
        };
        let kind = membership
            .stream_id
            .kind()
            .filter(StreamKind::is_joinable)
            .ok_or_else(|| {
                RiverError::invalid_argument("invalid stream id for user membership op")
                    .tag("streamId", &membership.stream_id)
            })?;
        let payload =
            Payload::membership_for(kind, Membership::new(membership.op, user_id, initiator_id))?;
        Ok(Some(RequiredParentEvent {
            stream_id: membership.stream_id.clone(),
            payload,
        }))
    }

    fn parent_event_for_user_membership_action(
        &self,
        action: &UserMembershipAction,
    ) -> RiverResult<Option<RequiredParentEvent>> {
        let stream_id = StreamId::user_stream(&action.user_id)?;
        let payload = Payload::user_membership(
            action.op,
            action.stream_id.clone(),
            Some(self.creator_id().to_string()),
        );
        Ok(Some(RequiredParentEvent { stream_id, payload }))
    }
}

// =============================================================================
// Membership rules
// =============================================================================

/// Rules for a membership payload on a space, channel, DM or GDM stream.
#[derive(Clone, Copy)]
struct MembershipRules<'a> {
    params: &'a AddEventParams<'a>,
    membership: &'a Membership,
}

impl<'a> MembershipRules<'a> {
    fn new(params: &'a AddEventParams<'a>, membership: &'a Membership) -> Self {
        Self { params, membership }
    }

    fn current(&self, user_id: &str) -> RiverResult<MembershipOp> {
        self.params.view.get_membership(user_id)
    }

    /// Membership events are mirrored from user streams by nodes.
    fn valid_transition(&self) -> RiverResult<Verdict> {
        self.params.creator_is_valid_node()?;
        let current = self.current(&self.membership.user_id)?;
        validate_membership_transition(current, self.membership.op)
    }

    fn valid_membership_limit(&self) -> RiverResult<Verdict> {
        if !matches!(self.membership.op, MembershipOp::Join | MembershipOp::Invite) {
            return Ok(Verdict::Accept);
        }
        let Some(limit) = self
            .params
            .cfg
            .membership_limits
            .for_kind(self.params.view.kind())
        else {
            return Ok(Verdict::Accept);
        };
        if self.params.view.joined_count()? >= limit {
            return Err(RiverError::invalid_argument("membership limit reached")
                .tag("membershipLimit", limit));
        }
        Ok(Verdict::Accept)
    }

    /// DMs have no on-chain entitlements; membership is confined to the two parties.
    fn valid_transition_for_dm(&self) -> RiverResult<Verdict> {
        if self.valid_transition()? == Verdict::NoOp {
            return Ok(Verdict::NoOp);
        }
        let inception = self.params.view.dm_channel_inception()?;
        let first = river_core::address_hex(&inception.first_party_address)?;
        let second = river_core::address_hex(&inception.second_party_address)?;
        let is_party = |id: &str| id == first || id == second;

        let initiator = self.membership.initiator_id.as_str();
        if !self.params.is_valid_node(initiator) && !is_party(initiator) {
            return Err(RiverError::permission_denied("initiator is not a member of DM")
                .tag("initiator", initiator));
        }
        if !is_party(&self.membership.user_id) {
            return Err(RiverError::permission_denied("user is not a member of DM")
                .tag("user", &self.membership.user_id));
        }
        if !matches!(self.membership.op, MembershipOp::Join | MembershipOp::Leave) {
            return Err(RiverError::permission_denied(
                "only join and leave events are permitted",
            )
            .tag("op", self.membership.op));
        }
        Ok(Verdict::Accept)
    }

    /// GDMs have no on-chain entitlements; invites and leaves must come from
    /// current participants and joins must follow an invite.
    fn valid_transition_for_gdm(&self) -> RiverResult<Verdict> {
        if self.valid_transition()? == Verdict::NoOp {
            return Ok(Verdict::NoOp);
        }
        let initiator = self.membership.initiator_id.as_str();
        match self.membership.op {
            // An invited participant may invite others before joining.
            MembershipOp::Invite | MembershipOp::Leave => {
                let current = self.current(initiator)?;
                if !matches!(current, MembershipOp::Join | MembershipOp::Invite) {
                    return Err(RiverError::permission_denied(format!(
                        "initiator of {} is not a member of GDM",
                        self.membership.op.as_str().to_lowercase()
                    ))
                    .tag("initiator", initiator));
                }
                Ok(Verdict::Accept)
            }
            MembershipOp::Join => {
                let current = self.current(&self.membership.user_id)?;
                if current != MembershipOp::Invite {
                    return Err(RiverError::permission_denied("user is not invited to GDM")
                        .tag("user", &self.membership.user_id));
                }
                Ok(Verdict::Accept)
            }
            MembershipOp::Unspecified => {
                Err(RiverError::invalid_argument("membership op is unspecified"))
            }
        }
    }

    /// Permission and principal the requested transition needs on chain.
    fn permission_for_membership_op(&self) -> RiverResult<Option<(Permission, &'a str)>> {
        let membership = self.membership;
        let current = self.current(&membership.user_id)?;
        match membership.op {
            MembershipOp::Invite => {
                if current == MembershipOp::Join {
                    return Err(RiverError::failed_precondition(
                        "user is already a member of the stream",
                    )
                    .tag("user", &membership.user_id)
                    .tag("initiator", &membership.initiator_id));
                }
                Ok(Some((Permission::Invite, membership.initiator_id.as_str())))
            }
            MembershipOp::Join => Ok(Some((Permission::Read, membership.user_id.as_str()))),
            MembershipOp::Leave => {
                if current != MembershipOp::Join {
                    return Err(RiverError::failed_precondition(
                        "user is not a member of the stream",
                    )
                    .tag("user", &membership.user_id)
                    .tag("initiator", &membership.initiator_id));
                }
                if membership.user_id != membership.initiator_id {
                    Ok(Some((Permission::Owner, membership.initiator_id.as_str())))
                } else {
                    Ok(None)
                }
            }
            MembershipOp::Unspecified => Err(RiverError::bad_event("need valid membership op")
                .tag("op", membership.op)),
        }
    }

    fn space_membership_entitlements(&self) -> RiverResult<Option<ChainAuthArgs>> {
        let Some((permission, principal)) = self.permission_for_membership_op()? else {
            return Ok(None);
        };
        Ok(Some(ChainAuthArgs::for_space(
            self.params.view.stream_id().clone(),
            principal,
            permission,
        )))
    }

    fn channel_membership_entitlements(&self) -> RiverResult<Option<ChainAuthArgs>> {
        let inception = self.params.view.channel_inception()?;
        let Some((permission, principal)) = self.permission_for_membership_op()? else {
            return Ok(None);
        };
        Ok(Some(ChainAuthArgs::for_channel(
            inception.space_id.clone(),
            self.params.view.stream_id().clone(),
            principal,
            permission,
        )))
    }

    /// Joining or being invited to a channel requires a JOIN of the parent
    /// space in the subject's user stream.
    fn require_stream_parent_membership(&self) -> RiverResult<Option<RequiredParentEvent>> {
        if self.membership.op == MembershipOp::Leave {
            return Ok(None);
        }
        let Some(parent_id) = self.params.view.stream_parent_id() else {
            return Ok(None);
        };
        let stream_id = StreamId::user_stream(&self.membership.user_id)?;
        Ok(Some(RequiredParentEvent {
            stream_id,
            payload: Payload::user_membership(
                MembershipOp::Join,
                parent_id.clone(),
                Some(self.membership.initiator_id.clone()),
            ),
        }))
    }
}

// =============================================================================
// Key exchange
// =============================================================================

fn valid_key_solicitation(solicitation: &KeySolicitation) -> RiverResult<Verdict> {
    if solicitation.session_ids.is_empty() {
        return Err(RiverError::invalid_argument(
            "session ids are required for all solicitations",
        ));
    }
    if !solicitation.session_ids.is_sorted() {
        return Err(RiverError::invalid_argument("session ids must be sorted"));
    }
    if solicitation.session_ids.iter().any(String::is_empty) {
        return Err(RiverError::invalid_argument("session ids must not be empty"));
    }
    Ok(Verdict::Accept)
}

/// A fulfillment must answer an earlier solicitation from the same device,
/// either a new device or one still waiting on one of the fulfilled sessions.
fn valid_key_fulfillment(
    fulfillment: &KeyFulfillment,
    solicitations: &[KeySolicitation],
) -> RiverResult<Verdict> {
    if !fulfillment.session_ids.is_sorted() {
        return Err(RiverError::invalid_argument("session ids must be sorted")
            .tag("userId", &fulfillment.user_id));
    }
    let solicitation = solicitations
        .iter()
        .find(|s| s.device_key == fulfillment.device_key)
        .ok_or_else(|| {
            RiverError::invalid_argument("solicitation with matching device key not found")
                .tag("userId", &fulfillment.user_id)
                .tag("deviceKey", &fulfillment.device_key)
        })?;
    if solicitation.is_new_device
        || solicitation
            .session_ids
            .iter()
            .any(|id| fulfillment.session_ids.contains(id))
    {
        return Ok(Verdict::Accept);
    }
    Err(
        RiverError::new(ErrorCode::NotFound, "solicitation with common session ids not found")
            .tag("userId", &fulfillment.user_id)
            .tag("deviceKey", &fulfillment.device_key),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use river_core::ErrorCode;

    #[test]
    fn test_transition_graph() {
        use MembershipOp::*;
        let accept = [
            (Invite, Join),
            (Invite, Leave),
            (Join, Leave),
            (Leave, Invite),
            (Leave, Join),
            (Unspecified, Invite),
            (Unspecified, Join),
        ];
        for (current, requested) in accept {
            assert_eq!(
                validate_membership_transition(current, requested).unwrap(),
                Verdict::Accept,
                "{current} -> {requested}"
            );
        }
        for op in [Invite, Join, Leave] {
            assert_eq!(validate_membership_transition(op, op).unwrap(), Verdict::NoOp);
        }
        assert_eq!(
            validate_membership_transition(Unspecified, Leave).unwrap(),
            Verdict::NoOp
        );
        assert_eq!(
            validate_membership_transition(Join, Invite).unwrap_err().code,
            ErrorCode::PermissionDenied
        );
        for current in MembershipOp::ALL {
            assert_eq!(
                validate_membership_transition(current, Unspecified)
                    .unwrap_err()
                    .code,
                ErrorCode::InvalidArgument
            );
        }
    }

    #[test]
    fn test_key_solicitation_validation() {
        let solicitation = |ids: &[&str]| KeySolicitation {
            device_key: "dk".into(),
            fallback_key: "fk".into(),
            is_new_device: false,
            session_ids: ids.iter().map(|s| s.to_string()).collect(),
        };
        assert!(valid_key_solicitation(&solicitation(&["a", "b"])).is_ok());
        assert!(valid_key_solicitation(&solicitation(&[])).is_err());
        assert!(valid_key_solicitation(&solicitation(&["b", "a"])).is_err());
        assert!(valid_key_solicitation(&solicitation(&["", "a"])).is_err());
    }

    fn session_ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_key_fulfillment_matches_solicitation() {
        let fulfillment = |device: &str, ids: &[&str]| KeyFulfillment {
            user_id: "0xabc".into(),
            device_key: device.into(),
            session_ids: session_ids(ids),
        };
        let solicited = |device: &str, is_new_device, ids: &[&str]| KeySolicitation {
            device_key: device.into(),
            fallback_key: "fk".into(),
            is_new_device,
            session_ids: session_ids(ids),
        };
        let pending = [solicited("dk", false, &["a", "b"]), solicited("new", true, &["z"])];

        assert!(valid_key_fulfillment(&fulfillment("dk", &["b", "c"]), &pending).is_ok());
        assert!(valid_key_fulfillment(&fulfillment("new", &["q"]), &pending).is_ok());

        let err = valid_key_fulfillment(&fulfillment("dk", &["c", "d"]), &pending).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.tag_value("deviceKey"), Some("dk"));

        let err = valid_key_fulfillment(&fulfillment("other", &["a"]), &pending).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        let err = valid_key_fulfillment(&fulfillment("dk", &["a"]), &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let err = valid_key_fulfillment(&fulfillment("dk", &["b", "a"]), &pending).unwrap_err();
        assert_eq!(err.message, "session ids must be sorted");
    }
}
