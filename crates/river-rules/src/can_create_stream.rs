//! Create-stream admission rules
//!
//! [`can_create_stream`] validates the genesis events of a new stream and
//! reports what must hold elsewhere for the creation to proceed: streams the
//! creator must belong to, users that must exist, an optional on-chain
//! entitlement and the events to derive into other streams afterwards.

use crate::builder::{CreateStreamRuleBuilder, CreateStreamRules, DerivedEvent};
use crate::errors::unknown_payload_type;
use river_core::protocol::*;
use river_core::{
    address_hex, ChainAuthArgs, ParsedEvent, Permission, RiverError, RiverResult, StreamConfig,
    StreamId, StreamKind, MIN_STREAM_ID_POSTFIX_LEN,
};
use tracing::{debug, debug_span};

/// Decide whether a stream can be created from `events`.
pub fn can_create_stream(
    cfg: &StreamConfig,
    stream_id: &StreamId,
    events: &[ParsedEvent],
) -> RiverResult<CreateStreamRules> {
    let span = debug_span!("can_create_stream", stream_id = %stream_id, events = events.len());
    let _enter = span.enter();

    let Some(inception_event) = events.first() else {
        return Err(RiverError::bad_creation_params("no events"));
    };
    let creator_address = &inception_event.event.creator_address;
    let creator_id = inception_event.creator_user_id();
    let creator_stream_id = StreamId::user_stream(creator_id)?;

    for event in events {
        if event.event.prev_miniblock_hash.is_some() {
            return Err(RiverError::bad_creation_params(
                "prev miniblock hash must be absent in genesis events",
            ));
        }
        if event.event.creator_address != *creator_address {
            return Err(RiverError::bad_creation_params(
                "all events should have the same creator address",
            )
            .tag("creatorId", creator_id)
            .tag("eventCreatorId", event.creator_user_id()));
        }
    }

    let payload = inception_event.payload();
    let Some(inception_stream_id) = payload.inception_stream_id() else {
        return Err(RiverError::bad_creation_params("first event is not an inception event")
            .tag("payload", payload.type_name())
            .tag("content", payload.content_name()));
    };
    if inception_stream_id != stream_id {
        return Err(RiverError::bad_creation_params(
            "stream id in request does not match stream id in inception event",
        )
        .tag("streamId", stream_id)
        .tag("inceptionStreamId", inception_stream_id));
    }

    let params = CreateStreamParams {
        cfg,
        stream_id,
        events,
        creator_id,
        creator_stream_id,
    };
    let builder = params.rules();
    debug!(?builder, payload = payload.type_name(), "can_create_stream");

    let result = builder.run();
    match &result {
        Ok(rules) => debug!(
            required_memberships = rules.required_memberships.len(),
            required_users = rules.required_users.len(),
            chain_auth = rules.chain_auth.is_some(),
            derived_events = rules.derived_events.len(),
            "can_create_stream decided"
        ),
        Err(err) => debug!(error = %err, "can_create_stream rejected"),
    }
    result
}

struct CreateStreamParams<'a> {
    cfg: &'a StreamConfig,
    stream_id: &'a StreamId,
    events: &'a [ParsedEvent],
    creator_id: &'a str,
    creator_stream_id: StreamId,
}

impl<'a> CreateStreamParams<'a> {
    fn rules(&self) -> CreateStreamRuleBuilder<'_> {
        let events: &'a [ParsedEvent] = self.events;
        let payload = events[0].payload();
        let builder = CreateStreamRuleBuilder::new(self.creator_stream_id.clone());
        match payload {
            Payload::Space(SpacePayload::Inception(_)) => builder
                .check(move || self.stream_id_has_prefix(StreamKind::Space))
                .check(move || self.event_count_matches(2))
                .check(move || self.validate_join_event(StreamKind::Space))
                .require_memberships(move || Ok(vec![self.creator_stream_id.clone()]))
                .require_chain_auth(move || {
                    Ok(Some(ChainAuthArgs::for_space(
                        self.stream_id.clone(),
                        self.creator_id,
                        Permission::AddRemoveChannels,
                    )))
                })
                .require_derived_event(move || self.derived_membership_event()),

            Payload::Channel(ChannelPayload::Inception(inception)) => builder
                .check(move || self.stream_id_has_prefix(StreamKind::Channel))
                .check(move || self.event_count_matches(2))
                .check(move || self.validate_join_event(StreamKind::Channel))
                .require_memberships(move || {
                    Ok(vec![self.creator_stream_id.clone(), inception.space_id.clone()])
                })
                .require_chain_auth(move || {
                    Ok(Some(ChainAuthArgs::for_space(
                        inception.space_id.clone(),
                        self.creator_id,
                        Permission::AddRemoveChannels,
                    )))
                })
                .require_derived_event(move || self.derived_channel_space_parent_event(inception))
                .require_derived_event(move || self.derived_membership_event()),

            Payload::Media(MediaPayload::Inception(inception)) => builder
                .check(move || self.stream_id_has_prefix(StreamKind::Media))
                .check(move || self.event_count_matches(1))
                .check(move || self.check_media_inception(inception))
                .require_memberships(move || {
                    Ok(vec![self.creator_stream_id.clone(), inception.channel_id.clone()])
                })
                .require_chain_auth(move || self.media_chain_auth(inception)),

            Payload::DmChannel(DmChannelPayload::Inception(inception)) => builder
                .check(move || self.stream_id_has_prefix(StreamKind::DmChannel))
                .check(move || self.event_count_matches(3))
                .check(move || self.check_dm_inception(inception))
                .require_memberships(move || Ok(vec![self.creator_stream_id.clone()]))
                .require_users(move || Ok(vec![address_hex(&inception.second_party_address)?]))
                .require_derived_events(move || self.derived_dm_membership_events(inception)),

            Payload::GdmChannel(GdmChannelPayload::Inception(_)) => builder
                .check(move || self.stream_id_has_prefix(StreamKind::GdmChannel))
                .check(move || self.event_count_at_least(4))
                .check(move || self.check_gdm_memberships())
                .require_memberships(move || Ok(vec![self.creator_stream_id.clone()]))
                .require_users(move || {
                    Ok(self
                        .gdm_memberships()
                        .skip(1)
                        .map(|m| m.user_id.clone())
                        .collect())
                })
                .require_derived_events(move || self.derived_gdm_membership_events()),

            Payload::User(UserPayload::Inception(_)) => {
                self.user_stream_rules(builder, StreamKind::User)
            }
            Payload::UserDeviceKey(UserDeviceKeyPayload::Inception(_)) => {
                self.user_stream_rules(builder, StreamKind::UserDeviceKey)
            }
            Payload::UserSettings(UserSettingsPayload::Inception(_)) => {
                self.user_stream_rules(builder, StreamKind::UserSettings)
            }
            Payload::UserInbox(UserInboxPayload::Inception(_)) => {
                self.user_stream_rules(builder, StreamKind::UserInbox)
            }

            other => builder.fail(unknown_payload_type(other)),
        }
    }

    fn user_stream_rules<'b>(
        &'b self,
        builder: CreateStreamRuleBuilder<'b>,
        kind: StreamKind,
    ) -> CreateStreamRuleBuilder<'b> {
        builder
            .check(move || self.stream_id_has_prefix(kind))
            .check(move || self.event_count_matches(1))
            .check(move || self.is_creator_user_stream())
    }

    // -------------------------------------------------------------------------
    // Checks
    // -------------------------------------------------------------------------

    fn stream_id_has_prefix(&self, kind: StreamKind) -> RiverResult<()> {
        let prefix = kind.prefix_dash();
        let id = self.stream_id.as_str();
        if !id.starts_with(&prefix) {
            return Err(
                RiverError::bad_creation_params("stream id doesn't match expected prefix")
                    .tag("streamId", id)
                    .tag("expected", prefix),
            );
        }
        if id.len() < prefix.len() + MIN_STREAM_ID_POSTFIX_LEN {
            return Err(RiverError::bad_creation_params("stream id too short").tag("streamId", id));
        }
        Ok(())
    }

    fn event_count_matches(&self, expected: usize) -> RiverResult<()> {
        if self.events.len() != expected {
            return Err(bad_event_count(self.events.len(), expected));
        }
        Ok(())
    }

    fn event_count_at_least(&self, expected: usize) -> RiverResult<()> {
        if self.events.len() < expected {
            return Err(bad_event_count(self.events.len(), expected));
        }
        Ok(())
    }

    /// The second genesis event of a space or channel is the creator joining it.
    fn validate_join_event(&self, kind: StreamKind) -> RiverResult<()> {
        let event = &self.events[1];
        let membership = match (kind, event.payload()) {
            (StreamKind::Space, Payload::Space(SpacePayload::Membership(m)))
            | (StreamKind::Channel, Payload::Channel(ChannelPayload::Membership(m))) => m,
            _ => {
                return Err(RiverError::bad_creation_params(format!(
                    "second event is not a {kind} join event"
                ))
                .tag("payload", event.payload().type_name())
                .tag("content", event.payload().content_name()))
            }
        };
        if membership.op != MembershipOp::Join {
            return Err(RiverError::bad_creation_params("bad join op").tag("op", membership.op));
        }
        if membership.user_id != self.creator_id {
            return Err(RiverError::bad_creation_params("bad join user")
                .tag("id", &membership.user_id)
                .tag("createdBy", self.creator_id));
        }
        Ok(())
    }

    fn check_media_inception(&self, inception: &MediaInception) -> RiverResult<()> {
        if inception.channel_id.is_empty() {
            return Err(RiverError::bad_creation_params(
                "channel id must not be empty for media stream",
            ));
        }
        let max_chunk_count = self.cfg.media.max_chunk_count;
        if inception.chunk_count > max_chunk_count {
            return Err(RiverError::bad_creation_params(format!(
                "chunk count must be less than or equal to {max_chunk_count}"
            ))
            .tag("chunkCount", inception.chunk_count));
        }
        match inception.channel_id.kind() {
            Some(StreamKind::Channel) => match &inception.space_id {
                None => Err(RiverError::bad_creation_params(
                    "space id must not be nil for media stream",
                )),
                Some(space_id) if space_id.is_empty() => Err(RiverError::bad_creation_params(
                    "space id must not be empty for media stream",
                )),
                Some(_) => Ok(()),
            },
            Some(StreamKind::DmChannel) | Some(StreamKind::GdmChannel) => Ok(()),
            _ => Err(RiverError::bad_creation_params("invalid channel id")
                .tag("channelId", &inception.channel_id)),
        }
    }

    fn check_dm_inception(&self, inception: &DmChannelInception) -> RiverResult<()> {
        let first = &inception.first_party_address;
        let second = &inception.second_party_address;
        if first.is_empty() || second.is_empty() {
            return Err(RiverError::bad_creation_params(
                "user ids must not be empty for dm channel",
            ));
        }
        if first == second {
            return Err(RiverError::bad_creation_params(
                "user ids must not be the same for dm channel",
            ));
        }
        let first_party_id = address_hex(first)?;
        if first_party_id != self.creator_id {
            return Err(RiverError::bad_creation_params(
                "creator must be first party for dm channel",
            )
            .tag("firstPartyId", first_party_id)
            .tag("creatorId", self.creator_id));
        }
        if !self.stream_id.is_dm_between(first, second) {
            return Err(RiverError::bad_creation_params("invalid stream id for dm channel")
                .tag("streamId", self.stream_id));
        }
        Ok(())
    }

    fn gdm_memberships(&self) -> impl Iterator<Item = &'a Membership> {
        let events: &'a [ParsedEvent] = self.events;
        events[1..].iter().filter_map(|event| match event.payload() {
            Payload::GdmChannel(GdmChannelPayload::Membership(m)) => Some(m),
            _ => None,
        })
    }

    /// Event 1 is the creator joining; later events add the other members.
    fn check_gdm_memberships(&self) -> RiverResult<()> {
        for (index, event) in self.events.iter().enumerate().skip(1) {
            let Payload::GdmChannel(GdmChannelPayload::Membership(membership)) = event.payload()
            else {
                return Err(RiverError::bad_creation_params(
                    "event is not a gdm channel membership event",
                )
                .tag("index", index));
            };
            if index == 1 {
                if membership.op != MembershipOp::Join {
                    return Err(RiverError::bad_creation_params("membership op does not match")
                        .tag("op", membership.op)
                        .tag("expected", MembershipOp::Join));
                }
                if membership.user_id != self.creator_id {
                    return Err(
                        RiverError::bad_creation_params("membership user id does not match")
                            .tag("userId", &membership.user_id)
                            .tag("expected", self.creator_id),
                    );
                }
            } else if !matches!(membership.op, MembershipOp::Join | MembershipOp::Invite) {
                return Err(RiverError::bad_creation_params("membership op does not match")
                    .tag("op", membership.op)
                    .tag("index", index));
            }
        }
        Ok(())
    }

    fn is_creator_user_stream(&self) -> RiverResult<()> {
        if self.stream_id.postfix() != self.creator_id {
            return Err(RiverError::bad_creation_params(
                "stream id doesn't match creator address",
            )
            .tag("streamId", self.stream_id)
            .tag("creator", self.creator_id));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Producers
    // -------------------------------------------------------------------------

    fn media_chain_auth(&self, inception: &MediaInception) -> RiverResult<Option<ChainAuthArgs>> {
        if inception.channel_id.kind() != Some(StreamKind::Channel) {
            return Ok(None);
        }
        let space_id = inception.space_id.clone().ok_or_else(|| {
            RiverError::bad_creation_params("space id must not be empty for media stream")
        })?;
        Ok(Some(ChainAuthArgs::for_channel(
            space_id,
            inception.channel_id.clone(),
            self.creator_id,
            Permission::Write,
        )))
    }

    /// JOIN of the new stream recorded in the creator's user stream.
    fn derived_membership_event(&self) -> RiverResult<DerivedEvent> {
        Ok(DerivedEvent {
            stream_id: self.creator_stream_id.clone(),
            payload: Payload::user_membership(
                MembershipOp::Join,
                self.stream_id.clone(),
                Some(self.creator_id.to_string()),
            ),
        })
    }

    /// Registers the new channel with its space.
    fn derived_channel_space_parent_event(
        &self,
        inception: &ChannelInception,
    ) -> RiverResult<DerivedEvent> {
        let origin_event = self.events[0].event_ref(inception.stream_id.clone());
        Ok(DerivedEvent {
            stream_id: inception.space_id.clone(),
            payload: Payload::Space(SpacePayload::Channel(SpaceChannel {
                op: ChannelOp::Created,
                channel_id: inception.stream_id.clone(),
                origin_event: Some(origin_event),
                channel_properties: inception.channel_properties.clone(),
                is_default: inception.is_default,
            })),
        })
    }

    fn derived_dm_membership_events(
        &self,
        inception: &DmChannelInception,
    ) -> RiverResult<Vec<DerivedEvent>> {
        [&inception.first_party_address, &inception.second_party_address]
            .into_iter()
            .map(|address| -> RiverResult<DerivedEvent> {
                Ok(DerivedEvent {
                    stream_id: StreamId::user_stream_from_address(address)?,
                    payload: Payload::user_membership(
                        MembershipOp::Join,
                        self.stream_id.clone(),
                        Some(self.creator_id.to_string()),
                    ),
                })
            })
            .collect()
    }

    /// JOIN of the new stream in every member's user stream. The creator's
    /// join goes last so a partial failure is retried by the creator's client.
    fn derived_gdm_membership_events(&self) -> RiverResult<Vec<DerivedEvent>> {
        let mut members = self.gdm_memberships().map(|m| m.user_id.as_str());
        let creator = members.next();
        members
            .chain(creator)
            .map(|user_id| -> RiverResult<DerivedEvent> {
                Ok(DerivedEvent {
                    stream_id: StreamId::user_stream(user_id)?,
                    payload: Payload::user_membership(
                        MembershipOp::Join,
                        self.stream_id.clone(),
                        Some(self.creator_id.to_string()),
                    ),
                })
            })
            .collect()
    }
}

fn bad_event_count(count: usize, expected: usize) -> RiverError {
    RiverError::bad_creation_params("bad event count")
        .tag("count", count)
        .tag("expectedCount", expected)
}
