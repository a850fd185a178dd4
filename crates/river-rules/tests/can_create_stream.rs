//! Create-stream admission tests

mod common;

use common::*;
use river_core::protocol::*;
use river_core::{
    ChainAuthArgs, ErrorCode, ParsedEvent, Permission, RiverResult, StreamConfig, StreamId,
    StreamKind,
};
use river_rules::{can_create_stream, CreateStreamRules, DerivedEvent};

fn create(stream_id: &str, events: &[ParsedEvent]) -> RiverResult<CreateStreamRules> {
    init_tracing();
    can_create_stream(&cfg(), &sid(stream_id), events)
}

fn assert_bad_params(result: RiverResult<CreateStreamRules>, message: &str) {
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadStreamCreationParams, "{err}");
    assert!(err.message.contains(message), "expected '{message}' in '{err}'");
}

fn user_stream(seed: u8) -> StreamId {
    StreamId::user_stream(&user(seed)).unwrap()
}

fn space_events(stream_id: &str, joiner: u8) -> Vec<ParsedEvent> {
    vec![
        genesis(
            ALICE,
            Payload::Space(SpacePayload::Inception(SpaceInception {
                stream_id: sid(stream_id),
            })),
        ),
        genesis(ALICE, Payload::Space(SpacePayload::Membership(join(joiner)))),
    ]
}

fn media_events(inception: MediaInception) -> Vec<ParsedEvent> {
    vec![genesis(ALICE, Payload::Media(MediaPayload::Inception(inception)))]
}

fn gdm_membership(op: MembershipOp, subject: u8) -> ParsedEvent {
    genesis(
        ALICE,
        Payload::GdmChannel(GdmChannelPayload::Membership(membership(op, subject, ALICE))),
    )
}

// ============================================================================
// Universal preconditions
// ============================================================================

#[test]
fn test_no_events() {
    assert_bad_params(create(SPACE_ID, &[]), "no events");
}

#[test]
fn test_genesis_events_must_not_reference_miniblocks() {
    let mut events = space_events(SPACE_ID, ALICE);
    let view = space_view(ALICE);
    events[1] = next(&view, ALICE, Payload::Space(SpacePayload::Membership(join(ALICE))));
    assert_bad_params(create(SPACE_ID, &events), "prev miniblock hash");
}

#[test]
fn test_genesis_events_share_creator() {
    let mut events = space_events(SPACE_ID, ALICE);
    events[1] = genesis(BOB, Payload::Space(SpacePayload::Membership(join(ALICE))));
    assert_bad_params(create(SPACE_ID, &events), "same creator address");
}

#[test]
fn test_first_event_must_be_inception() {
    let events = vec![genesis(ALICE, Payload::Space(SpacePayload::Membership(join(ALICE))))];
    assert_bad_params(create(SPACE_ID, &events), "not an inception");
}

#[test]
fn test_requested_id_must_match_inception() {
    let events = space_events(SPACE_ID, ALICE);
    assert_bad_params(create("10-other0001", &events), "does not match stream id");
}

#[test]
fn test_stream_id_prefix_and_length() {
    assert_bad_params(
        create("20-space0001", &space_events("20-space0001", ALICE)),
        "expected prefix",
    );
    assert_bad_params(create("10-abc", &space_events("10-abc", ALICE)), "too short");
}

// ============================================================================
// Spaces and channels
// ============================================================================

#[test]
fn test_space_creation() {
    let rules = create(SPACE_ID, &space_events(SPACE_ID, ALICE)).unwrap();
    assert_eq!(
        rules,
        CreateStreamRules {
            creator_stream_id: user_stream(ALICE),
            required_users: vec![],
            required_memberships: vec![user_stream(ALICE)],
            chain_auth: Some(ChainAuthArgs::for_space(
                sid(SPACE_ID),
                user(ALICE),
                Permission::AddRemoveChannels
            )),
            derived_events: vec![DerivedEvent {
                stream_id: user_stream(ALICE),
                payload: Payload::user_membership(
                    MembershipOp::Join,
                    sid(SPACE_ID),
                    Some(user(ALICE)),
                ),
            }],
        }
    );
}

#[test]
fn test_space_event_count() {
    let events = space_events(SPACE_ID, ALICE);
    assert_bad_params(create(SPACE_ID, &events[..1]), "bad event count");

    let mut three = events.clone();
    three.push(genesis(ALICE, Payload::Space(SpacePayload::Username(EncryptedData::new("a")))));
    let err = create(SPACE_ID, &three).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadStreamCreationParams);
    assert_eq!(err.tag_value("count"), Some("3"));
    assert_eq!(err.tag_value("expectedCount"), Some("2"));
}

#[test]
fn test_space_join_event_must_be_creator_join() {
    assert_bad_params(create(SPACE_ID, &space_events(SPACE_ID, BOB)), "bad join user");

    let mut events = space_events(SPACE_ID, ALICE);
    events[1] = genesis(
        ALICE,
        Payload::Space(SpacePayload::Membership(membership(MembershipOp::Invite, ALICE, ALICE))),
    );
    assert_bad_params(create(SPACE_ID, &events), "bad join op");

    events[1] = genesis(ALICE, Payload::Space(SpacePayload::Username(EncryptedData::new("a"))));
    assert_bad_params(create(SPACE_ID, &events), "join event");
}

#[test]
fn test_channel_creation_registers_with_space() {
    let properties = EncryptedData::new("props");
    let events = vec![
        genesis(
            ALICE,
            Payload::Channel(ChannelPayload::Inception(ChannelInception {
                stream_id: sid(CHANNEL_ID),
                space_id: sid(SPACE_ID),
                channel_properties: Some(properties.clone()),
                is_default: true,
            })),
        ),
        genesis(ALICE, Payload::Channel(ChannelPayload::Membership(join(ALICE)))),
    ];
    let rules = create(CHANNEL_ID, &events).unwrap();

    assert_eq!(rules.required_memberships, vec![user_stream(ALICE), sid(SPACE_ID)]);
    assert_eq!(
        rules.chain_auth,
        Some(ChainAuthArgs::for_space(sid(SPACE_ID), user(ALICE), Permission::AddRemoveChannels))
    );
    assert_eq!(
        rules.derived_events,
        vec![
            DerivedEvent {
                stream_id: sid(SPACE_ID),
                payload: Payload::Space(SpacePayload::Channel(SpaceChannel {
                    op: ChannelOp::Created,
                    channel_id: sid(CHANNEL_ID),
                    origin_event: Some(events[0].event_ref(sid(CHANNEL_ID))),
                    channel_properties: Some(properties),
                    is_default: true,
                })),
            },
            DerivedEvent {
                stream_id: user_stream(ALICE),
                payload: Payload::user_membership(
                    MembershipOp::Join,
                    sid(CHANNEL_ID),
                    Some(user(ALICE)),
                ),
            },
        ]
    );
}

// ============================================================================
// Media
// ============================================================================

#[test]
fn test_media_in_space_channel_requires_write() {
    let rules = create(MEDIA_ID, &media_events(media_inception(3))).unwrap();
    assert_eq!(rules.required_memberships, vec![user_stream(ALICE), sid(CHANNEL_ID)]);
    assert_eq!(
        rules.chain_auth,
        Some(ChainAuthArgs::for_channel(
            sid(SPACE_ID),
            sid(CHANNEL_ID),
            user(ALICE),
            Permission::Write
        ))
    );
    assert!(rules.derived_events.is_empty());
}

#[test]
fn test_media_in_dm_has_no_chain_auth() {
    let dm_id = StreamId::dm_between(&addr(ALICE), &addr(BOB));
    let inception = MediaInception {
        channel_id: dm_id.clone(),
        space_id: None,
        ..media_inception(2)
    };
    let rules = create(MEDIA_ID, &media_events(inception)).unwrap();
    assert_eq!(rules.required_memberships, vec![user_stream(ALICE), dm_id]);
    assert_eq!(rules.chain_auth, None);
}

#[test]
fn test_media_inception_checks() {
    let too_many = MediaInception {
        chunk_count: 51,
        ..media_inception(0)
    };
    assert_bad_params(create(MEDIA_ID, &media_events(too_many)), "chunk count");

    let no_space = MediaInception {
        space_id: None,
        ..media_inception(1)
    };
    assert_bad_params(create(MEDIA_ID, &media_events(no_space)), "space id must not be nil");

    let empty_space = MediaInception {
        space_id: Some(sid("")),
        ..media_inception(1)
    };
    assert_bad_params(create(MEDIA_ID, &media_events(empty_space)), "space id must not be empty");

    let no_channel = MediaInception {
        channel_id: sid(""),
        ..media_inception(1)
    };
    assert_bad_params(create(MEDIA_ID, &media_events(no_channel)), "channel id must not be empty");

    let space_as_channel = MediaInception {
        channel_id: sid(SPACE_ID),
        ..media_inception(1)
    };
    assert_bad_params(create(MEDIA_ID, &media_events(space_as_channel)), "invalid channel id");
}

#[test]
fn test_media_chunk_limit_follows_config() {
    init_tracing();
    let cfg = StreamConfig::from_toml_str("[media]\nmax_chunk_count = 2\n").unwrap();
    let events = media_events(media_inception(3));
    let err = can_create_stream(&cfg, &sid(MEDIA_ID), &events).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadStreamCreationParams);
}

// ============================================================================
// DM
// ============================================================================

fn dm_events(inception: DmChannelInception) -> Vec<ParsedEvent> {
    vec![
        genesis(ALICE, Payload::DmChannel(DmChannelPayload::Inception(inception))),
        genesis(ALICE, Payload::DmChannel(DmChannelPayload::Membership(join(ALICE)))),
        genesis(
            ALICE,
            Payload::DmChannel(DmChannelPayload::Membership(membership(
                MembershipOp::Join,
                BOB,
                ALICE,
            ))),
        ),
    ]
}

#[test]
fn test_dm_creation() {
    let inception = dm_inception(ALICE, BOB);
    let dm_id = inception.stream_id.clone();
    let rules = create(dm_id.as_str(), &dm_events(inception)).unwrap();

    assert_eq!(rules.required_memberships, vec![user_stream(ALICE)]);
    assert_eq!(rules.required_users, vec![user(BOB)]);
    assert_eq!(rules.chain_auth, None);
    let joined = |seed| DerivedEvent {
        stream_id: user_stream(seed),
        payload: Payload::user_membership(MembershipOp::Join, dm_id.clone(), Some(user(ALICE))),
    };
    assert_eq!(rules.derived_events, vec![joined(ALICE), joined(BOB)]);
}

#[test]
fn test_dm_creator_must_be_first_party() {
    let inception = dm_inception(BOB, ALICE);
    let dm_id = inception.stream_id.clone();
    assert_bad_params(create(dm_id.as_str(), &dm_events(inception)), "first party");
}

#[test]
fn test_dm_stream_id_is_derived_from_parties() {
    let inception = DmChannelInception {
        stream_id: sid("88-abcd1234"),
        ..dm_inception(ALICE, BOB)
    };
    assert_bad_params(create("88-abcd1234", &dm_events(inception)), "invalid stream id");

    let with_carol = DmChannelInception {
        stream_id: StreamId::dm_between(&addr(ALICE), &addr(CAROL)),
        ..dm_inception(ALICE, BOB)
    };
    let id = with_carol.stream_id.clone();
    assert_bad_params(create(id.as_str(), &dm_events(with_carol)), "invalid stream id");
}

#[test]
fn test_dm_parties_must_differ() {
    let inception = DmChannelInception {
        stream_id: StreamId::dm_between(&addr(ALICE), &addr(ALICE)),
        first_party_address: addr(ALICE),
        second_party_address: addr(ALICE),
    };
    let id = inception.stream_id.clone();
    assert_bad_params(create(id.as_str(), &dm_events(inception)), "must not be the same");
}

#[test]
fn test_dm_event_count() {
    let inception = dm_inception(ALICE, BOB);
    let id = inception.stream_id.clone();
    let events = dm_events(inception);
    assert_bad_params(create(id.as_str(), &events[..2]), "bad event count");
}

// ============================================================================
// GDM
// ============================================================================

#[test]
fn test_gdm_creation() {
    let events = vec![
        genesis(ALICE, gdm_inception()),
        gdm_membership(MembershipOp::Join, ALICE),
        gdm_membership(MembershipOp::Join, BOB),
        gdm_membership(MembershipOp::Invite, CAROL),
    ];
    let rules = create(GDM_ID, &events).unwrap();

    assert_eq!(rules.required_memberships, vec![user_stream(ALICE)]);
    assert_eq!(rules.required_users, vec![user(BOB), user(CAROL)]);
    assert_eq!(rules.chain_auth, None);
    // Every member joins from their user stream, invited ones included,
    // and the creator's join is written last.
    let derived = |seed| DerivedEvent {
        stream_id: user_stream(seed),
        payload: Payload::user_membership(MembershipOp::Join, sid(GDM_ID), Some(user(ALICE))),
    };
    assert_eq!(
        rules.derived_events,
        vec![derived(BOB), derived(CAROL), derived(ALICE)]
    );
}

#[test]
fn test_gdm_needs_two_other_members() {
    let events = vec![
        genesis(ALICE, gdm_inception()),
        gdm_membership(MembershipOp::Join, ALICE),
        gdm_membership(MembershipOp::Join, BOB),
    ];
    assert_bad_params(create(GDM_ID, &events), "bad event count");
}

#[test]
fn test_gdm_first_membership_is_creator_join() {
    let events = vec![
        genesis(ALICE, gdm_inception()),
        gdm_membership(MembershipOp::Join, BOB),
        gdm_membership(MembershipOp::Join, ALICE),
        gdm_membership(MembershipOp::Join, CAROL),
    ];
    assert_bad_params(create(GDM_ID, &events), "user id does not match");

    let events = vec![
        genesis(ALICE, gdm_inception()),
        gdm_membership(MembershipOp::Invite, ALICE),
        gdm_membership(MembershipOp::Join, BOB),
        gdm_membership(MembershipOp::Join, CAROL),
    ];
    assert_bad_params(create(GDM_ID, &events), "op does not match");
}

#[test]
fn test_gdm_members_join_or_are_invited() {
    let events = vec![
        genesis(ALICE, gdm_inception()),
        gdm_membership(MembershipOp::Join, ALICE),
        gdm_membership(MembershipOp::Join, BOB),
        gdm_membership(MembershipOp::Leave, CAROL),
    ];
    let err = create(GDM_ID, &events).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadStreamCreationParams);
    assert_eq!(err.tag_value("index"), Some("3"));

    let events = vec![
        genesis(ALICE, gdm_inception()),
        gdm_membership(MembershipOp::Join, ALICE),
        gdm_membership(MembershipOp::Join, BOB),
        genesis(ALICE, Payload::GdmChannel(GdmChannelPayload::Message(EncryptedData::new("x")))),
    ];
    assert_bad_params(create(GDM_ID, &events), "not a gdm channel membership");
}

// ============================================================================
// User streams
// ============================================================================

fn user_inception(kind: StreamKind, stream_id: StreamId) -> Payload {
    let inception = UserStreamInception { stream_id };
    match kind {
        StreamKind::User => Payload::User(UserPayload::Inception(inception)),
        StreamKind::UserDeviceKey => {
            Payload::UserDeviceKey(UserDeviceKeyPayload::Inception(inception))
        }
        StreamKind::UserSettings => {
            Payload::UserSettings(UserSettingsPayload::Inception(inception))
        }
        StreamKind::UserInbox => Payload::UserInbox(UserInboxPayload::Inception(inception)),
        other => panic!("{other} is not a user stream kind"),
    }
}

#[test]
fn test_user_streams_belong_to_creator() {
    for kind in [
        StreamKind::User,
        StreamKind::UserDeviceKey,
        StreamKind::UserSettings,
        StreamKind::UserInbox,
    ] {
        let stream_id = StreamId::for_user(kind, &user(ALICE)).unwrap();
        let events = vec![genesis(ALICE, user_inception(kind, stream_id.clone()))];
        let rules = create(stream_id.as_str(), &events).unwrap();
        assert_eq!(rules.creator_stream_id, user_stream(ALICE), "{kind}");
        assert!(rules.required_memberships.is_empty());
        assert!(rules.derived_events.is_empty());
        assert_eq!(rules.chain_auth, None);

        let foreign = vec![genesis(BOB, user_inception(kind, stream_id.clone()))];
        assert_bad_params(create(stream_id.as_str(), &foreign), "creator address");
    }
}

#[test]
fn test_user_stream_shape() {
    let stream_id = StreamId::for_user(StreamKind::UserSettings, &user(ALICE)).unwrap();
    let inception = genesis(ALICE, user_inception(StreamKind::UserSettings, stream_id.clone()));
    let extra = genesis(
        ALICE,
        Payload::UserSettings(UserSettingsPayload::FullyReadMarkers(FullyReadMarkers {
            channel_stream_id: sid(CHANNEL_ID),
            content: "{}".into(),
        })),
    );
    assert_bad_params(create(stream_id.as_str(), &[inception, extra]), "bad event count");

    // A settings inception under a user stream id.
    let wrong_id = user_stream(ALICE);
    let events = vec![genesis(ALICE, user_inception(StreamKind::UserSettings, wrong_id.clone()))];
    assert_bad_params(create(wrong_id.as_str(), &events), "expected prefix");
}
