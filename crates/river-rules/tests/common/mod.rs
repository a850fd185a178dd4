//! Shared fixtures for the admission rule integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use river_core::protocol::*;
use river_core::{
    address_hex, ParsedEvent, StreamConfig, StreamEvent, StreamId, StreamView, ADDRESS_LENGTH,
};
use std::sync::atomic::{AtomicU64, Ordering};

pub const ALICE: u8 = 0x01;
pub const BOB: u8 = 0x02;
pub const CAROL: u8 = 0x03;
pub const DAVE: u8 = 0x04;
pub const NODE: u8 = 0xEE;

pub const SPACE_ID: &str = "10-space0001";
pub const CHANNEL_ID: &str = "20-chan0001";
pub const GDM_ID: &str = "77-gdm0001";
pub const MEDIA_ID: &str = "ff-media0001";

static SALT: AtomicU64 = AtomicU64::new(1);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn cfg() -> StreamConfig {
    StreamConfig::default()
}

pub fn addr(seed: u8) -> Vec<u8> {
    vec![seed; ADDRESS_LENGTH]
}

pub fn user(seed: u8) -> String {
    address_hex(&addr(seed)).unwrap()
}

pub fn nodes() -> Vec<String> {
    vec![user(NODE)]
}

pub fn sid(id: &str) -> StreamId {
    StreamId::new(id)
}

fn build(creator: u8, payload: Payload, prev: Option<Vec<u8>>) -> ParsedEvent {
    let salt = SALT.fetch_add(1, Ordering::Relaxed);
    let mut event = StreamEvent::new(addr(creator), payload).with_salt(salt.to_be_bytes().to_vec());
    if let Some(prev) = prev {
        event = event.with_prev_miniblock_hash(prev);
    }
    ParsedEvent::new(event, vec![0xAB; 4]).unwrap()
}

/// Genesis event: no prev miniblock hash.
pub fn genesis(creator: u8, payload: Payload) -> ParsedEvent {
    build(creator, payload, None)
}

/// Event referencing the tip of `view`.
pub fn next(view: &StreamView, creator: u8, payload: Payload) -> ParsedEvent {
    build(creator, payload, Some(view.last_block().hash.clone()))
}

pub fn join(seed: u8) -> Membership {
    Membership::new(MembershipOp::Join, user(seed), user(seed))
}

pub fn membership(op: MembershipOp, subject: u8, initiator: u8) -> Membership {
    Membership::new(op, user(subject), user(initiator))
}

// Views

pub fn space_view(creator: u8) -> StreamView {
    StreamView::from_genesis(
        vec![
            genesis(
                creator,
                Payload::Space(SpacePayload::Inception(SpaceInception {
                    stream_id: sid(SPACE_ID),
                })),
            ),
            genesis(creator, Payload::Space(SpacePayload::Membership(join(creator)))),
        ],
        t0(),
    )
    .unwrap()
}

pub fn channel_view(creator: u8) -> StreamView {
    StreamView::from_genesis(
        vec![
            genesis(
                creator,
                Payload::Channel(ChannelPayload::Inception(ChannelInception {
                    stream_id: sid(CHANNEL_ID),
                    space_id: sid(SPACE_ID),
                    channel_properties: None,
                    is_default: false,
                })),
            ),
            genesis(creator, Payload::Channel(ChannelPayload::Membership(join(creator)))),
        ],
        t0(),
    )
    .unwrap()
}

pub fn dm_inception(first: u8, second: u8) -> DmChannelInception {
    DmChannelInception {
        stream_id: StreamId::dm_between(&addr(first), &addr(second)),
        first_party_address: addr(first),
        second_party_address: addr(second),
    }
}

pub fn dm_view(first: u8, second: u8) -> StreamView {
    StreamView::from_genesis(
        vec![
            genesis(
                first,
                Payload::DmChannel(DmChannelPayload::Inception(dm_inception(first, second))),
            ),
            genesis(first, Payload::DmChannel(DmChannelPayload::Membership(join(first)))),
            genesis(
                first,
                Payload::DmChannel(DmChannelPayload::Membership(membership(
                    MembershipOp::Join,
                    second,
                    first,
                ))),
            ),
        ],
        t0(),
    )
    .unwrap()
}

pub fn gdm_inception() -> Payload {
    Payload::GdmChannel(GdmChannelPayload::Inception(GdmChannelInception {
        stream_id: sid(GDM_ID),
        channel_properties: None,
    }))
}

/// GDM created by `creator` with the given genesis memberships after the creator's join.
pub fn gdm_view(creator: u8, others: &[(MembershipOp, u8)]) -> StreamView {
    let mut events = vec![
        genesis(creator, gdm_inception()),
        genesis(creator, Payload::GdmChannel(GdmChannelPayload::Membership(join(creator)))),
    ];
    for (op, subject) in others {
        events.push(genesis(
            creator,
            Payload::GdmChannel(GdmChannelPayload::Membership(membership(*op, *subject, creator))),
        ));
    }
    StreamView::from_genesis(events, t0()).unwrap()
}

pub fn media_inception(chunk_count: i32) -> MediaInception {
    MediaInception {
        stream_id: sid(MEDIA_ID),
        channel_id: sid(CHANNEL_ID),
        space_id: Some(sid(SPACE_ID)),
        chunk_count,
    }
}

pub fn media_view(creator: u8, chunk_count: i32) -> StreamView {
    StreamView::from_genesis(
        vec![genesis(
            creator,
            Payload::Media(MediaPayload::Inception(media_inception(chunk_count))),
        )],
        t0(),
    )
    .unwrap()
}

pub fn user_stream_view(owner: u8) -> StreamView {
    StreamView::from_genesis(
        vec![genesis(
            owner,
            Payload::User(UserPayload::Inception(UserStreamInception {
                stream_id: StreamId::user_stream(&user(owner)).unwrap(),
            })),
        )],
        t0(),
    )
    .unwrap()
}

/// Materialize a node-written membership into a joinable stream view.
pub fn with_membership(view: &StreamView, membership: Membership) -> StreamView {
    let payload = Payload::membership_for(view.kind(), membership).unwrap();
    let event = next(view, NODE, payload);
    view.add_event(event).unwrap()
}
