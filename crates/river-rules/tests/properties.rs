//! Property tests for the admission rules

mod common;

use common::*;
use proptest::prelude::*;
use river_core::protocol::*;
use river_core::{ErrorCode, StreamId};
use river_rules::{can_add_event, validate_membership_transition, Verdict};

fn membership_op() -> impl Strategy<Value = MembershipOp> {
    prop::sample::select(MembershipOp::ALL.to_vec())
}

proptest! {
    #[test]
    fn test_membership_transition_is_total(
        current in membership_op(),
        requested in membership_op()
    ) {
        let result = validate_membership_transition(current, requested);
        if requested == MembershipOp::Unspecified {
            prop_assert_eq!(result.unwrap_err().code, ErrorCode::InvalidArgument);
        } else if current == requested {
            prop_assert_eq!(result.unwrap(), Verdict::NoOp);
        } else if current == MembershipOp::Join && requested == MembershipOp::Invite {
            prop_assert_eq!(result.unwrap_err().code, ErrorCode::PermissionDenied);
        } else if current == MembershipOp::Unspecified && requested == MembershipOp::Leave {
            prop_assert_eq!(result.unwrap(), Verdict::NoOp);
        } else {
            prop_assert_eq!(result.unwrap(), Verdict::Accept);
        }
    }

    #[test]
    fn test_dm_stream_id_ignores_party_order(
        first in any::<[u8; 20]>(),
        second in any::<[u8; 20]>()
    ) {
        let id = StreamId::dm_between(&first, &second);
        prop_assert_eq!(&id, &StreamId::dm_between(&second, &first));
        prop_assert!(id.is_dm_between(&second, &first));
    }

    #[test]
    fn test_media_chunk_index_bounds(chunk_count in 1..50i32, index in -100..100i32) {
        let view = media_view(ALICE, chunk_count);
        let event = next(
            &view,
            ALICE,
            Payload::Media(MediaPayload::Chunk(MediaChunk { data: vec![1], chunk_index: index })),
        );
        let result = can_add_event(&cfg(), &nodes(), t0(), &event, &view);
        if (0..chunk_count).contains(&index) {
            prop_assert!(result.unwrap().is_accept());
        } else {
            prop_assert_eq!(result.unwrap_err().code, ErrorCode::InvalidArgument);
        }
    }
}
