//! Property-based tests for the hub wire protocol.
//!
//! Uses proptest to verify:
//! 1. Any hub frame survives the postcard codec.
//! 2. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 3. Reply creation bodies always carry a numeric `parentReplyId`.

use proptest::prelude::*;
use tasksync_proto::codec;
use tasksync_proto::comment::{
    Author, CommentDeletion, CommentDto, NewReply, ReplyDeletion, ReplyDto, ServerId,
};
use tasksync_proto::hub::{HubEvent, HubFrame, HubMethod};
use tasksync_proto::task::TaskId;

// --- Strategies for protocol types ---

fn arb_server_id() -> impl Strategy<Value = ServerId> {
    (1u64..u64::MAX).prop_map(ServerId::new)
}

fn arb_task_id() -> impl Strategy<Value = TaskId> {
    any::<u64>().prop_map(TaskId::new)
}

fn arb_author() -> impl Strategy<Value = Author> {
    ("[a-z0-9]{1,12}", "[^\x00]{0,32}", prop::option::of("https://[a-z]{1,10}\\.png"))
        .prop_map(|(user_id, display_name, avatar_url)| Author {
            user_id,
            display_name,
            avatar_url,
        })
}

/// Replies one level deep; nested replies are `None` or empty.
fn arb_reply() -> impl Strategy<Value = ReplyDto> {
    (
        arb_server_id(),
        arb_task_id(),
        prop::option::of(arb_server_id()),
        prop::option::of(arb_server_id()),
        "[^\x00]{0,128}",
        arb_author(),
        any::<u64>(),
        prop::option::of(any::<u64>()),
        prop::option::of(Just(Vec::new())),
    )
        .prop_map(
            |(
                id,
                task_id,
                comment_id,
                parent_reply_id,
                content,
                author,
                created_at_ms,
                updated_at_ms,
                replies,
            )| ReplyDto {
                id,
                task_id,
                comment_id,
                parent_reply_id,
                content,
                author,
                created_at_ms,
                updated_at_ms,
                replies,
            },
        )
}

fn arb_comment() -> impl Strategy<Value = CommentDto> {
    (
        arb_server_id(),
        arb_task_id(),
        "[^\x00]{0,128}",
        arb_author(),
        any::<u64>(),
        prop::option::of(any::<u64>()),
        prop::option::of(prop::collection::vec(arb_reply(), 0..4)),
    )
        .prop_map(
            |(id, task_id, content, author, created_at_ms, updated_at_ms, replies)| CommentDto {
                id,
                task_id,
                content,
                author,
                created_at_ms,
                updated_at_ms,
                replies,
            },
        )
}

fn arb_event() -> impl Strategy<Value = HubEvent> {
    prop_oneof![
        arb_comment().prop_map(HubEvent::ReceiveNewComment),
        arb_reply().prop_map(HubEvent::ReceiveNewReply),
        arb_comment().prop_map(HubEvent::ReceiveCommentUpdate),
        arb_reply().prop_map(HubEvent::ReceiveReplyUpdate),
        arb_server_id().prop_map(|id| HubEvent::ReceiveCommentDeletion(CommentDeletion { id })),
        (arb_server_id(), prop::option::of(arb_server_id())).prop_map(|(id, comment_id)| {
            HubEvent::ReceiveReplyDeletion(ReplyDeletion { id, comment_id })
        }),
        arb_task_id().prop_map(HubEvent::JoinedGroup),
    ]
}

fn arb_frame() -> impl Strategy<Value = HubFrame> {
    prop_oneof![
        ".{0,64}".prop_map(|credential| HubFrame::Authenticate { credential }),
        "[a-z0-9]{1,16}".prop_map(|user_id| HubFrame::Authenticated { user_id }),
        (any::<u64>(), arb_task_id(), any::<bool>()).prop_map(|(invocation_id, task, join)| {
            let method = if join {
                HubMethod::JoinTaskGroup(task)
            } else {
                HubMethod::LeaveTaskGroup(task)
            };
            HubFrame::Invoke {
                invocation_id,
                method,
            }
        }),
        (any::<u64>(), prop::option::of(".{0,32}")).prop_map(|(invocation_id, error)| {
            HubFrame::Completion {
                invocation_id,
                error,
            }
        }),
        (arb_task_id(), arb_event()).prop_map(|(task_id, event)| HubFrame::Push { task_id, event }),
        ".{0,64}".prop_map(|reason| HubFrame::Error { reason }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any hub frame survives an encode → decode cycle unchanged.
    #[test]
    fn hub_frame_survives_codec(frame in arb_frame()) {
        let bytes = codec::encode(&frame).expect("encode should succeed");
        let decoded = codec::decode(&bytes).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Random bytes never cause a panic when decoded; they return Err gracefully.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    /// The reply body encodes "no parent reply" as the number 0, never null.
    #[test]
    fn reply_body_parent_is_always_numeric(
        task in arb_task_id(),
        comment in arb_server_id(),
        parent in prop::option::of(arb_server_id()),
    ) {
        let body = NewReply::new(task, comment, parent, "text");
        let json = serde_json::to_value(&body).expect("serialize should succeed");
        let raw = json["parentReplyId"].as_u64();
        prop_assert_eq!(raw, Some(parent.map_or(0, ServerId::get)));
    }
}
