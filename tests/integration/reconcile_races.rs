// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Interleavings of write responses, push echoes, redeliveries, and the
//! initial thread load.
//!
//! Each scenario lists the steps that can race and replays every ordering
//! of them against a fresh [`SyncSession`]. Whatever the order, the thread
//! must end with exactly one entry per authoritative id and no pending
//! entries left behind.

use tasksync::model::{EntityKind, EntryId};
use tasksync::session::{Completion, Effect, SyncSession, WriteRequest};
use tasksync_proto::comment::{
    Author, CommentDeletion, CommentDto, ReplyDto, ServerId,
};
use tasksync_proto::hub::HubEvent;
use tasksync_proto::task::{TaskId, TaskStatus};

const TASK: TaskId = TaskId::new(7);

fn me() -> Author {
    Author::new("me", "Me")
}

fn comment(id: u64, author: &Author) -> CommentDto {
    CommentDto {
        id: ServerId::new(id),
        task_id: TASK,
        content: format!("comment {id}"),
        author: author.clone(),
        created_at_ms: id,
        updated_at_ms: None,
        replies: Some(Vec::new()),
    }
}

fn reply(id: u64, comment_id: u64, author: &Author) -> ReplyDto {
    ReplyDto {
        id: ServerId::new(id),
        task_id: TASK,
        comment_id: Some(ServerId::new(comment_id)),
        parent_reply_id: None,
        content: format!("reply {id}"),
        author: author.clone(),
        created_at_ms: id,
        updated_at_ms: None,
        replies: None,
    }
}

/// All orderings of `0..n`.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    fn go(prefix: &mut Vec<usize>, rest: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if rest.is_empty() {
            out.push(prefix.clone());
            return;
        }
        for i in 0..rest.len() {
            let next = rest.remove(i);
            prefix.push(next);
            go(prefix, rest, out);
            prefix.pop();
            rest.insert(i, next);
        }
    }
    let mut out = Vec::new();
    go(&mut Vec::new(), &mut (0..n).collect(), &mut out);
    out
}

fn created_temp(effects: &[Effect]) -> tasksync::model::TempId {
    effects
        .iter()
        .find_map(|e| match e {
            Effect::Write(
                WriteRequest::CreateComment { temp_id, .. } | WriteRequest::CreateReply { temp_id, .. },
            ) => Some(*temp_id),
            _ => None,
        })
        .expect("no create request")
}

#[derive(Debug, Clone)]
enum Step {
    Load(Vec<CommentDto>),
    Confirm(EntityKind, u64),
    Push(HubEvent),
}

fn run(session: &mut SyncSession, temp: tasksync::model::TempId, step: &Step) {
    match step {
        Step::Load(snapshot) => {
            session.complete(Completion::CommentsLoaded {
                task_id: TASK,
                result: Ok(snapshot.clone()),
            });
        }
        Step::Confirm(kind, id) => {
            session.complete(Completion::Created {
                task_id: TASK,
                temp_id: temp,
                kind: *kind,
                result: Ok(ServerId::new(*id)),
            });
        }
        Step::Push(event) => {
            session.handle_push(TASK, event);
        }
    }
}

/// Authoritative comment ids in thread order; panics on a pending entry.
fn comment_ids(session: &SyncSession) -> Vec<u64> {
    session
        .view(TASK)
        .unwrap()
        .comments()
        .iter()
        .map(|c| c.id.confirmed().expect("pending comment left behind").get())
        .collect()
}

fn reply_ids(session: &SyncSession, comment_id: u64) -> Vec<u64> {
    session
        .view(TASK)
        .unwrap()
        .engine()
        .comment(EntryId::Confirmed(ServerId::new(comment_id)))
        .unwrap()
        .replies
        .iter()
        .map(|r| r.id.confirmed().expect("pending reply left behind").get())
        .collect()
}

fn sorted(mut ids: Vec<u64>) -> Vec<u64> {
    ids.sort_unstable();
    ids
}

#[test]
fn own_comment_settles_once_in_every_order() {
    let other = Author::new("bob", "Bob");
    let steps = [
        Step::Load(vec![comment(11, &other)]),
        Step::Confirm(EntityKind::Comment, 10),
        Step::Push(HubEvent::ReceiveNewComment(comment(10, &me()))),
        Step::Push(HubEvent::ReceiveNewComment(comment(10, &me()))),
        Step::Push(HubEvent::ReceiveNewComment(comment(12, &other))),
    ];

    for order in permutations(steps.len()) {
        let mut session = SyncSession::new(me());
        session.open_view(TASK, Some(TaskStatus::Pending));
        let temp = created_temp(&session.submit_comment(TASK, "mine").unwrap());

        for &i in &order {
            run(&mut session, temp, &steps[i]);
        }

        assert_eq!(
            sorted(comment_ids(&session)),
            vec![10, 11, 12],
            "order {order:?}"
        );
        assert!(
            session.view(TASK).unwrap().engine().tracker().is_empty(),
            "order {order:?}"
        );
    }
}

#[test]
fn snapshot_carrying_own_comment_does_not_duplicate_it() {
    let steps = [
        Step::Load(vec![comment(10, &me())]),
        Step::Confirm(EntityKind::Comment, 10),
        Step::Push(HubEvent::ReceiveNewComment(comment(10, &me()))),
    ];

    for order in permutations(steps.len()) {
        let mut session = SyncSession::new(me());
        session.open_view(TASK, None);
        let temp = created_temp(&session.submit_comment(TASK, "mine").unwrap());

        for &i in &order {
            run(&mut session, temp, &steps[i]);
        }

        assert_eq!(comment_ids(&session), vec![10], "order {order:?}");
    }
}

#[test]
fn own_reply_settles_once_in_every_order() {
    let other = Author::new("bob", "Bob");
    let steps = [
        Step::Confirm(EntityKind::Reply, 20),
        Step::Push(HubEvent::ReceiveNewReply(reply(20, 11, &me()))),
        Step::Push(HubEvent::ReceiveNewReply(reply(20, 11, &me()))),
        Step::Push(HubEvent::ReceiveNewReply(reply(21, 11, &other))),
    ];

    for order in permutations(steps.len()) {
        let mut session = SyncSession::new(me());
        session.open_view(TASK, None);
        session.complete(Completion::CommentsLoaded {
            task_id: TASK,
            result: Ok(vec![comment(11, &other)]),
        });
        let effects = session
            .submit_reply(TASK, EntryId::Confirmed(ServerId::new(11)), None, "agreed")
            .unwrap();
        let temp = created_temp(&effects);

        for &i in &order {
            run(&mut session, temp, &steps[i]);
        }

        assert_eq!(
            sorted(reply_ids(&session, 11)),
            vec![20, 21],
            "order {order:?}"
        );
    }
}

#[test]
fn local_delete_and_remote_deletion_agree() {
    let mut session = SyncSession::new(me());
    session.open_view(TASK, None);
    session.complete(Completion::CommentsLoaded {
        task_id: TASK,
        result: Ok(vec![comment(10, &me()), comment(11, &me())]),
    });

    // Remote deletion lands while our own delete is in flight.
    session
        .delete_comment(TASK, EntryId::Confirmed(ServerId::new(10)))
        .unwrap();
    session.handle_push(
        TASK,
        &HubEvent::ReceiveCommentDeletion(CommentDeletion {
            id: ServerId::new(10),
        }),
    );
    session.complete(Completion::Deleted {
        task_id: TASK,
        kind: EntityKind::Comment,
        id: ServerId::new(10),
        result: Ok(()),
    });

    // Remote deletion lands after our delete was confirmed.
    session
        .delete_comment(TASK, EntryId::Confirmed(ServerId::new(11)))
        .unwrap();
    session.complete(Completion::Deleted {
        task_id: TASK,
        kind: EntityKind::Comment,
        id: ServerId::new(11),
        result: Ok(()),
    });
    session.handle_push(
        TASK,
        &HubEvent::ReceiveCommentDeletion(CommentDeletion {
            id: ServerId::new(11),
        }),
    );

    assert!(comment_ids(&session).is_empty());
}

#[test]
fn two_clients_converge_on_the_same_thread() {
    let alice = Author::new("alice", "Alice");
    let bob = Author::new("bob", "Bob");
    let mut a = SyncSession::new(alice.clone());
    let mut b = SyncSession::new(bob.clone());
    for session in [&mut a, &mut b] {
        session.open_view(TASK, None);
        session.complete(Completion::CommentsLoaded {
            task_id: TASK,
            result: Ok(Vec::new()),
        });
    }

    let temp_a = created_temp(&a.submit_comment(TASK, "from alice").unwrap());
    let temp_b = created_temp(&b.submit_comment(TASK, "from bob").unwrap());

    // Hub accepted alice's write as 1 and bob's as 2 and broadcast both to
    // the whole group. Alice sees her response before the echoes, bob after.
    let broadcast = [
        HubEvent::ReceiveNewComment(comment(1, &alice)),
        HubEvent::ReceiveNewComment(comment(2, &bob)),
    ];

    run(&mut a, temp_a, &Step::Confirm(EntityKind::Comment, 1));
    for event in &broadcast {
        a.handle_push(TASK, event);
        b.handle_push(TASK, event);
    }
    run(&mut b, temp_b, &Step::Confirm(EntityKind::Comment, 2));

    assert_eq!(sorted(comment_ids(&a)), vec![1, 2]);
    assert_eq!(sorted(comment_ids(&b)), vec![1, 2]);
}
