//! Comment and reply wire types for `TaskSync`.
//!
//! These are the shapes the write path returns and the hub pushes. Field
//! names serialize as camelCase so the same types double as REST bodies.

use serde::{Deserialize, Deserializer, Serialize};

use crate::task::TaskId;

/// Authoritative identifier assigned by the write path.
///
/// `0` is never assigned. It is reserved as the "no parent reply" sentinel
/// in [`NewReply::parent_reply_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(u64);

impl ServerId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Interprets a raw parent reference, mapping the `0` sentinel to `None`.
    #[must_use]
    pub const fn from_parent_ref(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ServerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Author reference carried on every comment and reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Stable user identifier, compared for ownership checks.
    pub user_id: String,
    /// Name shown next to the comment.
    pub display_name: String,
    /// Optional avatar image URL.
    pub avatar_url: Option<String>,
}

impl Author {
    /// Creates an author without an avatar.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }
}

/// A top-level comment on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    /// Authoritative comment id.
    pub id: ServerId,
    /// Task the comment belongs to.
    pub task_id: TaskId,
    /// Comment body.
    pub content: String,
    /// Who wrote it.
    pub author: Author,
    /// Creation time, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Last edit time, if the comment was ever edited.
    pub updated_at_ms: Option<u64>,
    /// Nested replies. `None` means the payload does not carry them,
    /// which is different from an empty list.
    pub replies: Option<Vec<ReplyDto>>,
}

/// A reply to a comment or to another reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyDto {
    /// Authoritative reply id.
    pub id: ServerId,
    /// Task the reply belongs to.
    pub task_id: TaskId,
    /// Owning comment. Absent in partial payloads.
    pub comment_id: Option<ServerId>,
    /// Parent reply when this reply answers another reply. Both `null`
    /// and the `0` sentinel decode as `None`.
    #[serde(default, deserialize_with = "parent_ref")]
    pub parent_reply_id: Option<ServerId>,
    /// Reply body.
    pub content: String,
    /// Who wrote it.
    pub author: Author,
    /// Creation time, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Last edit time, if the reply was ever edited.
    pub updated_at_ms: Option<u64>,
    /// Nested replies; `None` when the payload does not carry them.
    pub replies: Option<Vec<ReplyDto>>,
}

fn parent_ref<'de, D>(deserializer: D) -> Result<Option<ServerId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u64>::deserialize(deserializer)?;
    Ok(raw.and_then(ServerId::from_parent_ref))
}

/// Deletion notice for a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDeletion {
    /// The deleted comment.
    pub id: ServerId,
}

/// Deletion notice for a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyDeletion {
    /// The deleted reply.
    pub id: ServerId,
    /// Owning comment, when the sender knows it.
    pub comment_id: Option<ServerId>,
}

/// Body of a comment creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    /// Target task.
    pub task_id: TaskId,
    /// Comment body.
    pub content: String,
}

/// Body of a reply creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReply {
    /// Target task.
    pub task_id: TaskId,
    /// Comment the reply thread hangs off.
    pub comment_id: ServerId,
    /// Parent reply id, or `0` when replying to the comment directly.
    /// Always serialized as a number, never null.
    pub parent_reply_id: u64,
    /// Reply body.
    pub content: String,
}

impl NewReply {
    /// Builds a reply payload, encoding a missing parent reply as `0`.
    pub fn new(
        task_id: TaskId,
        comment_id: ServerId,
        parent_reply_id: Option<ServerId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            comment_id,
            parent_reply_id: parent_reply_id.map_or(0, ServerId::get),
            content: content.into(),
        }
    }

    /// Returns the parent reply, decoding the `0` sentinel.
    #[must_use]
    pub const fn parent(&self) -> Option<ServerId> {
        ServerId::from_parent_ref(self.parent_reply_id)
    }
}

/// Response of a successful create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    /// The authoritative id of the new entity.
    pub id: ServerId,
}

/// Response of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    /// Whether the entity was removed.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_reply_to_comment_encodes_zero_parent() {
        let reply = NewReply::new(TaskId::new(7), ServerId::new(12), None, "hi");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["parentReplyId"], serde_json::json!(0));
        assert_eq!(json["commentId"], serde_json::json!(12));
        assert!(reply.parent().is_none());
    }

    #[test]
    fn new_reply_to_reply_keeps_parent() {
        let reply = NewReply::new(TaskId::new(7), ServerId::new(12), Some(ServerId::new(40)), "x");
        assert_eq!(reply.parent_reply_id, 40);
        assert_eq!(reply.parent(), Some(ServerId::new(40)));
    }

    #[test]
    fn parent_ref_zero_is_none() {
        assert_eq!(ServerId::from_parent_ref(0), None);
        assert_eq!(ServerId::from_parent_ref(3), Some(ServerId::new(3)));
    }

    #[test]
    fn reply_with_zero_parent_targets_the_comment() {
        let json = r#"{
            "id": 2, "taskId": 1, "commentId": 1, "parentReplyId": 0,
            "content": "r", "author": {"userId": "u1", "displayName": "U", "avatarUrl": null},
            "createdAtMs": 10, "updatedAtMs": null, "replies": null
        }"#;
        let reply: ReplyDto = serde_json::from_str(json).unwrap();
        assert_eq!(reply.parent_reply_id, None);
        assert_eq!(reply.comment_id, Some(ServerId::new(1)));

        let nested = json.replace(r#""parentReplyId": 0"#, r#""parentReplyId": 9"#);
        let reply: ReplyDto = serde_json::from_str(&nested).unwrap();
        assert_eq!(reply.parent_reply_id, Some(ServerId::new(9)));

        let missing = json.replace(r#""parentReplyId": 0,"#, "");
        let reply: ReplyDto = serde_json::from_str(&missing).unwrap();
        assert_eq!(reply.parent_reply_id, None);
    }

    #[test]
    fn server_id_display_and_parse() {
        let id: ServerId = "981".parse().unwrap();
        assert_eq!(id, ServerId::new(981));
        assert_eq!(id.to_string(), "981");
        assert!("tmp-1".parse::<ServerId>().is_err());
    }

    #[test]
    fn comment_missing_replies_stays_none() {
        let json = r#"{
            "id": 5, "taskId": 1, "content": "c",
            "author": {"userId": "u1", "displayName": "U", "avatarUrl": null},
            "createdAtMs": 10, "updatedAtMs": null, "replies": null
        }"#;
        let comment: CommentDto = serde_json::from_str(json).unwrap();
        assert!(comment.replies.is_none());
        assert_eq!(comment.id, ServerId::new(5));
    }
}
