//! Task identity and lifecycle status.
//!
//! A task is also the scope of a hub group: every push event is tagged
//! with the [`TaskId`] whose group it was broadcast to.

use serde::{Deserialize, Serialize};

/// Identifier of a task, and of the hub group scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw task identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Lifecycle status of a task, in its fixed forward order.
///
/// The numeric ordinals (1, 2, 3) are what the write path stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done. Terminal.
    Completed,
}

impl TaskStatus {
    /// All statuses in forward order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::InProgress, Self::Completed];

    /// Returns the stored ordinal (1-based).
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Pending => 1,
            Self::InProgress => 2,
            Self::Completed => 3,
        }
    }

    /// Maps a stored ordinal back to a status.
    #[must_use]
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            1 => Some(Self::Pending),
            2 => Some(Self::InProgress),
            3 => Some(Self::Completed),
            _ => None,
        }
    }

    /// The status one step forward, or `None` for the terminal status.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Error parsing a [`TaskStatus`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatusName(pub String);

impl std::str::FromStr for TaskStatus {
    type Err = UnknownStatusName;

    /// Accepts the display names, `-` in place of `_`, or the ordinal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" | "1" => Ok(Self::Pending),
            "in_progress" | "2" => Ok(Self::InProgress),
            "completed" | "3" => Ok(Self::Completed),
            _ => Err(UnknownStatusName(s.to_string())),
        }
    }
}

/// Body of a task status change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Requested status ordinal.
    pub status: u8,
}

impl From<TaskStatus> for StatusUpdate {
    fn from(status: TaskStatus) -> Self {
        Self {
            status: status.ordinal(),
        }
    }
}
