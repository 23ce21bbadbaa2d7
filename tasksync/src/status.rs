//! Local gating of task status changes.
//!
//! Status only ever moves one step forward. The check runs before any
//! network call and never consults server state; the write path is
//! expected to re-validate.

use tasksync_proto::task::TaskStatus;

/// Accepted outcome of a status change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Requested status equals the current one. Nothing is submitted.
    Unchanged,
    /// Move forward to the given status.
    Advance(TaskStatus),
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTransition {
    /// The requested status precedes the current one.
    #[error("cannot move task back from {from} to {to}{}", next_allowed(.from))]
    Backward {
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// The requested status skips over an intermediate state.
    #[error("cannot move task from {from} to {to}: it must be {required} first")]
    SkippedState {
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
        /// The only legal next status.
        required: TaskStatus,
    },
}

fn next_allowed(from: &TaskStatus) -> String {
    from.next()
        .map(|next| format!(", next allowed: {next}"))
        .unwrap_or_default()
}

impl InvalidTransition {
    /// The next status that would have been accepted, if any.
    #[must_use]
    pub const fn next_legal(&self) -> Option<TaskStatus> {
        match self {
            Self::Backward { from, .. } => from.next(),
            Self::SkippedState { required, .. } => Some(*required),
        }
    }
}

/// Checks whether `requested` may follow `current`.
///
/// # Errors
///
/// Returns [`InvalidTransition::Backward`] when `requested` precedes
/// `current`, and [`InvalidTransition::SkippedState`] when it lies more
/// than one step ahead.
pub fn validate(current: TaskStatus, requested: TaskStatus) -> Result<Transition, InvalidTransition> {
    if requested == current {
        return Ok(Transition::Unchanged);
    }
    if requested < current {
        return Err(InvalidTransition::Backward {
            from: current,
            to: requested,
        });
    }
    match current.next() {
        Some(next) if next == requested => Ok(Transition::Advance(requested)),
        // `requested > current` and not the immediate successor, so a
        // successor exists and was skipped.
        Some(next) => Err(InvalidTransition::SkippedState {
            from: current,
            to: requested,
            required: next,
        }),
        None => Err(InvalidTransition::Backward {
            from: current,
            to: requested,
        }),
    }
}

/// Ordinal-based entry point used by callers holding raw stored values.
///
/// Returns `None` if either ordinal is outside the known range.
#[must_use]
pub fn validate_ordinals(current: u8, requested: u8) -> Option<Result<Transition, InvalidTransition>> {
    let current = TaskStatus::from_ordinal(current)?;
    let requested = TaskStatus::from_ordinal(requested)?;
    Some(validate(current, requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_from_pending_names_in_progress() {
        let err = validate_ordinals(1, 3).unwrap().unwrap_err();
        assert_eq!(
            err,
            InvalidTransition::SkippedState {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
                required: TaskStatus::InProgress,
            }
        );
        assert!(err.to_string().contains("in_progress"));
        assert_eq!(err.next_legal(), Some(TaskStatus::InProgress));
    }

    #[test]
    fn backward_is_rejected() {
        let err = validate_ordinals(2, 1).unwrap().unwrap_err();
        assert!(matches!(err, InvalidTransition::Backward { .. }));
        assert_eq!(err.next_legal(), Some(TaskStatus::Completed));
        assert_eq!(
            err.to_string(),
            "cannot move task back from in_progress to pending, next allowed: completed"
        );
    }

    #[test]
    fn single_step_is_accepted() {
        assert_eq!(
            validate_ordinals(2, 3).unwrap(),
            Ok(Transition::Advance(TaskStatus::Completed))
        );
        assert_eq!(
            validate(TaskStatus::Pending, TaskStatus::InProgress),
            Ok(Transition::Advance(TaskStatus::InProgress))
        );
    }

    #[test]
    fn same_state_is_a_no_op() {
        assert_eq!(validate_ordinals(2, 2).unwrap(), Ok(Transition::Unchanged));
        assert_eq!(
            validate(TaskStatus::Completed, TaskStatus::Completed),
            Ok(Transition::Unchanged)
        );
    }

    #[test]
    fn completed_is_terminal() {
        let err = validate(TaskStatus::Completed, TaskStatus::Pending).unwrap_err();
        assert!(matches!(err, InvalidTransition::Backward { .. }));
        assert_eq!(err.next_legal(), None);
        assert_eq!(err.to_string(), "cannot move task back from completed to pending");
    }

    #[test]
    fn unknown_ordinals_are_not_validated() {
        assert!(validate_ordinals(0, 1).is_none());
        assert!(validate_ordinals(1, 9).is_none());
    }
}
