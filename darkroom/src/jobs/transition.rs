//! Conditional transitions, the sole mutation primitive for job records.

use super::job::DispatchToken;
use super::JobState;
use crate::storage::BlobRef;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Fields written alongside a state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    /// Token minted by the claiming worker.
    pub dispatch_token: Option<DispatchToken>,
    /// Output location for `completed`.
    pub output_ref: Option<BlobRef>,
    /// Failure cause for `failed`.
    pub error: Option<String>,
    /// New re-dispatch count for the watchdog edge.
    pub redispatch_count: Option<u32>,
}

/// A compare-and-set state change.
///
/// Applies iff the record is currently in `from` and, when
/// `expected_token` is set, still holds that dispatch token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Expected current state.
    pub from: JobState,
    /// Target state.
    pub to: JobState,
    /// Dispatch token the record must still hold.
    pub expected_token: Option<DispatchToken>,
    /// Fields written with the change.
    pub fields: TransitionFields,
    /// Time of the change, recorded as `updated_at`.
    pub at: DateTime<Utc>,
}

impl Transition {
    /// `pending -> processing`, minting the claim's token.
    #[must_use]
    pub fn claim(token: DispatchToken, at: DateTime<Utc>) -> Self {
        Self {
            from: JobState::Pending,
            to: JobState::Processing,
            expected_token: None,
            fields: TransitionFields {
                dispatch_token: Some(token),
                ..TransitionFields::default()
            },
            at,
        }
    }

    /// `processing -> completed` for the claim holding `token`.
    #[must_use]
    pub fn complete(token: DispatchToken, output_ref: BlobRef, at: DateTime<Utc>) -> Self {
        Self {
            from: JobState::Processing,
            to: JobState::Completed,
            expected_token: Some(token),
            fields: TransitionFields {
                output_ref: Some(output_ref),
                ..TransitionFields::default()
            },
            at,
        }
    }

    /// `processing -> failed` for the claim holding `token`.
    #[must_use]
    pub fn fail(token: DispatchToken, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            from: JobState::Processing,
            to: JobState::Failed,
            expected_token: Some(token),
            fields: TransitionFields {
                error: Some(error.into()),
                ..TransitionFields::default()
            },
            at,
        }
    }

    /// Watchdog edge `processing -> pending`, guarded by the stale token.
    #[must_use]
    pub fn redispatch(stale: DispatchToken, redispatch_count: u32, at: DateTime<Utc>) -> Self {
        Self {
            from: JobState::Processing,
            to: JobState::Pending,
            expected_token: Some(stale),
            fields: TransitionFields {
                redispatch_count: Some(redispatch_count),
                ..TransitionFields::default()
            },
            at,
        }
    }
}

/// Why a transition could not be applied to a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The record is not in the expected state or holds another token.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// The state machine has no such edge.
    #[error("no transition from {from} to {to}")]
    InvalidEdge {
        /// Source state.
        from: JobState,
        /// Target state.
        to: JobState,
    },

    /// The target state requires a field the transition does not carry.
    #[error("transition is missing required field `{0}`")]
    MissingField(&'static str),
}
