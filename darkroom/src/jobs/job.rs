//! Job identifiers and the persisted job record.

use super::transition::{Transition, TransitionError};
use super::JobState;
use crate::storage::BlobRef;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Opaque identifier of the principal that submitted a job.
///
/// The pipeline never interprets it; it is stored so that callers can
/// enforce ownership on reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wraps an owner identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Token minted by a worker when it claims a job.
///
/// Terminal transitions must present the token of the claim they finish, so
/// a worker whose claim was superseded by a watchdog re-dispatch cannot
/// overwrite the newer attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchToken(Uuid);

impl DispatchToken {
    /// Mint a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DispatchToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DispatchToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Persisted job record.
///
/// Records only change through [`Job::apply`], which enforces the state
/// machine and keeps `output_ref` set iff `completed` and `error` set iff
/// `failed`. Timestamps are kept at millisecond precision so every store
/// round-trips them exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Submitting principal.
    pub owner_id: OwnerId,
    /// Original artifact.
    pub input_ref: BlobRef,
    /// Name the upload arrived under, if the submitter gave one.
    #[serde(default)]
    pub source_name: Option<String>,
    /// Transformed artifact, present only when completed.
    pub output_ref: Option<BlobRef>,
    /// Lifecycle state.
    pub state: JobState,
    /// Failure cause, present only when failed.
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job last changed state.
    pub updated_at: DateTime<Utc>,
    /// Token of the claim that owns the current epoch.
    pub dispatch_token: Option<DispatchToken>,
    /// Number of watchdog re-dispatches so far.
    pub redispatch_count: u32,
    /// Bumped by every change; guards compare-and-set in durable stores.
    pub revision: u64,
}

impl Job {
    /// Create a pending job submitted at `now`.
    #[must_use]
    pub fn new(owner_id: OwnerId, input_ref: BlobRef, now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(3);
        Self {
            id: JobId::new(),
            owner_id,
            input_ref,
            source_name: None,
            output_ref: None,
            state: JobState::Pending,
            error: None,
            created_at: now,
            updated_at: now,
            dispatch_token: None,
            redispatch_count: 0,
            revision: 0,
        }
    }

    /// Record the name the upload arrived under.
    #[must_use]
    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Whether more than `limit` has elapsed since the last transition.
    #[must_use]
    pub fn idle_longer_than(&self, now: DateTime<Utc>, limit: Duration) -> bool {
        (now - self.updated_at)
            .to_std()
            .is_ok_and(|idle| idle > limit)
    }

    /// Compute the record that results from applying `transition`.
    ///
    /// # Errors
    ///
    /// - [`TransitionError::StateConflict`] if the record is not in
    ///   `transition.from` or holds a different dispatch token than expected
    /// - [`TransitionError::InvalidEdge`] if the state machine has no such edge
    /// - [`TransitionError::MissingField`] if the target state needs a field
    ///   the transition does not carry
    pub fn apply(&self, transition: &Transition) -> Result<Self, TransitionError> {
        if self.state != transition.from {
            return Err(TransitionError::StateConflict(format!(
                "expected {}, found {}",
                transition.from, self.state
            )));
        }

        if let Some(expected) = transition.expected_token {
            if self.dispatch_token != Some(expected) {
                return Err(TransitionError::StateConflict(format!(
                    "dispatch token {expected} no longer owns the job"
                )));
            }
        }

        if !transition.from.can_transition_to(transition.to) {
            return Err(TransitionError::InvalidEdge {
                from: transition.from,
                to: transition.to,
            });
        }

        let fields = &transition.fields;
        let mut next = self.clone();
        next.state = transition.to;
        next.updated_at = transition.at.trunc_subsecs(3);
        next.revision = self.revision + 1;

        match transition.to {
            JobState::Pending => {
                next.dispatch_token = None;
                next.redispatch_count = fields.redispatch_count.unwrap_or(self.redispatch_count);
            }
            JobState::Processing => {
                next.dispatch_token = Some(
                    fields
                        .dispatch_token
                        .ok_or(TransitionError::MissingField("dispatch_token"))?,
                );
            }
            JobState::Completed => {
                next.output_ref = Some(
                    fields
                        .output_ref
                        .clone()
                        .ok_or(TransitionError::MissingField("output_ref"))?,
                );
            }
            JobState::Failed => {
                let error = fields
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .ok_or(TransitionError::MissingField("error"))?;
                next.error = Some(error);
            }
        }

        Ok(next)
    }
}
