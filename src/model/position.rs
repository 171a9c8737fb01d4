use super::{ApplicationId, ProjectId, Role, SeatType, Term, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

identifier!(PositionId);

/// Seat actually held by a student after accepting an offer.
#[derive(Clone, Debug, Serialize)]
pub struct Position {
    pub id: PositionId,
    pub student: UserId,
    pub project: ProjectId,
    pub application: ApplicationId,
    pub seat_type: SeatType,
    pub term: Term,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub commitment_document: Option<String>,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }
}

/// Commitment term of an active position that still misses signatures.
#[derive(Clone, Debug, Serialize)]
pub struct PendingCommitment {
    pub position: Position,
    pub project_title: String,
    pub pending: Vec<Role>,
}

/// How far the commitment term of a position has been signed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitmentState {
    Unsigned,
    PartiallySigned,
    Complete,
}

impl CommitmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitmentState::Unsigned => "UNSIGNED",
            CommitmentState::PartiallySigned => "PARTIALLY_SIGNED",
            CommitmentState::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for CommitmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature state of the commitment term of one position.
#[derive(Clone, Debug, Serialize)]
pub struct CommitmentReport {
    pub position: Position,
    pub project_title: String,
    pub state: CommitmentState,
    pub signed_by: Vec<Role>,
    /// Time of the last required signature, once all are present.
    pub completed_at: Option<DateTime<Utc>>,
}
