use super::{PositionId, ProjectId, Role, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Project,
    Position,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Project => "project",
            TargetType::Position => "position",
        }
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(TargetType::Project),
            "position" => Ok(TargetType::Position),
            other => Err(format!("unknown signature target {other}")),
        }
    }
}

/// Document a signature applies to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum SignatureTarget {
    Project(ProjectId),
    Position(PositionId),
}

impl SignatureTarget {
    pub fn new(target_type: TargetType, id: i64) -> SignatureTarget {
        match target_type {
            TargetType::Project => SignatureTarget::Project(ProjectId(id)),
            TargetType::Position => SignatureTarget::Position(PositionId(id)),
        }
    }

    pub fn target_type(self) -> TargetType {
        match self {
            SignatureTarget::Project(_) => TargetType::Project,
            SignatureTarget::Position(_) => TargetType::Position,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            SignatureTarget::Project(ProjectId(id)) | SignatureTarget::Position(PositionId(id)) => {
                id
            }
        }
    }

    pub fn document_kind(self) -> DocumentKind {
        match self {
            SignatureTarget::Project(_) => DocumentKind::ProjectProposal,
            SignatureTarget::Position(_) => DocumentKind::CommitmentTerm,
        }
    }
}

impl fmt::Display for SignatureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target_type().as_str(), self.id())
    }
}

/// Kind of rendered artifact attached to a fully signed target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum DocumentKind {
    ProjectProposal,
    CommitmentTerm,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::ProjectProposal => "project-proposal",
            DocumentKind::CommitmentTerm => "commitment-term",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SignatureRecord {
    pub id: i64,
    pub target: SignatureTarget,
    pub signer_role: Role,
    pub signer: Option<UserId>,
    pub payload: String,
    pub signed_at: DateTime<Utc>,
}

/// Single-use access grant for an external signer without an account.
#[derive(Clone, Debug, Serialize)]
pub struct SignatureGrant {
    pub id: i64,
    pub token: String,
    pub target: SignatureTarget,
    pub signer_role: Role,
    pub signer_email: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionStatus {
    /// Roles that still have to sign, in the order they are required.
    pub pending: Vec<Role>,
    pub complete: bool,
}

impl CompletionStatus {
    pub fn compute(required: &[Role], signed: &[Role]) -> CompletionStatus {
        let pending = required
            .iter()
            .filter(|role| !signed.contains(role))
            .copied()
            .collect::<Vec<_>>();
        CompletionStatus {
            complete: pending.is_empty(),
            pending,
        }
    }
}

#[test]
fn test_completion_status() {
    let required = [Role::Student, Role::Professor];
    let status = CompletionStatus::compute(&required, &[Role::Professor]);
    assert_eq!(status.pending, vec![Role::Student]);
    assert!(!status.complete);
    let status = CompletionStatus::compute(&required, &[Role::Professor, Role::Student]);
    assert!(status.complete);
    assert!(status.pending.is_empty());
    // Extra signatures never make a target incomplete.
    assert!(CompletionStatus::compute(&[Role::Professor], &[Role::Admin, Role::Professor]).complete);
}
