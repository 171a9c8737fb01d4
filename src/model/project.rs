use super::{Term, UserId};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

identifier!(ProjectId);
identifier!(DepartmentId);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Draft,
    Submitted,
    PendingAdminSignature,
    PendingRevision,
    Approved,
    Rejected,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "DRAFT",
            ProjectStatus::Submitted => "SUBMITTED",
            ProjectStatus::PendingAdminSignature => "PENDING_ADMIN_SIGNATURE",
            ProjectStatus::PendingRevision => "PENDING_REVISION",
            ProjectStatus::Approved => "APPROVED",
            ProjectStatus::Rejected => "REJECTED",
        }
    }

    /// The owning professor may only change content in these states.
    pub fn is_editable(self) -> bool {
        matches!(self, ProjectStatus::Draft | ProjectStatus::PendingRevision)
    }

    /// Projects in these states hold their allocated scholarships against the
    /// term quota.
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            ProjectStatus::Approved | ProjectStatus::PendingAdminSignature
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "DRAFT" => ProjectStatus::Draft,
            "SUBMITTED" => ProjectStatus::Submitted,
            "PENDING_ADMIN_SIGNATURE" => ProjectStatus::PendingAdminSignature,
            "PENDING_REVISION" => ProjectStatus::PendingRevision,
            "APPROVED" => ProjectStatus::Approved,
            "REJECTED" => ProjectStatus::Rejected,
            other => return Err(format!("unknown project status {other}")),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub professor: UserId,
    pub department: DepartmentId,
    pub title: String,
    pub term: Term,
    pub requested_scholarships: u32,
    pub requested_volunteers: u32,
    pub allocated_scholarships: u32,
    pub status: ProjectStatus,
    pub admin_feedback: Option<String>,
    pub signed_document: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.professor == user
    }
}

/// Editable content of a project, used for creation and revision.
#[derive(Clone, Debug)]
pub struct ProjectDraft {
    pub department: DepartmentId,
    pub title: String,
    pub term: Term,
    pub requested_scholarships: u32,
    pub requested_volunteers: u32,
}

impl ProjectDraft {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("project title cannot be empty".into()));
        }
        if self.requested_scholarships == 0 && self.requested_volunteers == 0 {
            return Err(Error::Validation(
                "a project must request at least one seat".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Half;

    fn draft() -> ProjectDraft {
        ProjectDraft {
            department: DepartmentId(1),
            title: "Algorithms I".into(),
            term: Term::new(2025, Half::First),
            requested_scholarships: 2,
            requested_volunteers: 1,
        }
    }

    #[test]
    fn test_validate_draft() {
        assert!(draft().validate().is_ok());
        let blank = ProjectDraft {
            title: "  ".into(),
            ..draft()
        };
        assert!(matches!(blank.validate(), Err(Error::Validation(_))));
        let empty = ProjectDraft {
            requested_scholarships: 0,
            requested_volunteers: 0,
            ..draft()
        };
        assert!(matches!(empty.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_status_round_trip_and_flags() {
        for status in [
            ProjectStatus::Draft,
            ProjectStatus::Submitted,
            ProjectStatus::PendingAdminSignature,
            ProjectStatus::PendingRevision,
            ProjectStatus::Approved,
            ProjectStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ProjectStatus>(), Ok(status));
        }
        assert!(ProjectStatus::PendingRevision.is_editable());
        assert!(!ProjectStatus::Submitted.is_editable());
        assert!(ProjectStatus::PendingAdminSignature.is_committed());
        assert!(!ProjectStatus::Rejected.is_committed());
    }
}
