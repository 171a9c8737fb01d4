use crate::model::{Project, ProjectId, ProjectStatus, Quota, Term};
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub title: String,
    pub status: ProjectStatus,
    pub requested_scholarships: u32,
    pub allocated_scholarships: u32,
    pub consumed_scholarships: u32,
    pub requested_volunteers: u32,
    pub consumed_volunteers: u32,
}

/// Allocation state of a term against its quota.
#[derive(Clone, Debug, Serialize)]
pub struct TermSummary {
    pub term: Term,
    pub quota: Option<u32>,
    /// Scholarship seats allocated to committed projects.
    pub committed: u32,
    pub remaining: Option<u32>,
    pub projects: Vec<ProjectSummary>,
}

/// Build the summary from the projects of the term with their consumed
/// scholarship and volunteer seats.
pub fn summarize(
    term: Term,
    quota: Option<&Quota>,
    projects: impl IntoIterator<Item = (Project, u32, u32)>,
) -> TermSummary {
    let projects = projects
        .into_iter()
        .map(|(p, scholarships, volunteers)| ProjectSummary {
            id: p.id,
            title: p.title,
            status: p.status,
            requested_scholarships: p.requested_scholarships,
            allocated_scholarships: p.allocated_scholarships,
            consumed_scholarships: scholarships,
            requested_volunteers: p.requested_volunteers,
            consumed_volunteers: volunteers,
        })
        .collect::<Vec<_>>();
    let committed = projects
        .iter()
        .filter(|p| p.status.is_committed())
        .map(|p| p.allocated_scholarships)
        .sum::<u32>();
    let quota = quota.map(|q| q.total_scholarships);
    TermSummary {
        term,
        quota,
        committed,
        remaining: quota.map(|q| q.saturating_sub(committed)),
        projects,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DepartmentId, Half, UserId};
    use chrono::Utc;

    fn project(id: i64, status: ProjectStatus, allocated: u32) -> Project {
        Project {
            id: ProjectId(id),
            professor: UserId(1),
            department: DepartmentId(1),
            title: format!("Project {id}"),
            term: Term::new(2025, Half::Second),
            requested_scholarships: 4,
            requested_volunteers: 2,
            allocated_scholarships: allocated,
            status,
            admin_feedback: None,
            signed_document: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_summarize() {
        let term = Term::new(2025, Half::Second);
        let quota = Quota {
            term,
            total_scholarships: 6,
            version: 3,
        };
        let summary = summarize(
            term,
            Some(&quota),
            [
                (project(1, ProjectStatus::Approved, 2), 1, 0),
                (project(2, ProjectStatus::PendingAdminSignature, 3), 0, 0),
                (project(3, ProjectStatus::Submitted, 4), 0, 0),
            ],
        );
        assert_eq!(summary.committed, 5);
        assert_eq!(summary.remaining, Some(1));
        assert_eq!(summary.projects[0].consumed_scholarships, 1);
        let summary = summarize(term, None, []);
        assert_eq!(summary.quota, None);
        assert_eq!(summary.remaining, None);
        assert_eq!(summary.committed, 0);
    }
}
