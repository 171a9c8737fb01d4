use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    Actor, Application, ApplicationId, ApplicationStatus, InscriptionPeriod, Project, ProjectId,
    ProjectStatus, Quota, Role, SeatType, Term,
};
use crate::notify::{Notification, NotificationKind, Recipient};
use crate::stats::{self, TermSummary};
use crate::store::{applications, projects, seats, terms};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::AnyConnection;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Outcome of a read-only allocation check.
#[derive(Clone, Debug, Serialize)]
pub struct AllocationCheck {
    pub project: ProjectId,
    pub proposed: u32,
    pub requested: u32,
    /// Scholarship seats left under the term quota for this project, or
    /// `None` if the term has no quota yet.
    pub available: Option<u32>,
    pub exceeds_request: bool,
    pub exceeds_quota: bool,
}

impl AllocationCheck {
    pub fn is_valid(&self) -> bool {
        !self.exceeds_request && !self.exceeds_quota
    }
}

/// Scholarship seats committed in the term by projects other than `excluding`.
async fn committed_elsewhere(
    conn: &mut AnyConnection,
    term: Term,
    excluding: Option<ProjectId>,
) -> Result<u32> {
    Ok(projects::committed_in_term(conn, term)
        .await?
        .iter()
        .filter(|p| Some(p.id) != excluding)
        .map(|p| p.allocated_scholarships)
        .sum())
}

async fn available_seats(conn: &mut AnyConnection, quota: &Quota, project: ProjectId) -> Result<u32> {
    let committed = committed_elsewhere(conn, quota.term, Some(project)).await?;
    Ok(quota.total_scholarships.saturating_sub(committed))
}

/// Check that `seats` scholarship seats may be given to the project. The quota
/// row is locked for the rest of the transaction.
pub(crate) async fn check_quota(conn: &mut AnyConnection, project: &Project, seats: u32) -> Result<()> {
    if seats > project.requested_scholarships {
        return Err(Error::Validation(format!(
            "project {} requested {} scholarship seats, cannot allocate {seats}",
            project.id, project.requested_scholarships
        )));
    }
    let Some(quota) = terms::lock_quota(conn, project.term).await? else {
        if seats == 0 {
            return Ok(());
        }
        return Err(Error::Business(format!(
            "no scholarship quota defined for term {}",
            project.term
        )));
    };
    let available = available_seats(conn, &quota, project.id).await?;
    if seats > available {
        return Err(Error::Validation(format!(
            "only {available} scholarship seats remain in term {}, cannot allocate {seats}",
            project.term
        )));
    }
    Ok(())
}

/// Seats of a type a project can hand out.
pub(crate) fn capacity(project: &Project, seat: SeatType) -> u32 {
    match seat {
        SeatType::Scholarship => project.allocated_scholarships,
        SeatType::Volunteer => project.requested_volunteers,
    }
}

/// Fail unless a seat of this type is still free in the project.
pub(crate) async fn check_capacity(
    conn: &mut AnyConnection,
    project: &Project,
    seat: SeatType,
) -> Result<()> {
    let consumed = seats::consumed(conn, project.id, seat).await?;
    if consumed >= capacity(project, seat) {
        return Err(Error::Business(format!(
            "no {seat} seats remaining in project {}",
            project.id
        )));
    }
    Ok(())
}

/// Set the scholarship allocation of every listed project, or of none. The
/// projects are locked in identifier order and each term quota is checked
/// against the sum of the new values, so the outcome does not depend on the
/// order of the entries.
async fn apply_allocations(
    conn: &mut AnyConnection,
    allocations: &[(ProjectId, u32)],
    now: DateTime<Utc>,
) -> Result<Vec<Project>> {
    let mut ids: Vec<ProjectId> = allocations.iter().map(|&(id, _)| id).collect();
    ids.sort();
    if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(Error::Validation(format!(
            "project {} is listed more than once",
            pair[0]
        )));
    }
    let mut locked = BTreeMap::new();
    for id in ids {
        locked.insert(id, projects::lock(conn, id, now).await?);
    }

    let mut per_term: BTreeMap<Term, u32> = BTreeMap::new();
    for &(id, seats) in allocations {
        let project = &locked[&id];
        if project.status == ProjectStatus::Rejected {
            return Err(Error::InvalidState(format!("project {id} has been rejected")));
        }
        if seats > project.requested_scholarships {
            return Err(Error::Validation(format!(
                "project {id} requested {} scholarship seats, cannot allocate {seats}",
                project.requested_scholarships
            )));
        }
        let consumed = seats::consumed(conn, id, SeatType::Scholarship).await?;
        if seats < consumed {
            return Err(Error::Validation(format!(
                "project {id} already uses {consumed} scholarship seats, cannot allocate {seats}"
            )));
        }
        *per_term.entry(project.term).or_default() += seats;
    }

    for (&term, &wanted) in &per_term {
        let Some(quota) = terms::lock_quota(conn, term).await? else {
            if wanted == 0 {
                continue;
            }
            return Err(Error::Business(format!(
                "no scholarship quota defined for term {term}"
            )));
        };
        let untouched: u32 = projects::committed_in_term(conn, term)
            .await?
            .iter()
            .filter(|p| !locked.contains_key(&p.id))
            .map(|p| p.allocated_scholarships)
            .sum();
        let available = quota.total_scholarships.saturating_sub(untouched);
        if wanted > available {
            return Err(Error::Validation(format!(
                "only {available} scholarship seats remain in term {term}, cannot allocate {wanted}"
            )));
        }
    }

    let mut updated = Vec::with_capacity(allocations.len());
    for &(id, seats) in allocations {
        projects::set_allocation(conn, id, seats, now).await?;
        debug!(project = %id, seats, "allocation set");
        updated.push(projects::get(conn, id).await?);
    }
    Ok(updated)
}

impl Engine {
    pub async fn validate_allocation(
        &mut self,
        actor: Actor,
        id: ProjectId,
        proposed: u32,
    ) -> Result<AllocationCheck> {
        actor.require_role(&[Role::Admin])?;
        let conn = self.store.conn();
        let project = projects::get(conn, id).await?;
        let available = match terms::find_quota(conn, project.term).await? {
            Some(quota) => Some(available_seats(conn, &quota, id).await?),
            None => None,
        };
        Ok(AllocationCheck {
            project: id,
            proposed,
            requested: project.requested_scholarships,
            available,
            exceeds_request: proposed > project.requested_scholarships,
            exceeds_quota: proposed > available.unwrap_or(0),
        })
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn set_project_allocation(
        &mut self,
        actor: Actor,
        id: ProjectId,
        seats: u32,
    ) -> Result<Project> {
        actor.require_role(&[Role::Admin])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut updated = apply_allocations(&mut tx, &[(id, seats)], now).await?;
        let project = updated.pop().ok_or_else(|| Error::not_found("project", id))?;
        tx.commit().await?;
        info!(project = %id, seats, "scholarship allocation changed");
        Ok(project)
    }

    /// Apply every allocation or none of them.
    #[instrument(skip(self, allocations), fields(actor = %actor, count = allocations.len()))]
    pub async fn bulk_set_allocation(
        &mut self,
        actor: Actor,
        allocations: &[(ProjectId, u32)],
    ) -> Result<Vec<Project>> {
        actor.require_role(&[Role::Admin])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let updated = apply_allocations(&mut tx, allocations, now).await?;
        tx.commit().await?;
        info!("scholarship allocations changed");
        Ok(updated)
    }

    /// Give a seat of the project to the candidate and mark the application
    /// as selected for it.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn allocate_candidate(
        &mut self,
        actor: Actor,
        id: ApplicationId,
        seat: SeatType,
    ) -> Result<Application> {
        actor.require_role(&[Role::Admin, Role::Professor])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let application = applications::get(&mut tx, id).await?;
        let project = projects::lock(&mut tx, application.project, now).await?;
        if actor.role == Role::Professor && !project.is_owned_by(actor.id) {
            return Err(Error::Forbidden(format!(
                "project {} belongs to another professor",
                project.id
            )));
        }
        if project.status != ProjectStatus::Approved {
            return Err(Error::InvalidState(format!(
                "project {} is not approved",
                project.id
            )));
        }
        if !application.status.is_ranked() {
            return Err(Error::InvalidState(format!(
                "application {id} cannot be allocated while {}",
                application.status
            )));
        }
        check_capacity(&mut tx, &project, seat).await?;
        let held = seats::held_by(&mut tx, id).await?;
        if held == Some(seat) && application.status == seat.selected_status() {
            tx.commit().await?;
            debug!(application = %id, %seat, "seat already allocated");
            return Ok(application);
        }
        if !application.requested_seat.accepts(seat) {
            return Err(Error::Business(format!(
                "application {id} did not ask for a {seat} seat"
            )));
        }
        match held {
            Some(previous) if previous == seat => {}
            Some(_) => seats::change_type(&mut tx, id, seat, now).await?,
            None => seats::insert(&mut tx, id, project.id, seat, now).await?,
        }
        applications::set_status(&mut tx, id, seat.selected_status(), None, now).await?;
        let application = applications::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, project = %project.id, %seat, "seat allocated");
        self.notify(
            Notification::new(
                Recipient::Student(application.student),
                NotificationKind::ApplicationSelected,
            )
            .about(project.id)
            .with("title", &project.title)
            .with("seat", seat),
        );
        Ok(application)
    }

    /// Give back the seat held by a declined or rejected application.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn release_seat(&mut self, actor: Actor, id: ApplicationId) -> Result<bool> {
        actor.require_role(&[Role::Admin])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let application = applications::get(&mut tx, id).await?;
        projects::lock(&mut tx, application.project, now).await?;
        if !matches!(
            application.status,
            ApplicationStatus::Declined | ApplicationStatus::RejectedByProfessor
        ) {
            return Err(Error::InvalidState(format!(
                "application {id} still uses its seat while {}",
                application.status
            )));
        }
        let released = seats::release(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, released, "seat released");
        Ok(released)
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn set_quota(&mut self, actor: Actor, term: Term, total: u32) -> Result<Quota> {
        actor.require_role(&[Role::Admin])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        terms::lock_quota(&mut tx, term).await?;
        let committed = committed_elsewhere(&mut tx, term, None).await?;
        if total < committed {
            return Err(Error::Validation(format!(
                "{committed} scholarship seats are already committed in term {term}"
            )));
        }
        terms::save_quota(&mut tx, term, total, now).await?;
        let quota = terms::find_quota(&mut tx, term)
            .await?
            .ok_or_else(|| Error::not_found("quota", term))?;
        tx.commit().await?;
        info!(%term, total, "quota set");
        Ok(quota)
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn open_inscription_period(
        &mut self,
        actor: Actor,
        term: Term,
        opens_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    ) -> Result<InscriptionPeriod> {
        actor.require_role(&[Role::Admin])?;
        if opens_at >= closes_at {
            return Err(Error::Validation(
                "an inscription period must close after it opens".into(),
            ));
        }
        let period = terms::insert_period(self.store.conn(), term, opens_at, closes_at).await?;
        info!(%term, period = %period.id, "inscription period opened");
        Ok(period)
    }

    pub async fn term_summary(&mut self, actor: Actor, term: Term) -> Result<TermSummary> {
        actor.require_role(&[Role::Admin, Role::Professor])?;
        let conn = self.store.conn();
        let quota = terms::find_quota(conn, term).await?;
        let mut rows = Vec::new();
        for project in projects::in_term(conn, term).await? {
            let scholarships = seats::consumed(conn, project.id, SeatType::Scholarship).await?;
            let volunteers = seats::consumed(conn, project.id, SeatType::Volunteer).await?;
            rows.push((project, scholarships, volunteers));
        }
        Ok(stats::summarize(term, quota.as_ref(), rows))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::model::{ApplicationStatus, ProjectStatus, RequestedSeat, SeatType};
    use crate::testing::{
        ADMIN, Fixture, OTHER_PROFESSOR, PROFESSOR, STUDENT, STUDENT2, SharedDatabase, TERM,
    };

    #[tokio::test]
    async fn test_allocation_over_remaining_quota() {
        let mut f = Fixture::with_quota(3).await;
        f.approved_project(2, 2, 0).await;
        let project = f.approved_project(2, 0, 0).await;
        let check = f
            .engine
            .validate_allocation(ADMIN, project.id, 2)
            .await
            .unwrap();
        assert_eq!(check.available, Some(1));
        assert!(check.exceeds_quota);
        assert!(!check.exceeds_request);
        assert!(matches!(
            f.engine.set_project_allocation(ADMIN, project.id, 2).await,
            Err(Error::Validation(_))
        ));
        let project = f
            .engine
            .set_project_allocation(ADMIN, project.id, 1)
            .await
            .unwrap();
        assert_eq!(project.allocated_scholarships, 1);
        let summary = f.engine.term_summary(ADMIN, TERM).await.unwrap();
        assert_eq!(summary.committed, 3);
        assert_eq!(summary.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_allocation_above_request() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        assert!(matches!(
            f.engine.set_project_allocation(ADMIN, project.id, 2).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            f.engine.set_project_allocation(PROFESSOR, project.id, 1).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_allocation_is_all_or_nothing() {
        let mut f = Fixture::with_quota(4).await;
        let a = f.approved_project(2, 1, 0).await;
        let b = f.approved_project(3, 1, 0).await;
        assert!(matches!(
            f.engine
                .bulk_set_allocation(ADMIN, &[(a.id, 2), (b.id, 3)])
                .await,
            Err(Error::Validation(_))
        ));
        assert_eq!(f.engine.project(a.id).await.unwrap().allocated_scholarships, 1);
        let updated = f
            .engine
            .bulk_set_allocation(ADMIN, &[(a.id, 2), (b.id, 2)])
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(f.engine.project(b.id).await.unwrap().allocated_scholarships, 2);
    }

    #[tokio::test]
    async fn test_bulk_allocation_ignores_entry_order() {
        let mut f = Fixture::with_quota(3).await;
        let a = f.approved_project(3, 1, 0).await;
        let b = f.approved_project(3, 2, 0).await;
        let updated = f
            .engine
            .bulk_set_allocation(ADMIN, &[(a.id, 3), (b.id, 0)])
            .await
            .unwrap();
        assert_eq!(updated[0].id, a.id);
        assert_eq!(updated[0].allocated_scholarships, 3);
        assert_eq!(updated[1].allocated_scholarships, 0);

        let updated = f
            .engine
            .bulk_set_allocation(ADMIN, &[(a.id, 1), (b.id, 2)])
            .await
            .unwrap();
        assert_eq!(updated[1].allocated_scholarships, 2);
        f.engine
            .bulk_set_allocation(ADMIN, &[(b.id, 0), (a.id, 3)])
            .await
            .unwrap();
        assert_eq!(f.engine.project(a.id).await.unwrap().allocated_scholarships, 3);
        assert_eq!(f.engine.project(b.id).await.unwrap().allocated_scholarships, 0);
    }

    #[tokio::test]
    async fn test_bulk_allocation_rejects_repeated_project() {
        let mut f = Fixture::with_quota(5).await;
        let a = f.approved_project(3, 1, 0).await;
        assert!(matches!(
            f.engine
                .bulk_set_allocation(ADMIN, &[(a.id, 3), (a.id, 1)])
                .await,
            Err(Error::Validation(_))
        ));
        assert_eq!(f.engine.project(a.id).await.unwrap().allocated_scholarships, 1);
    }

    #[tokio::test]
    async fn test_allocate_candidate_twice_exhausts_seats() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        let application = f
            .application(project.id, STUDENT, RequestedSeat::Scholarship)
            .await;
        let allocated = f
            .engine
            .allocate_candidate(ADMIN, application.id, SeatType::Scholarship)
            .await
            .unwrap();
        assert_eq!(allocated.status, ApplicationStatus::SelectedScholarship);
        assert!(matches!(
            f.engine
                .allocate_candidate(ADMIN, application.id, SeatType::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
        let other = f
            .application(project.id, STUDENT2, RequestedSeat::Either)
            .await;
        assert!(matches!(
            f.engine
                .allocate_candidate(PROFESSOR, other.id, SeatType::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_of_last_seat() {
        let database = SharedDatabase::new();
        let mut f = Fixture::shared(&database, 2).await;
        let project = f.approved_project(1, 1, 0).await;
        let first = f
            .application(project.id, STUDENT, RequestedSeat::Scholarship)
            .await;
        let second = f
            .application(project.id, STUDENT2, RequestedSeat::Scholarship)
            .await;
        let mut other = f.second_engine(&database).await;
        let (left, right) = tokio::join!(
            f.engine
                .allocate_candidate(ADMIN, first.id, SeatType::Scholarship),
            other.allocate_candidate(PROFESSOR, second.id, SeatType::Scholarship),
        );
        let lost = match (left, right) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
            (left, right) => panic!("expected exactly one allocation: {left:?} / {right:?}"),
        };
        assert!(matches!(lost, Error::Business(_) | Error::Conflict(_)));
        let summary = f.engine.term_summary(ADMIN, TERM).await.unwrap();
        let row = summary
            .projects
            .iter()
            .find(|p| p.id == project.id)
            .unwrap();
        assert_eq!(row.consumed_scholarships, 1);
    }

    #[tokio::test]
    async fn test_allocate_candidate_checks_owner_and_request() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(2, 2, 2).await;
        let application = f
            .application(project.id, STUDENT, RequestedSeat::Volunteer)
            .await;
        assert!(matches!(
            f.engine
                .allocate_candidate(OTHER_PROFESSOR, application.id, SeatType::Volunteer)
                .await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            f.engine
                .allocate_candidate(PROFESSOR, application.id, SeatType::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
        let application = f
            .engine
            .allocate_candidate(PROFESSOR, application.id, SeatType::Volunteer)
            .await
            .unwrap();
        assert_eq!(application.status, ApplicationStatus::SelectedVolunteer);
        // Capacity left: repeating is harmless.
        f.engine
            .allocate_candidate(PROFESSOR, application.id, SeatType::Volunteer)
            .await
            .unwrap();
        let summary = f.engine.term_summary(ADMIN, TERM).await.unwrap();
        let row = summary
            .projects
            .iter()
            .find(|p| p.id == project.id)
            .unwrap();
        assert_eq!(row.consumed_volunteers, 1);
    }

    #[tokio::test]
    async fn test_declined_seat_is_released_by_admin_only() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        let application = f
            .application(project.id, STUDENT, RequestedSeat::Scholarship)
            .await;
        f.engine
            .allocate_candidate(ADMIN, application.id, SeatType::Scholarship)
            .await
            .unwrap();
        assert!(matches!(
            f.engine.release_seat(ADMIN, application.id).await,
            Err(Error::InvalidState(_))
        ));
        f.engine.decline(STUDENT, application.id, None).await.unwrap();
        let other = f
            .application(project.id, STUDENT2, RequestedSeat::Scholarship)
            .await;
        assert!(matches!(
            f.engine
                .allocate_candidate(ADMIN, other.id, SeatType::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
        assert!(matches!(
            f.engine.release_seat(PROFESSOR, application.id).await,
            Err(Error::Forbidden(_))
        ));
        assert!(f.engine.release_seat(ADMIN, application.id).await.unwrap());
        f.engine
            .allocate_candidate(ADMIN, other.id, SeatType::Scholarship)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quota_cannot_drop_below_commitments() {
        let mut f = Fixture::with_quota(5).await;
        let project = f.approved_project(3, 3, 0).await;
        assert_eq!(project.status, ProjectStatus::Approved);
        assert!(matches!(
            f.engine.set_quota(ADMIN, TERM, 2).await,
            Err(Error::Validation(_))
        ));
        let quota = f.engine.set_quota(ADMIN, TERM, 3).await.unwrap();
        assert_eq!(quota.total_scholarships, 3);
    }

    #[tokio::test]
    async fn test_period_bounds() {
        let mut f = Fixture::new().await;
        let now = f.clock_now();
        assert!(matches!(
            f.engine.open_inscription_period(ADMIN, TERM, now, now).await,
            Err(Error::Validation(_))
        ));
    }
}
