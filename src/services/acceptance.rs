use super::allocation::check_capacity;
use super::signatures::required_roles;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    Actor, Application, ApplicationId, ApplicationStatus, CompletionStatus, Position, PositionId,
    Role, SeatType, SignatureTarget, Term,
};
use crate::notify::{Notification, NotificationKind, Recipient};
use crate::store::positions::{self, NewPosition};
use crate::store::{applications, projects, seats, signatures};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

fn require_student(actor: Actor, application: &Application) -> Result<()> {
    if application.student == actor.id {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "application {} belongs to another student",
            application.id
        )))
    }
}

impl Engine {
    /// Turn a selected application into a position starting now.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn accept(&mut self, actor: Actor, id: ApplicationId) -> Result<Position> {
        actor.require_role(&[Role::Student])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let application = applications::get(&mut tx, id).await?;
        require_student(actor, &application)?;
        let seat = application.status.selected_seat().ok_or_else(|| {
            Error::InvalidState(format!(
                "application {id} cannot be accepted while {}",
                application.status
            ))
        })?;
        let project = projects::lock(&mut tx, application.project, now).await?;
        if seat == SeatType::Scholarship {
            if let Some(active) =
                positions::active_scholarship(&mut tx, actor.id, project.term).await?
            {
                return Err(Error::Business(format!(
                    "student already holds scholarship position {active} in term {}",
                    project.term
                )));
            }
        }
        match seats::held_by(&mut tx, id).await? {
            Some(held) if held == seat => {}
            held => {
                check_capacity(&mut tx, &project, seat).await?;
                if held.is_some() {
                    seats::change_type(&mut tx, id, seat, now).await?;
                } else {
                    seats::insert(&mut tx, id, project.id, seat, now).await?;
                }
            }
        }
        let position = positions::insert(
            &mut tx,
            &NewPosition {
                student: actor.id,
                project: project.id,
                application: id,
                seat_type: seat,
                term: project.term,
                start_date: now,
            },
        )
        .await?;
        if seat == SeatType::Scholarship
            && !positions::claim_scholarship(&mut tx, actor.id, project.term, position).await?
        {
            return Err(Error::Business(format!(
                "student already holds a scholarship position in term {}",
                project.term
            )));
        }
        applications::set_status(&mut tx, id, seat.accepted_status(), None, now).await?;
        let position = positions::get(&mut tx, position).await?;
        tx.commit().await?;
        info!(application = %id, position = %position.id, %seat, "seat accepted");
        self.notify(
            Notification::new(
                Recipient::Professor(project.professor),
                NotificationKind::SeatAccepted,
            )
            .about(project.id)
            .with("student", actor.id)
            .with("seat", seat),
        );
        Ok(position)
    }

    /// Turn down an offer. The seat stays consumed until an administrator
    /// releases it.
    #[instrument(skip(self, reason), fields(actor = %actor))]
    pub async fn decline(
        &mut self,
        actor: Actor,
        id: ApplicationId,
        reason: Option<&str>,
    ) -> Result<Application> {
        actor.require_role(&[Role::Student])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let application = applications::get(&mut tx, id).await?;
        require_student(actor, &application)?;
        match application.status {
            ApplicationStatus::Declined => {
                tx.commit().await?;
                return Ok(application);
            }
            status if status.selected_seat().is_some() => {
                applications::set_status(&mut tx, id, ApplicationStatus::Declined, None, now)
                    .await?;
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "application {id} cannot be declined while {status}"
                )));
            }
        }
        let project = projects::get(&mut tx, application.project).await?;
        let application = applications::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, "offer declined");
        let mut notification = Notification::new(
            Recipient::Professor(project.professor),
            NotificationKind::SeatDeclined,
        )
        .about(project.id)
        .with("student", actor.id);
        if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
            notification = notification.with("reason", reason);
        }
        self.notify(notification);
        Ok(application)
    }

    pub async fn position(&mut self, id: PositionId) -> Result<Position> {
        positions::get(self.store.conn(), id).await
    }

    pub async fn positions_in_term(&mut self, term: Term) -> Result<Vec<Position>> {
        positions::in_term(self.store.conn(), term).await
    }

    /// Close a position whose commitment term is fully signed. The end date
    /// defaults to now.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn finalize(
        &mut self,
        actor: Actor,
        id: PositionId,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Position> {
        actor.require_role(&[Role::Admin])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let position = positions::get(&mut tx, id).await?;
        if !position.is_active() {
            tx.commit().await?;
            debug!(position = %id, "position already finalized");
            return Ok(position);
        }
        let target = SignatureTarget::Position(id);
        let signed = signatures::signed_roles(&mut tx, target).await?;
        let completion =
            CompletionStatus::compute(&required_roles(&self.signatures, target), &signed);
        if !completion.complete {
            return Err(Error::Business(format!(
                "commitment term of position {id} is not fully signed"
            )));
        }
        let end_date = end_date.unwrap_or(now);
        if end_date < position.start_date {
            return Err(Error::Validation(format!(
                "position {id} cannot end before it started"
            )));
        }
        positions::set_end_date(&mut tx, id, end_date).await?;
        positions::release_scholarship(&mut tx, id).await?;
        let position = positions::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(position = %id, "position finalized");
        self.notify(
            Notification::new(
                Recipient::Student(position.student),
                NotificationKind::PositionFinalized,
            )
            .about(position.project),
        );
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::model::{ApplicationStatus, RequestedSeat, Role, SeatType, SignatureTarget};
    use crate::testing::{ADMIN, Fixture, PROFESSOR, STUDENT, STUDENT2, SharedDatabase, TERM};
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_concurrent_scholarship_acceptances() {
        let database = SharedDatabase::new();
        let mut f = Fixture::shared(&database, 4).await;
        let first = f.approved_project(1, 1, 0).await;
        let second = f.approved_project(1, 1, 0).await;
        let mut selected = Vec::new();
        for project in [first.id, second.id] {
            let application = f
                .application(project, STUDENT, RequestedSeat::Scholarship)
                .await;
            f.engine
                .allocate_candidate(ADMIN, application.id, SeatType::Scholarship)
                .await
                .unwrap();
            selected.push(application.id);
        }
        let mut other = f.second_engine(&database).await;
        let (left, right) = tokio::join!(
            f.engine.accept(STUDENT, selected[0]),
            other.accept(STUDENT, selected[1]),
        );
        let (won, lost) = match (left, right) {
            (Ok(position), Err(e)) | (Err(e), Ok(position)) => (position, e),
            (left, right) => panic!("expected exactly one acceptance: {left:?} / {right:?}"),
        };
        assert!(matches!(lost, Error::Business(_) | Error::Conflict(_)));
        assert_eq!(won.seat_type, SeatType::Scholarship);
        let positions = f.engine.positions_in_term(TERM).await.unwrap();
        assert_eq!(positions.len(), 1);
    }

    #[tokio::test]
    async fn test_accept_creates_position() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        let application = f
            .application(project.id, STUDENT, RequestedSeat::Scholarship)
            .await;
        assert!(matches!(
            f.engine.accept(STUDENT, application.id).await,
            Err(Error::InvalidState(_))
        ));
        f.engine
            .select_application(PROFESSOR, application.id, SeatType::Scholarship)
            .await
            .unwrap();
        assert!(matches!(
            f.engine.accept(STUDENT2, application.id).await,
            Err(Error::Forbidden(_))
        ));
        let position = f.engine.accept(STUDENT, application.id).await.unwrap();
        assert_eq!(position.seat_type, SeatType::Scholarship);
        assert_eq!(position.start_date, f.clock_now());
        assert!(position.is_active());
        let application = f.engine.application(application.id).await.unwrap();
        assert_eq!(application.status, ApplicationStatus::AcceptedScholarship);
        assert!(matches!(
            f.engine.accept(STUDENT, application.id).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_one_scholarship_per_term() {
        let mut f = Fixture::new().await;
        let first = f.approved_project(1, 1, 1).await;
        let second = f.approved_project(1, 1, 1).await;
        f.position(first.id, STUDENT, SeatType::Scholarship).await;
        let application = f
            .application(second.id, STUDENT, RequestedSeat::Either)
            .await;
        f.engine
            .allocate_candidate(ADMIN, application.id, SeatType::Scholarship)
            .await
            .unwrap();
        assert!(matches!(
            f.engine.accept(STUDENT, application.id).await,
            Err(Error::Business(_))
        ));
        // A volunteer seat is still possible.
        f.engine
            .allocate_candidate(ADMIN, application.id, SeatType::Volunteer)
            .await
            .unwrap();
        let position = f.engine.accept(STUDENT, application.id).await.unwrap();
        assert_eq!(position.seat_type, SeatType::Volunteer);
    }

    #[tokio::test]
    async fn test_volunteer_position_does_not_block_scholarship() {
        let mut f = Fixture::new().await;
        let first = f.approved_project(1, 1, 1).await;
        let second = f.approved_project(1, 1, 0).await;
        f.position(first.id, STUDENT, SeatType::Volunteer).await;
        let position = f.position(second.id, STUDENT, SeatType::Scholarship).await;
        assert_eq!(position.seat_type, SeatType::Scholarship);
    }

    #[tokio::test]
    async fn test_accept_without_free_seat() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        f.position(project.id, STUDENT, SeatType::Scholarship).await;
        let other = f
            .application(project.id, STUDENT2, RequestedSeat::Scholarship)
            .await;
        f.engine
            .select_application(PROFESSOR, other.id, SeatType::Scholarship)
            .await
            .unwrap();
        assert!(matches!(
            f.engine.accept(STUDENT2, other.id).await,
            Err(Error::Business(_))
        ));
    }

    #[tokio::test]
    async fn test_decline_is_idempotent() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        let application = f
            .application(project.id, STUDENT, RequestedSeat::Scholarship)
            .await;
        assert!(matches!(
            f.engine.decline(STUDENT, application.id, None).await,
            Err(Error::InvalidState(_))
        ));
        f.engine
            .allocate_candidate(PROFESSOR, application.id, SeatType::Scholarship)
            .await
            .unwrap();
        let declined = f
            .engine
            .decline(STUDENT, application.id, Some("moving abroad"))
            .await
            .unwrap();
        assert_eq!(declined.status, ApplicationStatus::Declined);
        f.engine.decline(STUDENT, application.id, None).await.unwrap();
        let summary = f.engine.term_summary(ADMIN, project.term).await.unwrap();
        assert_eq!(summary.projects[0].consumed_scholarships, 1);
    }

    #[tokio::test]
    async fn test_finalize_requires_signed_commitment() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        let position = f.position(project.id, STUDENT, SeatType::Scholarship).await;
        let target = SignatureTarget::Position(position.id);
        assert!(matches!(
            f.engine.finalize(ADMIN, position.id, None).await,
            Err(Error::Business(_))
        ));
        f.engine
            .record_signature(STUDENT, target, Role::Student, "student")
            .await
            .unwrap();
        f.engine
            .record_signature(PROFESSOR, target, Role::Professor, "professor")
            .await
            .unwrap();
        let before_start = position.start_date - TimeDelta::days(1);
        assert!(matches!(
            f.engine.finalize(ADMIN, position.id, Some(before_start)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            f.engine.finalize(PROFESSOR, position.id, None).await,
            Err(Error::Forbidden(_))
        ));
        f.clock.advance(TimeDelta::days(120));
        let finalized = f.engine.finalize(ADMIN, position.id, None).await.unwrap();
        assert_eq!(finalized.end_date, Some(f.clock_now()));
        let again = f.engine.finalize(ADMIN, position.id, None).await.unwrap();
        assert_eq!(again.end_date, finalized.end_date);

        // The scholarship slot of the term is free again.
        let now = f.clock_now();
        f.engine
            .open_inscription_period(ADMIN, TERM, now, now + TimeDelta::days(7))
            .await
            .unwrap();
        let other = f.approved_project(1, 1, 0).await;
        f.position(other.id, STUDENT, SeatType::Scholarship).await;
        let positions = f.engine.positions_in_term(TERM).await.unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions.iter().filter(|p| p.is_active()).count(), 1);
    }
}
