use super::ranking::{self, RankedCandidate};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    Actor, Application, ApplicationId, ApplicationStatus, Grades, Project, ProjectId,
    ProjectStatus, RequestedSeat, Role, SeatType, final_score,
};
use crate::notify::{Notification, NotificationKind, Recipient};
use crate::store::{applications, projects, terms};
use sqlx::AnyConnection;
use tracing::{debug, info, instrument};

/// Load an application together with its project, checking that the actor
/// is the professor in charge of it.
async fn owned_application(
    conn: &mut AnyConnection,
    actor: Actor,
    id: ApplicationId,
) -> Result<(Application, Project)> {
    let application = applications::get(conn, id).await?;
    let project = projects::get(conn, application.project).await?;
    if !project.is_owned_by(actor.id) {
        return Err(Error::Forbidden(format!(
            "application {id} belongs to a project of another professor"
        )));
    }
    Ok((application, project))
}

fn offers(project: &Project, requested: RequestedSeat) -> bool {
    let scholarships = project.allocated_scholarships > 0;
    let volunteers = project.requested_volunteers > 0;
    match requested {
        RequestedSeat::Scholarship => scholarships,
        RequestedSeat::Volunteer => volunteers,
        RequestedSeat::Either => scholarships || volunteers,
    }
}

impl Engine {
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn submit_application(
        &mut self,
        actor: Actor,
        project_id: ProjectId,
        requested: RequestedSeat,
    ) -> Result<Application> {
        actor.require_role(&[Role::Student])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, project_id, now).await?;
        if terms::open_period(&mut tx, project.term, now).await?.is_none() {
            return Err(Error::Business(format!(
                "no inscription period is open for term {}",
                project.term
            )));
        }
        if project.status != ProjectStatus::Approved {
            return Err(Error::Business(format!(
                "project {project_id} is not open for applications"
            )));
        }
        if !offers(&project, requested) {
            return Err(Error::Business(format!(
                "project {project_id} offers no {requested} seat"
            )));
        }
        let previous = applications::of_student_for_project(&mut tx, actor.id, project_id).await?;
        if let Some(active) = previous.iter().find(|a| !a.status.is_terminal()) {
            return Err(Error::Business(format!(
                "student already applied to project {project_id} (application {})",
                active.id
            )));
        }
        let id = applications::insert(&mut tx, project_id, actor.id, requested, now).await?;
        let application = applications::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, project = %project_id, %requested, "application submitted");
        Ok(application)
    }

    pub async fn application(&mut self, id: ApplicationId) -> Result<Application> {
        applications::get(self.store.conn(), id).await
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn record_grades(
        &mut self,
        actor: Actor,
        id: ApplicationId,
        grades: Grades,
    ) -> Result<Application> {
        actor.require_role(&[Role::Professor])?;
        grades.validate()?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let (application, _) = owned_application(&mut tx, actor, id).await?;
        if !application.status.is_ranked() {
            return Err(Error::InvalidState(format!(
                "application {id} cannot be graded while {}",
                application.status
            )));
        }
        let score = final_score(&grades);
        applications::set_grades(&mut tx, id, &grades, score, now).await?;
        let application = applications::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, score, "grades recorded");
        Ok(application)
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn select_application(
        &mut self,
        actor: Actor,
        id: ApplicationId,
        seat: SeatType,
    ) -> Result<Application> {
        actor.require_role(&[Role::Professor])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let (application, project) = owned_application(&mut tx, actor, id).await?;
        if application.status == seat.selected_status() {
            tx.commit().await?;
            debug!(application = %id, "application already selected");
            return Ok(application);
        }
        if application.status != ApplicationStatus::Submitted {
            return Err(Error::InvalidState(format!(
                "application {id} cannot be selected while {}",
                application.status
            )));
        }
        if !application.requested_seat.accepts(seat) {
            return Err(Error::Business(format!(
                "application {id} did not ask for a {seat} seat"
            )));
        }
        applications::set_status(&mut tx, id, seat.selected_status(), None, now).await?;
        let application = applications::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, %seat, "application selected");
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

    #[instrument(skip(self, feedback), fields(actor = %actor))]
    pub async fn reject_application(
        &mut self,
        actor: Actor,
        id: ApplicationId,
        feedback: Option<&str>,
    ) -> Result<Application> {
        actor.require_role(&[Role::Professor])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let (application, project) = owned_application(&mut tx, actor, id).await?;
        match application.status {
            ApplicationStatus::RejectedByProfessor => {
                tx.commit().await?;
                return Ok(application);
            }
            status if status.is_ranked() => {
                let feedback = feedback.map(str::trim).filter(|f| !f.is_empty());
                applications::set_status(
                    &mut tx,
                    id,
                    ApplicationStatus::RejectedByProfessor,
                    feedback,
                    now,
                )
                .await?;
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "application {id} cannot be rejected while {status}"
                )));
            }
        }
        let application = applications::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(application = %id, "application rejected");
        self.notify(
            Notification::new(
                Recipient::Student(application.student),
                NotificationKind::ApplicationRejected,
            )
            .about(project.id)
            .with("title", &project.title),
        );
        Ok(application)
    }

    /// Current ranking of the project candidates. Professors only see their
    /// own projects.
    pub async fn rank_project(&mut self, actor: Actor, id: ProjectId) -> Result<Vec<RankedCandidate>> {
        actor.require_role(&[Role::Admin, Role::Professor])?;
        let conn = self.store.conn();
        let project = projects::get(conn, id).await?;
        if actor.role == Role::Professor && !project.is_owned_by(actor.id) {
            return Err(Error::Forbidden(format!(
                "project {id} belongs to another professor"
            )));
        }
        let applications = applications::for_project(conn, id).await?;
        Ok(ranking::rank(&applications))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::model::{ApplicationStatus, Grades, RequestedSeat, SeatType};
    use crate::notify::NotificationKind;
    use crate::testing::{
        ADMIN, Fixture, OTHER_PROFESSOR, PROFESSOR, STUDENT, STUDENT2, TERM, draft,
    };
    use chrono::TimeDelta;

    fn grades(discipline: f64, selection: f64, coefficient: f64) -> Grades {
        Grades {
            discipline,
            selection,
            coefficient,
        }
    }

    #[tokio::test]
    async fn test_submit_rules() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        assert!(matches!(
            f.engine
                .submit_application(PROFESSOR, project.id, RequestedSeat::Either)
                .await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            f.engine
                .submit_application(STUDENT, project.id, RequestedSeat::Volunteer)
                .await,
            Err(Error::Business(_))
        ));
        let application = f
            .engine
            .submit_application(STUDENT, project.id, RequestedSeat::Either)
            .await
            .unwrap();
        assert_eq!(application.status, ApplicationStatus::Submitted);
        assert!(matches!(
            f.engine
                .submit_application(STUDENT, project.id, RequestedSeat::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
        let draft_project = f
            .engine
            .create_project(PROFESSOR, draft("Logic", 1, 1))
            .await
            .unwrap();
        assert!(matches!(
            f.engine
                .submit_application(STUDENT, draft_project.id, RequestedSeat::Either)
                .await,
            Err(Error::Business(_))
        ));
    }

    #[tokio::test]
    async fn test_reapply_after_rejection() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 1).await;
        let application = f.application(project.id, STUDENT, RequestedSeat::Either).await;
        f.engine
            .reject_application(PROFESSOR, application.id, Some("missing prerequisite"))
            .await
            .unwrap();
        let again = f
            .engine
            .submit_application(STUDENT, project.id, RequestedSeat::Volunteer)
            .await
            .unwrap();
        assert_ne!(again.id, application.id);
    }

    #[tokio::test]
    async fn test_submit_outside_period() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        f.clock.advance(TimeDelta::days(30));
        assert!(matches!(
            f.engine
                .submit_application(STUDENT, project.id, RequestedSeat::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
        let now = f.clock_now();
        f.engine
            .open_inscription_period(ADMIN, TERM, now, now + TimeDelta::days(2))
            .await
            .unwrap();
        f.engine
            .submit_application(STUDENT, project.id, RequestedSeat::Scholarship)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_grades_and_ranking() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 1).await;
        let first = f.application(project.id, STUDENT, RequestedSeat::Either).await;
        f.clock.advance(TimeDelta::minutes(5));
        let second = f.application(project.id, STUDENT2, RequestedSeat::Either).await;
        assert!(matches!(
            f.engine
                .record_grades(PROFESSOR, first.id, grades(11.0, 5.0, 5.0))
                .await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            f.engine
                .record_grades(OTHER_PROFESSOR, first.id, grades(8.0, 7.0, 9.0))
                .await,
            Err(Error::Forbidden(_))
        ));
        let graded = f
            .engine
            .record_grades(PROFESSOR, first.id, grades(8.0, 7.0, 9.0))
            .await
            .unwrap();
        assert_eq!(graded.final_score, Some(7.9));
        f.engine
            .record_grades(PROFESSOR, second.id, grades(9.0, 8.0, 9.0))
            .await
            .unwrap();
        let ranking = f.engine.rank_project(PROFESSOR, project.id).await.unwrap();
        let ids = ranking.iter().map(|r| r.application.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(matches!(
            f.engine.rank_project(OTHER_PROFESSOR, project.id).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_select_and_reject() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 1).await;
        let application = f
            .application(project.id, STUDENT, RequestedSeat::Volunteer)
            .await;
        assert!(matches!(
            f.engine
                .select_application(PROFESSOR, application.id, SeatType::Scholarship)
                .await,
            Err(Error::Business(_))
        ));
        let selected = f
            .engine
            .select_application(PROFESSOR, application.id, SeatType::Volunteer)
            .await
            .unwrap();
        assert_eq!(selected.status, ApplicationStatus::SelectedVolunteer);
        f.engine
            .select_application(PROFESSOR, application.id, SeatType::Volunteer)
            .await
            .unwrap();
        assert!(
            f.notifier
                .sent()
                .iter()
                .any(|n| n.kind == NotificationKind::ApplicationSelected)
        );
        let rejected = f
            .engine
            .reject_application(PROFESSOR, application.id, None)
            .await
            .unwrap();
        assert_eq!(rejected.status, ApplicationStatus::RejectedByProfessor);
        f.engine
            .reject_application(PROFESSOR, application.id, None)
            .await
            .unwrap();
        assert!(matches!(
            f.engine
                .record_grades(PROFESSOR, application.id, grades(5.0, 5.0, 5.0))
                .await,
            Err(Error::InvalidState(_))
        ));
    }
}
