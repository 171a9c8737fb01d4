use super::allocation::check_quota;
use super::signatures::required_roles;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    Actor, CompletionStatus, Project, ProjectDraft, ProjectId, ProjectStatus, Role,
    SignatureTarget, Term,
};
use crate::notify::{Notification, NotificationKind, Recipient};
use crate::store::{applications, projects, signatures};
use tracing::{debug, info, instrument};

fn require_owner(actor: Actor, project: &Project) -> Result<()> {
    if project.is_owned_by(actor.id) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "project {} belongs to another professor",
            project.id
        )))
    }
}

fn mandatory_feedback(feedback: &str) -> Result<&str> {
    let feedback = feedback.trim();
    if feedback.is_empty() {
        Err(Error::Validation("feedback is mandatory".into()))
    } else {
        Ok(feedback)
    }
}

impl Engine {
    #[instrument(skip(self, draft), fields(actor = %actor))]
    pub async fn create_project(&mut self, actor: Actor, draft: ProjectDraft) -> Result<Project> {
        actor.require_role(&[Role::Professor])?;
        draft.validate()?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let id = projects::insert(&mut tx, actor.id, &draft, now).await?;
        let project = projects::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, term = %project.term, "project created");
        Ok(project)
    }

    pub async fn project(&mut self, id: ProjectId) -> Result<Project> {
        projects::get(self.store.conn(), id).await
    }

    pub async fn projects_in_term(&mut self, term: Term) -> Result<Vec<Project>> {
        projects::in_term(self.store.conn(), term).await
    }

    /// Replace the content of a project still open to changes. Allocated
    /// seats never exceed the new request.
    #[instrument(skip(self, draft), fields(actor = %actor))]
    pub async fn update_project(
        &mut self,
        actor: Actor,
        id: ProjectId,
        draft: ProjectDraft,
    ) -> Result<Project> {
        actor.require_role(&[Role::Professor])?;
        draft.validate()?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, id, now).await?;
        require_owner(actor, &project)?;
        if !project.status.is_editable() {
            return Err(Error::InvalidState(format!(
                "project {id} cannot be edited while {}",
                project.status
            )));
        }
        let allocated = project
            .allocated_scholarships
            .min(draft.requested_scholarships);
        projects::update_content(&mut tx, id, &draft, allocated, now).await?;
        let project = projects::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, "project updated");
        Ok(project)
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn delete_project(&mut self, actor: Actor, id: ProjectId) -> Result<()> {
        actor.require_role(&[Role::Professor])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, id, now).await?;
        require_owner(actor, &project)?;
        if project.status != ProjectStatus::Draft {
            return Err(Error::InvalidState(format!(
                "only draft projects can be deleted, project {id} is {}",
                project.status
            )));
        }
        if applications::count_for_project(&mut tx, id).await? > 0 {
            return Err(Error::Business(format!("project {id} has applications")));
        }
        projects::delete(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, "project deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn submit_project(&mut self, actor: Actor, id: ProjectId) -> Result<Project> {
        actor.require_role(&[Role::Professor])?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, id, now).await?;
        require_owner(actor, &project)?;
        match project.status {
            ProjectStatus::Submitted => {
                tx.commit().await?;
                debug!(project = %id, "project already submitted");
                return Ok(project);
            }
            ProjectStatus::Draft | ProjectStatus::PendingRevision => {
                projects::set_status(&mut tx, id, ProjectStatus::Submitted, now).await?;
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "project {id} cannot be submitted while {status}"
                )));
            }
        }
        let project = projects::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, "project submitted");
        self.notify(
            Notification::new(Recipient::Admins, NotificationKind::ProjectSubmitted)
                .about(id)
                .with("title", &project.title),
        );
        Ok(project)
    }

    /// Approve a submitted project with `allocated` scholarship seats. The
    /// project only becomes approved once all its signatures are present.
    #[instrument(skip(self, feedback), fields(actor = %actor))]
    pub async fn approve_project(
        &mut self,
        actor: Actor,
        id: ProjectId,
        allocated: u32,
        feedback: Option<String>,
    ) -> Result<Project> {
        actor.require_role(&[Role::Admin])?;
        let feedback = feedback.filter(|f| !f.trim().is_empty());
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, id, now).await?;
        if project.status.is_committed() {
            if project.allocated_scholarships == allocated && project.admin_feedback == feedback {
                tx.commit().await?;
                debug!(project = %id, "project already approved");
                return Ok(project);
            }
            return Err(Error::InvalidState(format!(
                "project {id} has already been approved"
            )));
        }
        if project.status != ProjectStatus::Submitted {
            return Err(Error::InvalidState(format!(
                "project {id} cannot be approved while {}",
                project.status
            )));
        }
        check_quota(&mut tx, &project, allocated).await?;
        let target = SignatureTarget::Project(id);
        let signed = signatures::signed_roles(&mut tx, target).await?;
        let completion =
            CompletionStatus::compute(&required_roles(&self.signatures, target), &signed);
        let status = if completion.complete {
            ProjectStatus::Approved
        } else {
            ProjectStatus::PendingAdminSignature
        };
        projects::set_allocation(&mut tx, id, allocated, now).await?;
        projects::set_decision(&mut tx, id, status, feedback.as_deref(), now).await?;
        let project = projects::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, allocated, status = %status, "project approved");
        self.notify(
            Notification::new(
                Recipient::Professor(project.professor),
                NotificationKind::ProjectApproved,
            )
            .about(id)
            .with("title", &project.title)
            .with("allocated_scholarships", allocated)
            .with("status", status),
        );
        Ok(project)
    }

    #[instrument(skip(self, feedback), fields(actor = %actor))]
    pub async fn reject_project(
        &mut self,
        actor: Actor,
        id: ProjectId,
        feedback: &str,
    ) -> Result<Project> {
        actor.require_role(&[Role::Admin])?;
        let feedback = mandatory_feedback(feedback)?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, id, now).await?;
        match project.status {
            ProjectStatus::Rejected => {
                tx.commit().await?;
                return Ok(project);
            }
            ProjectStatus::Submitted => {
                projects::set_decision(&mut tx, id, ProjectStatus::Rejected, Some(feedback), now)
                    .await?;
                let voided =
                    signatures::void_grants(&mut tx, SignatureTarget::Project(id), now).await?;
                debug!(project = %id, voided, "signature grants voided");
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "project {id} cannot be rejected while {status}"
                )));
            }
        }
        let project = projects::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, "project rejected");
        self.notify(
            Notification::new(
                Recipient::Professor(project.professor),
                NotificationKind::ProjectRejected,
            )
            .about(id)
            .with("title", &project.title)
            .with("feedback", feedback),
        );
        Ok(project)
    }

    /// Send a project back to its professor. Its signatures are dropped: the
    /// revised content has to be signed and submitted again.
    #[instrument(skip(self, feedback), fields(actor = %actor))]
    pub async fn request_revision(
        &mut self,
        actor: Actor,
        id: ProjectId,
        feedback: &str,
    ) -> Result<Project> {
        actor.require_role(&[Role::Admin])?;
        let feedback = mandatory_feedback(feedback)?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let project = projects::lock(&mut tx, id, now).await?;
        match project.status {
            ProjectStatus::PendingRevision => {
                tx.commit().await?;
                return Ok(project);
            }
            ProjectStatus::Submitted | ProjectStatus::PendingAdminSignature => {
                projects::set_decision(
                    &mut tx,
                    id,
                    ProjectStatus::PendingRevision,
                    Some(feedback),
                    now,
                )
                .await?;
                let target = SignatureTarget::Project(id);
                let cleared = signatures::clear(&mut tx, target).await?;
                let voided = signatures::void_grants(&mut tx, target, now).await?;
                projects::set_signed_document(&mut tx, id, None).await?;
                debug!(project = %id, cleared, voided, "project signatures cleared");
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "cannot request a revision of project {id} while {status}"
                )));
            }
        }
        let project = projects::get(&mut tx, id).await?;
        tx.commit().await?;
        info!(project = %id, "revision requested");
        self.notify(
            Notification::new(
                Recipient::Professor(project.professor),
                NotificationKind::RevisionRequested,
            )
            .about(id)
            .with("title", &project.title)
            .with("feedback", feedback),
        );
        Ok(project)
    }
}
