use super::signatures::required_roles;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    Actor, CommitmentReport, CommitmentState, CompletionStatus, PendingCommitment, Position,
    ProjectId, Role, SignatureTarget, Term,
};
use crate::store::positions::{self, PositionFilter};
use crate::store::{projects, signatures};
use sqlx::AnyConnection;
use std::collections::HashMap;

/// Narrowing of [`Engine::commitment_report`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitmentFilter {
    pub term: Option<Term>,
    pub project: Option<ProjectId>,
}

/// Project titles, fetched once per project.
#[derive(Default)]
struct Titles(HashMap<ProjectId, String>);

impl Titles {
    async fn get(&mut self, conn: &mut AnyConnection, id: ProjectId) -> Result<String> {
        if let Some(title) = self.0.get(&id) {
            return Ok(title.clone());
        }
        let title = projects::get(conn, id).await?.title;
        self.0.insert(id, title.clone());
        Ok(title)
    }
}

impl Engine {
    /// Positions held by the calling student, finalized ones included.
    pub async fn my_positions(&mut self, actor: Actor) -> Result<Vec<Position>> {
        actor.require_role(&[Role::Student])?;
        let filter = PositionFilter {
            student: Some(actor.id),
            ..PositionFilter::default()
        };
        positions::matching(self.store.conn(), &filter).await
    }

    /// Positions of a project, for its professor or an admin.
    pub async fn project_positions(&mut self, actor: Actor, id: ProjectId) -> Result<Vec<Position>> {
        actor.require_role(&[Role::Admin, Role::Professor])?;
        let conn = self.store.conn();
        let project = projects::get(conn, id).await?;
        if !actor.is_admin() && !project.is_owned_by(actor.id) {
            return Err(Error::Forbidden(format!(
                "project {id} belongs to another professor"
            )));
        }
        let filter = PositionFilter {
            project: Some(id),
            ..PositionFilter::default()
        };
        positions::matching(conn, &filter).await
    }

    /// Commitment terms waiting for the caller: a student sees the ones they
    /// have not signed, a professor the ones of their projects they have not
    /// signed, and an admin every incomplete one.
    pub async fn pending_commitments(&mut self, actor: Actor) -> Result<Vec<PendingCommitment>> {
        let mut filter = PositionFilter {
            active_only: true,
            ..PositionFilter::default()
        };
        match actor.role {
            Role::Student => filter.student = Some(actor.id),
            Role::Professor => filter.professor = Some(actor.id),
            Role::Admin => {}
        }
        let conn = self.store.conn();
        let mut titles = Titles::default();
        let mut pending = Vec::new();
        for position in positions::matching(conn, &filter).await? {
            let target = SignatureTarget::Position(position.id);
            let signed = signatures::signed_roles(conn, target).await?;
            let status =
                CompletionStatus::compute(&required_roles(&self.signatures, target), &signed);
            let waiting = if actor.is_admin() {
                !status.complete
            } else {
                status.pending.contains(&actor.role)
            };
            if waiting {
                pending.push(PendingCommitment {
                    project_title: titles.get(conn, position.project).await?,
                    position,
                    pending: status.pending,
                });
            }
        }
        Ok(pending)
    }

    /// Signature state of every commitment term in scope, finalized
    /// positions included. Professors only see their own projects.
    pub async fn commitment_report(
        &mut self,
        actor: Actor,
        filter: CommitmentFilter,
    ) -> Result<Vec<CommitmentReport>> {
        actor.require_role(&[Role::Admin, Role::Professor])?;
        let selection = PositionFilter {
            project: filter.project,
            term: filter.term,
            professor: (!actor.is_admin()).then_some(actor.id),
            ..PositionFilter::default()
        };
        let conn = self.store.conn();
        let mut titles = Titles::default();
        let mut report = Vec::new();
        for position in positions::matching(conn, &selection).await? {
            let target = SignatureTarget::Position(position.id);
            let required = required_roles(&self.signatures, target);
            let records = signatures::for_target(conn, target).await?;
            let signed_by = records
                .iter()
                .map(|r| r.signer_role)
                .filter(|role| required.contains(role))
                .collect::<Vec<_>>();
            let state = if signed_by.is_empty() {
                CommitmentState::Unsigned
            } else if signed_by.len() < required.len() {
                CommitmentState::PartiallySigned
            } else {
                CommitmentState::Complete
            };
            let completed_at = (state == CommitmentState::Complete)
                .then(|| {
                    records
                        .iter()
                        .filter(|r| required.contains(&r.signer_role))
                        .map(|r| r.signed_at)
                        .max()
                })
                .flatten();
            report.push(CommitmentReport {
                project_title: titles.get(conn, position.project).await?,
                position,
                state,
                signed_by,
                completed_at,
            });
        }
        Ok(report)
    }
}
