use crate::config::SignatureConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    Actor, CompletionStatus, ProjectStatus, Role, SignatureGrant, SignatureRecord,
    SignatureTarget, UserId,
};
use crate::notify::{Notification, NotificationKind, Recipient};
use crate::store::{positions, projects, signatures};
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use sqlx::AnyConnection;
use tracing::{info, instrument, warn};

const TOKEN_LENGTH: usize = 32;

/// Roles whose signatures make the document of the target complete.
pub fn required_roles(config: &SignatureConfig, target: SignatureTarget) -> Vec<Role> {
    match target {
        SignatureTarget::Position(_) => vec![Role::Student, Role::Professor],
        SignatureTarget::Project(_) if config.require_admin_signature => {
            vec![Role::Professor, Role::Admin]
        }
        SignatureTarget::Project(_) => vec![Role::Professor],
    }
}

fn require_required(config: &SignatureConfig, target: SignatureTarget, role: Role) -> Result<()> {
    if required_roles(config, target).contains(&role) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "no {role} signature is expected on {target}"
        )))
    }
}

/// Professor responsible for the target.
async fn professor_of(conn: &mut AnyConnection, target: SignatureTarget) -> Result<UserId> {
    match target {
        SignatureTarget::Project(id) => Ok(projects::get(conn, id).await?.professor),
        SignatureTarget::Position(id) => {
            let position = positions::get(conn, id).await?;
            Ok(projects::get(conn, position.project).await?.professor)
        }
    }
}

fn project_accepts(status: ProjectStatus, role: Role) -> bool {
    match role {
        Role::Professor => status.is_editable() || status == ProjectStatus::Submitted,
        Role::Admin => matches!(
            status,
            ProjectStatus::Submitted | ProjectStatus::PendingAdminSignature
        ),
        Role::Student => false,
    }
}

/// Check that the target takes a `role` signature in its current state. The
/// project concerned stays locked for the rest of the transaction.
async fn check_signable(
    conn: &mut AnyConnection,
    target: SignatureTarget,
    role: Role,
    now: DateTime<Utc>,
) -> Result<()> {
    match target {
        SignatureTarget::Project(id) => {
            let project = projects::lock(conn, id, now).await?;
            if !project_accepts(project.status, role) {
                return Err(Error::InvalidState(format!(
                    "project {id} cannot be signed by {role} while {}",
                    project.status
                )));
            }
        }
        SignatureTarget::Position(id) => {
            let position = positions::get(conn, id).await?;
            projects::lock(conn, position.project, now).await?;
            if !position.is_active() {
                return Err(Error::InvalidState(format!(
                    "position {id} has been finalized"
                )));
            }
        }
    }
    Ok(())
}

/// Check that the actor may sign the target in its current state.
async fn authorize(
    conn: &mut AnyConnection,
    actor: Actor,
    target: SignatureTarget,
    now: DateTime<Utc>,
) -> Result<()> {
    let owner = match (target, actor.role) {
        (SignatureTarget::Project(_), Role::Admin) => None,
        (SignatureTarget::Position(id), Role::Student) => {
            Some(positions::get(conn, id).await?.student)
        }
        _ => Some(professor_of(conn, target).await?),
    };
    if owner.is_some_and(|owner| owner != actor.id) {
        return Err(Error::Forbidden(format!(
            "{target} is not under the responsibility of {actor}"
        )));
    }
    check_signable(conn, target, actor.role, now).await
}

/// Insert the signature and return it with the completion of the target. A
/// project waiting for its last signature becomes approved.
async fn store_signature(
    conn: &mut AnyConnection,
    config: &SignatureConfig,
    target: SignatureTarget,
    role: Role,
    signer: Option<UserId>,
    payload: &str,
    now: DateTime<Utc>,
) -> Result<(SignatureRecord, CompletionStatus)> {
    let id = signatures::insert(conn, target, role, signer, payload, now)
        .await?
        .ok_or_else(|| Error::Conflict(format!("{target} has already been signed by {role}")))?;
    let signed = signatures::signed_roles(conn, target).await?;
    let completion = CompletionStatus::compute(&required_roles(config, target), &signed);
    if let SignatureTarget::Project(project) = target {
        if completion.complete
            && projects::get(conn, project).await?.status == ProjectStatus::PendingAdminSignature
        {
            projects::set_status(conn, project, ProjectStatus::Approved, now).await?;
            info!(%project, "project approved after last signature");
        }
    }
    let record = SignatureRecord {
        id,
        target,
        signer_role: role,
        signer,
        payload: payload.to_owned(),
        signed_at: now,
    };
    Ok((record, completion))
}

fn new_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

impl Engine {
    #[instrument(skip(self, payload), fields(actor = %actor))]
    pub async fn record_signature(
        &mut self,
        actor: Actor,
        target: SignatureTarget,
        role: Role,
        payload: &str,
    ) -> Result<SignatureRecord> {
        if actor.role != role {
            return Err(Error::Forbidden(format!(
                "{actor} cannot sign as {role}"
            )));
        }
        if payload.trim().is_empty() {
            return Err(Error::Validation("signature payload cannot be empty".into()));
        }
        require_required(&self.signatures, target, role)?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        authorize(&mut tx, actor, target, now).await?;
        let (record, completion) = store_signature(
            &mut tx,
            &self.signatures,
            target,
            role,
            Some(actor.id),
            payload,
            now,
        )
        .await?;
        tx.commit().await?;
        info!(%target, %role, complete = completion.complete, "signature recorded");
        if completion.complete {
            self.completed(target).await;
        }
        Ok(record)
    }

    pub async fn completion_status(&mut self, target: SignatureTarget) -> Result<CompletionStatus> {
        let conn = self.store.conn();
        professor_of(conn, target).await?;
        let signed = signatures::signed_roles(conn, target).await?;
        Ok(CompletionStatus::compute(
            &required_roles(&self.signatures, target),
            &signed,
        ))
    }

    pub async fn signatures_of(&mut self, target: SignatureTarget) -> Result<Vec<SignatureRecord>> {
        signatures::for_target(self.store.conn(), target).await
    }

    /// Issue a single-use grant letting an external signer sign in place of
    /// `role`. The grant expires after `expiry_hours`, or the configured
    /// default.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn request_signature(
        &mut self,
        actor: Actor,
        target: SignatureTarget,
        role: Role,
        email: &str,
        expiry_hours: Option<u32>,
    ) -> Result<SignatureGrant> {
        actor.require_role(&[Role::Admin, Role::Professor])?;
        let email = email.trim();
        if !email.contains('@') {
            return Err(Error::Validation(format!("invalid email address {email:?}")));
        }
        let hours = expiry_hours.unwrap_or(self.signatures.grant_expiry_hours);
        if hours == 0 {
            return Err(Error::Validation("a grant must last at least one hour".into()));
        }
        require_required(&self.signatures, target, role)?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let professor = professor_of(&mut tx, target).await?;
        if actor.role == Role::Professor && professor != actor.id {
            return Err(Error::Forbidden(format!(
                "{target} is not under the responsibility of {actor}"
            )));
        }
        if signatures::signed_roles(&mut tx, target).await?.contains(&role) {
            return Err(Error::Conflict(format!(
                "{target} has already been signed by {role}"
            )));
        }
        let expires_at = now + TimeDelta::hours(i64::from(hours));
        let grant =
            signatures::insert_grant(&mut tx, &new_token(), target, role, email, expires_at)
                .await?;
        tx.commit().await?;
        info!(%target, %role, grant = grant.id, "signature requested");
        self.notify(
            Notification::new(
                Recipient::Email(email.to_owned()),
                NotificationKind::SignatureRequested,
            )
            .with("target", target)
            .with("role", role)
            .with("token", &grant.token)
            .with("expires_at", grant.expires_at.to_rfc3339()),
        );
        Ok(grant)
    }

    /// Sign through a grant, on behalf of the role it was issued for.
    #[instrument(skip(self, token, payload))]
    pub async fn sign_with_grant(&mut self, token: &str, payload: &str) -> Result<SignatureRecord> {
        if payload.trim().is_empty() {
            return Err(Error::Validation("signature payload cannot be empty".into()));
        }
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let grant = signatures::find_grant(&mut tx, token)
            .await?
            .ok_or_else(|| Error::not_found("signature grant", "for this token"))?;
        if grant.consumed_at.is_some() {
            return Err(Error::InvalidState("signature grant already used".into()));
        }
        if now > grant.expires_at {
            return Err(Error::InvalidState("signature grant has expired".into()));
        }
        check_signable(&mut tx, grant.target, grant.signer_role, now).await?;
        if !signatures::consume_grant(&mut tx, grant.id, now).await? {
            return Err(Error::InvalidState("signature grant already used".into()));
        }
        let (record, completion) = store_signature(
            &mut tx,
            &self.signatures,
            grant.target,
            grant.signer_role,
            None,
            payload,
            now,
        )
        .await?;
        tx.commit().await?;
        info!(
            target = %grant.target,
            role = %grant.signer_role,
            grant = grant.id,
            "signature recorded through grant",
        );
        if completion.complete {
            self.completed(grant.target).await;
        }
        Ok(record)
    }

    /// Render the document of a fully signed target and attach it. Failures
    /// leave the target without a document and are only logged.
    async fn completed(&mut self, target: SignatureTarget) {
        let reference = match self.renderer.render(target.document_kind(), target) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(%target, error = %e, "cannot render signed document");
                return;
            }
        };
        let conn = self.store.conn();
        let attached = match target {
            SignatureTarget::Project(id) => {
                projects::set_signed_document(conn, id, Some(&reference)).await
            }
            SignatureTarget::Position(id) => {
                positions::set_commitment_document(conn, id, &reference).await
            }
        };
        match attached {
            Ok(()) => info!(%target, %reference, "signed document attached"),
            Err(e) => warn!(%target, error = %e, "cannot attach signed document"),
        }
    }
}
