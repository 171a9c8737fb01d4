use super::signatures::required_roles;
use crate::engine::Engine;
use crate::error::Result;
use crate::model::{
    ApplicationStatus, CompletionStatus, Position, Project, ProjectStatus, Role, SignatureTarget,
};
use crate::notify::{Notification, NotificationKind, Recipient};
use crate::store::notifications::{self, LogKey};
use crate::store::{applications, positions, projects, signatures, terms};
use chrono::TimeDelta;
use serde::Serialize;
use std::fmt;
use tracing::{info, instrument, warn};

/// Counts of one reminder run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct JobReport {
    pub sent: usize,
    /// Already sent for the same period by an earlier run.
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} skipped, {} failed",
            self.sent, self.skipped, self.failed
        )
    }
}

impl Engine {
    /// Send the notification unless the log shows it went out already for
    /// this period. A failed delivery is forgotten so the next run retries.
    async fn deliver(
        &mut self,
        key: LogKey<'_>,
        notification: Notification,
        report: &mut JobReport,
    ) {
        let now = self.clock.now();
        match notifications::claim(self.store.conn(), &key, now).await {
            Ok(false) => report.skipped += 1,
            Ok(true) => match self.notifier.send(&notification) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(
                        target = %key.target,
                        recipient = %key.recipient,
                        error = %e,
                        "reminder not delivered",
                    );
                    report.failed += 1;
                    if let Err(e) = notifications::release(self.store.conn(), &key).await {
                        warn!(target = %key.target, error = %e, "cannot release reminder claim");
                    }
                }
            },
            Err(e) => {
                warn!(target = %key.target, error = %e, "cannot record reminder");
                report.failed += 1;
            }
        }
    }

    fn period_key(&self) -> String {
        self.clock.now().date_naive().to_string()
    }

    async fn position_pending(&mut self, position: &Position) -> Result<(Project, Vec<Role>)> {
        let target = SignatureTarget::Position(position.id);
        let conn = self.store.conn();
        let project = projects::get(conn, position.project).await?;
        let signed = signatures::signed_roles(conn, target).await?;
        let completion =
            CompletionStatus::compute(&required_roles(&self.signatures, target), &signed);
        Ok((project, completion.pending))
    }

    /// Remind signers of commitment terms and of projects left unsigned for
    /// longer than the configured delay. At most one reminder per signer and
    /// day.
    #[instrument(skip(self))]
    pub async fn remind_pending_signatures(&mut self) -> Result<JobReport> {
        let now = self.clock.now();
        let cutoff = now - TimeDelta::days(i64::from(self.reminders.signature_after_days));
        let period = self.period_key();
        let mut report = JobReport::default();

        let waiting = positions::active_since(self.store.conn(), cutoff).await?;
        for position in waiting {
            let (project, pending) = match self.position_pending(&position).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        position = %position.id,
                        error = %e,
                        "cannot check commitment signatures",
                    );
                    report.failed += 1;
                    continue;
                }
            };
            for role in pending {
                let recipient = match role {
                    Role::Student => Recipient::Student(position.student),
                    _ => Recipient::Professor(project.professor),
                };
                let target = SignatureTarget::Position(position.id);
                let notification =
                    Notification::new(recipient.clone(), NotificationKind::SignatureReminder)
                        .about(project.id)
                        .with("target", target)
                        .with("title", &project.title);
                let key = LogKey {
                    kind: NotificationKind::SignatureReminder.as_str(),
                    target: target.to_string(),
                    recipient: recipient.key(),
                    period: period.clone(),
                };
                self.deliver(key, notification, &mut report).await;
            }
        }

        let pending_projects =
            projects::with_status(self.store.conn(), ProjectStatus::PendingAdminSignature).await?;
        for project in pending_projects.into_iter().filter(|p| p.updated_at <= cutoff) {
            let target = SignatureTarget::Project(project.id);
            let notification =
                Notification::new(Recipient::Admins, NotificationKind::SignatureReminder)
                    .about(project.id)
                    .with("target", target)
                    .with("title", &project.title);
            let key = LogKey {
                kind: NotificationKind::SignatureReminder.as_str(),
                target: target.to_string(),
                recipient: Recipient::Admins.key(),
                period: period.clone(),
            };
            self.deliver(key, notification, &mut report).await;
        }
        info!(%report, "signature reminders done");
        Ok(report)
    }

    /// Remind students of offers they have neither accepted nor declined.
    #[instrument(skip(self))]
    pub async fn remind_pending_acceptances(&mut self) -> Result<JobReport> {
        let now = self.clock.now();
        let cutoff = now - TimeDelta::days(i64::from(self.reminders.acceptance_after_days));
        let period = self.period_key();
        let mut report = JobReport::default();
        let mut waiting = Vec::new();
        for status in [
            ApplicationStatus::SelectedScholarship,
            ApplicationStatus::SelectedVolunteer,
        ] {
            waiting.extend(
                applications::in_status_since(self.store.conn(), status, cutoff).await?,
            );
        }
        for application in waiting {
            let recipient = Recipient::Student(application.student);
            let mut notification =
                Notification::new(recipient.clone(), NotificationKind::AcceptanceReminder)
                    .about(application.project)
                    .with("application", application.id);
            if let Some(seat) = application.status.selected_seat() {
                notification = notification.with("seat", seat);
            }
            let key = LogKey {
                kind: NotificationKind::AcceptanceReminder.as_str(),
                target: format!("application {}", application.id),
                recipient: recipient.key(),
                period: period.clone(),
            };
            self.deliver(key, notification, &mut report).await;
        }
        info!(%report, "acceptance reminders done");
        Ok(report)
    }

    /// Warn students that an inscription period closes soon. Each period is
    /// announced once.
    #[instrument(skip(self))]
    pub async fn remind_inscription_deadlines(&mut self) -> Result<JobReport> {
        let now = self.clock.now();
        let horizon = now + TimeDelta::days(i64::from(self.reminders.deadline_days_before));
        let mut report = JobReport::default();
        let closing = terms::periods_closing_between(self.store.conn(), now, horizon).await?;
        for period in closing {
            let offered = match projects::in_term(self.store.conn(), period.term).await {
                Ok(projects) => projects
                    .iter()
                    .filter(|p| p.status == ProjectStatus::Approved)
                    .count(),
                Err(e) => {
                    warn!(period = %period.id, error = %e, "cannot list projects of the term");
                    report.failed += 1;
                    continue;
                }
            };
            let notification =
                Notification::new(Recipient::Students, NotificationKind::InscriptionClosing)
                    .with("term", period.term)
                    .with("closes_at", period.closes_at.to_rfc3339())
                    .with("projects", offered);
            let key = LogKey {
                kind: NotificationKind::InscriptionClosing.as_str(),
                target: format!("period {}", period.id),
                recipient: Recipient::Students.key(),
                period: period.closes_at.date_naive().to_string(),
            };
            self.deliver(key, notification, &mut report).await;
        }
        info!(%report, "inscription deadline reminders done");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RequestedSeat, SeatType};
    use crate::testing::{ADMIN, Fixture, PROFESSOR, STUDENT, STUDENT2};

    #[tokio::test]
    async fn test_signature_reminders_once_per_day() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 0).await;
        let position = f.position(project.id, STUDENT, SeatType::Scholarship).await;
        f.engine
            .record_signature(
                PROFESSOR,
                SignatureTarget::Position(position.id),
                Role::Professor,
                "prof",
            )
            .await
            .unwrap();
        f.notifier.clear();
        assert_eq!(
            f.engine.remind_pending_signatures().await.unwrap(),
            JobReport::default()
        );
        f.clock.advance(TimeDelta::days(4));
        let report = f.engine.remind_pending_signatures().await.unwrap();
        assert_eq!(report.sent, 1);
        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, Recipient::Student(STUDENT.id));
        let again = f.engine.remind_pending_signatures().await.unwrap();
        assert_eq!((again.sent, again.skipped), (0, 1));
        f.clock.advance(TimeDelta::days(1));
        assert_eq!(f.engine.remind_pending_signatures().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn test_failed_reminder_is_retried() {
        let mut f = Fixture::new().await;
        let project = f.submitted_project(1, 0).await;
        f.engine
            .approve_project(ADMIN, project.id, 1, None)
            .await
            .unwrap();
        f.notifier.clear();
        f.clock.advance(TimeDelta::days(5));
        f.notifier.set_failing(true);
        let report = f.engine.remind_pending_signatures().await.unwrap();
        assert_eq!(report.failed, 1);
        f.notifier.set_failing(false);
        let report = f.engine.remind_pending_signatures().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(f.notifier.sent()[0].recipient, Recipient::Admins);
    }

    #[tokio::test]
    async fn test_acceptance_reminders() {
        let mut f = Fixture::new().await;
        let project = f.approved_project(1, 1, 1).await;
        let first = f.application(project.id, STUDENT, RequestedSeat::Either).await;
        let second = f.application(project.id, STUDENT2, RequestedSeat::Either).await;
        f.engine
            .allocate_candidate(ADMIN, first.id, SeatType::Scholarship)
            .await
            .unwrap();
        f.engine
            .allocate_candidate(ADMIN, second.id, SeatType::Volunteer)
            .await
            .unwrap();
        f.engine.accept(STUDENT2, second.id).await.unwrap();
        f.notifier.clear();
        f.clock.advance(TimeDelta::days(3));
        let report = f.engine.remind_pending_acceptances().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(f.notifier.sent()[0].recipient, Recipient::Student(STUDENT.id));
        assert_eq!(f.engine.remind_pending_acceptances().await.unwrap().skipped, 1);
    }

    #[tokio::test]
    async fn test_inscription_deadline_announced_once() {
        let mut f = Fixture::new().await;
        f.approved_project(1, 1, 0).await;
        f.notifier.clear();
        assert_eq!(f.engine.remind_inscription_deadlines().await.unwrap().sent, 0);
        f.clock.advance(TimeDelta::days(12));
        let report = f.engine.remind_inscription_deadlines().await.unwrap();
        assert_eq!(report.sent, 1);
        let sent = f.notifier.sent();
        assert_eq!(sent[0].recipient, Recipient::Students);
        assert!(sent[0].data.contains(&("projects", "1".to_owned())));
        f.clock.advance(TimeDelta::days(1));
        let report = f.engine.remind_inscription_deadlines().await.unwrap();
        assert_eq!((report.sent, report.skipped), (0, 1));
    }
}
