use crate::model::{ProjectId, UserId};
use serde::Serialize;
use std::fmt;
use tracing::info;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Recipient {
    Admins,
    /// Every registered student, resolved by the delivery side.
    Students,
    Professor(UserId),
    Student(UserId),
    Email(String),
}

impl Recipient {
    /// Stable key used to record that a reminder reached this recipient.
    pub fn key(&self) -> String {
        match self {
            Recipient::Admins => "admins".to_owned(),
            Recipient::Students => "students".to_owned(),
            Recipient::Professor(id) => format!("professor:{id}"),
            Recipient::Student(id) => format!("student:{id}"),
            Recipient::Email(email) => format!("email:{email}"),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum NotificationKind {
    ProjectSubmitted,
    ProjectApproved,
    ProjectRejected,
    RevisionRequested,
    ApplicationSelected,
    ApplicationRejected,
    SeatAccepted,
    SeatDeclined,
    PositionFinalized,
    SignatureRequested,
    SignatureReminder,
    AcceptanceReminder,
    InscriptionClosing,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::ProjectSubmitted => "PROJECT_SUBMITTED",
            NotificationKind::ProjectApproved => "PROJECT_APPROVED",
            NotificationKind::ProjectRejected => "PROJECT_REJECTED",
            NotificationKind::RevisionRequested => "REVISION_REQUESTED",
            NotificationKind::ApplicationSelected => "APPLICATION_SELECTED",
            NotificationKind::ApplicationRejected => "APPLICATION_REJECTED",
            NotificationKind::SeatAccepted => "SEAT_ACCEPTED",
            NotificationKind::SeatDeclined => "SEAT_DECLINED",
            NotificationKind::PositionFinalized => "POSITION_FINALIZED",
            NotificationKind::SignatureRequested => "SIGNATURE_REQUESTED",
            NotificationKind::SignatureReminder => "SIGNATURE_REMINDER",
            NotificationKind::AcceptanceReminder => "ACCEPTANCE_REMINDER",
            NotificationKind::InscriptionClosing => "INSCRIPTION_CLOSING",
        }
    }
}

/// Message handed to the delivery collaborator. The template rendering is
/// done on the other side, from `kind` and `data`.
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub project: Option<ProjectId>,
    pub data: Vec<(&'static str, String)>,
}

impl Notification {
    pub fn new(recipient: Recipient, kind: NotificationKind) -> Notification {
        Notification {
            recipient,
            kind,
            project: None,
            data: Vec::new(),
        }
    }

    pub fn about(mut self, project: ProjectId) -> Notification {
        self.project = Some(project);
        self
    }

    pub fn with(mut self, key: &'static str, value: impl ToString) -> Notification {
        self.data.push((key, value.to_string()));
        self
    }
}

/// Fire-and-forget delivery of notifications. Errors are reported to the
/// caller for logging only.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> eyre::Result<()>;
}

/// Emit notifications as structured log events, for deployments where an
/// external worker tails the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send(&self, notification: &Notification) -> eyre::Result<()> {
        info!(
            recipient = %notification.recipient,
            kind = notification.kind.as_str(),
            project = ?notification.project,
            data = ?notification.data,
            "notification",
        );
        Ok(())
    }
}

#[cfg(test)]
pub use self::recording::RecordingNotifier;

#[cfg(test)]
mod recording {
    use super::{Notification, Notifier};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Keep every notification in memory, optionally failing on purpose.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, notification: &Notification) -> eyre::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                eyre::bail!("mail relay unavailable");
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }
}
