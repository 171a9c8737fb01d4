/// Declare an integer identifier newtype as stored in the database.
macro_rules! identifier {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

mod actor;
mod application;
mod position;
mod project;
mod signature;
mod term;

pub use self::actor::{Actor, Role, UserId};
pub use self::application::{
    Application, ApplicationId, ApplicationStatus, Grades, RequestedSeat, SeatType, final_score,
};
pub use self::position::{
    CommitmentReport, CommitmentState, PendingCommitment, Position, PositionId,
};
pub use self::project::{DepartmentId, Project, ProjectDraft, ProjectId, ProjectStatus};
pub use self::signature::{
    CompletionStatus, DocumentKind, SignatureGrant, SignatureRecord, SignatureTarget, TargetType,
};
pub use self::term::{Half, InscriptionPeriod, PeriodId, Quota, Term};
