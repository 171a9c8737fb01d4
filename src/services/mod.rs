//! Lifecycle operations of the engine, grouped by component.

mod acceptance;
mod allocation;
mod applications;
mod positions;
mod projects;
mod ranking;
mod reminders;
mod signatures;

pub use self::allocation::AllocationCheck;
pub use self::positions::CommitmentFilter;
pub use self::ranking::{RankedCandidate, rank};
pub use self::reminders::JobReport;
pub use self::signatures::required_roles;
