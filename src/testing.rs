//! Shared fixture for engine tests: an in-memory database, a recording
//! notifier and a manual clock. Tests racing two engines use a database file
//! instead.

use crate::clock::ManualClock;
use crate::engine::Engine;
use crate::model::{
    Actor, Application, DepartmentId, Half, Position, Project, ProjectDraft, ProjectId,
    RequestedSeat, Role, SeatType, SignatureTarget, Term, UserId,
};
use crate::notify::RecordingNotifier;
use crate::store::Store;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::sync::Arc;

pub const ADMIN: Actor = Actor {
    id: UserId(1),
    role: Role::Admin,
};
pub const PROFESSOR: Actor = Actor {
    id: UserId(10),
    role: Role::Professor,
};
pub const OTHER_PROFESSOR: Actor = Actor {
    id: UserId(11),
    role: Role::Professor,
};
pub const STUDENT: Actor = Actor {
    id: UserId(100),
    role: Role::Student,
};
pub const STUDENT2: Actor = Actor {
    id: UserId(101),
    role: Role::Student,
};

pub const TERM: Term = Term {
    year: 2025,
    half: Half::First,
};

pub fn draft(title: &str, scholarships: u32, volunteers: u32) -> ProjectDraft {
    ProjectDraft {
        department: DepartmentId(1),
        title: title.to_owned(),
        term: TERM,
        requested_scholarships: scholarships,
        requested_volunteers: volunteers,
    }
}

/// SQLite database file in a temporary directory, deleted on drop.
pub struct SharedDatabase {
    dir: tempfile::TempDir,
}

impl SharedDatabase {
    pub fn new() -> SharedDatabase {
        SharedDatabase {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.dir.path().join("monitoria.db").display())
    }
}

pub struct Fixture {
    pub engine: Engine,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    projects: usize,
}

impl Fixture {
    pub async fn new() -> Fixture {
        Fixture::with_quota(10).await
    }

    /// Term with `quota` scholarship seats and an inscription period open
    /// for the next two weeks.
    pub async fn with_quota(quota: u32) -> Fixture {
        Fixture::on_store(crate::store::memory().await, quota).await
    }

    /// Fixture whose database lives in `database`, so that other engines can
    /// connect to it through [`Fixture::second_engine`].
    pub async fn shared(database: &SharedDatabase, quota: u32) -> Fixture {
        let mut store = Store::connect(&database.url()).await.unwrap();
        store.create_schema().await.unwrap();
        Fixture::on_store(store, quota).await
    }

    /// Another engine on the database of a shared fixture, with the same clock.
    pub async fn second_engine(&self, database: &SharedDatabase) -> Engine {
        let store = Store::connect(&database.url()).await.unwrap();
        Engine::new(store)
            .with_notifier(Arc::new(RecordingNotifier::default()))
            .with_clock(self.clock.clone())
    }

    async fn on_store(store: Store, quota: u32) -> Fixture {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(start));
        let mut engine = Engine::new(store)
            .with_notifier(notifier.clone())
            .with_clock(clock.clone());
        engine.set_quota(ADMIN, TERM, quota).await.unwrap();
        engine
            .open_inscription_period(
                ADMIN,
                TERM,
                start - TimeDelta::days(1),
                start + TimeDelta::days(14),
            )
            .await
            .unwrap();
        Fixture {
            engine,
            notifier,
            clock,
            projects: 0,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use crate::clock::Clock;
        self.clock.now()
    }

    /// Project of `PROFESSOR` signed by them and submitted.
    pub async fn submitted_project(&mut self, scholarships: u32, volunteers: u32) -> Project {
        self.projects += 1;
        let title = format!("Project {}", self.projects);
        let project = self
            .engine
            .create_project(PROFESSOR, draft(&title, scholarships, volunteers))
            .await
            .unwrap();
        self.engine
            .record_signature(
                PROFESSOR,
                SignatureTarget::Project(project.id),
                Role::Professor,
                "professor signature",
            )
            .await
            .unwrap();
        self.engine
            .submit_project(PROFESSOR, project.id)
            .await
            .unwrap()
    }

    /// Fully approved and signed project of `PROFESSOR`.
    pub async fn approved_project(
        &mut self,
        scholarships: u32,
        allocated: u32,
        volunteers: u32,
    ) -> Project {
        let project = self.submitted_project(scholarships, volunteers).await;
        self.engine
            .approve_project(ADMIN, project.id, allocated, None)
            .await
            .unwrap();
        self.engine
            .record_signature(
                ADMIN,
                SignatureTarget::Project(project.id),
                Role::Admin,
                "admin signature",
            )
            .await
            .unwrap();
        self.engine.project(project.id).await.unwrap()
    }

    pub async fn application(
        &mut self,
        project: ProjectId,
        student: Actor,
        seat: RequestedSeat,
    ) -> Application {
        self.engine
            .submit_application(student, project, seat)
            .await
            .unwrap()
    }

    /// Position of `student` on a seat of the project, through application,
    /// allocation and acceptance.
    pub async fn position(&mut self, project: ProjectId, student: Actor, seat: SeatType) -> Position {
        let requested = match seat {
            SeatType::Scholarship => RequestedSeat::Scholarship,
            SeatType::Volunteer => RequestedSeat::Volunteer,
        };
        let application = self.application(project, student, requested).await;
        self.engine
            .allocate_candidate(ADMIN, application.id, seat)
            .await
            .unwrap();
        self.engine.accept(student, application.id).await.unwrap()
    }
}
