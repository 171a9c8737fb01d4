use crate::display::*;
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use eyre::{WrapErr, eyre};
use monitoria::config::Config;
use monitoria::model::{
    Actor, ApplicationId, DepartmentId, Grades, PositionId, ProjectDraft, ProjectId,
    RequestedSeat, Role, SeatType, SignatureTarget, TargetType, Term,
};
use monitoria::services::CommitmentFilter;
use monitoria::{Engine, Error, export};
use serde::Deserialize;
use std::fs::File;
use std::io;
use tracing::Level;

mod display;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Use FILE instead of monitoria.toml
    #[arg(short, long, value_name = "FILE", default_value = "monitoria.toml")]
    config: String,
    /// Set verbosity level
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
    /// Identifier of the user performing the operation
    #[arg(long, global = true)]
    actor: Option<i64>,
    /// Role of the user performing the operation (admin, professor, student)
    #[arg(long, global = true)]
    role: Option<Role>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct DraftArgs {
    #[arg(long)]
    department: i64,
    #[arg(long)]
    title: String,
    /// Term, as YEAR.1 or YEAR.2
    #[arg(long)]
    term: Term,
    #[arg(long, default_value_t = 0)]
    scholarships: u32,
    #[arg(long, default_value_t = 0)]
    volunteers: u32,
}

impl DraftArgs {
    fn draft(&self) -> ProjectDraft {
        ProjectDraft {
            department: DepartmentId(self.department),
            title: self.title.clone(),
            term: self.term,
            requested_scholarships: self.scholarships,
            requested_volunteers: self.volunteers,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Job {
    Signatures,
    Acceptances,
    Deadlines,
    All,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database tables
    InitDb,
    CreateProject(DraftArgs),
    UpdateProject {
        id: i64,
        #[command(flatten)]
        draft: DraftArgs,
    },
    DeleteProject { id: i64 },
    ShowProject { id: i64 },
    SubmitProject { id: i64 },
    ApproveProject {
        id: i64,
        /// Scholarship seats granted to the project
        #[arg(long)]
        seats: u32,
        #[arg(long)]
        feedback: Option<String>,
    },
    RejectProject {
        id: i64,
        #[arg(long)]
        feedback: String,
    },
    RequestRevision {
        id: i64,
        #[arg(long)]
        feedback: String,
    },
    /// Apply to a project
    Apply {
        project: i64,
        #[arg(long, default_value = "either")]
        seat: RequestedSeat,
    },
    Grade {
        application: i64,
        discipline: f64,
        selection: f64,
        coefficient: f64,
    },
    Select {
        application: i64,
        #[arg(long)]
        seat: SeatType,
    },
    RejectApplication {
        application: i64,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Show the current ranking of the candidates of a project
    Rank { project: i64 },
    ValidateAllocation { project: i64, seats: u32 },
    SetAllocation { project: i64, seats: u32 },
    /// Apply allocations from a CSV file with `project,seats` records
    BulkAllocation { file: String },
    /// Give a seat to a candidate
    Allocate {
        application: i64,
        #[arg(long)]
        seat: SeatType,
    },
    ReleaseSeat { application: i64 },
    SetQuota { term: Term, total: u32 },
    /// Open an inscription period (RFC 3339 timestamps)
    OpenPeriod {
        term: Term,
        opens: DateTime<Utc>,
        closes: DateTime<Utc>,
    },
    /// Allocation summary of a term
    Summary { term: Term },
    Accept { application: i64 },
    Decline {
        application: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    Finalize {
        position: i64,
        #[arg(long)]
        end_date: Option<DateTime<Utc>>,
    },
    /// Sign a project or a position under the actor role
    Sign {
        target_type: TargetType,
        id: i64,
        #[arg(long)]
        payload: String,
    },
    /// Show which signatures are still missing
    Status { target_type: TargetType, id: i64 },
    /// Let an external signer sign through a single-use token
    RequestSignature {
        target_type: TargetType,
        id: i64,
        #[arg(long)]
        signer_role: Role,
        #[arg(long)]
        email: String,
        #[arg(long)]
        expiry_hours: Option<u32>,
    },
    SignWithGrant {
        token: String,
        #[arg(long)]
        payload: String,
    },
    /// Run reminder jobs
    Remind {
        #[arg(value_enum, default_value = "all")]
        job: Job,
    },
    /// Positions held by the calling student
    MyPositions,
    /// Positions of a project
    ProjectPositions { project: i64 },
    /// Commitment terms waiting for the caller's signature
    PendingCommitments,
    /// Signature state of commitment terms, finalized positions included
    CommitmentReport {
        #[arg(long)]
        term: Option<Term>,
        #[arg(long)]
        project: Option<i64>,
    },
    /// Export the positions of a term as CSV
    ExportPositions {
        term: Term,
        /// Write to FILE instead of the standard output
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,
    },
}

impl Args {
    fn actor(&self) -> eyre::Result<Actor> {
        match (self.actor, self.role) {
            (Some(id), Some(role)) => Ok(Actor::new(id, role)),
            _ => Err(eyre!("this command requires --actor and --role")),
        }
    }
}

#[derive(Deserialize)]
struct AllocationRecord {
    project: i64,
    seats: u32,
}

fn read_allocations(file_name: &str) -> eyre::Result<Vec<(ProjectId, u32)>> {
    let mut reader = csv::Reader::from_path(file_name)
        .wrap_err_with(|| format!("cannot open allocation file {file_name}"))?;
    reader
        .deserialize::<AllocationRecord>()
        .map(|record| -> eyre::Result<(ProjectId, u32)> {
            let record = record.wrap_err_with(|| format!("invalid record in {file_name}"))?;
            Ok((ProjectId(record.project), record.seats))
        })
        .collect()
}

async fn run(engine: &mut Engine, args: &Args) -> eyre::Result<()> {
    match &args.command {
        Command::InitDb => {
            engine.store().create_schema().await?;
            println!("Database schema created");
        }
        Command::CreateProject(draft) => {
            let project = engine.create_project(args.actor()?, draft.draft()).await?;
            display_project(&project);
        }
        Command::UpdateProject { id, draft } => {
            let project = engine
                .update_project(args.actor()?, ProjectId(*id), draft.draft())
                .await?;
            display_project(&project);
        }
        Command::DeleteProject { id } => {
            engine.delete_project(args.actor()?, ProjectId(*id)).await?;
            println!("Project {id} deleted");
        }
        Command::ShowProject { id } => display_project(&engine.project(ProjectId(*id)).await?),
        Command::SubmitProject { id } => {
            let project = engine.submit_project(args.actor()?, ProjectId(*id)).await?;
            display_project(&project);
        }
        Command::ApproveProject {
            id,
            seats,
            feedback,
        } => {
            let project = engine
                .approve_project(args.actor()?, ProjectId(*id), *seats, feedback.clone())
                .await?;
            display_project(&project);
        }
        Command::RejectProject { id, feedback } => {
            let project = engine
                .reject_project(args.actor()?, ProjectId(*id), feedback)
                .await?;
            display_project(&project);
        }
        Command::RequestRevision { id, feedback } => {
            let project = engine
                .request_revision(args.actor()?, ProjectId(*id), feedback)
                .await?;
            display_project(&project);
        }
        Command::Apply { project, seat } => {
            let application = engine
                .submit_application(args.actor()?, ProjectId(*project), *seat)
                .await?;
            display_application(&application);
        }
        Command::Grade {
            application,
            discipline,
            selection,
            coefficient,
        } => {
            let grades = Grades {
                discipline: *discipline,
                selection: *selection,
                coefficient: *coefficient,
            };
            let application = engine
                .record_grades(args.actor()?, ApplicationId(*application), grades)
                .await?;
            display_application(&application);
        }
        Command::Select { application, seat } => {
            let application = engine
                .select_application(args.actor()?, ApplicationId(*application), *seat)
                .await?;
            display_application(&application);
        }
        Command::RejectApplication {
            application,
            feedback,
        } => {
            let application = engine
                .reject_application(
                    args.actor()?,
                    ApplicationId(*application),
                    feedback.as_deref(),
                )
                .await?;
            display_application(&application);
        }
        Command::Rank { project } => {
            let ranking = engine.rank_project(args.actor()?, ProjectId(*project)).await?;
            display_ranking(&ranking);
        }
        Command::ValidateAllocation { project, seats } => {
            let check = engine
                .validate_allocation(args.actor()?, ProjectId(*project), *seats)
                .await?;
            display_check(&check);
        }
        Command::SetAllocation { project, seats } => {
            let project = engine
                .set_project_allocation(args.actor()?, ProjectId(*project), *seats)
                .await?;
            display_project(&project);
        }
        Command::BulkAllocation { file } => {
            let allocations = read_allocations(file)?;
            for project in engine.bulk_set_allocation(args.actor()?, &allocations).await? {
                display_project(&project);
            }
        }
        Command::Allocate { application, seat } => {
            let application = engine
                .allocate_candidate(args.actor()?, ApplicationId(*application), *seat)
                .await?;
            display_application(&application);
        }
        Command::ReleaseSeat { application } => {
            if engine
                .release_seat(args.actor()?, ApplicationId(*application))
                .await?
            {
                println!("Seat of application {application} released");
            } else {
                println!("Application {application} did not hold a seat");
            }
        }
        Command::SetQuota { term, total } => {
            let quota = engine.set_quota(args.actor()?, *term, *total).await?;
            println!(
                "Term {}: {} scholarship seats",
                quota.term, quota.total_scholarships
            );
        }
        Command::OpenPeriod {
            term,
            opens,
            closes,
        } => {
            let period = engine
                .open_inscription_period(args.actor()?, *term, *opens, *closes)
                .await?;
            println!(
                "Inscription period {} for term {}: {} to {}",
                period.id, period.term, period.opens_at, period.closes_at
            );
        }
        Command::Summary { term } => {
            display_summary(&engine.term_summary(args.actor()?, *term).await?);
        }
        Command::Accept { application } => {
            let position = engine
                .accept(args.actor()?, ApplicationId(*application))
                .await?;
            display_position(&position);
        }
        Command::Decline {
            application,
            reason,
        } => {
            let application = engine
                .decline(args.actor()?, ApplicationId(*application), reason.as_deref())
                .await?;
            display_application(&application);
        }
        Command::Finalize { position, end_date } => {
            let position = engine
                .finalize(args.actor()?, PositionId(*position), *end_date)
                .await?;
            display_position(&position);
        }
        Command::Sign {
            target_type,
            id,
            payload,
        } => {
            let actor = args.actor()?;
            let target = SignatureTarget::new(*target_type, *id);
            engine
                .record_signature(actor, target, actor.role, payload)
                .await?;
            display_completion(target, &engine.completion_status(target).await?);
        }
        Command::Status { target_type, id } => {
            let target = SignatureTarget::new(*target_type, *id);
            display_completion(target, &engine.completion_status(target).await?);
        }
        Command::RequestSignature {
            target_type,
            id,
            signer_role,
            email,
            expiry_hours,
        } => {
            let target = SignatureTarget::new(*target_type, *id);
            let grant = engine
                .request_signature(args.actor()?, target, *signer_role, email, *expiry_hours)
                .await?;
            println!(
                "Signature of {target} as {} requested from {}, valid until {}",
                grant.signer_role, grant.signer_email, grant.expires_at
            );
        }
        Command::SignWithGrant { token, payload } => {
            let record = engine.sign_with_grant(token, payload).await?;
            display_completion(record.target, &engine.completion_status(record.target).await?);
        }
        Command::Remind { job } => {
            if matches!(job, Job::Signatures | Job::All) {
                display_report("Signature", &engine.remind_pending_signatures().await?);
            }
            if matches!(job, Job::Acceptances | Job::All) {
                display_report("Acceptance", &engine.remind_pending_acceptances().await?);
            }
            if matches!(job, Job::Deadlines | Job::All) {
                display_report("Deadline", &engine.remind_inscription_deadlines().await?);
            }
        }
        Command::MyPositions => {
            for position in engine.my_positions(args.actor()?).await? {
                display_position(&position);
            }
        }
        Command::ProjectPositions { project } => {
            let positions = engine
                .project_positions(args.actor()?, ProjectId(*project))
                .await?;
            for position in positions {
                display_position(&position);
            }
        }
        Command::PendingCommitments => {
            display_pending(&engine.pending_commitments(args.actor()?).await?);
        }
        Command::CommitmentReport { term, project } => {
            let filter = CommitmentFilter {
                term: *term,
                project: project.map(ProjectId),
            };
            display_commitments(&engine.commitment_report(args.actor()?, filter).await?);
        }
        Command::ExportPositions { term, output } => {
            args.actor()?.require_role(&[Role::Admin])?;
            let positions = engine.positions_in_term(*term).await?;
            let projects = engine.projects_in_term(*term).await?;
            match output {
                Some(file_name) => {
                    let file = File::create(file_name)
                        .wrap_err_with(|| format!("cannot create {file_name}"))?;
                    export::write_positions(file, &positions, &projects)?;
                }
                None => export::write_positions(io::stdout().lock(), &positions, &projects)?,
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let level = match args.verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
    let config = Config::load(&args.config)?;
    let mut engine = Engine::from_config(&config)
        .await
        .wrap_err_with(|| format!("cannot connect to {}", config.database.url))?;
    run(&mut engine, &args).await.map_err(|report| {
        match report.downcast_ref::<Error>().map(Error::kind) {
            Some(kind) => report.wrap_err(kind),
            None => report,
        }
    })
}
