use monitoria::model::{
    Application, CommitmentReport, CompletionStatus, PendingCommitment, Position, Project,
    SignatureTarget,
};
use monitoria::services::{AllocationCheck, JobReport, RankedCandidate};
use monitoria::stats::TermSummary;

pub fn display_project(p: &Project) {
    println!("Project {} \"{}\" ({})", p.id, p.title, p.term);
    println!("  status: {}", p.status);
    println!(
        "  scholarships requested/allocated: {}/{}",
        p.requested_scholarships, p.allocated_scholarships
    );
    println!("  volunteers requested: {}", p.requested_volunteers);
    if let Some(feedback) = &p.admin_feedback {
        println!("  feedback: {feedback}");
    }
    if let Some(document) = &p.signed_document {
        println!("  signed document: {document}");
    }
}

pub fn display_application(a: &Application) {
    print!(
        "Application {} of student {} to project {}: {}",
        a.id, a.student, a.project, a.status
    );
    if let Some(score) = a.final_score {
        print!(" (score {score:.2})");
    }
    println!();
}

pub fn display_position(p: &Position) {
    print!(
        "Position {} of student {} in project {}: {} seat from {}",
        p.id,
        p.student,
        p.project,
        p.seat_type,
        p.start_date.date_naive()
    );
    if let Some(end) = p.end_date {
        print!(" to {}", end.date_naive());
    }
    println!();
}

pub fn display_ranking(ranking: &[RankedCandidate]) {
    if ranking.is_empty() {
        println!("No candidates");
        return;
    }
    for r in ranking {
        let score = r
            .application
            .final_score
            .map_or_else(|| "ungraded".to_owned(), |s| format!("{s:.2}"));
        println!(
            "  {:>3}. student {} (application {}, {}, requested {}): {}",
            r.rank,
            r.application.student,
            r.application.id,
            r.application.status,
            r.application.requested_seat,
            score
        );
    }
}

pub fn display_check(check: &AllocationCheck) {
    match check.available {
        Some(available) => println!(
            "Project {}: {} proposed, {} requested, {} available under the quota",
            check.project, check.proposed, check.requested, available
        ),
        None => println!(
            "Project {}: {} proposed, {} requested, no quota defined for the term",
            check.project, check.proposed, check.requested
        ),
    }
    if check.is_valid() {
        println!("Allocation is acceptable");
    } else {
        if check.exceeds_request {
            println!("Allocation exceeds the project request");
        }
        if check.exceeds_quota {
            println!("Allocation exceeds the remaining quota");
        }
    }
}

pub fn display_summary(summary: &TermSummary) {
    match (summary.quota, summary.remaining) {
        (Some(quota), Some(remaining)) => println!(
            "Term {}: scholarships quota/committed/remaining: {}/{}/{}",
            summary.term, quota, summary.committed, remaining
        ),
        _ => println!(
            "Term {}: no quota defined, {} scholarships committed",
            summary.term, summary.committed
        ),
    }
    let mut projects = summary.projects.iter().collect::<Vec<_>>();
    projects.sort_by_key(|p| p.title.clone());
    for p in projects {
        println!(
            "  - {} [{}]: scholarships {}/{} used of {} requested, volunteers {}/{}",
            p.title,
            p.status,
            p.consumed_scholarships,
            p.allocated_scholarships,
            p.requested_scholarships,
            p.consumed_volunteers,
            p.requested_volunteers
        );
    }
}

pub fn display_completion(target: SignatureTarget, status: &CompletionStatus) {
    if status.complete {
        println!("{target}: complete");
    } else {
        println!("{target}: waiting for {}", roles(&status.pending));
    }
}

pub fn display_report(job: &str, report: &JobReport) {
    println!("{job} reminders: {report}");
}

fn roles(roles: &[monitoria::model::Role]) -> String {
    roles.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

pub fn display_pending(pending: &[PendingCommitment]) {
    if pending.is_empty() {
        println!("No commitment term waiting");
        return;
    }
    for p in pending {
        println!(
            "  - position {} of student {} in \"{}\" ({} seat): waiting for {}",
            p.position.id,
            p.position.student,
            p.project_title,
            p.position.seat_type,
            roles(&p.pending)
        );
    }
}

pub fn display_commitments(report: &[CommitmentReport]) {
    for r in report {
        print!(
            "  - position {} of student {} in \"{}\": {}",
            r.position.id, r.position.student, r.project_title, r.state
        );
        if !r.signed_by.is_empty() {
            print!(" (signed by {})", roles(&r.signed_by));
        }
        if let Some(completed) = r.completed_at {
            print!(", completed {}", completed.date_naive());
        }
        if !r.position.is_active() {
            print!(", finalized");
        }
        println!();
    }
}
