use crate::model::Application;
use serde::Serialize;
use std::cmp::Ordering;

/// Position of a candidate in the ranking of a project. Ranks are computed
/// on every read and never stored.
#[derive(Clone, Debug, Serialize)]
pub struct RankedCandidate {
    pub rank: usize,
    pub application: Application,
}

fn by_score(a: &Application, b: &Application) -> Ordering {
    match (a.final_score, b.final_score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order the candidates still in the running by decreasing final score.
/// Ungraded candidates come last; ties go to the earliest submission.
pub fn rank(applications: &[Application]) -> Vec<RankedCandidate> {
    let mut candidates = applications
        .iter()
        .filter(|a| a.status.is_ranked())
        .collect::<Vec<_>>();
    candidates.sort_by(|a, b| {
        by_score(a, b)
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, a)| RankedCandidate {
            rank: i + 1,
            application: a.clone(),
        })
        .collect()
}
