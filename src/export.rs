use crate::model::{Position, Project};
use serde::Serialize;
use std::collections::HashMap;
use std::io;

#[derive(Serialize)]
struct PositionRow<'a> {
    position: i64,
    term: String,
    project: i64,
    title: &'a str,
    student: i64,
    seat_type: &'static str,
    start_date: String,
    end_date: Option<String>,
    commitment_document: Option<&'a str>,
}

/// Write one CSV record per position, with a header line.
pub fn write_positions<W: io::Write>(
    writer: W,
    positions: &[Position],
    projects: &[Project],
) -> csv::Result<()> {
    let titles = projects
        .iter()
        .map(|p| (p.id, p.title.as_str()))
        .collect::<HashMap<_, _>>();
    let mut writer = csv::Writer::from_writer(writer);
    for position in positions {
        writer.serialize(PositionRow {
            position: position.id.0,
            term: position.term.to_string(),
            project: position.project.0,
            title: titles.get(&position.project).copied().unwrap_or_default(),
            student: position.student.0,
            seat_type: position.seat_type.as_str(),
            start_date: position.start_date.date_naive().to_string(),
            end_date: position.end_date.map(|d| d.date_naive().to_string()),
            commitment_document: position.commitment_document.as_deref(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[test]
fn test_write_positions() {
    use crate::model::{ApplicationId, Half, PositionId, ProjectId, SeatType, Term, UserId};
    use chrono::{TimeZone, Utc};

    let position = Position {
        id: PositionId(7),
        student: UserId(100),
        project: ProjectId(3),
        application: ApplicationId(12),
        seat_type: SeatType::Volunteer,
        term: Term::new(2025, Half::Second),
        start_date: Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap(),
        end_date: None,
        commitment_document: Some("documents/commitment-term/position-7.pdf".into()),
    };
    let mut out = Vec::new();
    write_positions(&mut out, &[position], &[]).unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some(
            "position,term,project,title,student,seat_type,start_date,end_date,commitment_document"
        )
    );
    assert_eq!(
        lines.next(),
        Some("7,2025.2,3,,100,volunteer,2025-08-04,,documents/commitment-term/position-7.pdf")
    );
    assert_eq!(lines.next(), None);
}
