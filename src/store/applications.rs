use super::{inserted_id, parsed, timestamp, to_timestamp};
use crate::error::{Error, Result};
use crate::model::{
    Application, ApplicationId, ApplicationStatus, Grades, ProjectId, RequestedSeat, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};

const COLUMNS: &str = "id, project_id, student_id, requested_seat, discipline_grade,
    selection_grade, academic_coefficient, final_score, status, professor_feedback,
    submitted_at, updated_at";

fn application_from_row(row: &AnyRow) -> Result<Application, sqlx::Error> {
    let grades = match (
        row.try_get::<Option<f64>, _>("discipline_grade")?,
        row.try_get::<Option<f64>, _>("selection_grade")?,
        row.try_get::<Option<f64>, _>("academic_coefficient")?,
    ) {
        (Some(discipline), Some(selection), Some(coefficient)) => Some(Grades {
            discipline,
            selection,
            coefficient,
        }),
        _ => None,
    };
    Ok(Application {
        id: ApplicationId(row.try_get("id")?),
        project: ProjectId(row.try_get("project_id")?),
        student: UserId(row.try_get("student_id")?),
        requested_seat: parsed(row, "requested_seat")?,
        grades,
        final_score: row.try_get("final_score")?,
        status: parsed(row, "status")?,
        professor_feedback: row.try_get("professor_feedback")?,
        submitted_at: timestamp(row, "submitted_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

pub async fn insert(
    conn: &mut AnyConnection,
    project: ProjectId,
    student: UserId,
    requested_seat: RequestedSeat,
    now: DateTime<Utc>,
) -> Result<ApplicationId> {
    let result = sqlx::query(
        "INSERT INTO applications (project_id, student_id, requested_seat, status,
            submitted_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(project.0)
    .bind(student.0)
    .bind(requested_seat.as_str())
    .bind(ApplicationStatus::Submitted.as_str())
    .bind(to_timestamp(now))
    .bind(to_timestamp(now))
    .execute(&mut *conn)
    .await?;
    inserted_id(conn, &result, "application").await.map(ApplicationId)
}

pub async fn find(conn: &mut AnyConnection, id: ApplicationId) -> Result<Option<Application>> {
    Ok(
        sqlx::query(&format!("SELECT {COLUMNS} FROM applications WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| application_from_row(&row))
            .transpose()?,
    )
}

pub async fn get(conn: &mut AnyConnection, id: ApplicationId) -> Result<Application> {
    find(conn, id)
        .await?
        .ok_or_else(|| Error::not_found("application", id))
}

pub async fn for_project(conn: &mut AnyConnection, project: ProjectId) -> Result<Vec<Application>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM applications WHERE project_id = ? ORDER BY submitted_at, id"
    ))
    .bind(project.0)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| Ok(application_from_row(row)?))
    .collect()
}

pub async fn of_student_for_project(
    conn: &mut AnyConnection,
    student: UserId,
    project: ProjectId,
) -> Result<Vec<Application>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM applications WHERE student_id = ? AND project_id = ? ORDER BY id"
    ))
    .bind(student.0)
    .bind(project.0)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| Ok(application_from_row(row)?))
    .collect()
}

/// Applications left in `status` since `cutoff` or earlier.
pub async fn in_status_since(
    conn: &mut AnyConnection,
    status: ApplicationStatus,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Application>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM applications WHERE status = ? AND updated_at <= ? ORDER BY id"
    ))
    .bind(status.as_str())
    .bind(to_timestamp(cutoff))
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| Ok(application_from_row(row)?))
    .collect()
}

pub async fn count_for_project(conn: &mut AnyConnection, project: ProjectId) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM applications WHERE project_id = ?")
        .bind(project.0)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("n")?)
}

pub async fn set_grades(
    conn: &mut AnyConnection,
    id: ApplicationId,
    grades: &Grades,
    final_score: f64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE applications SET discipline_grade = ?, selection_grade = ?,
            academic_coefficient = ?, final_score = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(grades.discipline)
    .bind(grades.selection)
    .bind(grades.coefficient)
    .bind(final_score)
    .bind(to_timestamp(now))
    .bind(id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_status(
    conn: &mut AnyConnection,
    id: ApplicationId,
    status: ApplicationStatus,
    feedback: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE applications SET status = ?, professor_feedback = COALESCE(?, professor_feedback),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(feedback.map(str::to_owned))
    .bind(to_timestamp(now))
    .bind(id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
