use super::{inserted_id, optional_timestamp, parsed, term, timestamp, to_timestamp};
use crate::error::{Error, Result, is_unique_violation};
use crate::model::{ApplicationId, Position, PositionId, ProjectId, SeatType, Term, UserId};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};

const COLUMNS: &str = "id, student_id, project_id, application_id, seat_type, year, half,
    start_date, end_date, commitment_document";

fn position_from_row(row: &AnyRow) -> Result<Position, sqlx::Error> {
    Ok(Position {
        id: PositionId(row.try_get("id")?),
        student: UserId(row.try_get("student_id")?),
        project: ProjectId(row.try_get("project_id")?),
        application: ApplicationId(row.try_get("application_id")?),
        seat_type: parsed(row, "seat_type")?,
        term: term(row)?,
        start_date: timestamp(row, "start_date")?,
        end_date: optional_timestamp(row, "end_date")?,
        commitment_document: row.try_get("commitment_document")?,
    })
}

pub struct NewPosition {
    pub student: UserId,
    pub project: ProjectId,
    pub application: ApplicationId,
    pub seat_type: SeatType,
    pub term: Term,
    pub start_date: DateTime<Utc>,
}

pub async fn insert(conn: &mut AnyConnection, position: &NewPosition) -> Result<PositionId> {
    let result = sqlx::query(
        "INSERT INTO positions (student_id, project_id, application_id, seat_type, year, half,
            start_date)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(position.student.0)
    .bind(position.project.0)
    .bind(position.application.0)
    .bind(position.seat_type.as_str())
    .bind(position.term.year)
    .bind(position.term.half.number())
    .bind(to_timestamp(position.start_date))
    .execute(&mut *conn)
    .await?;
    inserted_id(conn, &result, "position").await.map(PositionId)
}

pub async fn find(conn: &mut AnyConnection, id: PositionId) -> Result<Option<Position>> {
    Ok(
        sqlx::query(&format!("SELECT {COLUMNS} FROM positions WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| position_from_row(&row))
            .transpose()?,
    )
}

pub async fn get(conn: &mut AnyConnection, id: PositionId) -> Result<Position> {
    find(conn, id)
        .await?
        .ok_or_else(|| Error::not_found("position", id))
}

/// Selection of positions. Unset fields match every position.
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionFilter {
    pub student: Option<UserId>,
    pub project: Option<ProjectId>,
    /// Positions on the projects of this professor.
    pub professor: Option<UserId>,
    pub term: Option<Term>,
    pub active_only: bool,
}

pub async fn matching(conn: &mut AnyConnection, filter: &PositionFilter) -> Result<Vec<Position>> {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(student) = filter.student {
        conditions.push("student_id = ?");
        values.push(student.0);
    }
    if let Some(project) = filter.project {
        conditions.push("project_id = ?");
        values.push(project.0);
    }
    if let Some(professor) = filter.professor {
        conditions.push("project_id IN (SELECT id FROM projects WHERE professor_id = ?)");
        values.push(professor.0);
    }
    if let Some(term) = filter.term {
        conditions.push("year = ? AND half = ?");
        values.extend([term.year, term.half.number()]);
    }
    if filter.active_only {
        conditions.push("end_date IS NULL");
    }
    let mut sql = format!("SELECT {COLUMNS} FROM positions");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY project_id, id");
    let mut query = sqlx::query(&sql);
    for value in values {
        query = query.bind(value);
    }
    query
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| Ok(position_from_row(row)?))
        .collect()
}

pub async fn in_term(conn: &mut AnyConnection, term: Term) -> Result<Vec<Position>> {
    let filter = PositionFilter {
        term: Some(term),
        ..PositionFilter::default()
    };
    matching(conn, &filter).await
}

/// Active positions started at `cutoff` or earlier.
pub async fn active_since(conn: &mut AnyConnection, cutoff: DateTime<Utc>) -> Result<Vec<Position>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM positions WHERE end_date IS NULL AND start_date <= ? ORDER BY id"
    ))
    .bind(to_timestamp(cutoff))
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| Ok(position_from_row(row)?))
    .collect()
}

pub async fn set_end_date(conn: &mut AnyConnection, id: PositionId, end: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE positions SET end_date = ? WHERE id = ?")
        .bind(to_timestamp(end))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_commitment_document(
    conn: &mut AnyConnection,
    id: PositionId,
    reference: &str,
) -> Result<()> {
    sqlx::query("UPDATE positions SET commitment_document = ? WHERE id = ?")
        .bind(reference.to_owned())
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Active scholarship position of the student in the term, if any.
pub async fn active_scholarship(
    conn: &mut AnyConnection,
    student: UserId,
    term: Term,
) -> Result<Option<PositionId>> {
    Ok(sqlx::query(
        "SELECT position_id FROM active_scholarships WHERE student_id = ? AND year = ? AND half = ?",
    )
    .bind(student.0)
    .bind(term.year)
    .bind(term.half.number())
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| row.try_get::<i64, _>("position_id").map(PositionId))
    .transpose()?)
}

/// Register `position` as the student's scholarship for the term. Returns
/// `false` if another one is already registered; the unique key makes this
/// hold even between concurrent transactions.
pub async fn claim_scholarship(
    conn: &mut AnyConnection,
    student: UserId,
    term: Term,
    position: PositionId,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO active_scholarships (student_id, year, half, position_id) VALUES (?, ?, ?, ?)",
    )
    .bind(student.0)
    .bind(term.year)
    .bind(term.half.number())
    .bind(position.0)
    .execute(&mut *conn)
    .await;
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn release_scholarship(conn: &mut AnyConnection, position: PositionId) -> Result<()> {
    sqlx::query("DELETE FROM active_scholarships WHERE position_id = ?")
        .bind(position.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
