use super::{count, parsed, to_timestamp};
use crate::error::Result;
use crate::model::{ApplicationId, ProjectId, SeatType};
use chrono::{DateTime, Utc};
use sqlx::AnyConnection;

/// Seat type consumed by an application, if it holds one.
pub async fn held_by(conn: &mut AnyConnection, application: ApplicationId) -> Result<Option<SeatType>> {
    Ok(
        sqlx::query("SELECT seat_type FROM seat_allocations WHERE application_id = ?")
            .bind(application.0)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| parsed(&row, "seat_type"))
            .transpose()?,
    )
}

pub async fn consumed(conn: &mut AnyConnection, project: ProjectId, seat: SeatType) -> Result<u32> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM seat_allocations WHERE project_id = ? AND seat_type = ?",
    )
    .bind(project.0)
    .bind(seat.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count(&row, "n")?)
}

pub async fn insert(
    conn: &mut AnyConnection,
    application: ApplicationId,
    project: ProjectId,
    seat: SeatType,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO seat_allocations (application_id, project_id, seat_type, allocated_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(application.0)
    .bind(project.0)
    .bind(seat.as_str())
    .bind(to_timestamp(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Move an already held seat to another type.
pub async fn change_type(
    conn: &mut AnyConnection,
    application: ApplicationId,
    seat: SeatType,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE seat_allocations SET seat_type = ?, allocated_at = ? WHERE application_id = ?",
    )
    .bind(seat.as_str())
    .bind(to_timestamp(now))
    .bind(application.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn release(conn: &mut AnyConnection, application: ApplicationId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM seat_allocations WHERE application_id = ?")
        .bind(application.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
