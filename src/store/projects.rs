use super::{count, inserted_id, parsed, term, timestamp, to_timestamp};
use crate::error::{Error, Result};
use crate::model::{
    DepartmentId, Project, ProjectDraft, ProjectId, ProjectStatus, Term, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};

const COLUMNS: &str = "id, professor_id, department_id, title, year, half, requested_scholarships,
    requested_volunteers, allocated_scholarships, status, admin_feedback, signed_document,
    created_at, updated_at";

fn project_from_row(row: &AnyRow) -> Result<Project, sqlx::Error> {
    Ok(Project {
        id: ProjectId(row.try_get("id")?),
        professor: UserId(row.try_get("professor_id")?),
        department: DepartmentId(row.try_get("department_id")?),
        title: row.try_get("title")?,
        term: term(row)?,
        requested_scholarships: count(row, "requested_scholarships")?,
        requested_volunteers: count(row, "requested_volunteers")?,
        allocated_scholarships: count(row, "allocated_scholarships")?,
        status: parsed(row, "status")?,
        admin_feedback: row.try_get("admin_feedback")?,
        signed_document: row.try_get("signed_document")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

pub async fn insert(
    conn: &mut AnyConnection,
    professor: UserId,
    draft: &ProjectDraft,
    now: DateTime<Utc>,
) -> Result<ProjectId> {
    let result = sqlx::query(
        "INSERT INTO projects (professor_id, department_id, title, year, half,
            requested_scholarships, requested_volunteers, allocated_scholarships, status,
            created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(professor.0)
    .bind(draft.department.0)
    .bind(draft.title.trim())
    .bind(draft.term.year)
    .bind(draft.term.half.number())
    .bind(i64::from(draft.requested_scholarships))
    .bind(i64::from(draft.requested_volunteers))
    .bind(ProjectStatus::Draft.as_str())
    .bind(to_timestamp(now))
    .bind(to_timestamp(now))
    .execute(&mut *conn)
    .await?;
    inserted_id(conn, &result, "project").await.map(ProjectId)
}

pub async fn find(conn: &mut AnyConnection, id: ProjectId) -> Result<Option<Project>> {
    Ok(
        sqlx::query(&format!("SELECT {COLUMNS} FROM projects WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| project_from_row(&row))
            .transpose()?,
    )
}

pub async fn get(conn: &mut AnyConnection, id: ProjectId) -> Result<Project> {
    find(conn, id)
        .await?
        .ok_or_else(|| Error::not_found("project", id))
}

/// Write to the project row so that concurrent writers on the same project
/// wait for the current transaction, then read it.
pub async fn lock(conn: &mut AnyConnection, id: ProjectId, now: DateTime<Utc>) -> Result<Project> {
    sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
        .bind(to_timestamp(now))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    get(conn, id).await
}

async fn list(conn: &mut AnyConnection, filter: &str, binds: &[i64]) -> Result<Vec<Project>> {
    let sql = format!("SELECT {COLUMNS} FROM projects WHERE {filter} ORDER BY id");
    let mut query = sqlx::query(&sql);
    for value in binds {
        query = query.bind(*value);
    }
    query
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| Ok(project_from_row(row)?))
        .collect()
}

pub async fn in_term(conn: &mut AnyConnection, term: Term) -> Result<Vec<Project>> {
    list(conn, "year = ? AND half = ?", &[term.year, term.half.number()]).await
}

/// Projects of the term holding their allocated scholarships against the quota.
pub async fn committed_in_term(conn: &mut AnyConnection, term: Term) -> Result<Vec<Project>> {
    Ok(in_term(conn, term)
        .await?
        .into_iter()
        .filter(|p| p.status.is_committed())
        .collect())
}

pub async fn with_status(conn: &mut AnyConnection, status: ProjectStatus) -> Result<Vec<Project>> {
    let sql = format!("SELECT {COLUMNS} FROM projects WHERE status = ? ORDER BY id");
    sqlx::query(&sql)
        .bind(status.as_str())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| Ok(project_from_row(row)?))
        .collect()
}

pub async fn update_content(
    conn: &mut AnyConnection,
    id: ProjectId,
    draft: &ProjectDraft,
    allocated: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE projects SET department_id = ?, title = ?, year = ?, half = ?,
            requested_scholarships = ?, requested_volunteers = ?, allocated_scholarships = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(draft.department.0)
    .bind(draft.title.trim())
    .bind(draft.term.year)
    .bind(draft.term.half.number())
    .bind(i64::from(draft.requested_scholarships))
    .bind(i64::from(draft.requested_volunteers))
    .bind(i64::from(allocated))
    .bind(to_timestamp(now))
    .bind(id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_status(
    conn: &mut AnyConnection,
    id: ProjectId,
    status: ProjectStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(to_timestamp(now))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Record an administrative decision: new status and feedback.
pub async fn set_decision(
    conn: &mut AnyConnection,
    id: ProjectId,
    status: ProjectStatus,
    feedback: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE projects SET status = ?, admin_feedback = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(feedback.map(str::to_owned))
        .bind(to_timestamp(now))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_allocation(
    conn: &mut AnyConnection,
    id: ProjectId,
    scholarships: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE projects SET allocated_scholarships = ?, updated_at = ? WHERE id = ?")
        .bind(i64::from(scholarships))
        .bind(to_timestamp(now))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_signed_document(
    conn: &mut AnyConnection,
    id: ProjectId,
    reference: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE projects SET signed_document = ? WHERE id = ?")
        .bind(reference.map(str::to_owned))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete(conn: &mut AnyConnection, id: ProjectId) -> Result<()> {
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{draft, PROFESSOR};

    #[tokio::test]
    async fn test_inserts_get_distinct_identifiers() {
        let mut store = crate::store::memory().await;
        let now = Utc::now();
        let first = insert(store.conn(), PROFESSOR.id, &draft("Compilers", 1, 0), now)
            .await
            .unwrap();
        let second = insert(store.conn(), PROFESSOR.id, &draft(" Databases ", 0, 2), now)
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(get(store.conn(), first).await.unwrap().title, "Compilers");
        let project = get(store.conn(), second).await.unwrap();
        assert_eq!(project.title, "Databases");
        assert_eq!(project.status, ProjectStatus::Draft);
        assert_eq!(project.requested_volunteers, 2);
    }
}
