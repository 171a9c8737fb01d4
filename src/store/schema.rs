use crate::error::Result;
use sqlx::AnyConnection;
use tracing::debug;

/// Tables, in creation order. `{pk}` is replaced by the backend-specific
/// auto-increment primary key definition.
const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS quotas (
        year BIGINT NOT NULL,
        half BIGINT NOT NULL,
        total_scholarships BIGINT NOT NULL,
        version BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY (year, half)
    )",
    "CREATE TABLE IF NOT EXISTS inscription_periods (
        id {pk},
        year BIGINT NOT NULL,
        half BIGINT NOT NULL,
        opens_at BIGINT NOT NULL,
        closes_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS projects (
        id {pk},
        professor_id BIGINT NOT NULL,
        department_id BIGINT NOT NULL,
        title VARCHAR(255) NOT NULL,
        year BIGINT NOT NULL,
        half BIGINT NOT NULL,
        requested_scholarships BIGINT NOT NULL,
        requested_volunteers BIGINT NOT NULL,
        allocated_scholarships BIGINT NOT NULL,
        status VARCHAR(32) NOT NULL,
        admin_feedback TEXT,
        signed_document VARCHAR(255),
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS applications (
        id {pk},
        project_id BIGINT NOT NULL REFERENCES projects (id),
        student_id BIGINT NOT NULL,
        requested_seat VARCHAR(16) NOT NULL,
        discipline_grade DOUBLE,
        selection_grade DOUBLE,
        academic_coefficient DOUBLE,
        final_score DOUBLE,
        status VARCHAR(32) NOT NULL,
        professor_feedback TEXT,
        submitted_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS seat_allocations (
        application_id BIGINT NOT NULL PRIMARY KEY REFERENCES applications (id),
        project_id BIGINT NOT NULL REFERENCES projects (id),
        seat_type VARCHAR(16) NOT NULL,
        allocated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS positions (
        id {pk},
        student_id BIGINT NOT NULL,
        project_id BIGINT NOT NULL REFERENCES projects (id),
        application_id BIGINT NOT NULL UNIQUE REFERENCES applications (id),
        seat_type VARCHAR(16) NOT NULL,
        year BIGINT NOT NULL,
        half BIGINT NOT NULL,
        start_date BIGINT NOT NULL,
        end_date BIGINT,
        commitment_document VARCHAR(255)
    )",
    "CREATE TABLE IF NOT EXISTS active_scholarships (
        student_id BIGINT NOT NULL,
        year BIGINT NOT NULL,
        half BIGINT NOT NULL,
        position_id BIGINT NOT NULL UNIQUE REFERENCES positions (id),
        PRIMARY KEY (student_id, year, half)
    )",
    "CREATE TABLE IF NOT EXISTS signatures (
        id {pk},
        target_type VARCHAR(16) NOT NULL,
        target_id BIGINT NOT NULL,
        signer_role VARCHAR(16) NOT NULL,
        signer_id BIGINT,
        payload TEXT NOT NULL,
        signed_at BIGINT NOT NULL,
        UNIQUE (target_type, target_id, signer_role)
    )",
    "CREATE TABLE IF NOT EXISTS signature_grants (
        id {pk},
        token VARCHAR(64) NOT NULL UNIQUE,
        target_type VARCHAR(16) NOT NULL,
        target_id BIGINT NOT NULL,
        signer_role VARCHAR(16) NOT NULL,
        signer_email VARCHAR(255) NOT NULL,
        expires_at BIGINT NOT NULL,
        consumed_at BIGINT
    )",
    "CREATE TABLE IF NOT EXISTS notification_log (
        kind VARCHAR(32) NOT NULL,
        target VARCHAR(64) NOT NULL,
        recipient VARCHAR(255) NOT NULL,
        period_key VARCHAR(32) NOT NULL,
        sent_at BIGINT NOT NULL,
        PRIMARY KEY (kind, target, recipient, period_key)
    )",
];

fn primary_key(backend: &str) -> &'static str {
    if backend.eq_ignore_ascii_case("mysql") {
        "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY"
    } else {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }
}

/// Create missing tables. Existing tables are left untouched.
pub async fn create(conn: &mut AnyConnection) -> Result<()> {
    let pk = primary_key(conn.backend_name());
    for table in TABLES {
        let statement = table.replace("{pk}", pk);
        debug!(statement = %statement.lines().next().unwrap_or_default(), "creating table");
        sqlx::query(&statement).execute(&mut *conn).await?;
    }
    Ok(())
}

#[test]
fn test_primary_key_per_backend() {
    assert!(primary_key("MySQL").contains("AUTO_INCREMENT"));
    assert!(primary_key("SQLite").contains("AUTOINCREMENT"));
    assert!(TABLES.iter().filter(|t| t.contains("{pk}")).count() >= 5);
}
