use crate::error::Result;
use crate::model::{Half, Term};
use chrono::{DateTime, Utc};
use sqlx::any::{AnyConnectOptions, AnyQueryResult, AnyRow};
use sqlx::{Any, AnyConnection, Connection, Row, Transaction};
use std::str::FromStr;
use tracing::debug;

pub mod applications;
pub mod notifications;
pub mod positions;
pub mod projects;
pub mod schema;
pub mod seats;
pub mod signatures;
pub mod terms;

/// Transactional access to the relational store.
pub struct Store {
    conn: AnyConnection,
    sqlite: bool,
}

fn is_sqlite(conn: &AnyConnection) -> bool {
    conn.backend_name().eq_ignore_ascii_case("sqlite")
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let mut conn = AnyConnection::connect_with(&AnyConnectOptions::from_str(url)?).await?;
        if conn.backend_name().eq_ignore_ascii_case("mysql") {
            // Check-then-write sequences rely on serializable transactions.
            sqlx::query("SET SESSION TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut conn)
                .await?;
        }
        debug!(backend = conn.backend_name(), "connected to database");
        let sqlite = is_sqlite(&conn);
        Ok(Self { conn, sqlite })
    }

    pub async fn create_schema(&mut self) -> Result<()> {
        schema::create(&mut self.conn).await
    }

    /// Start a transaction. SQLite transactions take the write lock up
    /// front, so that concurrent check-then-write sequences wait for each
    /// other instead of failing on lock upgrade.
    pub async fn begin(&mut self) -> Result<Transaction<'_, Any>> {
        if self.sqlite {
            Ok(self.conn.begin_with("BEGIN IMMEDIATE").await?)
        } else {
            Ok(self.conn.begin().await?)
        }
    }

    /// Connection for single-statement reads outside of a transaction.
    pub fn conn(&mut self) -> &mut AnyConnection {
        &mut self.conn
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

/// Identifier generated by the insert that produced `result`. The SQLite
/// driver does not report it through `Any`, so it is read back from the
/// connection.
pub(crate) async fn inserted_id(
    conn: &mut AnyConnection,
    result: &AnyQueryResult,
    entity: &str,
) -> Result<i64> {
    if let Some(id) = result.last_insert_id() {
        return Ok(id);
    }
    if is_sqlite(conn) {
        let row = sqlx::query("SELECT last_insert_rowid() AS id")
            .fetch_one(&mut *conn)
            .await?;
        return Ok(row.try_get("id")?);
    }
    Err(sqlx::Error::Protocol(format!("no identifier for new {entity}")).into())
}

pub(crate) fn to_timestamp(moment: DateTime<Utc>) -> i64 {
    moment.timestamp()
}

pub(crate) fn timestamp(row: &AnyRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let seconds = row.try_get::<i64, _>(column)?;
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| decode_error(format!("invalid timestamp {seconds} in column {column}")))
}

pub(crate) fn optional_timestamp(
    row: &AnyRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    match row.try_get::<Option<i64>, _>(column)? {
        Some(_) => timestamp(row, column).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn count(row: &AnyRow, column: &str) -> Result<u32, sqlx::Error> {
    let value = row.try_get::<i64, _>(column)?;
    u32::try_from(value).map_err(|_| decode_error(format!("invalid count {value} in column {column}")))
}

/// Decode a text column through the type's `FromStr` implementation.
pub(crate) fn parsed<T>(row: &AnyRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    row.try_get::<String, _>(column)?.parse().map_err(decode_error)
}

pub(crate) fn term(row: &AnyRow) -> Result<Term, sqlx::Error> {
    let half = row.try_get::<i64, _>("half")?;
    Ok(Term {
        year: row.try_get("year")?,
        half: Half::from_number(half).ok_or_else(|| decode_error(format!("invalid half {half}")))?,
    })
}

#[cfg(test)]
pub(crate) async fn memory() -> Store {
    let mut store = Store::connect("sqlite::memory:").await.unwrap();
    store.create_schema().await.unwrap();
    store
}
