use super::{count, inserted_id, term, timestamp, to_timestamp};
use crate::error::Result;
use crate::model::{InscriptionPeriod, PeriodId, Quota, Term};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};

fn quota_from_row(row: &AnyRow) -> Result<Quota, sqlx::Error> {
    Ok(Quota {
        term: term(row)?,
        total_scholarships: count(row, "total_scholarships")?,
        version: row.try_get("version")?,
    })
}

fn period_from_row(row: &AnyRow) -> Result<InscriptionPeriod, sqlx::Error> {
    Ok(InscriptionPeriod {
        id: PeriodId(row.try_get("id")?),
        term: term(row)?,
        opens_at: timestamp(row, "opens_at")?,
        closes_at: timestamp(row, "closes_at")?,
    })
}

pub async fn find_quota(conn: &mut AnyConnection, term: Term) -> Result<Option<Quota>> {
    Ok(sqlx::query(
        "SELECT year, half, total_scholarships, version FROM quotas WHERE year = ? AND half = ?",
    )
    .bind(term.year)
    .bind(term.half.number())
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| quota_from_row(&row))
    .transpose()?)
}

/// Bump the quota version before reading it. The write holds the row lock
/// until the end of the transaction, so allocation changes in the same term
/// are applied one at a time.
pub async fn lock_quota(conn: &mut AnyConnection, term: Term) -> Result<Option<Quota>> {
    sqlx::query("UPDATE quotas SET version = version + 1 WHERE year = ? AND half = ?")
        .bind(term.year)
        .bind(term.half.number())
        .execute(&mut *conn)
        .await?;
    find_quota(conn, term).await
}

pub async fn save_quota(
    conn: &mut AnyConnection,
    term: Term,
    total: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE quotas SET total_scholarships = ?, version = version + 1, updated_at = ?
         WHERE year = ? AND half = ?",
    )
    .bind(i64::from(total))
    .bind(to_timestamp(now))
    .bind(term.year)
    .bind(term.half.number())
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated == 0 {
        sqlx::query(
            "INSERT INTO quotas (year, half, total_scholarships, version, updated_at)
             VALUES (?, ?, ?, 1, ?)",
        )
        .bind(term.year)
        .bind(term.half.number())
        .bind(i64::from(total))
        .bind(to_timestamp(now))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn insert_period(
    conn: &mut AnyConnection,
    term: Term,
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
) -> Result<InscriptionPeriod> {
    let result = sqlx::query(
        "INSERT INTO inscription_periods (year, half, opens_at, closes_at) VALUES (?, ?, ?, ?)",
    )
    .bind(term.year)
    .bind(term.half.number())
    .bind(to_timestamp(opens_at))
    .bind(to_timestamp(closes_at))
    .execute(&mut *conn)
    .await?;
    let id = inserted_id(conn, &result, "inscription period").await?;
    Ok(InscriptionPeriod {
        id: PeriodId(id),
        term,
        opens_at,
        closes_at,
    })
}

/// Inscription period of the term open at `now`, if any. When periods
/// overlap, the one closing last wins.
pub async fn open_period(
    conn: &mut AnyConnection,
    term: Term,
    now: DateTime<Utc>,
) -> Result<Option<InscriptionPeriod>> {
    let rows = sqlx::query(
        "SELECT id, year, half, opens_at, closes_at FROM inscription_periods
         WHERE year = ? AND half = ? ORDER BY closes_at DESC",
    )
    .bind(term.year)
    .bind(term.half.number())
    .fetch_all(&mut *conn)
    .await?;
    for row in &rows {
        let period = period_from_row(row)?;
        if period.is_open_at(now) {
            return Ok(Some(period));
        }
    }
    Ok(None)
}

/// Periods whose closing time falls within `[from, to]`.
pub async fn periods_closing_between(
    conn: &mut AnyConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<InscriptionPeriod>> {
    sqlx::query(
        "SELECT id, year, half, opens_at, closes_at FROM inscription_periods
         WHERE closes_at >= ? AND closes_at <= ? ORDER BY closes_at",
    )
    .bind(to_timestamp(from))
    .bind(to_timestamp(to))
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| Ok(period_from_row(row)?))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Half;
    use chrono::{TimeDelta, TimeZone};

    #[tokio::test]
    async fn test_open_period_bounds() {
        let mut store = crate::store::memory().await;
        let term = Term {
            year: 2025,
            half: Half::Second,
        };
        let opens = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let closes = opens + TimeDelta::days(10);
        let first = insert_period(store.conn(), term, opens, closes).await.unwrap();
        let second = insert_period(store.conn(), term, closes, closes + TimeDelta::days(5))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(first.is_open_at(opens));
        assert!(first.is_open_at(closes));
        assert!(!first.is_open_at(closes + TimeDelta::seconds(1)));

        let before = open_period(store.conn(), term, opens - TimeDelta::seconds(1)).await.unwrap();
        assert!(before.is_none());
        let during = open_period(store.conn(), term, opens + TimeDelta::days(1)).await.unwrap();
        assert_eq!(during.map(|p| p.id), Some(first.id));
        let overlap = open_period(store.conn(), term, closes).await.unwrap();
        assert_eq!(overlap.map(|p| p.id), Some(second.id));
        let after = open_period(store.conn(), term, closes + TimeDelta::days(6)).await.unwrap();
        assert!(after.is_none());
    }
}
