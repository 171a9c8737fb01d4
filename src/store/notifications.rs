use super::to_timestamp;
use crate::error::{Result, is_unique_violation};
use chrono::{DateTime, Utc};
use sqlx::AnyConnection;

/// Identity of one reminder: what, about which target, to whom, for which
/// logical period.
#[derive(Clone, Debug)]
pub struct LogKey<'a> {
    pub kind: &'a str,
    pub target: String,
    pub recipient: String,
    pub period: String,
}

/// Record the reminder as sent. Returns `false` if it had already been
/// recorded, in which case it must not be sent again.
pub async fn claim(conn: &mut AnyConnection, key: &LogKey<'_>, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO notification_log (kind, target, recipient, period_key, sent_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(key.kind.to_owned())
    .bind(key.target.clone())
    .bind(key.recipient.clone())
    .bind(key.period.clone())
    .bind(to_timestamp(now))
    .execute(&mut *conn)
    .await;
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Forget a claim whose delivery failed, so that the next run retries it.
pub async fn release(conn: &mut AnyConnection, key: &LogKey<'_>) -> Result<()> {
    sqlx::query(
        "DELETE FROM notification_log
         WHERE kind = ? AND target = ? AND recipient = ? AND period_key = ?",
    )
    .bind(key.kind.to_owned())
    .bind(key.target.clone())
    .bind(key.recipient.clone())
    .bind(key.period.clone())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_is_once_per_key() {
        let mut store = crate::store::memory().await;
        let now = Utc::now();
        let key = LogKey {
            kind: "SIGNATURE_REMINDER",
            target: "position 1".into(),
            recipient: "student:4".into(),
            period: "2025-03-10".into(),
        };
        assert!(claim(store.conn(), &key, now).await.unwrap());
        assert!(!claim(store.conn(), &key, now).await.unwrap());
        let next_day = LogKey {
            period: "2025-03-11".into(),
            ..key.clone()
        };
        assert!(claim(store.conn(), &next_day, now).await.unwrap());
        release(store.conn(), &key).await.unwrap();
        assert!(claim(store.conn(), &key, now).await.unwrap());
    }
}
