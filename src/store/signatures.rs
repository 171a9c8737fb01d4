use super::{inserted_id, optional_timestamp, parsed, timestamp, to_timestamp};
use crate::error::{Result, is_unique_violation};
use crate::model::{Role, SignatureGrant, SignatureRecord, SignatureTarget, TargetType, UserId};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};

fn target(row: &AnyRow) -> Result<SignatureTarget, sqlx::Error> {
    Ok(SignatureTarget::new(
        parsed::<TargetType>(row, "target_type")?,
        row.try_get("target_id")?,
    ))
}

fn record_from_row(row: &AnyRow) -> Result<SignatureRecord, sqlx::Error> {
    Ok(SignatureRecord {
        id: row.try_get("id")?,
        target: target(row)?,
        signer_role: parsed(row, "signer_role")?,
        signer: row.try_get::<Option<i64>, _>("signer_id")?.map(UserId),
        payload: row.try_get("payload")?,
        signed_at: timestamp(row, "signed_at")?,
    })
}

fn grant_from_row(row: &AnyRow) -> Result<SignatureGrant, sqlx::Error> {
    Ok(SignatureGrant {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        target: target(row)?,
        signer_role: parsed(row, "signer_role")?,
        signer_email: row.try_get("signer_email")?,
        expires_at: timestamp(row, "expires_at")?,
        consumed_at: optional_timestamp(row, "consumed_at")?,
    })
}

/// Insert a signature. Returns `None` if the target already carries a
/// signature for this role.
pub async fn insert(
    conn: &mut AnyConnection,
    target: SignatureTarget,
    role: Role,
    signer: Option<UserId>,
    payload: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let result = sqlx::query(
        "INSERT INTO signatures (target_type, target_id, signer_role, signer_id, payload, signed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(target.target_type().as_str())
    .bind(target.id())
    .bind(role.as_str())
    .bind(signer.map(|s| s.0))
    .bind(payload.to_owned())
    .bind(to_timestamp(now))
    .execute(&mut *conn)
    .await;
    match result {
        Ok(result) => Ok(Some(inserted_id(conn, &result, "signature").await?)),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn for_target(conn: &mut AnyConnection, target: SignatureTarget) -> Result<Vec<SignatureRecord>> {
    sqlx::query(
        "SELECT id, target_type, target_id, signer_role, signer_id, payload, signed_at
         FROM signatures WHERE target_type = ? AND target_id = ? ORDER BY signed_at, id",
    )
    .bind(target.target_type().as_str())
    .bind(target.id())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| Ok(record_from_row(row)?))
    .collect()
}

pub async fn signed_roles(conn: &mut AnyConnection, target: SignatureTarget) -> Result<Vec<Role>> {
    Ok(for_target(conn, target)
        .await?
        .into_iter()
        .map(|s| s.signer_role)
        .collect())
}

pub async fn clear(conn: &mut AnyConnection, target: SignatureTarget) -> Result<u64> {
    let result = sqlx::query("DELETE FROM signatures WHERE target_type = ? AND target_id = ?")
        .bind(target.target_type().as_str())
        .bind(target.id())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_grant(
    conn: &mut AnyConnection,
    token: &str,
    target: SignatureTarget,
    role: Role,
    email: &str,
    expires_at: DateTime<Utc>,
) -> Result<SignatureGrant> {
    let result = sqlx::query(
        "INSERT INTO signature_grants (token, target_type, target_id, signer_role, signer_email,
            expires_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(token.to_owned())
    .bind(target.target_type().as_str())
    .bind(target.id())
    .bind(role.as_str())
    .bind(email.to_owned())
    .bind(to_timestamp(expires_at))
    .execute(&mut *conn)
    .await?;
    let id = inserted_id(conn, &result, "signature grant").await?;
    Ok(SignatureGrant {
        id,
        token: token.to_owned(),
        target,
        signer_role: role,
        signer_email: email.to_owned(),
        expires_at,
        consumed_at: None,
    })
}

pub async fn find_grant(conn: &mut AnyConnection, token: &str) -> Result<Option<SignatureGrant>> {
    Ok(sqlx::query(
        "SELECT id, token, target_type, target_id, signer_role, signer_email, expires_at,
            consumed_at
         FROM signature_grants WHERE token = ?",
    )
    .bind(token.to_owned())
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| grant_from_row(&row))
    .transpose()?)
}

/// Mark the grant as used. Returns `false` if it had been consumed already.
pub async fn consume_grant(conn: &mut AnyConnection, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE signature_grants SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL",
    )
    .bind(to_timestamp(now))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Mark every unused grant of the target as consumed, so that it can no
/// longer be redeemed. Returns the number of grants voided.
pub async fn void_grants(
    conn: &mut AnyConnection,
    target: SignatureTarget,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE signature_grants SET consumed_at = ?
         WHERE target_type = ? AND target_id = ? AND consumed_at IS NULL",
    )
    .bind(to_timestamp(now))
    .bind(target.target_type().as_str())
    .bind(target.id())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
