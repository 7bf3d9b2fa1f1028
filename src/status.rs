//! Singleton records: process-wide sync status and the authenticated
//! technician's identity. Both persist across sessions until the logout wipe.

use crate::db::Pool;
use crate::model::{SyncStatus, UserData};
use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use tracing::instrument;

pub async fn get(pool: &Pool) -> Result<SyncStatus> {
    let row = sqlx::query(
        "SELECT last_sync_at, pending_count, online, last_error FROM sync_status WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(SyncStatus {
        last_sync_at: row.get("last_sync_at"),
        pending_count: row.get("pending_count"),
        online: row.get("online"),
        last_error: row.get("last_error"),
    })
}

#[instrument(skip_all)]
pub async fn set_online(pool: &Pool, online: bool) -> Result<()> {
    sqlx::query("UPDATE sync_status SET online = ? WHERE id = 1")
        .bind(online)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the outcome of a sync cycle. `pending_count` is re-derived from the
/// queue; `last_sync_at` only advances on a completed cycle.
#[instrument(skip_all)]
pub async fn record_cycle_result(
    pool: &Pool,
    completed: bool,
    last_error: Option<&str>,
) -> Result<()> {
    let stamp = completed.then(Utc::now);
    sqlx::query(
        "UPDATE sync_status \
         SET pending_count = (SELECT COUNT(*) FROM pending_actions), \
             last_error = ?, \
             last_sync_at = COALESCE(?, last_sync_at) \
         WHERE id = 1",
    )
    .bind(last_error)
    .bind(stamp)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_user(pool: &Pool) -> Result<Option<UserData>> {
    let row = sqlx::query("SELECT user_id, role, tenant_id FROM user_data WHERE id = 1")
        .fetch_one(pool)
        .await?;
    let user_id: Option<String> = row.get("user_id");
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    Ok(Some(UserData {
        user_id,
        role: row.get::<Option<String>, _>("role").unwrap_or_default(),
        tenant_id: row
            .get::<Option<String>, _>("tenant_id")
            .unwrap_or_default(),
    }))
}

#[instrument(skip_all)]
pub async fn set_user(pool: &Pool, user: &UserData) -> Result<()> {
    sqlx::query(
        "UPDATE user_data SET user_id = ?, role = ?, tenant_id = ?, updated_at = ? WHERE id = 1",
    )
    .bind(&user.user_id)
    .bind(&user.role)
    .bind(&user.tenant_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Full logout wipe: the only path that deletes work orders or resets the
/// singleton rows.
#[instrument(skip_all)]
pub async fn wipe(pool: &Pool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM pending_actions")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM work_orders")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE sync_status \
         SET last_sync_at = NULL, pending_count = 0, online = 0, last_error = NULL WHERE id = 1",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE user_data \
         SET user_id = NULL, role = NULL, tenant_id = NULL, updated_at = NULL WHERE id = 1",
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}
