//! Durable FIFO queue of not-yet-confirmed mutations (outbox pattern).
//!
//! Ordering is global by creation timestamp across all work orders. An action
//! that exhausts its retry budget stays queued so the operator can see it;
//! dropping it silently would lose the technician's edit.

use crate::db::Pool;
use crate::model::{ActionKind, PendingAction};
use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;
use uuid::Uuid;

/// Retry budget per action. Reaching it marks the action permanently stuck;
/// it is surfaced, never auto-removed.
pub const MAX_ATTEMPTS: i32 = 5;

const COLUMNS: &str = "id, work_order_id, kind, payload, created_at, attempt, \
                       next_attempt_at, last_attempt_at, last_error";

fn from_row(row: &SqliteRow) -> Result<PendingAction> {
    let kind: String = row.get("kind");
    let kind = ActionKind::parse(&kind).ok_or_else(|| anyhow!("unknown action kind {kind}"))?;
    let payload: String = row.get("payload");
    let payload: Value = serde_json::from_str(&payload)?;
    Ok(PendingAction {
        id: row.get("id"),
        work_order_id: row.get("work_order_id"),
        kind,
        payload,
        created_at: row.get("created_at"),
        attempt: row.get("attempt"),
        next_attempt_at: row.get("next_attempt_at"),
        last_attempt_at: row.get("last_attempt_at"),
        last_error: row.get("last_error"),
    })
}

#[instrument(skip_all)]
pub async fn enqueue(
    pool: &Pool,
    work_order_id: &str,
    kind: ActionKind,
    payload: Value,
) -> Result<String> {
    let mut tx = pool.begin().await?;
    let id = enqueue_tx(&mut tx, work_order_id, kind, payload).await?;
    tx.commit().await?;
    Ok(id)
}

pub(crate) async fn enqueue_tx(
    tx: &mut Transaction<'_, Sqlite>,
    work_order_id: &str,
    kind: ActionKind,
    payload: Value,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO pending_actions (id, work_order_id, kind, payload, created_at, attempt) \
         VALUES (?, ?, ?, ?, ?, 0)",
    )
    .bind(&id)
    .bind(work_order_id)
    .bind(kind.as_str())
    .bind(payload.to_string())
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    refresh_pending_count_tx(tx).await?;
    Ok(id)
}

/// Snapshot of the whole queue in replay order (creation time ascending).
#[instrument(skip_all)]
pub async fn list(pool: &Pool) -> Result<Vec<PendingAction>> {
    let sql = format!("SELECT {COLUMNS} FROM pending_actions ORDER BY created_at ASC, id ASC");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

pub async fn get(pool: &Pool, id: &str) -> Result<Option<PendingAction>> {
    let sql = format!("SELECT {COLUMNS} FROM pending_actions WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(from_row).transpose()
}

/// Record a failed replay: bump the attempt counter, remember the error and
/// schedule the next attempt with jittered exponential backoff.
#[instrument(skip_all)]
pub async fn mark_attempt(pool: &Pool, id: &str, error: &str, max_backoff_secs: i64) -> Result<()> {
    let attempt: i32 = sqlx::query_scalar("SELECT attempt FROM pending_actions WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    let now = Utc::now();
    let next = now + backoff_delay(attempt, id, max_backoff_secs);
    sqlx::query(
        "UPDATE pending_actions \
         SET attempt = ?, last_attempt_at = ?, last_error = ?, next_attempt_at = ? \
         WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(now)
    .bind(error)
    .bind(next)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn remove(pool: &Pool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    remove_tx(&mut tx, id).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn remove_tx(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM pending_actions WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    refresh_pending_count_tx(tx).await?;
    Ok(())
}

pub async fn count(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_actions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Actions that exhausted the retry budget, oldest first.
pub async fn list_stuck(pool: &Pool) -> Result<Vec<PendingAction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM pending_actions WHERE attempt >= ? ORDER BY created_at ASC, id ASC"
    );
    let rows = sqlx::query(&sql).bind(MAX_ATTEMPTS).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

/// Make every retryable action due immediately. Used by the operator drain
/// tool; the daemon itself always honors the backoff schedule.
pub async fn reset_backoff(pool: &Pool) -> Result<()> {
    sqlx::query("UPDATE pending_actions SET next_attempt_at = NULL WHERE attempt < ?")
        .bind(MAX_ATTEMPTS)
        .execute(pool)
        .await?;
    Ok(())
}

/// Keep `sync_status.pending_count` equal to the live queue size. Re-derived
/// from the table rather than incremented so interrupted writes cannot skew it.
pub(crate) async fn refresh_pending_count_tx(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    sqlx::query(
        "UPDATE sync_status \
         SET pending_count = (SELECT COUNT(*) FROM pending_actions) WHERE id = 1",
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_secs`, plus up to 1s
/// of jitter derived from the action id.
pub fn backoff_delay(attempt: i32, action_id: &str, max_secs: i64) -> Duration {
    let base = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let secs = if max_secs > 0 { base.min(max_secs) } else { base };
    let jitter_ms = action_id
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
        % 1000;
    Duration::seconds(secs) + Duration::milliseconds(jitter_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup_pool() -> Pool {
        let pool = Pool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn listing_is_fifo_by_creation_time() {
        let pool = setup_pool().await;
        let a = enqueue(&pool, "WO-1", ActionKind::StatusUpdate, json!({"status": "assigned"}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = enqueue(&pool, "WO-2", ActionKind::AddNote, json!({"text": "n"}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let c = enqueue(&pool, "WO-1", ActionKind::AddPhoto, json!({"reference": "p"}))
            .await
            .unwrap();

        let ids: Vec<String> = list(&pool).await.unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(count(&pool).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn mark_attempt_records_error_and_schedules_retry() {
        let pool = setup_pool().await;
        let id = enqueue(&pool, "WO-1", ActionKind::AddNote, json!({"text": "n"}))
            .await
            .unwrap();

        mark_attempt(&pool, &id, "connection reset", 300).await.unwrap();

        let action = get(&pool, &id).await.unwrap().unwrap();
        assert_eq!(action.attempt, 1);
        assert_eq!(action.last_error.as_deref(), Some("connection reset"));
        assert!(action.last_attempt_at.is_some());
        assert!(action.next_attempt_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn pending_count_tracks_queue_size() {
        let pool = setup_pool().await;
        let id = enqueue(&pool, "WO-1", ActionKind::AddNote, json!({"text": "n"}))
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT pending_count FROM sync_status WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        remove(&pool, &id).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT pending_count FROM sync_status WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn stuck_actions_stay_queued() {
        let pool = setup_pool().await;
        let id = enqueue(&pool, "WO-1", ActionKind::CompleteOrder, json!({}))
            .await
            .unwrap();
        sqlx::query("UPDATE pending_actions SET attempt = ? WHERE id = ?")
            .bind(MAX_ATTEMPTS)
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();

        let stuck = list_stuck(&pool).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, id);
        assert_eq!(count(&pool).await.unwrap(), 1);
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let short = backoff_delay(0, "a", 300);
        let longer = backoff_delay(3, "a", 300);
        assert!(longer > short);
        assert!(short >= Duration::seconds(5));
        assert!(short < Duration::seconds(6));

        let capped = backoff_delay(10, "a", 60);
        assert!(capped < Duration::seconds(61));
    }

    #[test]
    fn backoff_jitter_is_deterministic_per_id() {
        assert_eq!(backoff_delay(2, "abc", 300), backoff_delay(2, "abc", 300));
        // Different ids usually land on different jitter values.
        assert_ne!(backoff_delay(2, "abc", 300), backoff_delay(2, "xyz", 300));
    }
}
