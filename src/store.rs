//! Local entity store for work orders.
//!
//! Owns the `work_orders` table. The high-level offline operations apply the
//! optimistic local mutation and enqueue the matching pending action inside a
//! single transaction, so a crash can never leave an edit without its queue
//! entry. Sync state is always re-derivable from the queue (see
//! [`recompute_sync_state`]).

use crate::db::Pool;
use crate::model::{ActionKind, OrderStatus, Priority, SyncState, WorkOrder};
use crate::outbox;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashSet;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("work order {0} not found")]
    NotFound(String),
    #[error("material index {index} out of range for work order {id}")]
    MaterialIndex { id: String, index: usize },
    #[error("invalid {column} value {value:?} in local store")]
    InvalidColumn {
        column: &'static str,
        value: String,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

const COLUMNS: &str = "id, title, description, order_type, location, dma, priority, status, \
                       assigned_to, scheduled_date, estimated_duration_minutes, \
                       actual_duration_minutes, completed_at, notes, photos, materials, \
                       sync_state, local_modified_at";

fn from_row(row: &SqliteRow) -> Result<WorkOrder, StoreError> {
    let priority: String = row.get("priority");
    let priority = Priority::parse(&priority).ok_or(StoreError::InvalidColumn {
        column: "priority",
        value: priority.clone(),
    })?;
    let status: String = row.get("status");
    let status = OrderStatus::parse(&status).ok_or(StoreError::InvalidColumn {
        column: "status",
        value: status.clone(),
    })?;
    let sync_state: String = row.get("sync_state");
    let sync_state = SyncState::parse(&sync_state).ok_or(StoreError::InvalidColumn {
        column: "sync_state",
        value: sync_state.clone(),
    })?;
    let notes: String = row.get("notes");
    let photos: String = row.get("photos");
    let materials: String = row.get("materials");

    Ok(WorkOrder {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        order_type: row.get("order_type"),
        location: row.get("location"),
        dma: row.get("dma"),
        priority,
        status,
        assigned_to: row.get("assigned_to"),
        scheduled_date: row.get("scheduled_date"),
        estimated_duration_minutes: row.get("estimated_duration_minutes"),
        actual_duration_minutes: row.get("actual_duration_minutes"),
        completed_at: row.get("completed_at"),
        notes: serde_json::from_str(&notes)?,
        photos: serde_json::from_str(&photos)?,
        materials: serde_json::from_str(&materials)?,
        sync_state,
        local_modified_at: row.get("local_modified_at"),
    })
}

pub async fn get(pool: &Pool, id: &str) -> Result<Option<WorkOrder>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM work_orders WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn get_all(pool: &Pool) -> Result<Vec<WorkOrder>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM work_orders ORDER BY id ASC");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

// Indexed lookups used continuously by the technician UI; each hits one of
// the secondary indexes created by the migration, never a full scan.

pub async fn get_by_status(pool: &Pool, status: OrderStatus) -> Result<Vec<WorkOrder>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM work_orders WHERE status = ? ORDER BY id ASC");
    let rows = sqlx::query(&sql).bind(status.as_str()).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

pub async fn get_by_assignee(pool: &Pool, user_id: &str) -> Result<Vec<WorkOrder>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM work_orders WHERE assigned_to = ? ORDER BY id ASC");
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

pub async fn get_by_priority(pool: &Pool, priority: Priority) -> Result<Vec<WorkOrder>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM work_orders WHERE priority = ? ORDER BY id ASC");
    let rows = sqlx::query(&sql)
        .bind(priority.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn get_by_sync_state(pool: &Pool, state: SyncState) -> Result<Vec<WorkOrder>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM work_orders WHERE sync_state = ? ORDER BY id ASC");
    let rows = sqlx::query(&sql).bind(state.as_str()).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

pub async fn get_scheduled_between(
    pool: &Pool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<WorkOrder>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM work_orders \
         WHERE scheduled_date >= ? AND scheduled_date < ? ORDER BY scheduled_date ASC"
    );
    let rows = sqlx::query(&sql).bind(from).bind(to).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

/// Upsert a work order, stamping `local_modified_at`.
#[instrument(skip_all)]
pub async fn put(pool: &Pool, order: &WorkOrder) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    upsert_tx(&mut tx, order, order.sync_state, Utc::now()).await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn remove(pool: &Pool, id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM work_orders WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn clear(pool: &Pool) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM work_orders").execute(pool).await?;
    Ok(())
}

async fn upsert_tx(
    tx: &mut Transaction<'_, Sqlite>,
    order: &WorkOrder,
    sync_state: SyncState,
    modified_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO work_orders (id, title, description, order_type, location, dma, priority, \
         status, assigned_to, scheduled_date, estimated_duration_minutes, \
         actual_duration_minutes, completed_at, notes, photos, materials, sync_state, \
         local_modified_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET title = excluded.title, \
         description = excluded.description, order_type = excluded.order_type, \
         location = excluded.location, dma = excluded.dma, priority = excluded.priority, \
         status = excluded.status, assigned_to = excluded.assigned_to, \
         scheduled_date = excluded.scheduled_date, \
         estimated_duration_minutes = excluded.estimated_duration_minutes, \
         actual_duration_minutes = excluded.actual_duration_minutes, \
         completed_at = excluded.completed_at, notes = excluded.notes, \
         photos = excluded.photos, materials = excluded.materials, \
         sync_state = excluded.sync_state, local_modified_at = excluded.local_modified_at",
    )
    .bind(&order.id)
    .bind(&order.title)
    .bind(&order.description)
    .bind(&order.order_type)
    .bind(&order.location)
    .bind(&order.dma)
    .bind(order.priority.as_str())
    .bind(order.status.as_str())
    .bind(&order.assigned_to)
    .bind(order.scheduled_date)
    .bind(order.estimated_duration_minutes)
    .bind(order.actual_duration_minutes)
    .bind(order.completed_at)
    .bind(serde_json::to_string(&order.notes)?)
    .bind(serde_json::to_string(&order.photos)?)
    .bind(serde_json::to_string(&order.materials)?)
    .bind(sync_state.as_str())
    .bind(modified_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn require_exists(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<(), StoreError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM work_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    if found.is_none() {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

async fn mark_locally_modified(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE work_orders SET sync_state = 'pending', local_modified_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// High-level offline operations. Each applies the optimistic mutation and
// enqueues the matching pending action in one transaction; a missing work
// order is rejected with no side effect. They never fail on network state:
// only the sync cycle talks to the remote API.

#[instrument(skip_all)]
pub async fn update_status(
    pool: &Pool,
    id: &str,
    status: OrderStatus,
) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;
    require_exists(&mut tx, id).await?;
    sqlx::query("UPDATE work_orders SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    mark_locally_modified(&mut tx, id).await?;
    let action_id = outbox::enqueue_tx(
        &mut tx,
        id,
        ActionKind::StatusUpdate,
        json!({ "status": status.as_str() }),
    )
    .await?;
    tx.commit().await?;
    Ok(action_id)
}

#[instrument(skip_all)]
pub async fn add_note(pool: &Pool, id: &str, text: &str) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;
    let notes: Option<String> = sqlx::query_scalar("SELECT notes FROM work_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(notes) = notes else {
        return Err(StoreError::NotFound(id.to_string()));
    };
    let mut notes: Vec<String> = serde_json::from_str(&notes)?;
    notes.push(text.to_string());
    sqlx::query("UPDATE work_orders SET notes = ? WHERE id = ?")
        .bind(serde_json::to_string(&notes)?)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    mark_locally_modified(&mut tx, id).await?;
    let action_id =
        outbox::enqueue_tx(&mut tx, id, ActionKind::AddNote, json!({ "text": text })).await?;
    tx.commit().await?;
    Ok(action_id)
}

#[instrument(skip_all)]
pub async fn add_photo(pool: &Pool, id: &str, reference: &str) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;
    let photos: Option<String> = sqlx::query_scalar("SELECT photos FROM work_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(photos) = photos else {
        return Err(StoreError::NotFound(id.to_string()));
    };
    let mut photos: Vec<String> = serde_json::from_str(&photos)?;
    photos.push(reference.to_string());
    sqlx::query("UPDATE work_orders SET photos = ? WHERE id = ?")
        .bind(serde_json::to_string(&photos)?)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    mark_locally_modified(&mut tx, id).await?;
    let action_id = outbox::enqueue_tx(
        &mut tx,
        id,
        ActionKind::AddPhoto,
        json!({ "reference": reference }),
    )
    .await?;
    tx.commit().await?;
    Ok(action_id)
}

#[instrument(skip_all)]
pub async fn update_material(
    pool: &Pool,
    id: &str,
    index: usize,
    quantity_used: f64,
) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;
    let materials: Option<String> =
        sqlx::query_scalar("SELECT materials FROM work_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(materials) = materials else {
        return Err(StoreError::NotFound(id.to_string()));
    };
    let mut materials: Vec<crate::model::MaterialUsage> = serde_json::from_str(&materials)?;
    let Some(entry) = materials.get_mut(index) else {
        return Err(StoreError::MaterialIndex {
            id: id.to_string(),
            index,
        });
    };
    entry.quantity_used = quantity_used;
    sqlx::query("UPDATE work_orders SET materials = ? WHERE id = ?")
        .bind(serde_json::to_string(&materials)?)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    mark_locally_modified(&mut tx, id).await?;
    let action_id = outbox::enqueue_tx(
        &mut tx,
        id,
        ActionKind::UpdateMaterials,
        json!({ "index": index, "quantity_used": quantity_used }),
    )
    .await?;
    tx.commit().await?;
    Ok(action_id)
}

#[instrument(skip_all)]
pub async fn complete_order(
    pool: &Pool,
    id: &str,
    actual_duration_minutes: i64,
) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;
    require_exists(&mut tx, id).await?;
    let completed_at = Utc::now();
    sqlx::query(
        "UPDATE work_orders SET status = 'completed', actual_duration_minutes = ?, \
         completed_at = ? WHERE id = ?",
    )
    .bind(actual_duration_minutes)
    .bind(completed_at)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    mark_locally_modified(&mut tx, id).await?;
    let action_id = outbox::enqueue_tx(
        &mut tx,
        id,
        ActionKind::CompleteOrder,
        json!({
            "actual_duration_minutes": actual_duration_minutes,
            "completed_at": completed_at,
        }),
    )
    .await?;
    tx.commit().await?;
    Ok(action_id)
}

/// Re-derive a work order's sync state from the queue: `error` if any
/// referencing action has a failed last attempt, `pending` if any reference
/// it at all, else `synced`. Safe to call after a crash because it trusts the
/// outbox, not a cached flag.
#[instrument(skip_all)]
pub async fn recompute_sync_state(pool: &Pool, id: &str) -> Result<SyncState, StoreError> {
    let mut tx = pool.begin().await?;
    let state = recompute_sync_state_tx(&mut tx, id).await?;
    tx.commit().await?;
    Ok(state)
}

pub(crate) async fn recompute_sync_state_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<SyncState, StoreError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_actions WHERE work_order_id = ?")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
    let failed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pending_actions WHERE work_order_id = ? AND last_error IS NOT NULL",
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;
    let state = if total == 0 {
        SyncState::Synced
    } else if failed > 0 {
        SyncState::Error
    } else {
        SyncState::Pending
    };
    sqlx::query("UPDATE work_orders SET sync_state = ? WHERE id = ?")
        .bind(state.as_str())
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(state)
}

/// Overwrite the cache with the canonical server snapshot, except that any
/// work order with outstanding pending actions keeps its local row untouched
/// so unsynced edits are never clobbered by a fetch.
#[instrument(skip_all)]
pub async fn apply_remote_snapshot(
    pool: &Pool,
    orders: &[WorkOrder],
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    let dirty: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT work_order_id FROM pending_actions")
            .fetch_all(&mut *tx)
            .await?;
    let dirty: HashSet<String> = dirty.into_iter().collect();
    let fetched: HashSet<&str> = orders.iter().map(|o| o.id.as_str()).collect();

    let local_ids: Vec<String> = sqlx::query_scalar("SELECT id FROM work_orders")
        .fetch_all(&mut *tx)
        .await?;
    for id in local_ids {
        if !fetched.contains(id.as_str()) && !dirty.contains(&id) {
            sqlx::query("DELETE FROM work_orders WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }
    }

    let now = Utc::now();
    for order in orders {
        if dirty.contains(&order.id) {
            continue;
        }
        upsert_tx(&mut tx, order, SyncState::Synced, now).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MaterialUsage;

    async fn setup_pool() -> Pool {
        let pool = Pool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_order(id: &str) -> WorkOrder {
        WorkOrder {
            id: id.to_string(),
            title: format!("Leak repair {id}"),
            description: "Visible leak at curb stop".into(),
            order_type: "repair".into(),
            location: "12 Harbour Rd".into(),
            dma: "DMA-North-3".into(),
            priority: Priority::High,
            status: OrderStatus::Assigned,
            assigned_to: Some("tech-042".into()),
            scheduled_date: None,
            estimated_duration_minutes: Some(90),
            actual_duration_minutes: None,
            completed_at: None,
            notes: vec!["initial inspection done".into()],
            photos: vec![],
            materials: vec![MaterialUsage {
                name: "PVC coupling 50mm".into(),
                unit: "pcs".into(),
                quantity_planned: 2.0,
                quantity_used: 0.0,
            }],
            sync_state: SyncState::Synced,
            local_modified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let pool = setup_pool().await;
        let order = sample_order("WO-1");
        put(&pool, &order).await.unwrap();

        let loaded = get(&pool, "WO-1").await.unwrap().unwrap();
        assert_eq!(loaded.title, order.title);
        assert_eq!(loaded.notes, order.notes);
        assert_eq!(loaded.materials, order.materials);
        assert_eq!(loaded.sync_state, SyncState::Synced);

        assert!(get(&pool, "WO-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn indexed_lookups() {
        let pool = setup_pool().await;
        let mut a = sample_order("WO-1");
        a.status = OrderStatus::InProgress;
        a.priority = Priority::Critical;
        let mut b = sample_order("WO-2");
        b.assigned_to = Some("tech-007".into());
        put(&pool, &a).await.unwrap();
        put(&pool, &b).await.unwrap();

        let in_progress = get_by_status(&pool, OrderStatus::InProgress).await.unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, "WO-1");

        let critical = get_by_priority(&pool, Priority::Critical).await.unwrap();
        assert_eq!(critical.len(), 1);

        let for_tech = get_by_assignee(&pool, "tech-007").await.unwrap();
        assert_eq!(for_tech.len(), 1);
        assert_eq!(for_tech[0].id, "WO-2");

        assert_eq!(get_all(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_status_applies_locally_and_enqueues() {
        let pool = setup_pool().await;
        put(&pool, &sample_order("WO-1")).await.unwrap();

        let action_id = update_status(&pool, "WO-1", OrderStatus::InProgress)
            .await
            .unwrap();

        let order = get(&pool, "WO-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::InProgress);
        assert_eq!(order.sync_state, SyncState::Pending);

        let action = crate::outbox::get(&pool, &action_id).await.unwrap().unwrap();
        assert_eq!(action.kind, ActionKind::StatusUpdate);
        assert_eq!(action.work_order_id, "WO-1");
        assert_eq!(action.payload["status"], "in_progress");
    }

    #[tokio::test]
    async fn missing_order_is_rejected_without_side_effects() {
        let pool = setup_pool().await;

        let err = update_status(&pool, "WO-ghost", OrderStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = add_note(&pool, "WO-ghost", "hello").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        assert_eq!(crate::outbox::count(&pool).await.unwrap(), 0);
        let pending: i64 = sqlx::query_scalar("SELECT pending_count FROM sync_status WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn add_note_and_photo_append() {
        let pool = setup_pool().await;
        put(&pool, &sample_order("WO-1")).await.unwrap();

        add_note(&pool, "WO-1", "checked valve").await.unwrap();
        add_photo(&pool, "WO-1", "photos/valve.jpg").await.unwrap();

        let order = get(&pool, "WO-1").await.unwrap().unwrap();
        assert_eq!(
            order.notes,
            vec!["initial inspection done".to_string(), "checked valve".to_string()]
        );
        assert_eq!(order.photos, vec!["photos/valve.jpg".to_string()]);
        assert_eq!(crate::outbox::count(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_material_sets_quantity_and_rejects_bad_index() {
        let pool = setup_pool().await;
        put(&pool, &sample_order("WO-1")).await.unwrap();

        update_material(&pool, "WO-1", 0, 2.0).await.unwrap();
        let order = get(&pool, "WO-1").await.unwrap().unwrap();
        assert_eq!(order.materials[0].quantity_used, 2.0);

        let err = update_material(&pool, "WO-1", 5, 1.0).await.unwrap_err();
        assert!(matches!(err, StoreError::MaterialIndex { index: 5, .. }));
        // The bad index enqueued nothing.
        assert_eq!(crate::outbox::count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn complete_order_stamps_completion_fields() {
        let pool = setup_pool().await;
        put(&pool, &sample_order("WO-1")).await.unwrap();

        let action_id = complete_order(&pool, "WO-1", 75).await.unwrap();

        let order = get(&pool, "WO-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.actual_duration_minutes, Some(75));
        assert!(order.completed_at.is_some());

        let action = crate::outbox::get(&pool, &action_id).await.unwrap().unwrap();
        assert_eq!(action.kind, ActionKind::CompleteOrder);
        assert_eq!(action.payload["actual_duration_minutes"], 75);
    }

    #[tokio::test]
    async fn sync_state_follows_the_queue() {
        let pool = setup_pool().await;
        put(&pool, &sample_order("WO-1")).await.unwrap();

        let action_id = add_note(&pool, "WO-1", "note").await.unwrap();
        assert_eq!(
            recompute_sync_state(&pool, "WO-1").await.unwrap(),
            SyncState::Pending
        );

        crate::outbox::mark_attempt(&pool, &action_id, "timeout", 300)
            .await
            .unwrap();
        assert_eq!(
            recompute_sync_state(&pool, "WO-1").await.unwrap(),
            SyncState::Error
        );

        crate::outbox::remove(&pool, &action_id).await.unwrap();
        assert_eq!(
            recompute_sync_state(&pool, "WO-1").await.unwrap(),
            SyncState::Synced
        );
    }

    #[tokio::test]
    async fn snapshot_overwrites_clean_rows_and_preserves_dirty_ones() {
        let pool = setup_pool().await;
        // WO-1 has a local unsynced edit, WO-2 is clean, WO-3 is clean but
        // absent from the server snapshot.
        put(&pool, &sample_order("WO-1")).await.unwrap();
        put(&pool, &sample_order("WO-2")).await.unwrap();
        put(&pool, &sample_order("WO-3")).await.unwrap();
        add_note(&pool, "WO-1", "local-only note").await.unwrap();

        let mut remote_1 = sample_order("WO-1");
        remote_1.notes = vec![]; // stale server copy
        let mut remote_2 = sample_order("WO-2");
        remote_2.title = "Renamed by dispatcher".into();

        apply_remote_snapshot(&pool, &[remote_1, remote_2]).await.unwrap();

        let wo1 = get(&pool, "WO-1").await.unwrap().unwrap();
        assert!(wo1.notes.contains(&"local-only note".to_string()));
        assert_eq!(wo1.sync_state, SyncState::Pending);

        let wo2 = get(&pool, "WO-2").await.unwrap().unwrap();
        assert_eq!(wo2.title, "Renamed by dispatcher");
        assert_eq!(wo2.sync_state, SyncState::Synced);

        assert!(get(&pool, "WO-3").await.unwrap().is_none());
    }
}
