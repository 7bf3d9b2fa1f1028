use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "assigned" => Some(OrderStatus::Assigned),
            "in_progress" => Some(OrderStatus::InProgress),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Derived per-entity flag: `pending` while any queued action references the
/// work order, `error` once the latest attempt on one of them failed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Synced,
    Pending,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::Pending => "pending",
            SyncState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncState::Synced),
            "pending" => Some(SyncState::Pending),
            "error" => Some(SyncState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    StatusUpdate,
    AddNote,
    AddPhoto,
    UpdateMaterials,
    UpdateDuration,
    CompleteOrder,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::StatusUpdate => "status_update",
            ActionKind::AddNote => "add_note",
            ActionKind::AddPhoto => "add_photo",
            ActionKind::UpdateMaterials => "update_materials",
            ActionKind::UpdateDuration => "update_duration",
            ActionKind::CompleteOrder => "complete_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status_update" => Some(ActionKind::StatusUpdate),
            "add_note" => Some(ActionKind::AddNote),
            "add_photo" => Some(ActionKind::AddPhoto),
            "update_materials" => Some(ActionKind::UpdateMaterials),
            "update_duration" => Some(ActionKind::UpdateDuration),
            "complete_order" => Some(ActionKind::CompleteOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialUsage {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub quantity_planned: f64,
    #[serde(default)]
    pub quantity_used: f64,
}

/// A unit of field work, owned by the local entity store. The JSON list
/// fields (`notes`, `photos`, `materials`) are stored as TEXT columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkOrder {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub dma: String,
    pub priority: Priority,
    pub status: OrderStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub scheduled_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_duration_minutes: Option<i64>,
    #[serde(default)]
    pub actual_duration_minutes: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub materials: Vec<MaterialUsage>,
    #[serde(default)]
    pub sync_state: SyncState,
    #[serde(default = "Utc::now")]
    pub local_modified_at: DateTime<Utc>,
}

/// One queued mutation awaiting confirmation by the remote work-order API.
/// Holds a weak reference to its work order by id; removed only once the
/// gateway confirms the mutation was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub work_order_id: String,
    pub kind: ActionKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub attempt: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Process-wide singleton; `pending_count` is recomputed from the
/// `pending_actions` table inside every transaction that mutates the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: i64,
    pub online: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserData {
    pub user_id: String,
    pub role: String,
    pub tenant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips() {
        for p in [
            Priority::Critical,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ] {
            assert_eq!(Priority::parse(p.as_str()), Some(p));
        }
        for s in [
            OrderStatus::Pending,
            OrderStatus::Assigned,
            OrderStatus::InProgress,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        for k in [
            ActionKind::StatusUpdate,
            ActionKind::AddNote,
            ActionKind::AddPhoto,
            ActionKind::UpdateMaterials,
            ActionKind::UpdateDuration,
            ActionKind::CompleteOrder,
        ] {
            assert_eq!(ActionKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(OrderStatus::parse("unknown"), None);
    }

    #[test]
    fn work_order_deserializes_with_defaults() {
        let order: WorkOrder = serde_json::from_value(serde_json::json!({
            "id": "WO-1",
            "title": "Replace valve",
            "priority": "high",
            "status": "assigned",
        }))
        .unwrap();
        assert_eq!(order.sync_state, SyncState::Synced);
        assert!(order.notes.is_empty());
        assert!(order.scheduled_date.is_none());
    }
}
