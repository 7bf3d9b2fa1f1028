//! Thin adapter from pending actions to the tenant-scoped work-order REST
//! API. Every mutation body carries the action's own id and creation
//! timestamp so the receiving side can discard duplicate replays; the gateway
//! attaches the identifying fields but does not deduplicate itself.

use crate::config::Config;
use crate::model::{ActionKind, PendingAction, WorkOrder};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::debug;

#[async_trait]
pub trait WorkOrderGateway: Send + Sync {
    /// Replay one queued mutation against the remote authority.
    async fn send(&self, action: &PendingAction) -> Result<()>;

    /// Canonical set of work orders assigned to the technician, for the
    /// cache refresh after draining the queue.
    async fn fetch_assigned(&self, user_id: &str) -> Result<Vec<WorkOrder>>;
}

#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    token: String,
    tenant_id: String,
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    pub fn new(base_url: Url, token: String, tenant_id: String) -> Self {
        let http = Client::builder()
            .user_agent("fieldsync/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            tenant_id,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut base = cfg.api.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("invalid api.base_url")?;
        Ok(Self::new(
            base_url,
            cfg.api.token.clone(),
            cfg.api.tenant_id.clone(),
        ))
    }

    fn route(kind: ActionKind) -> (Method, &'static str) {
        match kind {
            ActionKind::StatusUpdate => (Method::PATCH, "status"),
            ActionKind::AddNote => (Method::POST, "notes"),
            ActionKind::AddPhoto => (Method::POST, "photos"),
            ActionKind::UpdateMaterials => (Method::PATCH, "materials"),
            ActionKind::UpdateDuration => (Method::PATCH, "duration"),
            ActionKind::CompleteOrder => (Method::POST, "complete"),
        }
    }

    pub fn build_mutation_request(&self, action: &PendingAction) -> Result<reqwest::Request> {
        let (method, leaf) = Self::route(action.kind);
        let endpoint = self
            .base_url
            .join(&format!("work-orders/{}/{}", action.work_order_id, leaf))
            .context("invalid work-order endpoint")?;
        self.http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-Tenant-Id", &self.tenant_id)
            .header("Content-Type", "application/json")
            .json(&mutation_body(action))
            .build()
            .context("failed to build work-order request")
    }

    pub fn build_list_request(&self, user_id: &str) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join("work-orders")
            .context("invalid work-order endpoint")?;
        endpoint
            .query_pairs_mut()
            .append_pair("assigned_to", user_id);
        self.http
            .get(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-Tenant-Id", &self.tenant_id)
            .build()
            .context("failed to build work-order list request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        debug!(url=%request.url(), method=%request.method(), "sending work-order api request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach work-order API")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from work-order API: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("work-order API error {}: {}", status, body));
        }
        Ok(res)
    }
}

/// Request body for a replayed mutation: the action payload plus the
/// idempotency fields.
pub fn mutation_body(action: &PendingAction) -> Value {
    let mut body = match &action.payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    body.insert("action_id".into(), json!(action.id));
    body.insert("queued_at".into(), json!(action.created_at));
    Value::Object(body)
}

#[async_trait]
impl WorkOrderGateway for HttpGateway {
    async fn send(&self, action: &PendingAction) -> Result<()> {
        let request = self.build_mutation_request(action)?;
        self.execute(request).await?;
        Ok(())
    }

    async fn fetch_assigned(&self, user_id: &str) -> Result<Vec<WorkOrder>> {
        let request = self.build_list_request(user_id)?;
        let res = self.execute(request).await?;
        res.json().await.context("invalid work-order list response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn gateway() -> HttpGateway {
        HttpGateway::new(
            Url::parse("https://api.aquaops.example/v1/").unwrap(),
            "token".into(),
            "north-water".into(),
        )
    }

    fn sample_action(kind: ActionKind) -> PendingAction {
        PendingAction {
            id: "a1b2c3".into(),
            work_order_id: "WO-7".into(),
            kind,
            payload: json!({ "status": "in_progress" }),
            created_at: Utc::now(),
            attempt: 0,
            next_attempt_at: None,
            last_attempt_at: None,
            last_error: None,
        }
    }

    #[test]
    fn kinds_map_to_method_and_subresource() {
        let cases = [
            (ActionKind::StatusUpdate, Method::PATCH, "status"),
            (ActionKind::AddNote, Method::POST, "notes"),
            (ActionKind::AddPhoto, Method::POST, "photos"),
            (ActionKind::UpdateMaterials, Method::PATCH, "materials"),
            (ActionKind::UpdateDuration, Method::PATCH, "duration"),
            (ActionKind::CompleteOrder, Method::POST, "complete"),
        ];
        let gw = gateway();
        for (kind, method, leaf) in cases {
            let request = gw.build_mutation_request(&sample_action(kind)).unwrap();
            assert_eq!(request.method(), method);
            assert_eq!(request.url().path(), format!("/v1/work-orders/WO-7/{leaf}"));
        }
    }

    #[test]
    fn mutation_body_carries_idempotency_fields() {
        let action = sample_action(ActionKind::StatusUpdate);
        let body = mutation_body(&action);
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["action_id"], "a1b2c3");
        assert!(body["queued_at"].is_string());
    }

    #[test]
    fn mutation_request_sets_headers() {
        let request = gateway()
            .build_mutation_request(&sample_action(ActionKind::AddNote))
            .unwrap();
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("X-Tenant-Id")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "north-water"
        );
    }

    #[test]
    fn list_request_filters_by_assignee() {
        let request = gateway().build_list_request("tech-042").unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.url().path(), "/v1/work-orders");
        assert_eq!(request.url().query(), Some("assigned_to=tech-042"));
    }
}
