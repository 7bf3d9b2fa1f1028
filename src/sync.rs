//! Sync orchestrator: drains the outbox in creation order, then refreshes the
//! local cache from the remote authority.
//!
//! One engine is constructed per authenticated session and torn down on
//! logout; subscribers observe it through a broadcast channel rather than a
//! shared global. At most one cycle runs at a time; a trigger arriving while
//! a cycle is in flight is dropped and caught up by the next periodic tick.

use crate::db::Pool;
use crate::gateway::WorkOrderGateway;
use crate::model::SyncState;
use crate::{outbox, status, store};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("device offline")]
    Offline,
    #[error("sync already in progress")]
    Busy,
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Aggregate outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    OnlineChanged(bool),
    CycleStarted,
    ActionSynced {
        action_id: String,
        work_order_id: String,
    },
    ActionFailed {
        action_id: String,
        work_order_id: String,
        error: String,
    },
    CycleCompleted(SyncReport),
}

pub struct SyncEngine {
    pool: Pool,
    gateway: Arc<dyn WorkOrderGateway>,
    max_backoff_secs: i64,
    online: AtomicBool,
    in_flight: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(pool: Pool, gateway: Arc<dyn WorkOrderGateway>, max_backoff_secs: i64) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            pool,
            gateway,
            max_backoff_secs,
            online: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Record a connectivity transition. Going from offline to online
    /// triggers a cycle immediately; a failed triggered cycle is logged, not
    /// surfaced, since the periodic tick will retry.
    #[instrument(skip_all)]
    pub async fn set_online(&self, online: bool) -> Result<()> {
        let was = self.online.swap(online, Ordering::SeqCst);
        status::set_online(&self.pool, online).await?;
        if was != online {
            self.emit(SyncEvent::OnlineChanged(online));
        }
        if online && !was {
            info!("connectivity restored; starting sync cycle");
            match self.sync_now().await {
                Ok(report) => debug!(?report, "connectivity-triggered cycle finished"),
                Err(SyncError::Busy) => debug!("cycle already in flight; trigger dropped"),
                Err(err) => warn!(?err, "connectivity-triggered cycle failed"),
            }
        }
        Ok(())
    }

    /// Periodic trigger loop; armed while the session lives. Runs forever.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.sync_now().await {
                Ok(report) => {
                    if report.synced > 0 || report.failed > 0 {
                        info!(
                            synced = report.synced,
                            failed = report.failed,
                            skipped = report.skipped,
                            "periodic sync cycle finished"
                        );
                    }
                }
                Err(SyncError::Offline) => debug!("periodic sync skipped; device offline"),
                Err(SyncError::Busy) => debug!("periodic sync skipped; cycle in flight"),
                Err(err) => warn!(?err, "periodic sync cycle failed"),
            }
        }
    }

    /// Run one sync cycle now (explicit trigger). Returns `Busy` if a cycle
    /// is already in flight; the trigger is dropped, not queued.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::Busy);
        }
        let result = self.run_cycle().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    #[instrument(skip_all)]
    async fn run_cycle(&self) -> Result<SyncReport, SyncError> {
        if !self.is_online() {
            status::record_cycle_result(&self.pool, false, Some("device offline")).await?;
            return Err(SyncError::Offline);
        }

        self.emit(SyncEvent::CycleStarted);
        let mut report = SyncReport::default();

        // Snapshot once per cycle; actions enqueued mid-cycle wait for the
        // next one.
        let snapshot = outbox::list(&self.pool).await?;
        let now = chrono::Utc::now();
        for action in snapshot {
            if action.attempt >= outbox::MAX_ATTEMPTS {
                warn!(
                    action_id = %action.id,
                    work_order_id = %action.work_order_id,
                    attempts = action.attempt,
                    "action exhausted its retry budget; operator attention required"
                );
                report.skipped += 1;
                continue;
            }
            if let Some(due) = action.next_attempt_at {
                if due > now {
                    report.skipped += 1;
                    continue;
                }
            }

            match self.gateway.send(&action).await {
                Ok(()) => {
                    let mut tx = self.pool.begin().await?;
                    outbox::remove_tx(&mut tx, &action.id).await?;
                    store::recompute_sync_state_tx(&mut tx, &action.work_order_id).await?;
                    tx.commit().await?;
                    debug!(action_id = %action.id, kind = action.kind.as_str(), "action replayed");
                    self.emit(SyncEvent::ActionSynced {
                        action_id: action.id,
                        work_order_id: action.work_order_id,
                    });
                    report.synced += 1;
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(
                        action_id = %action.id,
                        work_order_id = %action.work_order_id,
                        error = %message,
                        "action replay failed; will retry next cycle"
                    );
                    outbox::mark_attempt(&self.pool, &action.id, &message, self.max_backoff_secs)
                        .await?;
                    store::recompute_sync_state(&self.pool, &action.work_order_id).await?;
                    self.emit(SyncEvent::ActionFailed {
                        action_id: action.id,
                        work_order_id: action.work_order_id,
                        error: message.clone(),
                    });
                    report.errors.push(message);
                    report.failed += 1;
                }
            }
        }

        // Refresh the cache from the authority after draining so local edits
        // were pushed first. An edit created while this fetch is in flight
        // can still race the overwrite; accepted, see DESIGN.md.
        match status::get_user(&self.pool).await? {
            Some(user) => match self.gateway.fetch_assigned(&user.user_id).await {
                Ok(orders) => {
                    store::apply_remote_snapshot(&self.pool, &orders).await?;
                    debug!(count = orders.len(), "cache refreshed from remote snapshot");
                }
                Err(err) => {
                    let message = format!("fetch failed: {err:#}");
                    warn!(error = %message, "cache refresh failed");
                    report.errors.push(message);
                }
            },
            None => debug!("no authenticated technician; skipping cache refresh"),
        }

        status::record_cycle_result(&self.pool, true, report.errors.last().map(String::as_str))
            .await?;
        self.emit(SyncEvent::CycleCompleted(report.clone()));
        Ok(report)
    }

    /// Tear down the session: wipe the cache, the queue and the singletons.
    #[instrument(skip_all)]
    pub async fn logout_wipe(&self) -> Result<()> {
        status::wipe(&self.pool).await?;
        self.online.store(false, Ordering::SeqCst);
        self.emit(SyncEvent::OnlineChanged(false));
        info!("session wiped on logout");
        Ok(())
    }

    /// Work orders currently not synced, for UI badges.
    pub async fn unsynced(&self) -> Result<Vec<crate::model::WorkOrder>> {
        let mut pending = store::get_by_sync_state(&self.pool, SyncState::Pending).await?;
        let mut errored = store::get_by_sync_state(&self.pool, SyncState::Error).await?;
        pending.append(&mut errored);
        Ok(pending)
    }
}
