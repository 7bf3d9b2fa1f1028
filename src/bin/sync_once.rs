use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use fieldsync::gateway::HttpGateway;
use fieldsync::model::UserData;
use fieldsync::sync::{SyncEngine, SyncError};
use fieldsync::{config, db, outbox, status};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Drain all pending work-order actions and exit when the queue is empty or only stuck actions remain"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Retry actions immediately instead of honoring their backoff schedule
    #[arg(long)]
    ignore_backoff: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let data_dir = cfg.app.resolved_data_dir();
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{data_dir}/fieldsync.db"));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    status::set_user(
        &pool,
        &UserData {
            user_id: cfg.technician.user_id.clone(),
            role: cfg.technician.role.clone(),
            tenant_id: cfg.api.tenant_id.clone(),
        },
    )
    .await?;

    let gateway = Arc::new(HttpGateway::from_config(&cfg)?);
    let engine = SyncEngine::new(pool.clone(), gateway, cfg.app.max_backoff_seconds as i64);
    engine.set_online(true).await?;

    info!(
        pending = outbox::count(&pool).await?,
        "starting one-shot drain"
    );

    loop {
        let remaining = outbox::count(&pool).await?;
        if remaining == 0 {
            info!("outbox drained; all actions synced");
            break;
        }

        let stuck = outbox::list_stuck(&pool).await?;
        if stuck.len() as i64 == remaining {
            error!(
                count = stuck.len(),
                "only permanently stuck actions remain; manual attention required"
            );
            for action in &stuck {
                error!(
                    action_id = %action.id,
                    work_order_id = %action.work_order_id,
                    kind = action.kind.as_str(),
                    attempts = action.attempt,
                    last_error = action.last_error.as_deref().unwrap_or("-"),
                    "stuck action"
                );
            }
            break;
        }

        if args.ignore_backoff {
            outbox::reset_backoff(&pool).await?;
        }

        match engine.sync_now().await {
            Ok(report) => info!(
                synced = report.synced,
                failed = report.failed,
                skipped = report.skipped,
                remaining = outbox::count(&pool).await?,
                "cycle finished"
            ),
            Err(SyncError::Busy) => {}
            Err(err) => warn!(?err, "sync cycle failed"),
        }

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    Ok(())
}
