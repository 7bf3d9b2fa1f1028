use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use fieldsync::gateway::HttpGateway;
use fieldsync::model::UserData;
use fieldsync::sync::SyncEngine;
use fieldsync::{config, db, status};

#[derive(Debug, Parser)]
#[command(author, version, about = "Offline-first sync daemon for field work orders")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }

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
    let engine = SyncEngine::new(pool, gateway, cfg.app.max_backoff_seconds as i64);
    engine.set_online(true).await?;

    info!(
        interval = cfg.app.sync_interval_seconds,
        "starting field sync daemon"
    );
    engine
        .run(Duration::from_secs(cfg.app.sync_interval_seconds))
        .await;

    Ok(())
}
