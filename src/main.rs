//! Payrail service entry point.
//!
//! Usage: `payrail [env]` where `env` selects `config/{env}.yaml`
//! (default: `dev`).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use payrail::audit::AuditRecorder;
use payrail::config::AppConfig;
use payrail::db::Database;
use payrail::gateway::{self, AppState};
use payrail::logging::init_logging;
use payrail::payout::{PayoutOrchestrator, RetryPolicy, RetryWorker, WorkerConfig};
use payrail::settlement::{HttpSettlementApi, MockSettlementApi, SettlementApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::args().nth(1).unwrap_or_else(|| "dev".to_string());
    let config = AppConfig::load(&env);
    let _log_guard = init_logging(&config);

    info!(env = %env, "Starting payrail");

    let database = Database::connect(&config.database_url()).await?;
    database.ensure_schema().await?;
    let pool = database.pool().clone();

    let audit = AuditRecorder::new(pool.clone());

    let settlement: Arc<dyn SettlementApi> = match &config.settlement.base_url {
        Some(base_url) => {
            info!(base_url = %base_url, "Using HTTP settlement counterparty");
            Arc::new(HttpSettlementApi::new(
                base_url.clone(),
                Duration::from_millis(config.settlement.request_timeout_ms),
            )?)
        }
        None => {
            warn!("No settlement base_url configured, using in-process mock");
            Arc::new(MockSettlementApi::new())
        }
    };

    let retry_policy = RetryPolicy::from_config(&config.retry);

    let worker = RetryWorker::new(
        pool.clone(),
        settlement.clone(),
        audit.clone(),
        retry_policy.clone(),
        WorkerConfig::from_config(&config.retry),
    );
    tokio::spawn(worker.run());

    let orchestrator = PayoutOrchestrator::new(pool, settlement, audit, retry_policy);
    let state = Arc::new(AppState {
        orchestrator,
        database,
    });

    gateway::serve(&config, state).await
}
