// Small ops utility: print the queue forecast of a scheduler database as JSON.
//
// Usage:
//   cargo run --bin queue_forecast -- [db_path] [--json-log]
//
// Read-only apart from idempotent schema init; no trigger is fired.

use anyhow::Context;
use stage_scheduler::config::ConfigManager;
use stage_scheduler::db::{init_schema, open_sqlite_connection};
use stage_scheduler::engine::{SchedulerOrchestrator, SchedulerRepositories};
use stage_scheduler::logging;
use std::sync::{Arc, Mutex};

fn main() -> anyhow::Result<()> {
    let mut db_path = "stage_scheduler.db".to_string();
    let mut json_log = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json-log" => json_log = true,
            other => db_path = other.to_string(),
        }
    }

    if json_log {
        logging::init_json();
    } else {
        logging::init();
    }

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("failed to open database {}", db_path))?;
    init_schema(&conn).context("failed to initialize schema")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())?
        .load_scheduler_config()
        .context("failed to load scheduler config")?;
    tracing::info!(db_path = %db_path, "生成队列预测");

    let orchestrator =
        SchedulerOrchestrator::new(SchedulerRepositories::from_connection(conn), config);
    let forecast = orchestrator.queue_forecast()?;

    println!("{}", serde_json::to_string_pretty(&forecast)?);
    Ok(())
}
