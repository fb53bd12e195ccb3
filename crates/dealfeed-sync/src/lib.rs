//! Ingestion pipeline: mailbox → sender gate → extraction → validation →
//! dedup → persistence → ledger, plus hotel cache refresh and the expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dealfeed_storage::{DealStore, MemoryDealStore, PgDealStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub mod config;
pub mod dedup;
pub mod manager;
pub mod pipeline;
pub mod reports;
pub mod scheduler;

pub use config::SyncConfig;
pub use dedup::dedup_across_strategies;
pub use manager::{cache_deal_id, DealManager};
pub use pipeline::IngestionPipeline;
pub use reports::{recent_runs_markdown, write_run_report, RUN_RESULT_FILE};
pub use scheduler::{build_scheduler, maybe_build_scheduler};

pub const CRATE_NAME: &str = "dealfeed-sync";

/// Per-item failure classes; each becomes one entry of `RunResult::errors`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream {source_name} failed: {message}")]
    Upstream { source_name: String, message: String },
    #[error("extraction failed for {message_id}: {message}")]
    Extraction { message_id: String, message: String },
    #[error("candidate from {message_id} rejected: {}", .reasons.join(", "))]
    Validation {
        message_id: String,
        reasons: Vec<String>,
    },
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("run budget of {}s exhausted; remaining work skipped", .0.as_secs())]
    BudgetExhausted(Duration),
    #[error("run already in progress")]
    RunInProgress,
}

/// Outcome of one ingestion run. Returned even when every step failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub emails_processed: usize,
    pub emails_skipped: usize,
    pub deals_found: usize,
    pub deals_stored: usize,
    pub hotels_cached: usize,
    pub deals_deactivated: u64,
    pub errors: Vec<String>,
}

impl RunResult {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            emails_processed: 0,
            emails_skipped: 0,
            deals_found: 0,
            deals_stored: 0,
            hotels_cached: 0,
            deals_deactivated: 0,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, err: PipelineError) {
        warn!(run_id = %self.run_id, error = %err, "ingestion step failed");
        self.errors.push(err.to_string());
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise a process-local store.
pub async fn connect_store(config: &SyncConfig) -> Result<Arc<dyn DealStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgDealStore::connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            info!("using postgres deal store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; deals are kept in memory and lost on exit");
            Ok(Arc::new(MemoryDealStore::new()))
        }
    }
}

pub async fn run_sync_once_from_env() -> Result<RunResult> {
    let config = SyncConfig::from_env();
    let store = connect_store(&config).await?;
    let pipeline = IngestionPipeline::from_config(&config, store)?;
    Ok(pipeline.run_once().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_result_serializes_camel_case() {
        let mut result = RunResult::new(Utc::now());
        result.record(PipelineError::Validation {
            message_id: "m-1".into(),
            reasons: vec!["Invalid price".into(), "Missing destination".into()],
        });
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("emailsProcessed").is_some());
        assert!(json.get("hotelsCached").is_some());
        assert_eq!(
            json["errors"][0],
            "candidate from m-1 rejected: Invalid price, Missing destination"
        );
    }

    #[test]
    fn budget_error_names_the_budget() {
        let err = PipelineError::BudgetExhausted(Duration::from_secs(240));
        assert_eq!(
            err.to_string(),
            "run budget of 240s exhausted; remaining work skipped"
        );
    }
}
