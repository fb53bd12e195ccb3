use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::{IngestionPipeline, SyncConfig};

/// One cron job that runs the pipeline; overlapping ticks are refused by the
/// pipeline's own run guard.
pub async fn build_scheduler(pipeline: Arc<IngestionPipeline>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            let result = pipeline.run_once().await;
            info!(
                run_id = %result.run_id,
                deals_stored = result.deals_stored,
                errors = result.errors.len(),
                "scheduled ingestion run finished"
            );
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    pipeline: Arc<IngestionPipeline>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(pipeline, &config.sync_cron).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealfeed_adapters::SenderDirectory;
    use dealfeed_storage::MemoryDealStore;

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let config = SyncConfig::from_lookup(|_| None);
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::new(MemoryDealStore::new()),
            SenderDirectory::builtin(),
        ));
        assert!(maybe_build_scheduler(&config, pipeline).await.unwrap().is_none());
    }
}
