use std::sync::Arc;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::queue::EmbeddingQueue;
use crate::config::EmbeddingJobConfig;
use crate::users::store::UserStore;

const SWEEP_BATCH: i64 = 100;

/// Re-queues users left in `FAILED`, or stuck in `PROCESSING` longer than
/// `stale_after`, while they are under the attempt ceiling.
pub async fn sweep_once(
    store: &dyn UserStore,
    queue: &EmbeddingQueue,
    config: &EmbeddingJobConfig,
) -> anyhow::Result<usize> {
    let stale_before = OffsetDateTime::now_utc() - config.stale_after;
    let ids = store
        .find_stale_embeddings(stale_before, config.max_attempts, SWEEP_BATCH)
        .await?;
    for id in &ids {
        queue.schedule_embedding(*id);
    }
    Ok(ids.len())
}

/// `None` when the sweep interval is zero.
pub fn spawn_sweeper(
    store: Arc<dyn UserStore>,
    queue: EmbeddingQueue,
    config: EmbeddingJobConfig,
) -> Option<JoinHandle<()>> {
    if config.sweep_interval.is_zero() {
        info!("embedding sweeper disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        // the first tick fires immediately; skip it so startup is quiet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweep_once(store.as_ref(), &queue, &config).await {
                Ok(0) => {}
                Ok(n) => info!(requeued = n, "embedding sweep re-queued users"),
                Err(e) => error!(error = %e, "embedding sweep failed"),
            }
        }
    }))
}
