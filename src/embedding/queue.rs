use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::runner::{EmbedOutcome, EmbeddingRunner};

/// Producer side of the background embedding pipeline.
///
/// `schedule_embedding` only pushes the id onto a channel; a worker task
/// picks it up and runs the job with at most `workers` jobs in flight.
/// Callers get no handle on the job: the user's `embedding.status` is the
/// only visible result.
#[derive(Clone)]
pub struct EmbeddingQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl EmbeddingQueue {
    /// Spawns the worker. It stops once every queue handle is dropped and
    /// the channel is drained.
    pub fn start(runner: Arc<EmbeddingRunner>, workers: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(rx, runner, workers.max(1)));
        (Self { tx }, handle)
    }

    pub fn schedule_embedding(&self, user_id: Uuid) {
        match self.tx.send(user_id) {
            Ok(()) => debug!(%user_id, "embedding job queued"),
            Err(_) => error!(%user_id, "embedding worker stopped; job dropped"),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Uuid>,
    runner: Arc<EmbeddingRunner>,
    workers: usize,
) {
    let permits = Arc::new(Semaphore::new(workers));
    info!(workers, "embedding worker started");

    while let Some(user_id) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let runner = runner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let job = tokio::spawn(async move { runner.embed_user(user_id).await });
            match job.await {
                Ok(Ok(EmbedOutcome::Ready { dims })) => debug!(%user_id, dims, "embedding job done"),
                Ok(Ok(EmbedOutcome::Failed { error })) => {
                    debug!(%user_id, %error, "embedding job finished as failed")
                }
                Ok(Err(e)) => error!(%user_id, error = %e, "async user embedding failed"),
                Err(e) => error!(%user_id, error = %e, "async user embedding panicked"),
            }
        });
    }

    // let running jobs finish before reporting shutdown
    let _ = permits.acquire_many(workers as u32).await;
    info!("embedding worker stopped");
}
