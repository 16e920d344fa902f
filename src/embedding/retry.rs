use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ServiceResult;

/// Bounded exponential backoff for provider calls. Only transient upstream
/// errors are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub tries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(tries: u32, base_delay: Duration) -> Self {
        Self {
            tries: tries.max(1),
            base_delay,
        }
    }

    /// Delay before try number `try_no + 1`.
    fn delay_after(&self, try_no: u32) -> Duration {
        let factor = 1u32 << (try_no.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let mut try_no = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && try_no < self.tries => {
                    let delay = self.delay_after(try_no);
                    warn!(error = %e, try_no, ?delay, "transient provider error, retrying");
                    tokio::time::sleep(delay).await;
                    try_no += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
