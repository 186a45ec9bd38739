use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Restart behavior of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePriority {
    /// Listeners: restart quickly, forever
    Critical,
    /// Restart with a growing pause, at most 10 times
    Important,
}

impl ServicePriority {
    fn max_retries(self) -> u32 {
        match self {
            Self::Critical => u32::MAX,
            Self::Important => 10,
        }
    }

    fn backoff(self, retry: u32) -> Duration {
        match self {
            Self::Critical => Duration::from_millis(100 * retry.min(50) as u64),
            Self::Important => Duration::from_secs(retry as u64),
        }
    }
}

/// Run `factory()` in its own task and start it again whenever it returns
/// an error or panics. A clean `Ok(())` ends supervision.
pub fn spawn_supervised<F, Fut>(
    name: String,
    priority: ServicePriority,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let factory = Arc::new(factory);
    tokio::spawn(async move {
        let max_retries = priority.max_retries();
        let mut retries: u32 = 0;
        let mut last_restart = Instant::now();

        loop {
            info!("[supervisor] Starting service: {name}");

            let f = Arc::clone(&factory);
            let result = tokio::spawn(async move { f().await }).await;

            match result {
                Ok(Ok(())) => {
                    info!("[supervisor] {name} exited cleanly");
                    break;
                }
                Ok(Err(e)) => error!("[supervisor] {name} failed: {e:#}"),
                Err(join_error) => error!("[supervisor] {name} task panicked: {join_error}"),
            }

            // A service that stayed up for a minute starts over
            if last_restart.elapsed() > Duration::from_secs(60) {
                retries = 0;
            }
            retries = retries.saturating_add(1);

            if retries > max_retries {
                error!("[supervisor] {name} exceeded max retries ({max_retries}), giving up");
                break;
            }

            let backoff = priority.backoff(retries);
            warn!("[supervisor] {name} restarting in {backoff:?} (attempt {retries})");
            tokio::time::sleep(backoff).await;
            last_restart = Instant::now();
        }
    })
}
