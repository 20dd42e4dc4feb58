use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};

use crate::broadcast::Broadcaster;
use crate::errors::{CycleError, TransportError};
use crate::feed::CaptureSource;
use crate::ingest::pipeline::{IngestOutcome, Ingestor};
use crate::ingest::validation::validate_capture;

/// Delay before the next cycle so that cycle starts keep a steady cadence.
/// A cycle that overran its period is followed immediately, never by a burst.
pub fn next_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Runs `cycle` every `period` (start to start) until `shutdown` fires.
///
/// Shutdown is only observed between cycles; a cycle in flight always finishes.
pub async fn run_poll_loop<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        cycle().await;
        let delay = next_delay(period, started.elapsed());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Poll scheduler stopped");
}

/// One fetch -> validate -> merge -> notify pass.
pub struct PollCycle {
    source: Arc<dyn CaptureSource>,
    ingestor: Arc<Ingestor>,
    broadcaster: Broadcaster,
    fetch_timeout: Duration,
}

impl PollCycle {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        ingestor: Arc<Ingestor>,
        broadcaster: Broadcaster,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            ingestor,
            broadcaster,
            fetch_timeout,
        }
    }

    pub async fn run_once(&self) -> Result<IngestOutcome, CycleError> {
        let raw = tokio::time::timeout(self.fetch_timeout, self.source.fetch_capture())
            .await
            .map_err(|_| TransportError::Timeout {
                service: "birdnest API",
                millis: self.fetch_timeout.as_millis(),
            })??;

        let snapshot = validate_capture(raw)?;
        let outcome = self.ingestor.ingest(&snapshot).await?;

        if outcome.changed_store() {
            self.broadcaster.notify_all(&snapshot.timestamp).await?;
        }
        Ok(outcome)
    }

    /// `run_once` with every failure logged and swallowed.
    pub async fn run_logged(&self) {
        if let Err(e) = self.run_once().await {
            error!("Poll cycle failed: {e}");
        }
    }
}
