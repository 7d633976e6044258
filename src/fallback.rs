//! HTTP polling fallback for when the real-time channel is down.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::JobsClient;
use crate::error::Result;
use crate::types::JobStatus;
use crate::websocket::{ConnectionManager, EventRouter};

/// Anything that can report whether the real-time channel is up
pub trait ConnectionProbe: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl ConnectionProbe for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }
}

impl ConnectionProbe for EventRouter {
    fn is_connected(&self) -> bool {
        EventRouter::is_connected(self)
    }
}

/// Polls job status over HTTP, but only while the real-time connection is down
pub struct PollingFallback<P: ConnectionProbe + ?Sized> {
    probe: Arc<P>,
    jobs: JobsClient,
    interval: Duration,
}

impl<P: ConnectionProbe + ?Sized> PollingFallback<P> {
    /// Default delay between polls
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(probe: Arc<P>, jobs: JobsClient) -> Self {
        Self {
            probe,
            jobs,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    /// Set the delay between polls.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether HTTP polling should run right now
    pub fn should_poll(&self) -> bool {
        !self.probe.is_connected()
    }

    /// Fetch the job status if the real-time channel is down
    ///
    /// Returns `Ok(None)` without touching the network while connected.
    pub async fn poll_once(&self, job_id: &str) -> Result<Option<JobStatus>> {
        if !self.should_poll() {
            debug!(job_id, "Real-time channel is up, skipping poll");
            return Ok(None);
        }
        self.jobs.get_job_status(job_id).await.map(Some)
    }

    /// Poll until a fetched status is terminal
    ///
    /// `on_status` sees every fetched status. Polls are skipped while the
    /// real-time channel is up, so a job that finishes while connected is
    /// only observed here if the connection drops later; drop the future to
    /// stop watching. Failed polls are logged and retried on the next tick.
    pub async fn watch<F>(&self, job_id: &str, mut on_status: F) -> JobStatus
    where
        F: FnMut(&JobStatus),
    {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.poll_once(job_id).await {
                Ok(Some(status)) => {
                    on_status(&status);
                    if status.is_terminal() {
                        return status;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(job_id, error = %e, "Job status poll failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::jobs::tests::serve;
    use crate::types::JobState;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeProbe(AtomicBool);

    impl ConnectionProbe for FakeProbe {
        fn is_connected(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_skips_polling_while_connected() {
        let probe = Arc::new(FakeProbe(AtomicBool::new(true)));
        // Nothing listens here; a request would fail
        let fallback = PollingFallback::new(probe, JobsClient::new("http://127.0.0.1:9"));

        assert!(!fallback.should_poll());
        assert!(fallback.poll_once("j-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_polls_while_disconnected() {
        let (host, mut requests) = serve("200 OK", r#"{"id":"j-1","status":"running"}"#).await;
        let probe = Arc::new(FakeProbe(AtomicBool::new(false)));
        let fallback = PollingFallback::new(probe, JobsClient::new(host));

        let status = fallback.poll_once("j-1").await.unwrap().unwrap();
        assert_eq!(status.status, JobState::Running);
        assert_eq!(requests.recv().await.unwrap(), "GET /api/jobs/j-1 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_watch_returns_terminal_status() {
        let (host, _requests) =
            serve("200 OK", r#"{"id":"j-2","status":"failed","error":"oom"}"#).await;
        let probe = Arc::new(FakeProbe(AtomicBool::new(false)));
        let fallback = PollingFallback::new(probe, JobsClient::new(host))
            .with_interval(Duration::from_millis(10));

        let mut seen = 0;
        let status = fallback.watch("j-2", |_| seen += 1).await;

        assert_eq!(seen, 1);
        assert_eq!(status.error.as_deref(), Some("oom"));
    }

    #[tokio::test]
    async fn test_manager_is_a_probe() {
        let manager = Arc::new(
            ConnectionManager::new(crate::config::ManagerConfig::default()).unwrap(),
        );
        let fallback = PollingFallback::new(manager, JobsClient::new("http://127.0.0.1:9"));
        assert!(fallback.should_poll());
    }
}
