use serde_json::Value;

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::JobStatus;

/// Client for the job status and result endpoints
///
/// Used as the polling fallback while the real-time connection is down. See
/// [`PollingFallback`](crate::fallback::PollingFallback).
#[derive(Debug, Clone)]
pub struct JobsClient {
    http_client: HttpClient,
}

impl JobsClient {
    /// Create a new JobsClient
    ///
    /// # Arguments
    /// * `host` - The base URL for the API (e.g., "http://localhost:8000/api")
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http_client: HttpClient::new(host),
        }
    }

    pub fn host(&self) -> &str {
        self.http_client.base_url()
    }

    /// Get the current status of a job
    ///
    /// # Arguments
    /// * `job_id` - The job to query
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus> {
        let path = format!("/jobs/{}", Self::checked_id(job_id)?);
        self.http_client.get(&path).await
    }

    /// Get the results of a finished job
    ///
    /// The result document is returned as-is; its shape depends on the
    /// analysis that produced it.
    pub async fn get_job_results(&self, job_id: &str) -> Result<Value> {
        let path = format!("/jobs/{}/results", Self::checked_id(job_id)?);
        self.http_client.get(&path).await
    }

    fn checked_id(job_id: &str) -> Result<&str> {
        let job_id = job_id.trim();
        if job_id.is_empty() || job_id.contains('/') {
            return Err(Error::InvalidParameter(format!("invalid job id: {:?}", job_id)));
        }
        Ok(job_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::JobState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve one canned HTTP response per connection and report each request line
    pub(crate) async fn serve(
        status: &'static str,
        body: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let _ = tx.send(request.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}/api", addr), rx)
    }

    #[test]
    fn test_host_is_normalised() {
        let client = JobsClient::new("http://localhost:8000/api/");
        assert_eq!(client.host(), "http://localhost:8000/api");
    }

    #[tokio::test]
    async fn test_rejects_invalid_job_ids() {
        let client = JobsClient::new("http://127.0.0.1:9");
        assert!(matches!(
            client.get_job_status("  ").await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            client.get_job_results("a/b").await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_get_job_status() {
        let (host, mut requests) =
            serve("200 OK", r#"{"id":"j-7","status":"completed","progress":1.0}"#).await;
        let client = JobsClient::new(host);

        let status = client.get_job_status("j-7").await.unwrap();

        assert_eq!(status.id, "j-7");
        assert_eq!(status.status, JobState::Completed);
        assert!(status.is_terminal());
        assert_eq!(requests.recv().await.unwrap(), "GET /api/jobs/j-7 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let (host, _requests) = serve("404 Not Found", r#"{"detail":"no such job"}"#).await;
        let client = JobsClient::new(host);

        match client.get_job_results("missing").await {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, 404);
                assert!(message.contains("no such job"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
