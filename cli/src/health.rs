use std::time::Duration;

use ninebox_client::loopback_http_client;
use ninebox_protocol::ConnectionConfig;
use ninebox_protocol::HEALTH_PATH;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{url} did not answer within {}ms", .timeout.as_millis())]
    Timeout { url: String, timeout: Duration },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
}

/// One-shot liveness check against the worker's health endpoint.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    http: reqwest::Client,
    timeout: Duration,
}

impl LivenessProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            http: loopback_http_client()?,
            timeout,
        })
    }

    pub async fn check(&self, connection: &ConnectionConfig) -> Result<(), ProbeError> {
        let url = connection.url(HEALTH_PATH);
        let response = tokio::time::timeout(self.timeout, self.http.get(&url).send())
            .await
            .map_err(|_| ProbeError::Timeout {
                url: url.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| ProbeError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status { url, status })
        }
    }
}
