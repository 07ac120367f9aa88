//! Health probes.
//!
//! [`HealthProbe`] is the observation seam the validator calls. The shipped
//! [`HttpReadinessProbe`] checks liveness with a TCP connect and readiness with
//! an HTTP `GET`, polling with exponential backoff via [`ReadinessTracker`].

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use cadence_core::BoxFuture;

/// Observes running services. Implementations never mutate anything.
pub trait HealthProbe: Send + Sync {
    /// Whether the service is running at all.
    fn liveness<'a>(&'a self, environment: &'a str, service: &'a str) -> BoxFuture<'a, bool>;

    /// Readiness signal, or `None` when the service exposes none.
    fn readiness<'a>(&'a self, environment: &'a str, service: &'a str)
    -> BoxFuture<'a, Option<bool>>;
}

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error, timeout).
    Failed,
}

/// Readiness as seen by a [`ReadinessTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Unknown,
    Ready,
    NotReady,
}

/// Tracks consecutive probe results while polling a service for readiness.
#[derive(Debug)]
pub struct ReadinessTracker {
    state: ReadinessState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Failures before the service is declared not ready.
    failure_threshold: u32,
    /// Successes before the service is declared ready.
    success_threshold: u32,
    current_backoff: Duration,
    base_interval: Duration,
    max_backoff: Duration,
}

impl ReadinessTracker {
    pub fn new(failure_threshold: u32, success_threshold: u32, interval: Duration) -> Self {
        Self {
            state: ReadinessState::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            current_backoff: interval,
            base_interval: interval,
            max_backoff: Duration::from_secs(60),
        }
    }

    /// Record a probe result and return the new state.
    pub fn record(&mut self, result: ProbeResult) -> ReadinessState {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                self.current_backoff = self.base_interval;
                if self.consecutive_successes >= self.success_threshold {
                    self.state = ReadinessState::Ready;
                }
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                // Exponential backoff: double the interval up to max.
                self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = ReadinessState::NotReady;
                }
            }
        }
        self.state
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Whether polling can stop.
    pub fn is_settled(&self) -> bool {
        self.state != ReadinessState::Unknown
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next probe.
    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }
}

/// Address and path of a service's readiness endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port`
    pub address: String,
    /// Request path, starting with `/`.
    pub path: String,
}

impl Endpoint {
    /// Parse `host:port/path` (path defaults to `/`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_start_matches("http://");
        let (address, path) = match raw.find('/') {
            Some(idx) => (&raw[..idx], &raw[idx..]),
            None => (raw, "/"),
        };
        if address.is_empty() || !address.contains(':') {
            return None;
        }
        Some(Self {
            address: address.to_string(),
            path: path.to_string(),
        })
    }
}

/// Probe backed by per-service HTTP endpoints.
///
/// Services without a registered endpoint are assumed live and report no
/// readiness signal.
pub struct HttpReadinessProbe {
    endpoints: HashMap<String, Endpoint>,
    timeout: Duration,
    failure_threshold: u32,
    interval: Duration,
}

impl HttpReadinessProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            endpoints: HashMap::new(),
            timeout,
            failure_threshold: 3,
            interval: Duration::from_millis(500),
        }
    }

    /// Register the readiness endpoint for a service.
    pub fn with_endpoint(mut self, service: &str, endpoint: Endpoint) -> Self {
        self.endpoints.insert(service.to_string(), endpoint);
        self
    }

    /// Configure readiness polling.
    pub fn with_polling(mut self, failure_threshold: u32, interval: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.interval = interval;
        self
    }

    async fn poll_ready(&self, service: &str, endpoint: &Endpoint) -> bool {
        let mut tracker = ReadinessTracker::new(self.failure_threshold, 1, self.interval);
        loop {
            let result = endpoint.check(self.timeout).await;
            if tracker.record(result) == ReadinessState::Ready {
                return true;
            }
            if tracker.is_settled() {
                warn!(
                    %service,
                    failures = tracker.consecutive_failures(),
                    "service did not become ready"
                );
                return false;
            }
            tokio::time::sleep(tracker.next_interval()).await;
        }
    }
}

impl HealthProbe for HttpReadinessProbe {
    fn liveness<'a>(&'a self, _environment: &'a str, service: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(endpoint) = self.endpoints.get(service) else {
                return true;
            };
            match tokio::time::timeout(
                self.timeout,
                tokio::net::TcpStream::connect(endpoint.address.as_str()),
            )
            .await
            {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    debug!(%service, error = %e, "liveness connect failed");
                    false
                }
                Err(_) => {
                    debug!(%service, "liveness connect timed out");
                    false
                }
            }
        })
    }

    fn readiness<'a>(
        &'a self,
        _environment: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, Option<bool>> {
        Box::pin(async move {
            let endpoint = self.endpoints.get(service)?;
            Some(self.poll_ready(service, endpoint).await)
        })
    }
}

/// Map the status of a readiness response to a probe result.
///
/// Only 2xx means ready. Anything else (including redirects, which are not
/// followed) means the service answered but is not ready yet.
pub fn readiness_from_status(status: http::StatusCode) -> ProbeResult {
    if status.is_success() {
        ProbeResult::Healthy
    } else {
        ProbeResult::Unhealthy
    }
}

impl Endpoint {
    pub fn uri(&self) -> String {
        format!("http://{}{}", self.address, self.path)
    }

    /// Issue one readiness `GET`, bounded by `timeout`.
    ///
    /// A transport error or timeout is `Failed`; a response is classified
    /// by [`readiness_from_status`].
    pub async fn check(&self, timeout: Duration) -> ProbeResult {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(Ok(status)) => {
                let result = readiness_from_status(status);
                if result != ProbeResult::Healthy {
                    debug!(uri = %self.uri(), %status, "endpoint not ready");
                }
                result
            }
            Ok(Err(reason)) => {
                debug!(uri = %self.uri(), %reason, "readiness request failed");
                ProbeResult::Failed
            }
            Err(_) => {
                debug!(uri = %self.uri(), ?timeout, "readiness request timed out");
                ProbeResult::Failed
            }
        }
    }

    async fn get(&self) -> Result<http::StatusCode, String> {
        let stream = tokio::net::TcpStream::connect(self.address.as_str())
            .await
            .map_err(|e| format!("connect: {e}"))?;
        let (mut sender, conn) =
            hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream))
                .await
                .map_err(|e| format!("handshake: {e}"))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = http::Request::get(self.uri())
            .header(http::header::HOST, self.address.as_str())
            .header(http::header::USER_AGENT, "cadence-readiness/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| format!("request: {e}"))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| format!("send: {e}"))?;
        Ok(response.status())
    }
}
