//! Bounded readiness polling.

use super::ProbePolicy;
use crate::events::{NoOpEventSink, RunEventSink, PROBE_ATTEMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of a single probe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeAttempt {
    /// The service answered. Any status counts as up.
    Responded {
        /// HTTP status code.
        status: u16,
    },
    /// Connection refused; nothing listening yet.
    Refused,
    /// The request timed out.
    TimedOut,
    /// Any other transport error.
    Failed {
        /// Error description.
        message: String,
    },
}

impl ProbeAttempt {
    /// Returns true if the service produced a response.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Responded { .. })
    }
}

impl fmt::Display for ProbeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Responded { status } => write!(f, "responded {status}"),
            Self::Refused => write!(f, "connection refused"),
            Self::TimedOut => write!(f, "request timed out"),
            Self::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

/// Performs one probe request against a URL.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Sends one request, giving up after `timeout`.
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeAttempt;
}

/// [`Prober`] issuing HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProber {
    /// Creates a prober that bypasses any configured proxy.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeAttempt {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => ProbeAttempt::Responded {
                status: response.status().as_u16(),
            },
            Err(e) if e.is_timeout() => ProbeAttempt::TimedOut,
            Err(e) if e.is_connect() => ProbeAttempt::Refused,
            Err(e) => ProbeAttempt::Failed {
                message: e.to_string(),
            },
        }
    }
}

/// Outcome of waiting for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The service answered.
    Ready {
        /// Attempts made, including the successful one.
        attempts: u32,
        /// Time from the start of waiting.
        elapsed: Duration,
        /// Status of the successful response.
        status: u16,
    },
    /// Attempts ran out (or the service died) without a response.
    Timeout {
        /// Attempts made.
        attempts: u32,
        /// Time from the start of waiting.
        elapsed: Duration,
        /// Last probe result, if any attempt was made.
        last: Option<ProbeAttempt>,
        /// The service process exited while being probed.
        service_exited: bool,
    },
}

impl Readiness {
    /// Returns true if the service answered.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts, .. } | Self::Timeout { attempts, .. } => *attempts,
        }
    }
}

/// Polls a URL until it answers or the policy's attempts run out.
#[derive(Clone)]
pub struct ReadinessProbe {
    prober: Arc<dyn Prober>,
    events: Arc<dyn RunEventSink>,
}

impl fmt::Debug for ReadinessProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessProbe").finish_non_exhaustive()
    }
}

impl ReadinessProbe {
    /// Creates a probe over `prober`.
    #[must_use]
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink receiving `probe.attempt` events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn RunEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Waits for `url` to answer. Never errors; exhaustion is
    /// [`Readiness::Timeout`].
    pub async fn wait_ready(&self, url: &str, policy: &ProbePolicy) -> Readiness {
        self.wait_ready_while(url, policy, || true).await
    }

    /// Like [`wait_ready`](Self::wait_ready), but stops early once
    /// `service_alive` reports the service has exited.
    pub async fn wait_ready_while<F>(
        &self,
        url: &str,
        policy: &ProbePolicy,
        service_alive: F,
    ) -> Readiness
    where
        F: Fn() -> bool + Send + Sync,
    {
        let started = Instant::now();
        let request_timeout = policy.request_timeout();
        let mut last = None;

        if !policy.initial_delay().is_zero() {
            debug!(url, delay_ms = policy.initial_delay_ms, "Waiting before first probe");
            tokio::time::sleep(policy.initial_delay()).await;
        }

        for attempt in 1..=policy.max_attempts {
            if !service_alive() {
                warn!(url, attempt, "Service exited before becoming ready");
                return Readiness::Timeout {
                    attempts: attempt - 1,
                    elapsed: started.elapsed(),
                    last,
                    service_exited: true,
                };
            }

            // The prober gets the timeout too; this bounds misbehaving probers.
            let result = tokio::time::timeout(request_timeout, self.prober.probe(url, request_timeout))
                .await
                .unwrap_or(ProbeAttempt::TimedOut);

            debug!(url, attempt, result = %result, "Probe attempt");
            self.events.try_emit(
                PROBE_ATTEMPT,
                Some(serde_json::json!({
                    "url": url,
                    "attempt": attempt,
                    "max_attempts": policy.max_attempts,
                    "result": &result,
                })),
            );

            if let ProbeAttempt::Responded { status } = result {
                info!(url, attempt, status, "Service ready");
                return Readiness::Ready {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    status,
                };
            }
            last = Some(result);

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay_after(attempt)).await;
            }
        }

        warn!(url, attempts = policy.max_attempts, "Service not ready, giving up");
        Readiness::Timeout {
            attempts: policy.max_attempts,
            elapsed: started.elapsed(),
            last,
            service_exited: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::ScriptedProber;
    use std::sync::atomic::{AtomicBool, Ordering};

    const URL: &str = "http://127.0.0.1:8081/hello";

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_second_attempt() {
        let prober = Arc::new(ScriptedProber::new([
            ProbeAttempt::Refused,
            ProbeAttempt::Responded { status: 200 },
        ]));
        let events = Arc::new(CollectingEventSink::new());
        let probe = ReadinessProbe::new(prober.clone()).with_events(events.clone());
        let policy = ProbePolicy::fixed(Duration::from_secs(1), 3);

        let readiness = probe.wait_ready(URL, &policy).await;

        assert!(readiness.is_ready());
        assert_eq!(readiness.attempts(), 2);
        assert_eq!(prober.calls(), 2);
        assert_eq!(events.events_of_type("probe.").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_never_reachable() {
        let prober = Arc::new(ScriptedProber::always(ProbeAttempt::Refused));
        let probe = ReadinessProbe::new(prober.clone());
        let policy = ProbePolicy::fixed(Duration::from_secs(2), 4)
            .with_initial_delay(Duration::from_secs(5));

        let readiness = probe.wait_ready(URL, &policy).await;

        match readiness {
            Readiness::Timeout {
                attempts,
                elapsed,
                last,
                service_exited,
            } => {
                assert_eq!(attempts, 4);
                // 5s initial delay + 3 sleeps of 2s
                assert_eq!(elapsed, Duration::from_secs(11));
                assert_eq!(last, Some(ProbeAttempt::Refused));
                assert!(!service_exited);
            }
            Readiness::Ready { .. } => panic!("expected timeout"),
        }
        assert_eq!(prober.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_status_counts_as_ready() {
        let prober = Arc::new(ScriptedProber::new([ProbeAttempt::Responded { status: 404 }]));
        let probe = ReadinessProbe::new(prober);

        let readiness = probe
            .wait_ready(URL, &ProbePolicy::fixed(Duration::from_millis(10), 1))
            .await;
        assert_eq!(
            readiness,
            Readiness::Ready {
                attempts: 1,
                elapsed: Duration::ZERO,
                status: 404
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_service_exits() {
        let prober = Arc::new(ScriptedProber::always(ProbeAttempt::Refused));
        let probe = ReadinessProbe::new(prober.clone());
        let alive = AtomicBool::new(true);
        let policy = ProbePolicy::fixed(Duration::from_secs(1), 10);

        let readiness = probe
            .wait_ready_while(URL, &policy, || {
                let still = alive.load(Ordering::SeqCst);
                alive.store(false, Ordering::SeqCst);
                still
            })
            .await;

        assert!(matches!(
            readiness,
            Readiness::Timeout {
                attempts: 1,
                service_exited: true,
                ..
            }
        ));
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_timing() {
        let prober = Arc::new(ScriptedProber::always(ProbeAttempt::TimedOut));
        let probe = ReadinessProbe::new(prober);
        let policy = ProbePolicy::fixed(Duration::from_secs(1), 4)
            .with_exponential_backoff(Duration::from_secs(60));

        let readiness = probe.wait_ready(URL, &policy).await;
        // 1 + 2 + 4 seconds of sleeps
        assert!(matches!(
            readiness,
            Readiness::Timeout { elapsed, .. } if elapsed == Duration::from_secs(7)
        ));
    }

    #[tokio::test]
    async fn test_http_prober_refused_on_closed_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let attempt = HttpProber::new()
            .probe(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(2))
            .await;
        assert!(!attempt.is_response());
    }
}
