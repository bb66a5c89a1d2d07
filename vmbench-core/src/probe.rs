// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! HTTP readiness probing.
//!
//! A workload is ready once `GET /` answers with any 2xx status. Individual
//! attempt failures (refused connections, timeouts, non-2xx) never abort the
//! loop; only exhausting the attempt budget does.

use std::time::Duration;

/// Result of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ready: bool,
    /// Attempts actually made, including the successful one.
    pub attempts: u32,
}

/// Polls a reachability endpoint.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HealthProber {
    /// Create a prober whose single attempts time out after `request_timeout`.
    /// The timeout is also set on every request, so it holds for the
    /// fallback client too.
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for probing");
                reqwest::Client::new()
            });
        Self {
            client,
            request_timeout,
        }
    }

    /// One GET attempt; true on a 2xx response.
    pub async fn probe_once(&self, url: &str) -> bool {
        let request = self.client.get(url).timeout(self.request_timeout);
        match request.send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    tracing::trace!(url = %url, status = %response.status(), "Probe not ready");
                }
                ok
            }
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "Probe attempt failed");
                false
            }
        }
    }

    /// Probe until ready or until `max_attempts` attempts were made,
    /// sleeping `interval` between failed attempts.
    pub async fn wait_ready(&self, url: &str, max_attempts: u32, interval: Duration) -> ProbeOutcome {
        for attempt in 1..=max_attempts {
            if self.probe_once(url).await {
                tracing::debug!(url = %url, attempt = attempt, "Endpoint ready");
                return ProbeOutcome {
                    ready: true,
                    attempts: attempt,
                };
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::warn!(url = %url, attempts = max_attempts, "Endpoint did not become ready");
        ProbeOutcome {
            ready: false,
            attempts: max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::flaky_http_server;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_refused_connection_is_not_ready() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = HealthProber::new(Duration::from_millis(200));
        let url = format!("http://127.0.0.1:{}/", port);

        assert!(!prober.probe_once(&url).await);

        let outcome = prober.wait_ready(&url, 1, Duration::from_millis(10)).await;
        assert_eq!(
            outcome,
            ProbeOutcome {
                ready: false,
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let prober = HealthProber::new(Duration::from_millis(100));
        let started = std::time::Instant::now();

        assert!(!prober.probe_once(&format!("http://127.0.0.1:{}/", port)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_ready_on_third_attempt() {
        let (port, hits) = flaky_http_server(2).await;
        let prober = HealthProber::new(Duration::from_millis(500));
        let url = format!("http://127.0.0.1:{}/", port);

        let outcome = prober.wait_ready(&url, 10, Duration::from_millis(20)).await;

        assert!(outcome.ready);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_ready_exhausts_budget() {
        let (port, hits) = flaky_http_server(usize::MAX).await;
        let prober = HealthProber::new(Duration::from_millis(500));
        let url = format!("http://127.0.0.1:{}/", port);

        let outcome = prober.wait_ready(&url, 4, Duration::from_millis(10)).await;

        assert!(!outcome.ready);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
