//! TCP connect probe implementation.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::Instant;
use tokio::net::TcpStream;

use super::{ProbeError, ProbeFailure, ProbeOutcome, Prober};

/// Probes an endpoint by opening a TCP connection and closing it straight away.
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
    max_jitter: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_jitter: Duration::ZERO,
        }
    }

    /// Sleep a random amount up to `max_jitter` before each attempt.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &str, port: u16) -> Result<ProbeOutcome, ProbeError> {
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ProbeError::InvalidTarget(format!("bad host {:?}", host)));
        }
        if port == 0 {
            return Err(ProbeError::InvalidTarget(format!("{}: port 0", host)));
        }

        // Jitter happens before the clock starts so it never counts as latency.
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        if max_jitter_ms > 0 {
            let jitter = rand::random::<u64>() % (max_jitter_ms + 1);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        Ok(run_tcp_probe(host, port, self.timeout).await)
    }
}

/// Run a TCP connect probe against `host:port`.
///
/// The elapsed time covers name resolution (if `host` is a name) and the
/// handshake. The connection is dropped as soon as it is established.
pub async fn run_tcp_probe(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    let outcome = settle(TcpStream::connect((host, port)), timeout).await;
    match &outcome {
        ProbeOutcome::Connected(elapsed) => tracing::debug!("Probe {}:{} connected in {:?}", host, port, elapsed),
        ProbeOutcome::Failed(reason) => tracing::debug!("Probe {}:{} failed: {}", host, port, reason),
    }
    outcome
}

/// Time a connection attempt, giving up after `timeout`.
async fn settle<F, S>(connect: F, timeout: Duration) -> ProbeOutcome
where
    F: Future<Output = io::Result<S>>,
{
    let start = Instant::now();

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            let elapsed = start.elapsed();
            drop(stream);
            ProbeOutcome::Connected(elapsed)
        }
        Ok(Err(e)) => ProbeOutcome::Failed(classify(e)),
        Err(_) => ProbeOutcome::Failed(ProbeFailure::TimedOut),
    }
}

fn classify(err: io::Error) -> ProbeFailure {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ProbeFailure::Refused,
        io::ErrorKind::TimedOut => ProbeFailure::TimedOut,
        _ => ProbeFailure::Network(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(outcome.is_success());
        assert!(outcome.latency_ms() >= 0.0);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.latency_ms(), -1.0);
    }

    #[tokio::test]
    async fn test_tcp_probe_unresolvable_name() {
        let outcome = run_tcp_probe("no-such-host.invalid", 80, Duration::from_secs(3)).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.latency_ms(), -1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_times_out() {
        let start = Instant::now();
        let outcome = settle(std::future::pending::<io::Result<()>>(), Duration::from_secs(3)).await;

        assert_eq!(outcome, ProbeOutcome::Failed(ProbeFailure::TimedOut));
        assert_eq!(outcome.latency_ms(), -1.0);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_latency_is_measured() {
        let connect = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<_, io::Error>(())
        };
        let outcome = settle(connect, Duration::from_secs(3)).await;
        assert!(outcome.is_success());
        assert!(outcome.latency_ms() >= 40.0);
        assert!(outcome.latency_ms() < 50.0);
    }

    #[tokio::test]
    async fn test_connect_errors_are_classified() {
        let refused = settle(
            async { Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused)) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(refused, ProbeOutcome::Failed(ProbeFailure::Refused));

        let other = settle(
            async { Err::<(), _>(io::Error::new(io::ErrorKind::Other, "no route to host")) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(other, ProbeOutcome::Failed(ProbeFailure::Network(_))));
    }

    #[tokio::test]
    async fn test_prober_rejects_malformed_target() {
        let prober = TcpProber::new(Duration::from_secs(1));
        tokio_test::assert_err!(prober.probe("", 80).await);
        tokio_test::assert_err!(prober.probe("127.0.0.1", 0).await);
    }

    #[tokio::test]
    async fn test_prober_with_jitter_still_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::new(Duration::from_secs(2)).with_jitter(Duration::from_millis(20));
        let outcome = tokio_test::assert_ok!(prober.probe("127.0.0.1", port).await);
        assert!(outcome.is_success());
    }
}
