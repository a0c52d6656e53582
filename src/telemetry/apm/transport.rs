//! Delivery of APM envelopes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime};
use url::Url;

use super::envelope::Envelope;

/// Default connection timeout in seconds
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Ingestion path appended to the configured endpoint
const TRACK_PATH: &str = "v2/track";
/// Poll interval while waiting for in-flight sends
const FLUSH_POLL_MS: u64 = 10;

/// Errors that can occur while building a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid APM endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to start APM runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Hands envelopes to the remote backend.
///
/// `submit` must not block indefinitely and must not fail from the caller's
/// point of view; delivery errors stay inside the transport.
pub trait ApmTransport: Send + Sync {
    fn submit(&self, envelope: Envelope);

    /// Block until submitted envelopes have been delivered or `timeout`
    /// elapses. Returns `false` on timeout.
    fn flush(&self, timeout: Duration) -> bool {
        let _ = timeout;
        true
    }
}

enum Executor {
    /// Runtime the transport was built inside of.
    Ambient(Handle),
    /// Runtime owned by the transport when built outside of one.
    Owned(Option<Runtime>),
}

impl Executor {
    fn current() -> Result<Self, TransportError> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Executor::Ambient(handle));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("telemux-apm")
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;
        Ok(Executor::Owned(Some(runtime)))
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Executor::Ambient(handle) => {
                handle.spawn(fut);
            }
            Executor::Owned(Some(runtime)) => {
                runtime.spawn(fut);
            }
            Executor::Owned(None) => {}
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Executor::Owned(runtime) = self {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// Decrements the in-flight count when a send finishes or is dropped.
///
/// A send dropped before [`finish`](Self::finish) never ran to completion,
/// which happens when the runtime it was spawned on has shut down.
struct InFlight {
    counter: Arc<AtomicUsize>,
    finished: bool,
}

impl InFlight {
    fn start(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("APM send dropped before completion, runtime shut down");
        }
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Posts envelopes to an Application Insights compatible ingestion endpoint.
pub struct HttpTransport {
    url: Url,
    http_client: Client,
    executor: Executor,
    failed: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl HttpTransport {
    /// Create a transport for `endpoint` (for example
    /// `https://dc.services.visualstudio.com`).
    ///
    /// Sends run on the current tokio runtime when there is one, otherwise on
    /// a single-worker runtime owned by the transport. A transport built inside
    /// a runtime is tied to it: once that runtime shuts down, sends are dropped
    /// and reported at debug level.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let url = track_url(endpoint)?;

        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            url,
            http_client,
            executor: Executor::current()?,
            failed: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Full URL envelopes are posted to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ApmTransport for HttpTransport {
    fn submit(&self, envelope: Envelope) {
        let request = self.http_client.post(self.url.clone()).json(&[envelope]);
        let failed = Arc::clone(&self.failed);
        let in_flight = InFlight::start(&self.in_flight);

        self.executor.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    report_failure(&failed, &format!("ingestion returned {status}: {body}"));
                }
                Err(e) => report_failure(&failed, &e.to_string()),
            }
            in_flight.finish();
        });
    }

    /// Waits by polling, blocking the calling thread. On a current-thread
    /// runtime that also drives the sends, nothing progresses while this
    /// blocks, so it can only time out.
    fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(FLUSH_POLL_MS));
        }
        true
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

fn track_url(endpoint: &str) -> Result<Url, TransportError> {
    let mut base =
        Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
        return Err(TransportError::InvalidEndpoint(format!(
            "{endpoint}: expected an http(s) URL"
        )));
    }

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(TRACK_PATH)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))
}

/// Report the first delivery failure as a warning and later ones at debug
/// level.
fn report_failure(failed: &AtomicBool, error: &str) {
    if !failed.swap(true, Ordering::Relaxed) {
        tracing::warn!(error = %error, "Failed to deliver APM telemetry");
    } else {
        tracing::debug!(error = %error, "Failed to deliver APM telemetry");
    }
}

/// Keeps submitted envelopes in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    envelopes: Mutex<Vec<Envelope>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything submitted so far.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ApmTransport for MemoryTransport {
    fn submit(&self, envelope: Envelope) {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::apm::envelope::{Data, MessageData, DATA_VERSION};

    #[test]
    fn test_track_url() {
        let url = track_url("https://dc.services.visualstudio.com").unwrap();
        assert_eq!(url.as_str(), "https://dc.services.visualstudio.com/v2/track");

        let url = track_url("http://localhost:8080/ingest").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/ingest/v2/track");

        let url = track_url("http://localhost:8080/ingest/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/ingest/v2/track");
    }

    #[test]
    fn test_track_url_rejects_invalid() {
        assert!(matches!(
            track_url("not a url"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            track_url("ftp://example.com"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_transport_outside_runtime_owns_one() {
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(transport.executor, Executor::Owned(Some(_))));
    }

    #[test]
    fn test_flush_with_nothing_in_flight() {
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        assert!(transport.flush(Duration::from_millis(50)));
    }

    #[test]
    fn test_send_after_runtime_shutdown_is_dropped() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let transport = runtime
            .block_on(async { HttpTransport::new("http://127.0.0.1:9") })
            .unwrap();
        drop(runtime);

        transport.submit(Envelope {
            name: "Microsoft.ApplicationInsights.0000.Message".into(),
            time: "2024-01-01T00:00:00.000000Z".into(),
            instrumentation_key: "0000".into(),
            tags: Default::default(),
            data: Data::MessageData(MessageData {
                ver: DATA_VERSION,
                message: "late".into(),
                severity_level: 1,
                properties: Default::default(),
            }),
        });

        assert!(transport.flush(Duration::from_secs(1)));
        assert_eq!(transport.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_in_flight_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let finished = InFlight::start(&counter);
        let dropped = InFlight::start(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        finished.finish();
        drop(dropped);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_inside_runtime_uses_it() {
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(transport.executor, Executor::Ambient(_)));
    }
}
