//! Connection Channel
//!
//! One pooled connection. State moves forward only:
//!
//! ```text
//! New -> Opening -> Open -> Closed
//!           \________________/
//!            failed open
//! ```
//!
//! The state lock guards bookkeeping only. Opens, sends and closes all run
//! outside it.
//!
//! An open channel whose requests keep timing out while nothing comes back
//! reports itself unhealthy, so the pool retires it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::connector::{CallProgress, Connection, Connector};
use super::errors::{OpenStage, TransportError, TransportResult};
use crate::config::PoolConfig;
use crate::observability::{log_event_with_fields, Event};

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    New,
    Opening,
    Open,
    Closed,
}

struct ChannelSlot {
    state: ChannelState,
    connection: Option<Arc<dyn Connection>>,
}

type OpenOutcome = Option<Result<(), TransportError>>;

/// When repeated request timeouts make a channel unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutDetection {
    /// Consecutive timeouts needed once `window` passes without a response
    pub threshold: u32,
    pub window: Duration,
    /// Any timeout counts once nothing was received for this long
    pub time_limit: Duration,
}

impl TimeoutDetection {
    /// `None` when the pool has detection turned off.
    pub fn from_config(config: &PoolConfig) -> Option<Self> {
        config.timeout_detection_enabled.then(|| Self {
            threshold: config.timeout_detection_threshold,
            window: Duration::from_millis(config.timeout_detection_window_ms),
            time_limit: Duration::from_millis(config.timeout_detection_time_limit_ms),
        })
    }

    fn trips(&self, timeouts: u32, since_receive: Duration) -> bool {
        if timeouts == 0 {
            return false;
        }
        since_receive >= self.time_limit
            || (timeouts >= self.threshold && since_receive >= self.window)
    }
}

/// Timeouts since the last response.
struct TransitHealth {
    timeouts: u32,
    last_receive: Instant,
}

struct ChannelInner {
    endpoint: String,
    connector: Arc<dyn Connector>,
    opening_gate: Arc<Semaphore>,
    open_timeout: Duration,
    slot: RwLock<ChannelSlot>,
    opened: watch::Sender<OpenOutcome>,
    disposed: AtomicBool,
    detection: Option<TimeoutDetection>,
    transit: Mutex<TransitHealth>,
}

/// A single connection with an asynchronous open.
#[derive(Clone)]
pub struct ConnectionChannel {
    inner: Arc<ChannelInner>,
}

impl ConnectionChannel {
    /// Create a channel in `New`. Opens must hold a permit of `opening_gate`.
    ///
    /// With `detection` unset, timeouts never affect health.
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        opening_gate: Arc<Semaphore>,
        open_timeout: Duration,
        detection: Option<TimeoutDetection>,
    ) -> Self {
        let (opened, _) = watch::channel(None);
        Self {
            inner: Arc::new(ChannelInner {
                endpoint: endpoint.into(),
                connector,
                opening_gate,
                open_timeout,
                slot: RwLock::new(ChannelSlot {
                    state: ChannelState::New,
                    connection: None,
                }),
                opened,
                disposed: AtomicBool::new(false),
                detection,
                transit: Mutex::new(TransitHealth {
                    timeouts: 0,
                    last_receive: Instant::now(),
                }),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ChannelState {
        self.inner.slot.read().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Start the open. Must be called from within a tokio runtime.
    ///
    /// A second call is rejected with `InvalidState`.
    pub fn initialize(&self) -> TransportResult<()> {
        {
            let mut slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
            if slot.state != ChannelState::New {
                return Err(TransportError::InvalidState {
                    endpoint: self.inner.endpoint.clone(),
                    message: format!("initialize called in state {:?}", slot.state),
                });
            }
            slot.state = ChannelState::Opening;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { open(inner).await });
        Ok(())
    }

    /// Send a request, joining a pending open first.
    ///
    /// On timeout the in-flight call is dropped and the error records
    /// whether the payload had already been written.
    pub async fn request(
        &self,
        payload: Vec<u8>,
        request_timeout: Duration,
        cancel: &CancellationToken,
    ) -> TransportResult<Vec<u8>> {
        let connection = self.await_open(cancel).await?;
        let progress = CallProgress::new();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            outcome = timeout(request_timeout, connection.send(payload, &progress)) => outcome,
        };

        match outcome {
            Ok(Ok(response)) => {
                self.record_receive();
                Ok(response)
            }
            Ok(Err(error)) => {
                if !error.is_timeout() {
                    self.close_after_failure(&error);
                }
                Err(error)
            }
            Err(_) => {
                let timeout_ms = request_timeout.as_millis() as u64;
                let payload_sent = progress.is_sent();
                let timeouts = self.record_timeout();
                log_event_with_fields(
                    Event::ChannelRequestTimeout,
                    &[
                        ("endpoint", self.inner.endpoint.as_str()),
                        ("timeout_ms", timeout_ms.to_string().as_str()),
                        ("payload_sent", if payload_sent { "true" } else { "false" }),
                        ("consecutive", timeouts.to_string().as_str()),
                    ],
                );
                if self.timeouts_detected() {
                    log_event_with_fields(
                        Event::ChannelTimeoutsDetected,
                        &[
                            ("endpoint", self.inner.endpoint.as_str()),
                            ("consecutive", timeouts.to_string().as_str()),
                        ],
                    );
                }
                Err(TransportError::RequestTimeout {
                    endpoint: self.inner.endpoint.clone(),
                    timeout_ms,
                    payload_sent,
                })
            }
        }
    }

    /// Whether new requests should be routed here.
    ///
    /// New and opening channels count as healthy. An open channel must
    /// have a healthy connection and no run of unanswered timeouts.
    pub fn healthy(&self) -> bool {
        let connection_healthy = {
            let slot = self.inner.slot.read().unwrap_or_else(|e| e.into_inner());
            match slot.state {
                ChannelState::New | ChannelState::Opening => return true,
                ChannelState::Open => slot
                    .connection
                    .as_ref()
                    .map(|c| c.is_healthy())
                    .unwrap_or(false),
                ChannelState::Closed => return false,
            }
        };
        connection_healthy && !self.timeouts_detected()
    }

    /// Request timeouts since the last response.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.transit().timeouts
    }

    fn timeouts_detected(&self) -> bool {
        let Some(detection) = self.inner.detection else {
            return false;
        };
        let transit = self.transit();
        detection.trips(transit.timeouts, transit.last_receive.elapsed())
    }

    fn record_receive(&self) {
        let mut transit = self.transit();
        transit.timeouts = 0;
        transit.last_receive = Instant::now();
    }

    fn record_timeout(&self) -> u32 {
        let mut transit = self.transit();
        transit.timeouts = transit.timeouts.saturating_add(1);
        transit.timeouts
    }

    fn transit(&self) -> std::sync::MutexGuard<'_, TransitHealth> {
        self.inner.transit.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close the channel. Idempotent.
    ///
    /// An open still in flight finishes in the background; its failure is
    /// logged and dropped.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let connection = {
            let mut slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
            slot.state = ChannelState::Closed;
            slot.connection.take()
        };
        if let Some(connection) = connection {
            log_event_with_fields(
                Event::ChannelClosed,
                &[("endpoint", self.inner.endpoint.as_str())],
            );
            spawn_close(connection);
        }
    }

    async fn await_open(&self, cancel: &CancellationToken) -> TransportResult<Arc<dyn Connection>> {
        if let Some(ready) = self.open_connection()? {
            return Ok(ready);
        }

        let mut receiver = self.inner.opened.subscribe();
        let wait = async move {
            receiver
                .wait_for(Option::is_some)
                .await
                .map(|outcome| outcome.clone())
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            outcome = wait => outcome,
        };

        match outcome {
            Ok(Some(Ok(()))) => self.open_connection()?.ok_or_else(|| self.closed_error()),
            Ok(Some(Err(error))) => Err(error),
            Ok(None) | Err(_) => Err(TransportError::InvalidState {
                endpoint: self.inner.endpoint.clone(),
                message: "open finished without an outcome".to_string(),
            }),
        }
    }

    /// `Some` when open, `None` while opening.
    fn open_connection(&self) -> TransportResult<Option<Arc<dyn Connection>>> {
        let slot = self.inner.slot.read().unwrap_or_else(|e| e.into_inner());
        match slot.state {
            ChannelState::Open => slot
                .connection
                .clone()
                .map(Some)
                .ok_or_else(|| self.closed_error()),
            ChannelState::Opening => Ok(None),
            ChannelState::Closed => Err(self.closed_error()),
            ChannelState::New => Err(TransportError::InvalidState {
                endpoint: self.inner.endpoint.clone(),
                message: "request on a channel that was never initialized".to_string(),
            }),
        }
    }

    fn close_after_failure(&self, error: &TransportError) {
        let connection = {
            let mut slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
            if slot.state != ChannelState::Open {
                return;
            }
            slot.state = ChannelState::Closed;
            slot.connection.take()
        };
        log_event_with_fields(
            Event::ChannelClosed,
            &[
                ("endpoint", self.inner.endpoint.as_str()),
                ("reason", error.to_string().as_str()),
            ],
        );
        if let Some(connection) = connection {
            spawn_close(connection);
        }
    }

    fn closed_error(&self) -> TransportError {
        TransportError::ChannelClosed {
            endpoint: self.inner.endpoint.clone(),
        }
    }
}

impl std::fmt::Debug for ConnectionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionChannel")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

async fn open(inner: Arc<ChannelInner>) {
    log_event_with_fields(Event::ChannelOpenStart, &[("endpoint", inner.endpoint.as_str())]);

    match connect(&inner).await {
        Ok(connection) => {
            let installed = {
                let mut slot = inner.slot.write().unwrap_or_else(|e| e.into_inner());
                if slot.state == ChannelState::Opening {
                    slot.state = ChannelState::Open;
                    slot.connection = Some(Arc::clone(&connection));
                    true
                } else {
                    false
                }
            };

            if installed {
                inner
                    .transit
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .last_receive = Instant::now();
                log_event_with_fields(Event::ChannelOpened, &[("endpoint", inner.endpoint.as_str())]);
                inner.opened.send_replace(Some(Ok(())));
            } else {
                // Disposed while opening.
                connection.close().await;
                inner.opened.send_replace(Some(Err(TransportError::ChannelClosed {
                    endpoint: inner.endpoint.clone(),
                })));
            }
        }
        Err(error) => {
            {
                let mut slot = inner.slot.write().unwrap_or_else(|e| e.into_inner());
                slot.state = ChannelState::Closed;
            }
            let event = if inner.disposed.load(Ordering::Acquire) {
                Event::ChannelDisposeSwallowedFailure
            } else {
                Event::ChannelOpenFailed
            };
            log_event_with_fields(
                event,
                &[
                    ("endpoint", inner.endpoint.as_str()),
                    ("error", error.to_string().as_str()),
                ],
            );
            inner.opened.send_replace(Some(Err(error)));
        }
    }
}

async fn connect(inner: &ChannelInner) -> TransportResult<Arc<dyn Connection>> {
    let deadline = Instant::now() + inner.open_timeout;

    let _permit = match timeout_at(deadline, Arc::clone(&inner.opening_gate).acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return Err(TransportError::ChannelClosed {
                endpoint: inner.endpoint.clone(),
            })
        }
        Err(_) => {
            return Err(TransportError::OpenTimeout {
                endpoint: inner.endpoint.clone(),
                stage: OpenStage::WaitingToOpen,
            })
        }
    };

    match timeout_at(deadline, inner.connector.connect(&inner.endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::OpenTimeout {
            endpoint: inner.endpoint.clone(),
            stage: OpenStage::Opening,
        }),
    }
}

fn spawn_close(connection: Arc<dyn Connection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { connection.close().await });
        }
        Err(_) => drop(connection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct EchoConnection {
        delay: Duration,
        fail_send: bool,
        healthy: AtomicBool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for EchoConnection {
        async fn send(&self, payload: Vec<u8>, progress: &CallProgress) -> TransportResult<Vec<u8>> {
            progress.mark_sent();
            tokio::time::sleep(self.delay).await;
            if self.fail_send {
                return Err(TransportError::SendFailed {
                    endpoint: "test".into(),
                    message: "reset".into(),
                    payload_sent: true,
                });
            }
            Ok(payload)
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestConnector {
        connect_delay: Duration,
        fail: bool,
        send_delay: Duration,
        fail_send: bool,
        connects: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl TestConnector {
        fn new() -> Self {
            Self {
                connect_delay: Duration::ZERO,
                fail: false,
                send_delay: Duration::ZERO,
                fail_send: false,
                connects: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Connector for TestConnector {
        async fn connect(&self, endpoint: &str) -> TransportResult<Arc<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.connect_delay).await;
            if self.fail {
                return Err(TransportError::ConnectFailed {
                    endpoint: endpoint.to_string(),
                    message: "refused".into(),
                });
            }
            Ok(Arc::new(EchoConnection {
                delay: self.send_delay,
                fail_send: self.fail_send,
                healthy: AtomicBool::new(true),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn channel(connector: Arc<TestConnector>) -> ConnectionChannel {
        ConnectionChannel::new(
            "rntbd://test:1",
            connector,
            Arc::new(Semaphore::new(4)),
            Duration::from_secs(5),
            None,
        )
    }

    fn detecting_channel(connector: Arc<TestConnector>) -> ConnectionChannel {
        ConnectionChannel::new(
            "rntbd://test:1",
            connector,
            Arc::new(Semaphore::new(4)),
            Duration::from_secs(5),
            Some(TimeoutDetection {
                threshold: 3,
                window: Duration::from_millis(200),
                time_limit: Duration::from_secs(60),
            }),
        )
    }

    #[tokio::test]
    async fn test_request_joins_pending_open() {
        let mut connector = TestConnector::new();
        connector.connect_delay = Duration::from_millis(20);
        let connector = Arc::new(connector);
        let channel = channel(Arc::clone(&connector));
        channel.initialize().unwrap();
        assert_eq!(channel.state(), ChannelState::Opening);
        assert!(channel.healthy());

        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(
            channel.request(b"a".to_vec(), Duration::from_secs(1), &cancel),
            channel.request(b"b".to_vec(), Duration::from_secs(1), &cancel),
        );
        assert_eq!(a.unwrap(), b"a".to_vec());
        assert_eq!(b.unwrap(), b"b".to_vec());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_invalid_state() {
        let channel = channel(Arc::new(TestConnector::new()));
        channel.initialize().unwrap();
        assert!(matches!(
            channel.initialize(),
            Err(TransportError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_before_initialize_is_invalid_state() {
        let channel = channel(Arc::new(TestConnector::new()));
        let result = channel
            .request(vec![1], Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::InvalidState { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_payload_sent() {
        let mut connector = TestConnector::new();
        connector.send_delay = Duration::from_secs(30);
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();

        let result = channel
            .request(vec![1], Duration::from_millis(100), &CancellationToken::new())
            .await;
        match result {
            Err(TransportError::RequestTimeout {
                payload_sent,
                timeout_ms,
                ..
            }) => {
                assert!(payload_sent);
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // Timeouts leave the channel open.
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_while_opening() {
        let mut connector = TestConnector::new();
        connector.connect_delay = Duration::from_secs(60);
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();

        let result = channel
            .request(vec![1], Duration::from_secs(100), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(TransportError::OpenTimeout {
                stage: OpenStage::Opening,
                ..
            })
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!channel.healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_waiting_for_gate() {
        let gate = Arc::new(Semaphore::new(1));
        let _held = Arc::clone(&gate).acquire_owned().await.unwrap();
        let channel = ConnectionChannel::new(
            "rntbd://test:1",
            Arc::new(TestConnector::new()),
            gate,
            Duration::from_millis(50),
            None,
        );
        channel.initialize().unwrap();
        let result = channel
            .request(vec![1], Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(TransportError::OpenTimeout {
                stage: OpenStage::WaitingToOpen,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_failed_open_surfaces_to_waiters() {
        let mut connector = TestConnector::new();
        connector.fail = true;
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();
        let result = channel
            .request(vec![1], Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_send_failure_closes_channel() {
        let mut connector = TestConnector::new();
        connector.fail_send = true;
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();
        let result = channel
            .request(vec![1], Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert!(result.unwrap_err().payload_sent());
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let connector = Arc::new(TestConnector::new());
        let channel = channel(Arc::clone(&connector));
        channel.initialize().unwrap();
        channel
            .request(vec![1], Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        channel.dispose();
        channel.dispose();
        assert_eq!(channel.state(), ChannelState::Closed);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);

        let result = channel
            .request(vec![1], Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::ChannelClosed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_open_swallows_failure() {
        let mut connector = TestConnector::new();
        connector.connect_delay = Duration::from_millis(100);
        connector.fail = true;
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();
        channel.dispose();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let mut connector = TestConnector::new();
        connector.send_delay = Duration::from_secs(60);
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = channel.request(vec![1], Duration::from_secs(100), &cancel).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_timeouts_make_channel_unhealthy() {
        let mut connector = TestConnector::new();
        connector.send_delay = Duration::from_secs(30);
        let channel = detecting_channel(Arc::new(connector));
        channel.initialize().unwrap();
        let cancel = CancellationToken::new();

        for expected in 1..=2 {
            let result = channel.request(vec![1], Duration::from_millis(100), &cancel).await;
            assert!(matches!(result, Err(TransportError::RequestTimeout { .. })));
            assert_eq!(channel.consecutive_timeouts(), expected);
            assert!(channel.healthy());
        }
        channel
            .request(vec![1], Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert_eq!(channel.consecutive_timeouts(), 3);
        assert!(!channel.healthy());
        // Still open; the pool decides when to close it.
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_timeout_trips_after_time_limit() {
        let mut connector = TestConnector::new();
        connector.send_delay = Duration::from_secs(30);
        let channel = detecting_channel(Arc::new(connector));
        channel.initialize().unwrap();

        channel
            .request(vec![1], Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(channel.healthy());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!channel.healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_resets_timeout_count() {
        let mut connector = TestConnector::new();
        connector.send_delay = Duration::from_millis(150);
        let channel = detecting_channel(Arc::new(connector));
        channel.initialize().unwrap();
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            channel
                .request(vec![1], Duration::from_millis(100), &cancel)
                .await
                .unwrap_err();
        }
        assert_eq!(channel.consecutive_timeouts(), 2);
        channel
            .request(vec![1], Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(channel.consecutive_timeouts(), 0);
        assert!(channel.healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_ignored_without_detection() {
        let mut connector = TestConnector::new();
        connector.send_delay = Duration::from_secs(30);
        let channel = channel(Arc::new(connector));
        channel.initialize().unwrap();
        for _ in 0..5 {
            channel
                .request(vec![1], Duration::from_millis(100), &CancellationToken::new())
                .await
                .unwrap_err();
        }
        assert_eq!(channel.consecutive_timeouts(), 5);
        assert!(channel.healthy());
    }
}
