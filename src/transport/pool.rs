//! Channel Pool
//!
//! Admission-controlled multiplexing over the channels of one endpoint.
//!
//! - Pending requests above `max_channels * max_requests_per_channel` fail
//!   fast with `CapacityExceeded`. Nothing queues.
//! - Accounted capacity is `channels.len() * max_requests_per_channel`, and
//!   holds after every release of the pool lock.
//! - Channels are picked round-robin by a wrapping sequence number.
//! - An unhealthy channel, including one whose requests keep timing out, is
//!   removed from the pool at once and closed by whoever releases it last.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::channel::{ConnectionChannel, TimeoutDetection};
use super::connector::Connector;
use super::errors::{TransportError, TransportResult};
use crate::config::PoolConfig;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Upper bound on pick/grow rounds for a single request.
const MAX_ACQUIRE_ROUNDS: usize = 64;

/// A pooled channel with its in-flight reference count.
struct ChannelHandle {
    channel: ConnectionChannel,
    in_flight: AtomicUsize,
    retired: AtomicBool,
}

impl ChannelHandle {
    fn new(channel: ConnectionChannel) -> Self {
        Self {
            channel,
            in_flight: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        }
    }

    fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.retired.load(Ordering::SeqCst) {
            self.channel.dispose();
        }
    }

    /// Mark for disposal; closes now if nobody is using the channel.
    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.channel.dispose();
        }
    }
}

/// Releases a channel reference on every exit path.
struct EnteredChannel {
    handle: Arc<ChannelHandle>,
}

impl Drop for EnteredChannel {
    fn drop(&mut self) {
        self.handle.exit();
    }
}

/// Decrements the pending counter on every exit path, cancellation included.
struct PendingGuard<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Open channels plus accounted capacity, guarded together.
struct PoolState {
    channels: Vec<Arc<ChannelHandle>>,
    capacity: usize,
}

/// Per-endpoint channel pool
pub struct ChannelPool {
    endpoint: String,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    opening_gate: Arc<Semaphore>,
    pending: AtomicUsize,
    sequence: AtomicU32,
    state: RwLock<PoolState>,
    metrics: Arc<MetricsRegistry>,
}

impl ChannelPool {
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: PoolConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let opening_gate = Arc::new(Semaphore::new(config.max_concurrent_opens));
        Self {
            endpoint: endpoint.into(),
            connector,
            config,
            opening_gate,
            pending: AtomicUsize::new(0),
            sequence: AtomicU32::new(0),
            state: RwLock::new(PoolState {
                channels: Vec::new(),
                capacity: 0,
            }),
            metrics,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request through a pooled channel.
    pub async fn request(
        &self,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> TransportResult<Vec<u8>> {
        let ceiling = self.config.admission_ceiling();
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        let _admission = PendingGuard {
            pending: &self.pending,
        };

        if pending > ceiling {
            self.metrics.increment_capacity_rejections();
            log_event_with_fields(
                Event::PoolCapacityExceeded,
                &[
                    ("endpoint", self.endpoint.as_str()),
                    ("pending", pending.to_string().as_str()),
                    ("ceiling", ceiling.to_string().as_str()),
                ],
            );
            return Err(TransportError::CapacityExceeded {
                endpoint: self.endpoint.clone(),
                pending,
                ceiling,
            });
        }

        for _ in 0..MAX_ACQUIRE_ROUNDS {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            match self.try_enter() {
                Some(entered) => {
                    if entered.handle.channel.healthy() {
                        return entered
                            .handle
                            .channel
                            .request(payload, self.config.request_timeout(), cancel)
                            .await;
                    }
                    self.remove_channel(&entered.handle);
                }
                None => self.grow()?,
            }
        }

        Err(TransportError::InvalidState {
            endpoint: self.endpoint.clone(),
            message: format!("no usable channel after {} rounds", MAX_ACQUIRE_ROUNDS),
        })
    }

    /// Requests currently admitted.
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn open_channel_count(&self) -> usize {
        self.read_state().channels.len()
    }

    /// Accounted capacity.
    pub fn capacity(&self) -> usize {
        self.read_state().capacity
    }

    /// Whether accounted capacity matches the channel count.
    pub fn capacity_invariant_holds(&self) -> bool {
        let state = self.read_state();
        state.capacity == state.channels.len() * self.config.max_requests_per_channel
    }

    /// Retire every channel. In-flight requests finish first.
    pub fn close_all(&self) {
        let drained: Vec<Arc<ChannelHandle>> = {
            let mut state = self.write_state();
            let drained = std::mem::take(&mut state.channels);
            state.capacity = 0;
            drained
        };
        for handle in drained {
            handle.retire();
            self.metrics.increment_channels_closed();
        }
    }

    /// Enter a channel if accounted capacity covers current demand.
    fn try_enter(&self) -> Option<EnteredChannel> {
        let state = self.read_state();
        let pending = self.admitted_demand();
        if state.channels.is_empty() || pending > state.capacity {
            return None;
        }
        let index = self.sequence.fetch_add(1, Ordering::Relaxed) as usize % state.channels.len();
        let handle = Arc::clone(&state.channels[index]);
        handle.enter();
        Some(EnteredChannel { handle })
    }

    /// Open enough channels to cover pending demand, in one batch.
    fn grow(&self) -> TransportResult<()> {
        let mrpc = self.config.max_requests_per_channel;
        let added = {
            let mut state = self.write_state();
            let pending = self.admitted_demand();
            if !state.channels.is_empty() && pending <= state.capacity {
                return Ok(());
            }

            let wanted = pending.div_ceil(mrpc).max(1).min(self.config.max_channels);
            if wanted <= state.channels.len() {
                return Err(TransportError::CapacityExceeded {
                    endpoint: self.endpoint.clone(),
                    pending,
                    ceiling: self.config.admission_ceiling(),
                });
            }

            let added = wanted - state.channels.len();
            for _ in 0..added {
                let channel = ConnectionChannel::new(
                    self.endpoint.clone(),
                    Arc::clone(&self.connector),
                    Arc::clone(&self.opening_gate),
                    self.config.open_timeout(),
                    TimeoutDetection::from_config(&self.config),
                );
                channel.initialize()?;
                state.channels.push(Arc::new(ChannelHandle::new(channel)));
            }
            state.capacity = state.channels.len() * mrpc;
            added
        };

        for _ in 0..added {
            self.metrics.increment_channels_opened();
        }
        log_event_with_fields(
            Event::PoolGrow,
            &[
                ("endpoint", self.endpoint.as_str()),
                ("added", added.to_string().as_str()),
                ("channels", self.open_channel_count().to_string().as_str()),
            ],
        );
        Ok(())
    }

    fn remove_channel(&self, handle: &Arc<ChannelHandle>) {
        let removed = {
            let mut state = self.write_state();
            let before = state.channels.len();
            state.channels.retain(|h| !Arc::ptr_eq(h, handle));
            state.capacity = state.channels.len() * self.config.max_requests_per_channel;
            state.channels.len() < before
        };

        if removed {
            handle.retire();
            self.metrics.increment_channels_closed();
            log_event_with_fields(
                Event::PoolChannelRetired,
                &[
                    ("endpoint", self.endpoint.as_str()),
                    ("state", format!("{:?}", handle.channel.state()).as_str()),
                ],
            );
        }
    }

    /// Pending count clamped to the ceiling. Requests about to be rejected
    /// briefly inflate the raw counter.
    fn admitted_demand(&self) -> usize {
        self.pending
            .load(Ordering::SeqCst)
            .min(self.config.admission_ceiling())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("endpoint", &self.endpoint)
            .field("pending", &self.pending_requests())
            .field("channels", &self.open_channel_count())
            .finish()
    }
}
