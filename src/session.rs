//! Live activity feed session
//!
//! A `FeedSession` combines a one-shot snapshot fetch with a streamed update
//! channel that reconnects after a fixed delay. The session owns every piece
//! of lifecycle state (stop token, connect gate, stream task, reconnect
//! timer); dropping it or calling [`FeedSession::stop`] tears all of it down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::FeedConfig;
use crate::error::Result;
use crate::event::{ActivityEvent, EventFeed};
use crate::frame::{Line, LineBuffer, StreamMessage, classify_line, decode_message};
use crate::source::{ChunkReader, EventSource};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of the streamed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting { delay: Duration },
    Stopped,
}

/// Inputs that drive [`FeedState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSignal {
    ConnectRequested,
    ConnectSucceeded,
    FrameReceived,
    /// The server closed the stream cleanly
    StreamEnded,
    /// Connect failure or read error, both retried
    StreamErrored,
    /// 401 / 404 while connecting
    AuthRejected,
    Stopped,
}

impl FeedState {
    /// Pure transition function. Signals that do not apply to the current
    /// state leave it unchanged; `Stopped` is absorbing.
    pub fn next(self, signal: FeedSignal, reconnect_delay: Duration) -> FeedState {
        use FeedSignal as S;
        use FeedState::*;

        match (self, signal) {
            (Stopped, _) | (_, S::Stopped) => Stopped,
            (Idle | Reconnecting { .. }, S::ConnectRequested) => Connecting,
            (Connecting, S::ConnectSucceeded) => Streaming,
            (Streaming, S::FrameReceived) => Streaming,
            // A clean close is terminal for this connection only; nothing is scheduled.
            (Streaming, S::StreamEnded) => Idle,
            (Connecting | Streaming, S::StreamErrored) => Reconnecting {
                delay: reconnect_delay,
            },
            (Connecting, S::AuthRejected) => Stopped,
            (state, _) => state,
        }
    }

    pub fn schedules_reconnect(&self) -> bool {
        matches!(self, FeedState::Reconnecting { .. })
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedState::Idle => f.write_str("idle"),
            FeedState::Connecting => f.write_str("connecting"),
            FeedState::Streaming => f.write_str("streaming"),
            FeedState::Reconnecting { delay } => {
                write!(f, "reconnecting in {}s", delay.as_secs())
            }
            FeedState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Notifications published to session subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Snapshot { count: usize },
    /// Events a `recent_events` batch added to the feed
    Merged { added: Vec<ActivityEvent> },
    Event(ActivityEvent),
    State(FeedState),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub connect_attempts: u64,
    pub reconnects_scheduled: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-slot delayed task: scheduling replaces whatever was pending.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling any timer still pending.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.take() {
            if !previous.is_finished() {
                debug!("replacing pending reconnect timer");
            }
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }));
    }

    /// Cancel the pending timer. Returns whether one was still waiting.
    pub fn clear(&self) -> bool {
        match lock(&self.slot).take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

struct Inner {
    source: Arc<dyn EventSource>,
    config: FeedConfig,
    feed: Mutex<EventFeed>,
    state: Mutex<FeedState>,
    stats: Mutex<FeedStats>,
    stop: CancellationToken,
    started: AtomicBool,
    connecting: AtomicBool,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    reconnect: ReconnectTimer,
    updates: broadcast::Sender<FeedUpdate>,
}

/// Owner of one live feed. Not `Clone`: whoever holds it controls teardown.
pub struct FeedSession {
    inner: Arc<Inner>,
}

impl FeedSession {
    pub fn new(source: Arc<dyn EventSource>, config: FeedConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                source,
                feed: Mutex::new(EventFeed::new(config.limit)),
                config,
                state: Mutex::new(FeedState::Idle),
                stats: Mutex::new(FeedStats::default()),
                stop: CancellationToken::new(),
                started: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                stream_task: Mutex::new(None),
                reconnect: ReconnectTimer::new(),
                updates,
            }),
        }
    }

    /// Fetch the snapshot, then open the stream after the startup delay.
    /// Only the first call does anything.
    pub fn start(&self) -> bool {
        if self.inner.stop.is_cancelled() || self.inner.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_startup().await });
        true
    }

    /// Open the stream now. A no-op returning `false` while another attempt
    /// is connecting or streaming, or after `stop`.
    pub fn connect(&self) -> bool {
        self.inner.connect()
    }

    /// Tear the session down: later callbacks become no-ops, the reader is
    /// cancelled, and no reconnect stays pending.
    pub fn stop(&self) {
        let inner = &self.inner;
        if inner.stop.is_cancelled() {
            return;
        }
        inner.stop.cancel();
        if let Some(task) = lock(&inner.stream_task).take() {
            task.abort();
        }
        if inner.reconnect.clear() {
            debug!("cleared pending reconnect on stop");
        }
        inner.connecting.store(false, Ordering::SeqCst);
        inner.apply(FeedSignal::Stopped);
        info!("activity feed stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        lock(&self.inner.feed).to_vec()
    }

    pub fn state(&self) -> FeedState {
        *lock(&self.inner.state)
    }

    pub fn stats(&self) -> FeedStats {
        *lock(&self.inner.stats)
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.reconnect.is_pending()
    }

    /// True after `stop()` and also after the stream was rejected with 401/404;
    /// either way no further connection will be attempted.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled() || self.state() == FeedState::Stopped
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn publish(&self, update: FeedUpdate) {
        let _ = self.updates.send(update);
    }

    fn apply(&self, signal: FeedSignal) -> FeedState {
        let mut state = lock(&self.state);
        if self.is_stopped() && signal != FeedSignal::Stopped {
            return *state;
        }
        let next = state.next(signal, self.config.reconnect_delay);
        let previous = *state;
        if next != previous {
            debug!(from = %previous, to = %next, ?signal, "feed state changed");
            *state = next;
            self.publish(FeedUpdate::State(next));
        }
        next
    }

    async fn run_startup(self: Arc<Self>) {
        let snapshot = match self.source.fetch_recent(self.config.limit).await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "failed to load recent activity; starting with an empty feed");
                Vec::new()
            }
        };
        if self.is_stopped() {
            debug!("snapshot arrived after stop; discarded");
            return;
        }
        let count = {
            let mut feed = lock(&self.feed);
            feed.replace(snapshot);
            feed.len()
        };
        info!(count, "loaded recent activity");
        self.publish(FeedUpdate::Snapshot { count });

        tokio::select! {
            _ = self.stop.cancelled() => return,
            _ = tokio::time::sleep(self.config.startup_delay) => {}
        }
        self.connect();
    }

    fn connect(self: &Arc<Self>) -> bool {
        if self.is_stopped() || *lock(&self.state) == FeedState::Stopped {
            return false;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("activity stream connect already in flight; ignoring");
            return false;
        }

        let mut slot = lock(&self.stream_task);
        if self.is_stopped() {
            self.connecting.store(false, Ordering::SeqCst);
            return false;
        }
        // A new attempt supersedes any reconnect still waiting to fire.
        if self.reconnect.clear() {
            debug!("pending reconnect superseded by connect");
        }
        lock(&self.stats).connect_attempts += 1;
        let inner = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { inner.run_stream().await }));
        true
    }

    async fn run_stream(self: Arc<Self>) {
        self.apply(FeedSignal::ConnectRequested);

        let opened = tokio::select! {
            _ = self.stop.cancelled() => return,
            opened = self.source.open_stream() => opened,
        };
        let reader = match opened {
            Ok(reader) => reader,
            Err(err) if err.is_terminal() => {
                warn!(error = %err, "activity stream rejected; keeping the last snapshot");
                self.finish_attempt(FeedSignal::AuthRejected);
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to open activity stream");
                self.finish_attempt(FeedSignal::StreamErrored);
                return;
            }
        };

        self.apply(FeedSignal::ConnectSucceeded);
        info!("activity stream connected");

        let outcome = self.read_stream(reader).await;
        if self.is_stopped() {
            return;
        }
        match outcome {
            Ok(()) => {
                info!("activity stream closed by server");
                self.finish_attempt(FeedSignal::StreamEnded);
            }
            Err(err) => {
                warn!(error = %err, "activity stream read failed");
                self.finish_attempt(FeedSignal::StreamErrored);
            }
        }
    }

    /// Record how an attempt ended, then release the connect gate. The gate
    /// stays held until the state and any reconnect are settled, so a
    /// concurrent `connect()` never sees this attempt's outcome.
    fn finish_attempt(self: &Arc<Self>, signal: FeedSignal) {
        if self.apply(signal).schedules_reconnect() {
            self.schedule_reconnect();
        }
        self.connecting.store(false, Ordering::SeqCst);
    }

    async fn read_stream(&self, mut reader: Box<dyn ChunkReader>) -> Result<()> {
        let mut buffer = LineBuffer::new();
        loop {
            let chunk = tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                chunk = reader.next_chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                if buffer.pending_len() > 0 {
                    debug!(bytes = buffer.pending_len(), "discarding incomplete trailing line");
                }
                return Ok(());
            };
            for line in buffer.push(&chunk) {
                self.handle_line(&line);
            }
        }
    }

    fn handle_line(&self, line: &str) {
        let payload = match classify_line(line) {
            Line::Data(payload) => payload,
            Line::Comment(comment) => {
                trace!(comment, "keepalive");
                return;
            }
            Line::Blank => return,
            Line::Other(other) => {
                trace!(line = other, "ignoring non-data line");
                return;
            }
        };
        if self.is_stopped() {
            return;
        }

        let message = match decode_message(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping malformed activity frame");
                lock(&self.stats).frames_dropped += 1;
                return;
            }
        };
        lock(&self.stats).frames_received += 1;
        self.apply(FeedSignal::FrameReceived);

        match message {
            StreamMessage::Connected => debug!("activity stream acknowledged connection"),
            StreamMessage::Heartbeat => trace!("activity stream heartbeat"),
            StreamMessage::RecentEvents(events) => {
                let added = lock(&self.feed).merge_batch(events);
                debug!(added = added.len(), "merged recent activity batch");
                self.publish(FeedUpdate::Merged { added });
            }
            StreamMessage::Activity(event) => {
                let inserted = lock(&self.feed).prepend(event.clone());
                if inserted {
                    self.publish(FeedUpdate::Event(event));
                } else {
                    trace!(id = %event.id, "duplicate activity event dropped");
                }
            }
            StreamMessage::Unknown(kind) => {
                debug!(kind = %kind, "ignoring unknown activity message type");
                lock(&self.stats).frames_dropped += 1;
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.is_stopped() {
            return;
        }
        let delay = self.config.reconnect_delay;
        let inner = Arc::downgrade(self);
        self.reconnect.schedule(delay, move || {
            if let Some(inner) = inner.upgrade() {
                inner.connect();
            }
        });
        lock(&self.stats).reconnects_scheduled += 1;
        info!(delay_secs = delay.as_secs(), "activity stream reconnect scheduled");
    }
}
