//! Broadcast event bus with a bounded replay buffer.
//!
//! Producers append [`StreamEvent`]s to a fixed-capacity ring buffer and never
//! wait on consumers; when the buffer is full the oldest event is evicted.
//! Every [`Subscription`] keeps its own cursor into the buffer, so events are
//! fanned out to all subscribers rather than consumed. A subscriber that falls
//! behind the eviction point skips forward to the oldest retained event.
//!
//! A session is opened with [`EventBus::start_stream`]; dropping the returned
//! [`StreamHandle`] closes the stream, after which subscribers drain what is
//! left and then end.
//!
//! The scheduler publishes through an [`EventSink`], which writes to the bus
//! and can additionally tap every event into an unbounded per-run channel.
//! The ring buffer only bounds replay; a tap sees every event of its run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::domain::report::TaskReport;
use crate::metrics::METRICS;

pub const DEFAULT_BUFFER_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    Started {
        agent: String,
    },
    Progress {
        agent: String,
        payload: serde_json::Value,
    },
    Completed {
        agent: String,
        report: Box<TaskReport>,
    },
    Error {
        agent: String,
        message: String,
    },
}

/// One broadcast event. `seq` is unique and increasing for the lifetime of
/// the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn agent(&self) -> &str {
        match &self.kind {
            StreamEventKind::Started { agent }
            | StreamEventKind::Progress { agent, .. }
            | StreamEventKind::Completed { agent, .. }
            | StreamEventKind::Error { agent, .. } => agent,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            StreamEventKind::Started { .. } => "started",
            StreamEventKind::Progress { .. } => "progress",
            StreamEventKind::Completed { .. } => "completed",
            StreamEventKind::Error { .. } => "error",
        }
    }
}

struct BusState {
    buffer: VecDeque<StreamEvent>,
    next_seq: u64,
    session: u64,
    closed: bool,
}

struct BusShared {
    capacity: usize,
    state: Mutex<BusState>,
    // Bumped after every append and on close; subscribers wait on it.
    wake: watch::Sender<()>,
}

impl BusShared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheaply cloneable handle to a shared broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("EventBus")
            .field("capacity", &self.shared.capacity)
            .field("buffered", &state.buffer.len())
            .field("next_seq", &state.next_seq)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl EventBus {
    /// Create a bus whose replay buffer holds at most `buffer_size` events
    /// (minimum one).
    pub fn new(buffer_size: usize) -> Self {
        let capacity = buffer_size.max(1);
        let (wake, _) = watch::channel(());
        Self {
            shared: Arc::new(BusShared {
                capacity,
                state: Mutex::new(BusState {
                    buffer: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_SIZE)),
                    next_seq: 0,
                    session: 0,
                    closed: false,
                }),
                wake,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Open a new broadcast session.
    ///
    /// Clears the replay buffer and reopens the stream. The stream closes
    /// when the returned handle is closed or dropped.
    pub fn start_stream(&self) -> StreamHandle {
        let session = {
            let mut state = self.shared.lock();
            state.session += 1;
            state.closed = false;
            state.buffer.clear();
            state.session
        };
        self.shared.wake.send_replace(());
        debug!(session, "event stream started");
        StreamHandle {
            shared: Arc::clone(&self.shared),
            session,
            released: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn emit_started(&self, agent: &str) -> u64 {
        self.emit(StreamEventKind::Started {
            agent: agent.to_string(),
        })
    }

    pub fn emit_progress(&self, agent: &str, payload: serde_json::Value) -> u64 {
        self.emit(StreamEventKind::Progress {
            agent: agent.to_string(),
            payload,
        })
    }

    pub fn emit_result(&self, agent: &str, report: &TaskReport) -> u64 {
        self.emit(StreamEventKind::Completed {
            agent: agent.to_string(),
            report: Box::new(report.clone()),
        })
    }

    pub fn emit_error(&self, agent: &str, message: impl Into<String>) -> u64 {
        self.emit(StreamEventKind::Error {
            agent: agent.to_string(),
            message: message.into(),
        })
    }

    /// Append an event and wake subscribers. Never blocks on consumers.
    /// Returns the event's sequence number.
    pub fn emit(&self, kind: StreamEventKind) -> u64 {
        self.append(kind, None)
    }

    // The tap is fed under the bus lock so it sees events in `seq` order.
    fn append(
        &self,
        kind: StreamEventKind,
        tap: Option<&mpsc::UnboundedSender<StreamEvent>>,
    ) -> u64 {
        let seq = {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            if state.buffer.len() >= self.shared.capacity {
                state.buffer.pop_front();
                METRICS.inc_events_evicted();
            }
            let event = StreamEvent {
                seq,
                timestamp: Utc::now(),
                kind,
            };
            if let Some(tap) = tap {
                // A closed tap only means its reader stopped listening.
                let _ = tap.send(event.clone());
            }
            state.buffer.push_back(event);
            seq
        };
        self.shared.wake.send_replace(());
        METRICS.inc_events_emitted();
        trace!(seq, "stream event emitted");
        seq
    }

    /// Start a new independent cursor at the oldest buffered event.
    pub fn subscribe(&self) -> Subscription {
        let cursor = {
            let state = self.shared.lock();
            state
                .buffer
                .front()
                .map(|e| e.seq)
                .unwrap_or(state.next_seq)
        };
        Subscription {
            shared: Arc::clone(&self.shared),
            wake: self.shared.wake.subscribe(),
            cursor,
            skipped: 0,
            finished: false,
        }
    }

    /// Events currently held in the replay buffer, oldest first.
    pub fn snapshot(&self) -> Vec<StreamEvent> {
        self.shared.lock().buffer.iter().cloned().collect()
    }
}

/// Owner of an open stream session. Closing (or dropping) it ends the stream
/// for every subscriber once they have drained the buffer.
#[must_use = "dropping the handle closes the stream immediately"]
pub struct StreamHandle {
    shared: Arc<BusShared>,
    session: u64,
    released: bool,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("session", &self.session)
            .field("released", &self.released)
            .finish()
    }
}

impl StreamHandle {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        {
            let mut state = self.shared.lock();
            // A newer session owns the stream now.
            if state.session != self.session {
                return;
            }
            state.closed = true;
        }
        self.shared.wake.send_replace(());
        debug!(session = self.session, "event stream closed");
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Destination for scheduler lifecycle events.
///
/// A disabled sink drops everything. With a bus, events are broadcast on it;
/// with a tap, every event is also sent to that channel, unbounded and in
/// publication order.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    bus: Option<EventBus>,
    tap: Option<mpsc::UnboundedSender<StreamEvent>>,
    // Numbers tap-only events when there is no bus to assign `seq`.
    local_seq: Arc<AtomicU64>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(bus: EventBus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::default()
        }
    }

    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<StreamEvent>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_some() || self.tap.is_some()
    }

    pub fn started(&self, agent: &str) {
        self.publish(StreamEventKind::Started {
            agent: agent.to_string(),
        });
    }

    pub fn progress(&self, agent: &str, payload: serde_json::Value) {
        self.publish(StreamEventKind::Progress {
            agent: agent.to_string(),
            payload,
        });
    }

    pub fn result(&self, agent: &str, report: &TaskReport) {
        self.publish(StreamEventKind::Completed {
            agent: agent.to_string(),
            report: Box::new(report.clone()),
        });
    }

    pub fn error(&self, agent: &str, message: impl Into<String>) {
        self.publish(StreamEventKind::Error {
            agent: agent.to_string(),
            message: message.into(),
        });
    }

    fn publish(&self, kind: StreamEventKind) {
        match (&self.bus, &self.tap) {
            (Some(bus), tap) => {
                bus.append(kind, tap.as_ref());
            }
            (None, Some(tap)) => {
                let _ = tap.send(StreamEvent {
                    seq: self.local_seq.fetch_add(1, Ordering::Relaxed),
                    timestamp: Utc::now(),
                    kind,
                });
            }
            (None, None) => {}
        }
    }
}

impl From<EventBus> for EventSink {
    fn from(bus: EventBus) -> Self {
        Self::new(bus)
    }
}

enum Poll {
    Ready(StreamEvent),
    Pending,
    Closed,
}

/// A subscriber's private cursor over the bus.
pub struct Subscription {
    shared: Arc<BusShared>,
    wake: watch::Receiver<()>,
    cursor: u64,
    skipped: u64,
    finished: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cursor", &self.cursor)
            .field("skipped", &self.skipped)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the stream is closed and
    /// this subscriber has seen every retained event.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        loop {
            // Mark the current wake-up as seen before looking at the buffer so
            // an emit racing with the check still wakes us.
            let _ = self.wake.borrow_and_update();
            match self.poll_buffer() {
                Poll::Ready(event) => return Some(event),
                Poll::Closed => {
                    self.finished = true;
                    return None;
                }
                Poll::Pending => {}
            }
            if self.wake.changed().await.is_err() {
                self.finished = true;
                return None;
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next): `None` when nothing is
    /// ready yet or the stream has ended.
    pub fn try_next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.poll_buffer() {
            Poll::Ready(event) => Some(event),
            Poll::Closed => {
                self.finished = true;
                None
            }
            Poll::Pending => None,
        }
    }

    /// Number of events this subscriber missed because they were evicted
    /// before it read them.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }

    fn poll_buffer(&mut self) -> Poll {
        let state = self.shared.lock();
        match state.buffer.front() {
            Some(front) => {
                if self.cursor < front.seq {
                    let missed = front.seq - self.cursor;
                    self.skipped += missed;
                    debug!(missed, "subscriber lagged behind replay buffer");
                    self.cursor = front.seq;
                }
                let index = (self.cursor - front.seq) as usize;
                if let Some(event) = state.buffer.get(index) {
                    self.cursor += 1;
                    return Poll::Ready(event.clone());
                }
            }
            None => {
                // Buffer was cleared by a new session.
                self.cursor = self.cursor.max(state.next_seq);
            }
        }
        if state.closed {
            Poll::Closed
        } else {
            Poll::Pending
        }
    }
}

/// Completion ratio and remaining-time estimate for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percent_complete: f64,
    /// `None` until the first completion.
    pub eta_seconds: Option<f64>,
}

impl ProgressSnapshot {
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "completed": self.completed,
            "total": self.total,
            "percent_complete": self.percent_complete,
            "eta_seconds": self.eta_seconds,
        })
    }
}

pub fn calculate_progress(completed: usize, total: usize, started_at: Instant) -> ProgressSnapshot {
    calculate_progress_with_elapsed(completed, total, started_at.elapsed())
}

pub fn calculate_progress_with_elapsed(
    completed: usize,
    total: usize,
    elapsed: Duration,
) -> ProgressSnapshot {
    let percent_complete = if total == 0 {
        0.0
    } else {
        100.0 * completed as f64 / total as f64
    };
    let eta_seconds = (completed > 0).then(|| {
        let remaining = total.saturating_sub(completed);
        elapsed.as_secs_f64() * remaining as f64 / completed as f64
    });
    ProgressSnapshot {
        completed,
        total,
        percent_complete,
        eta_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_keeps_most_recent_events() {
        let bus = EventBus::new(3);
        for i in 0..10 {
            bus.emit_started(&format!("agent-{i}"));
        }
        let agents: Vec<String> = bus.snapshot().iter().map(|e| e.agent().to_string()).collect();
        assert_eq!(agents, vec!["agent-7", "agent-8", "agent-9"]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let bus = EventBus::new(0);
        bus.emit_started("a");
        bus.emit_started("b");
        assert_eq!(bus.capacity(), 1);
        assert_eq!(bus.snapshot().len(), 1);
        assert_eq!(bus.snapshot()[0].agent(), "b");
    }

    #[test]
    fn lagging_subscriber_skips_to_oldest_retained() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.emit_started(&format!("agent-{i}"));
        }
        assert_eq!(sub.try_next().map(|e| e.seq), Some(3));
        assert_eq!(sub.try_next().map(|e| e.seq), Some(4));
        assert!(sub.try_next().is_none());
        assert_eq!(sub.skipped(), 3);
    }

    #[test]
    fn reading_does_not_consume_for_others() {
        let bus = EventBus::new(8);
        bus.emit_error("a", "boom");
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert!(first.try_next().is_some());
        assert!(second.try_next().is_some());
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn stale_handle_does_not_close_newer_session() {
        let bus = EventBus::new(8);
        let first = bus.start_stream();
        let second = bus.start_stream();
        drop(first);
        assert!(!bus.is_closed());
        second.close();
        assert!(bus.is_closed());
    }

    #[test]
    fn progress_before_first_completion_has_no_eta() {
        let p = calculate_progress_with_elapsed(0, 4, Duration::from_secs(10));
        assert_eq!(p.percent_complete, 0.0);
        assert_eq!(p.eta_seconds, None);
    }

    #[test]
    fn progress_eta_scales_with_remaining() {
        let p = calculate_progress_with_elapsed(1, 4, Duration::from_secs(10));
        assert_eq!(p.percent_complete, 25.0);
        assert_eq!(p.eta_seconds, Some(30.0));

        let done = calculate_progress_with_elapsed(4, 4, Duration::from_secs(10));
        assert_eq!(done.percent_complete, 100.0);
        assert_eq!(done.eta_seconds, Some(0.0));
    }

    #[test]
    fn progress_with_zero_total_is_zero_percent() {
        let p = calculate_progress_with_elapsed(0, 0, Duration::from_secs(1));
        assert_eq!(p.percent_complete, 0.0);
        assert!(p.eta_seconds.is_none());
    }

    #[test]
    fn tap_sees_events_the_ring_buffer_evicted() {
        let bus = EventBus::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(bus.clone()).with_tap(tx);
        sink.started("a");
        sink.error("a", "boom");
        sink.started("b");
        drop(sink);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push((event.seq, event.kind_str()));
        }
        assert_eq!(seen, vec![(0, "started"), (1, "error"), (2, "started")]);
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn tap_only_sink_numbers_its_own_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::disabled().with_tap(tx);
        assert!(sink.is_enabled());
        sink.started("a");
        sink.started("b");
        assert_eq!(rx.try_recv().map(|e| e.seq).ok(), Some(0));
        assert_eq!(rx.try_recv().map(|e| e.seq).ok(), Some(1));
        assert!(!EventSink::disabled().is_enabled());
    }

    #[test]
    fn event_serializes_flat_with_type_tag() {
        let bus = EventBus::new(4);
        bus.emit_progress("perf", serde_json::json!({"completed": 1}));
        let json = serde_json::to_value(&bus.snapshot()[0]).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["agent"], "perf");
        assert_eq!(json["payload"]["completed"], 1);
        assert_eq!(json["seq"], 0);
    }
}
