//! # Fan-out Hub
//!
//! One [`Hub`] per stream, sitting between the Frame Pipeline and every consumer of
//! its output: MJPEG viewers and the scoring callback. The publish path
//! never blocks on subscriber I/O — each MJPEG subscriber gets its own
//! capacity-1 `watch` mailbox, so a slow subscriber's lag only ever
//! overwrites its own unread slot with the newest frame, and a second
//! `watch` channel gives the scoring subscriber the same latest-wins
//! semantics for free.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{trace, warn};

use crate::metrics::{SharedMetrics, StreamLabel};
use crate::pipeline::{encode_multipart_part, Frame};

/// One detection/analysis result produced by the scoring callback for a single
/// frame.
#[derive(Debug, Clone, Serialize)]
pub struct Score {
    pub label: String,
    pub value: f64,
}

/// The SSE event body, one per scored frame.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreEvent {
    pub timestamp: DateTime<Utc>,
    pub scores: Vec<Score>,
}

/// Pluggable, synchronous consumer of raw frames. Invoked from the Hub's scoring task; must not block for long, since
/// a slow callback simply delays when the *next* queued frame gets scored rather
/// than queueing — see the latest-wins loop in [`Hub::spawn_scoring_task`].
pub trait ScoringCallback: Send + Sync + 'static {
    fn score(&self, frame: &Frame) -> Vec<Score>;
}

/// Default callback used when no real detection model is wired in: reports the
/// mean luma of the JPEG payload bytes as a single placeholder score so the SSE
/// channel has something to carry end to end.
pub struct MeanByteScoring;

impl ScoringCallback for MeanByteScoring {
    fn score(&self, frame: &Frame) -> Vec<Score> {
        let payload = &frame.payload;
        if payload.is_empty() {
            return Vec::new();
        }
        let sum: u64 = payload.iter().map(|&b| b as u64).sum();
        let mean = sum as f64 / payload.len() as f64;
        vec![Score { label: "mean_byte".to_string(), value: mean }]
    }
}

const SCORE_CHANNEL_CAPACITY: usize = 64;
const SLOW_SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(30);

/// A published frame tagged with a monotonically increasing sequence number,
/// so a subscriber that only ever sees the latest slot can still tell how
/// many frames it missed in between.
type Mailslot = Option<(u64, Frame)>;

/// Per-stream broadcaster. Cheaply cloneable — every clone shares the same
/// channels and counters.
#[derive(Clone)]
pub struct Hub {
    stream_id: String,
    mailboxes: Arc<DashMap<u64, watch::Sender<Mailslot>>>,
    next_mailbox_id: Arc<AtomicU64>,
    frame_seq: Arc<AtomicU64>,
    latest_frame_tx: watch::Sender<Option<Frame>>,
    score_tx: broadcast::Sender<ScoreEvent>,
    subscriber_count: Arc<AtomicUsize>,
    metrics: SharedMetrics,
}

impl Hub {
    pub fn new(stream_id: impl Into<String>, metrics: SharedMetrics) -> Self {
        let (latest_frame_tx, _) = watch::channel(None);
        let (score_tx, _) = broadcast::channel(SCORE_CHANNEL_CAPACITY);
        Hub {
            stream_id: stream_id.into(),
            mailboxes: Arc::new(DashMap::new()),
            next_mailbox_id: Arc::new(AtomicU64::new(0)),
            frame_seq: Arc::new(AtomicU64::new(0)),
            latest_frame_tx,
            score_tx,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    /// Publish a newly-emitted frame. Never blocks: each subscriber's `watch`
    /// mailbox is a capacity-1 slot, so sending into it just overwrites
    /// whatever the subscriber hasn't read yet rather than queueing.
    pub fn publish(&self, frame: Frame) {
        let seq = self.frame_seq.fetch_add(1, Ordering::Relaxed);
        for mailbox in self.mailboxes.iter() {
            let _ = mailbox.send(Some((seq, frame.clone())));
        }
        let _ = self.latest_frame_tx.send(Some(frame));
    }

    /// Register a new MJPEG viewer. Allocates its own single-slot mailbox in
    /// the Hub; publishing never waits on how fast this subscriber drains it.
    pub fn subscribe_mjpeg(&self) -> MjpegSubscription {
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .active_mjpeg_subscribers
            .get_or_create(&StreamLabel { stream_id: self.stream_id.clone() })
            .inc();

        let id = self.next_mailbox_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        self.mailboxes.insert(id, tx);

        MjpegSubscription {
            mailbox_id: id,
            mailboxes: self.mailboxes.clone(),
            rx,
            stream_id: self.stream_id.clone(),
            metrics: self.metrics.clone(),
            subscriber_count: self.subscriber_count.clone(),
            last_seq: None,
            last_delivered: Instant::now(),
            closed: false,
        }
    }

    pub fn subscribe_scores(&self) -> broadcast::Receiver<ScoreEvent> {
        self.score_tx.subscribe()
    }

    pub fn active_mjpeg_subscribers(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Start the scoring task: awaits the latest frame, invokes `callback`
    /// synchronously, republishes the resulting scores to SSE subscribers. Runs
    /// until the Hub (and so the `watch::Sender`) is dropped.
    pub fn spawn_scoring_task(&self, callback: Arc<dyn ScoringCallback>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.latest_frame_tx.subscribe();
        let score_tx = self.score_tx.clone();
        let stream_id = self.stream_id.clone();
        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    break; // Hub dropped.
                }
                let Some(frame) = rx.borrow_and_update().clone() else { continue };
                let scores = callback.score(&frame);
                if scores.is_empty() {
                    continue;
                }
                let event = ScoreEvent { timestamp: frame.wall_ts, scores };
                // No subscribers is fine; broadcast::send only errors when the
                // receiver count is zero, which is the common case between SSE
                // clients.
                if score_tx.send(event).is_err() {
                    trace!(stream_id = %stream_id, "no score subscribers currently attached");
                }
            }
        })
    }
}

/// One MJPEG viewer's receive side. Lives inside the HTTP handler's response
/// stream for as long as the client is connected. Holds its own capacity-1
/// mailbox in the Hub and removes it on drop.
pub struct MjpegSubscription {
    mailbox_id: u64,
    mailboxes: Arc<DashMap<u64, watch::Sender<Mailslot>>>,
    rx: watch::Receiver<Mailslot>,
    stream_id: String,
    metrics: SharedMetrics,
    subscriber_count: Arc<AtomicUsize>,
    last_seq: Option<u64>,
    last_delivered: Instant,
    closed: bool,
}

impl MjpegSubscription {
    /// Await the next frame for this subscriber, applying latest-wins
    /// (overwrite-on-full mailbox) semantics and the 30s continuously-slow
    /// disconnect rule. Returns `None` once the worker stops or the
    /// subscriber has been slow for too long.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        if self.closed {
            return None;
        }
        loop {
            if self.rx.changed().await.is_err() {
                self.closed = true;
                return None; // Hub dropped the mailbox sender.
            }
            let Some((seq, frame)) = self.rx.borrow_and_update().clone() else {
                continue; // nothing published yet
            };

            if let Some(last_seq) = self.last_seq {
                let skipped = seq.saturating_sub(last_seq + 1);
                if skipped > 0 {
                    self.metrics
                        .mjpeg_frames_dropped_total
                        .get_or_create(&StreamLabel { stream_id: self.stream_id.clone() })
                        .inc_by(skipped);
                }
            }
            self.last_seq = Some(seq);

            if self.last_delivered.elapsed() >= SLOW_SUBSCRIBER_TIMEOUT {
                warn!(stream_id = %self.stream_id, "disconnecting continuously-slow MJPEG subscriber");
                self.closed = true;
                return None;
            }
            self.last_delivered = Instant::now();
            return Some(encode_multipart_part(&frame.payload));
        }
    }
}

impl Drop for MjpegSubscription {
    fn drop(&mut self) {
        self.mailboxes.remove(&self.mailbox_id);
        self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
        self.metrics
            .active_mjpeg_subscribers
            .get_or_create(&StreamLabel { stream_id: self.stream_id.clone() })
            .dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes as BytesAlias;
    use std::time::Instant as StdInstant;

    fn frame(payload: &[u8]) -> Frame {
        Frame {
            stream_id: "s1".to_string(),
            monotonic_ts: StdInstant::now(),
            wall_ts: Utc::now(),
            payload: BytesAlias::copy_from_slice(payload),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_frame() {
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let hub = Hub::new("s1", metrics);
        let mut sub = hub.subscribe_mjpeg();
        hub.publish(frame(b"abc"));
        let part = sub.next_part().await.unwrap();
        assert!(part.ends_with(b"abc"));
    }

    #[tokio::test]
    async fn slow_subscriber_sees_latest_frame_and_counts_the_skip() {
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let hub = Hub::new("s1", metrics.clone());
        let mut sub = hub.subscribe_mjpeg();

        hub.publish(frame(b"1"));
        hub.publish(frame(b"2"));
        hub.publish(frame(b"3"));

        // A subscriber that hasn't drained yet only ever sees the newest
        // frame in its mailbox, never a queue of all three.
        let part = sub.next_part().await.unwrap();
        assert!(part.ends_with(b"3"));

        let dropped = metrics
            .mjpeg_frames_dropped_total
            .get_or_create(&StreamLabel { stream_id: "s1".to_string() })
            .get();
        assert_eq!(dropped, 2);
    }

    #[tokio::test]
    async fn dropping_subscription_removes_its_mailbox() {
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let hub = Hub::new("s1", metrics);
        {
            let _sub = hub.subscribe_mjpeg();
            assert_eq!(hub.mailboxes.len(), 1);
        }
        assert_eq!(hub.mailboxes.len(), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_decrements_gauge() {
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let hub = Hub::new("s1", metrics);
        {
            let _sub = hub.subscribe_mjpeg();
            assert_eq!(hub.active_mjpeg_subscribers(), 1);
        }
        assert_eq!(hub.active_mjpeg_subscribers(), 0);
    }

    #[tokio::test]
    async fn scoring_task_republishes_scores() {
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let hub = Hub::new("s1", metrics);
        let mut score_rx = hub.subscribe_scores();
        let handle = hub.spawn_scoring_task(Arc::new(MeanByteScoring));
        hub.publish(frame(&[10, 20, 30]));
        let event = score_rx.recv().await.unwrap();
        assert_eq!(event.scores[0].label, "mean_byte");
        handle.abort();
    }
}
