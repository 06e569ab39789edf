//! # Frame Pipeline
//!
//! Parses the MJPEG byte stream coming out of an FFmpeg subprocess's stdout into
//! whole JPEG frames and gates emission to ≤5 FPS. Runs single-threaded,
//! inline in the Worker's stdout reader task — there is no parallelism to get wrong
//! here, just a rolling buffer and a clock.

use std::time::{Duration, Instant, SystemTime};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// 5 MiB buffer cap before a stream is considered desynced and discarded.
pub const MAX_BUFFER_BYTES: usize = 5 * 1024 * 1024;

/// The emission floor: successive frames are at least this far apart.
pub const EMIT_INTERVAL: Duration = Duration::from_millis(200);

const JPEG_START: [u8; 2] = [0xFF, 0xD8];
const JPEG_END: [u8; 2] = [0xFF, 0xD9];

/// One complete decoded frame, ephemeral — it exists only between the pipeline
/// parse and the last subscriber delivery.
#[derive(Debug, Clone)]
pub struct Frame {
    pub stream_id: String,
    pub monotonic_ts: Instant,
    pub wall_ts: DateTime<Utc>,
    pub payload: Bytes,
}

/// Scans a rolling byte buffer for `FF D8 .. FF D9` pairs.
#[derive(Debug, Default)]
struct JpegFramer {
    buf: BytesMut,
}

struct FeedOutcome {
    frames: Vec<Bytes>,
    overflowed: bool,
}

impl JpegFramer {
    fn push(&mut self, chunk: &[u8]) -> FeedOutcome {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, &JPEG_START) else {
                // No start marker in the whole buffer: discard everything except a
                // possible trailing 0xFF, which could be the first half of a start
                // marker split across this exact read boundary.
                if self.buf.len() > 1 {
                    let keep_from = self.buf.len() - 1;
                    let _ = self.buf.split_to(keep_from);
                }
                break;
            };
            if start > 0 {
                // Discard bytes before the start marker (§4.C.2).
                let _ = self.buf.split_to(start);
            }
            match find_marker(&self.buf[2..], &JPEG_END) {
                Some(offset) => {
                    let end = 2 + offset + 2; // inclusive of the FF D9 marker itself
                    let frame = self.buf.split_to(end).freeze();
                    frames.push(frame);
                }
                None => break, // frame not complete yet; wait for more bytes
            }
        }

        let overflowed = self.buf.len() > MAX_BUFFER_BYTES;
        if overflowed {
            self.buf.clear();
        }

        FeedOutcome { frames, overflowed }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    if haystack.len() < 2 {
        return None;
    }
    haystack.windows(2).position(|w| w == marker)
}

/// Monotonic-clock-driven 5 FPS gate.
#[derive(Debug)]
struct FpsGate {
    next_emit_at: Option<Instant>,
}

impl FpsGate {
    fn new() -> Self {
        FpsGate { next_emit_at: None }
    }

    fn should_emit(&mut self, now: Instant) -> bool {
        match self.next_emit_at {
            Some(next) if now < next => false,
            Some(next) => {
                self.next_emit_at = Some(next.max(now) + EMIT_INTERVAL);
                true
            }
            None => {
                self.next_emit_at = Some(now + EMIT_INTERVAL);
                true
            }
        }
    }
}

/// Outcome of feeding one chunk of subprocess stdout into the pipeline: the frames
/// that passed the FPS gate and are ready to publish, plus counts for the caller to
/// fold into the metrics surface.
#[derive(Debug, Default)]
pub struct PipelineTick {
    pub emitted: Vec<Frame>,
    pub dropped_by_gate: u64,
    pub buffer_overflows: u64,
}

/// Per-stream pipeline state: one instance lives inside the Worker's stdout reader
/// task for the lifetime of the subprocess.
pub struct FramePipeline {
    stream_id: String,
    framer: JpegFramer,
    gate: FpsGate,
}

impl FramePipeline {
    pub fn new(stream_id: impl Into<String>) -> Self {
        FramePipeline { stream_id: stream_id.into(), framer: JpegFramer::default(), gate: FpsGate::new() }
    }

    /// Feed a chunk of freshly-read bytes and get back whatever survived framing
    /// and the FPS gate.
    pub fn feed(&mut self, chunk: &[u8]) -> PipelineTick {
        let outcome = self.framer.push(chunk);
        let now = Instant::now();
        let mut tick = PipelineTick {
            buffer_overflows: outcome.overflowed as u64,
            ..Default::default()
        };

        for payload in outcome.frames {
            if self.gate.should_emit(now) {
                tick.emitted.push(Frame {
                    stream_id: self.stream_id.clone(),
                    monotonic_ts: now,
                    wall_ts: system_time_to_utc(SystemTime::now()),
                    payload,
                });
            } else {
                tick.dropped_by_gate += 1;
            }
        }
        tick
    }
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// MIME multipart boundary literal used by every MJPEG response.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// Frame one JPEG payload into a `multipart/x-mixed-replace` part.
pub fn encode_multipart_part(payload: &[u8]) -> Bytes {
    let header = format!(
        "\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    );
    let mut out = BytesMut::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

/// Final sentinel sent when a worker stops and the MJPEG connection ends.
pub fn encode_multipart_end() -> Bytes {
    Bytes::from(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n"))
}
