//! Multi-chunk transfers.
//!
//! Payloads too large for one write are cut into numbered chunks:
//!
//! ```text
//! [0x06, len_lo, len_hi, seq, subcommand, total, index] + slice
//! ```
//!
//! `len` is the chunk length including the 7-byte header. `seq` is shared by
//! every burst from one encoder and wraps at 256. A single consumer task sends
//! one burst completely before starting the next, pausing between chunks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BurstConfig;
use crate::protocol::opcodes::{OP_BURST, OP_BURST_TEXT, OP_HEARTBEAT};
use crate::types::Target;

pub const HEADER_SIZE: usize = 7;
/// Largest slice whose chunk length still fits the 16-bit length field.
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize - HEADER_SIZE;
/// Longest HUD text, in bytes, the one-byte length field can describe.
pub const MAX_HUD_TEXT_LEN: usize = u8::MAX as usize;

/// Write path used by the burst consumer.
#[async_trait::async_trait]
pub trait BurstWriter: Send + Sync + 'static {
    /// Returns `false` when the write could not be queued on every target.
    async fn write_chunk(&self, bytes: &[u8], target: Target) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstRequest {
    pub subcommand: u8,
    pub payload: Vec<u8>,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub sequence: u8,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BurstResult {
    #[default]
    Idle,
    Success,
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BurstStatus {
    pub active: bool,
    pub sent_chunks: usize,
    pub total_chunks: usize,
    pub last_sequence: Option<u8>,
    pub result: BurstResult,
}

/// Pure chunker owning the shared sequence counter.
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: usize,
    sequence: AtomicU8,
}

impl ChunkEncoder {
    /// `chunk_size` is clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE), sequence: AtomicU8::new(0) }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `ceil(len / chunk_size)`, and 1 for an empty payload.
    pub fn estimate_chunk_count(&self, payload_len: usize) -> usize {
        payload_len.div_ceil(self.chunk_size).max(1)
    }

    pub fn encode(&self, subcommand: u8, payload: &[u8]) -> Vec<EncodedChunk> {
        if payload.is_empty() {
            return vec![self.chunk(subcommand, 0, 1, &[])];
        }
        let total = self.estimate_chunk_count(payload.len());
        payload
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(index, slice)| self.chunk(subcommand, index, total, slice))
            .collect()
    }

    fn chunk(&self, subcommand: u8, index: usize, total: usize, slice: &[u8]) -> EncodedChunk {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let length = u16::try_from(HEADER_SIZE + slice.len()).unwrap_or(u16::MAX);
        let [len_lo, len_hi] = length.to_le_bytes();
        let mut bytes = Vec::with_capacity(HEADER_SIZE + slice.len());
        bytes.extend_from_slice(&[
            OP_BURST,
            len_lo,
            len_hi,
            sequence,
            subcommand,
            total as u8,
            index as u8,
        ]);
        bytes.extend_from_slice(slice);
        EncodedChunk { sequence, bytes }
    }
}

/// `[0x09, len, 0x00] + text`, a single-write HUD text frame.
///
/// Text longer than [`MAX_HUD_TEXT_LEN`] bytes is cut at the last char
/// boundary that fits.
pub fn hud_text_frame(text: &str) -> Vec<u8> {
    let mut end = text.len().min(MAX_HUD_TEXT_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    if end < text.len() {
        warn!(len = text.len(), kept = end, "HUD text truncated");
    }
    let bytes = &text.as_bytes()[..end];
    let mut frame = Vec::with_capacity(3 + bytes.len());
    frame.extend_from_slice(&[OP_BURST_TEXT, end as u8, 0x00]);
    frame.extend_from_slice(bytes);
    frame
}

/// `[0x25, 0x00]`, clears the HUD.
pub fn clear_frame() -> Vec<u8> {
    vec![OP_HEARTBEAT, 0x00]
}

/// Handle to the burst consumer task.
pub struct BurstEncoder {
    queue: mpsc::Sender<BurstRequest>,
    status: watch::Receiver<BurstStatus>,
    encoder: Arc<ChunkEncoder>,
    writer: Arc<dyn BurstWriter>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BurstEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstEncoder")
            .field("status", &*self.status.borrow())
            .field("running", &!self.cancel.is_cancelled())
            .finish()
    }
}

impl BurstEncoder {
    pub fn spawn(config: &BurstConfig, writer: Arc<dyn BurstWriter>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(BurstStatus::default());
        let encoder = Arc::new(ChunkEncoder::new(config.chunk_size));
        let cancel = CancellationToken::new();

        tokio::spawn(consume(
            queue_rx,
            encoder.clone(),
            writer.clone(),
            status_tx,
            Duration::from_millis(config.inter_chunk_delay_ms),
            cancel.clone(),
        ));

        Self { queue: queue_tx, status: status_rx, encoder, writer, cancel }
    }

    /// Queue a burst without waiting. Returns `false` when it was dropped.
    pub fn enqueue(&self, subcommand: u8, payload: impl Into<Vec<u8>>, target: Target) -> bool {
        if self.cancel.is_cancelled() {
            warn!("Burst dropped, encoder shut down");
            return false;
        }
        let request = BurstRequest { subcommand, payload: payload.into(), target };
        match self.queue.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(subcommand = request.subcommand, len = request.payload.len(), "Burst dropped, queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Burst dropped, consumer stopped");
                false
            }
        }
    }

    pub fn status(&self) -> watch::Receiver<BurstStatus> {
        self.status.clone()
    }

    pub fn estimate_chunk_count(&self, payload_len: usize) -> usize {
        self.encoder.estimate_chunk_count(payload_len)
    }

    /// Write a HUD text frame directly, bypassing the queue.
    pub async fn send_text(&self, text: &str, target: Target) -> bool {
        self.writer.write_chunk(&hud_text_frame(text), target).await
    }

    pub async fn send_clear(&self, target: Target) -> bool {
        self.writer.write_chunk(&clear_frame(), target).await
    }

    /// Stop the consumer. Queued bursts are discarded. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Burst encoder shutdown requested");
            self.cancel.cancel();
        }
    }
}

impl Drop for BurstEncoder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn consume(
    mut queue: mpsc::Receiver<BurstRequest>,
    encoder: Arc<ChunkEncoder>,
    writer: Arc<dyn BurstWriter>,
    status: watch::Sender<BurstStatus>,
    delay: Duration,
    cancel: CancellationToken,
) {
    info!("Burst consumer started");
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = send_burst(&request, &encoder, writer.as_ref(), &status, delay) => {}
        }
    }
    info!("Burst consumer stopped");
}

async fn send_burst(
    request: &BurstRequest,
    encoder: &ChunkEncoder,
    writer: &dyn BurstWriter,
    status: &watch::Sender<BurstStatus>,
    delay: Duration,
) {
    let chunks = encoder.encode(request.subcommand, &request.payload);
    let total = chunks.len();
    debug!(subcommand = request.subcommand, len = request.payload.len(), total, "Burst started");
    status.send_replace(BurstStatus { active: true, total_chunks: total, ..BurstStatus::default() });

    for (index, chunk) in chunks.iter().enumerate() {
        if !writer.write_chunk(&chunk.bytes, request.target).await {
            warn!(index, total, sequence = chunk.sequence, "Burst halted, write failed");
            status.send_replace(BurstStatus {
                active: false,
                sent_chunks: index,
                total_chunks: total,
                last_sequence: Some(chunk.sequence),
                result: BurstResult::Failure("write failed".into()),
            });
            return;
        }
        let more = index + 1 < total;
        status.send_replace(BurstStatus {
            active: more,
            sent_chunks: index + 1,
            total_chunks: total,
            last_sequence: Some(chunk.sequence),
            result: if more { BurstResult::Idle } else { BurstResult::Success },
        });
        if more {
            tokio::time::sleep(delay).await;
        }
    }
    debug!(total, "Burst complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Clock, TokioClock};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct RecordingWriter {
        clock: TokioClock,
        /// Writes succeed until this many have been made
        fail_after: usize,
        count: AtomicUsize,
        writes: Mutex<Vec<(u64, Vec<u8>, Target)>>,
    }

    impl RecordingWriter {
        fn new(fail_after: usize) -> Arc<Self> {
            Arc::new(Self {
                clock: TokioClock::new(),
                fail_after,
                count: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
            })
        }

        fn writes(&self) -> Vec<(u64, Vec<u8>, Target)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BurstWriter for RecordingWriter {
        async fn write_chunk(&self, bytes: &[u8], target: Target) -> bool {
            if self.count.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return false;
            }
            self.writes.lock().unwrap().push((self.clock.now_millis(), bytes.to_vec(), target));
            true
        }
    }

    fn config() -> BurstConfig {
        BurstConfig { chunk_size: 4, inter_chunk_delay_ms: 30, queue_capacity: 4 }
    }

    #[test]
    fn chunk_headers_carry_length_sequence_and_position() {
        let encoder = ChunkEncoder::new(4);
        let chunks = encoder.encode(0x02, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].bytes, vec![0x06, 11, 0, 0, 0x02, 2, 0, 1, 2, 3, 4]);
        assert_eq!(chunks[1].bytes, vec![0x06, 9, 0, 1, 0x02, 2, 1, 5, 6]);

        // The counter carries over into the next burst.
        let next = encoder.encode(0x02, &[]);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].bytes, vec![0x06, 7, 0, 2, 0x02, 1, 0]);
    }

    #[test]
    fn large_chunks_use_little_endian_length() {
        let encoder = ChunkEncoder::new(300);
        let chunks = encoder.encode(0x01, &[0xAA; 300]);
        assert_eq!(&chunks[0].bytes[1..3], &[0x33, 0x01]);
    }

    #[test]
    fn chunk_count_estimate() {
        let encoder = ChunkEncoder::new(180);
        assert_eq!(encoder.estimate_chunk_count(0), 1);
        assert_eq!(encoder.estimate_chunk_count(180), 1);
        assert_eq!(encoder.estimate_chunk_count(181), 2);
        assert_eq!(ChunkEncoder::new(0).chunk_size(), 1);
        assert_eq!(ChunkEncoder::new(usize::MAX).chunk_size(), MAX_CHUNK_SIZE);
    }

    #[test]
    fn largest_chunk_length_fits_header() {
        let encoder = ChunkEncoder::new(70_000);
        let chunks = encoder.encode(0x01, &vec![0x55; 70_000]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0].bytes[1..3], &[0xFF, 0xFF]);
        assert_eq!(chunks[0].bytes.len(), u16::MAX as usize);
        let tail = (HEADER_SIZE + 70_000 - MAX_CHUNK_SIZE) as u16;
        assert_eq!(&chunks[1].bytes[1..3], &tail.to_le_bytes());
    }

    #[test]
    fn text_and_clear_frames() {
        assert_eq!(hud_text_frame("Hi"), vec![0x09, 2, 0x00, b'H', b'i']);
        assert_eq!(clear_frame(), vec![0x25, 0x00]);
    }

    #[test]
    fn long_hud_text_is_cut_on_a_char_boundary() {
        let ascii = "x".repeat(300);
        let frame = hud_text_frame(&ascii);
        assert_eq!(frame[1], 255);
        assert_eq!(frame.len(), 3 + 255);

        // 'é' is two bytes, so 255 falls inside the 128th char.
        let accented = "é".repeat(200);
        let frame = hud_text_frame(&accented);
        assert_eq!(frame[1], 254);
        assert_eq!(std::str::from_utf8(&frame[3..]).unwrap(), "é".repeat(127));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_paced_between_chunks_only() {
        let writer = RecordingWriter::new(usize::MAX);
        let encoder = BurstEncoder::spawn(&config(), writer.clone());
        let mut status = encoder.status();

        assert!(encoder.enqueue(0x01, vec![0u8; 10], Target::Right));
        let done = status.wait_for(|s| s.result == BurstResult::Success).await.unwrap().clone();
        assert_eq!(done.sent_chunks, 3);
        assert_eq!(done.total_chunks, 3);
        assert_eq!(done.last_sequence, Some(2));
        assert!(!done.active);

        let writes = writer.writes();
        let times: Vec<u64> = writes.iter().map(|(t, _, _)| *t).collect();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= 30 && times[2] - times[1] >= 30);
        assert!(writes.iter().all(|(_, _, target)| *target == Target::Right));
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_halts_the_burst() {
        let writer = RecordingWriter::new(1);
        let encoder = BurstEncoder::spawn(&config(), writer.clone());
        let mut status = encoder.status();

        encoder.enqueue(0x01, vec![0u8; 12], Target::Both);
        let failed = status
            .wait_for(|s| matches!(s.result, BurstResult::Failure(_)))
            .await
            .unwrap()
            .clone();
        assert_eq!(failed.sent_chunks, 1);
        assert_eq!(failed.last_sequence, Some(1));
        assert_eq!(failed.result, BurstResult::Failure("write failed".into()));
        assert_eq!(writer.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_do_not_interleave() {
        let writer = RecordingWriter::new(usize::MAX);
        let encoder = BurstEncoder::spawn(&config(), writer.clone());
        let mut status = encoder.status();

        encoder.enqueue(0x01, vec![1u8; 8], Target::Left);
        encoder.enqueue(0x02, vec![2u8; 8], Target::Left);
        status.wait_for(|s| s.result == BurstResult::Success && s.last_sequence == Some(3)).await.unwrap();

        let subcommands: Vec<u8> = writer.writes().iter().map(|(_, bytes, _)| bytes[4]).collect();
        assert_eq!(subcommands, vec![0x01, 0x01, 0x02, 0x02]);
    }

    #[tokio::test]
    async fn full_queue_drops_requests() {
        let writer = RecordingWriter::new(usize::MAX);
        let config = BurstConfig { queue_capacity: 1, ..config() };
        let encoder = BurstEncoder::spawn(&config, writer);

        // The consumer has not run yet on this single-threaded runtime.
        assert!(encoder.enqueue(0x01, vec![1], Target::Left));
        assert!(!encoder.enqueue(0x01, vec![2], Target::Left));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_rejects_new_work() {
        let writer = RecordingWriter::new(usize::MAX);
        let encoder = BurstEncoder::spawn(&config(), writer.clone());
        encoder.shutdown();
        encoder.shutdown();
        assert!(!encoder.enqueue(0x01, vec![1], Target::Left));

        assert!(encoder.send_text("Hi", Target::Right).await);
        assert!(encoder.send_clear(Target::Right).await);
        assert_eq!(writer.writes()[1].1, vec![0x25, 0x00]);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chunk_count_and_sequences(len in 0usize..2_000, chunk_size in 1usize..256, bursts in 1usize..4) {
                let encoder = ChunkEncoder::new(chunk_size);
                let payload = vec![0x5Au8; len];
                let mut expected_sequence = 0u8;
                for _ in 0..bursts {
                    let chunks = encoder.encode(0x07, &payload);
                    prop_assert_eq!(chunks.len(), len.div_ceil(chunk_size).max(1));
                    let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.bytes[HEADER_SIZE..].to_vec()).collect();
                    prop_assert_eq!(&rebuilt, &payload);
                    for chunk in &chunks {
                        prop_assert_eq!(chunk.sequence, expected_sequence);
                        expected_sequence = expected_sequence.wrapping_add(1);
                    }
                }
            }
        }
    }
}
