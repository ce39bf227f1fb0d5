//! The glasses as one device: command surface plus telemetry surface.
//!
//! [`GlassesConnection`] wires the pieces together. Two [`UartClient`]s carry
//! the links, the driver pump turns their notifications into events and
//! snapshots, and the heartbeat, burst and validator tasks run alongside.
//! Everything is torn down when the connection is dropped.

mod links;

pub use links::CommandReply;

use std::sync::Arc;

use futures::future::join_all;
use futures::stream::BoxStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::burst::{BurstEncoder, BurstStatus};
use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::heartbeat::{HeartbeatEvent, HeartbeatSupervisor, JitterSource, LensHeartbeatState, RandomJitter};
use crate::protocol::opcodes::OP_BATTERY;
use crate::protocol::{ScreenStatus, SendTextBuilder, commands, send_text};
use crate::stream::{broadcast_stream, watch_stream};
use crate::telemetry::{Snapshot, ValidatorHandle};
use crate::text::TextPaginator;
use crate::transport::{Peripheral, UartClient};
use crate::types::{
    Clock, ConnectionState, ConsoleLine, EventKind, Lens, PerLens, SystemClock, Target, TelemetryEvent,
    UpdateRate,
};
use crate::{LinkError, Result};

use links::Links;

/// ATT header bytes that do not carry payload
const ATT_OVERHEAD: usize = 3;

/// Connection to a pair of lenses.
pub struct GlassesConnection {
    links: Links,
    config: EngineConfig,
    heartbeat: Arc<HeartbeatSupervisor>,
    burst: BurstEncoder,
    validator: ValidatorHandle,
    events: broadcast::Sender<TelemetryEvent>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    console: broadcast::Sender<ConsoleLine>,
    paginator: TextPaginator,
    text_frames: SendTextBuilder,
    cancel: CancellationToken,
}

impl std::fmt::Debug for GlassesConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlassesConnection")
            .field("links", &self.links)
            .field("burst", &self.burst)
            .finish_non_exhaustive()
    }
}

impl GlassesConnection {
    /// Build the engine around two peripherals with the wall clock and
    /// random jitter. Must be called inside a tokio runtime.
    ///
    /// Nothing is connected yet; call [`connect`](Self::connect).
    pub fn new(peripherals: PerLens<Arc<dyn Peripheral>>, config: EngineConfig) -> Result<Self> {
        Self::with_parts(peripherals, config, Arc::new(SystemClock), Arc::new(RandomJitter))
    }

    /// Like [`new`](Self::new) with an explicit clock and jitter source.
    pub fn with_parts(
        peripherals: PerLens<Arc<dyn Peripheral>>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
    ) -> Result<Self> {
        config.validate()?;

        let clients = PerLens::from_fn(|lens| {
            UartClient::new(lens, peripherals[lens].clone(), config.transport.clone(), clock.clone())
        });
        let links = Links::new(clients.clone(), clock.clone(), config.events.ack_timeout());
        let (console, _) = broadcast::channel(config.events.capacity.max(1));

        let heartbeat = Arc::new(HeartbeatSupervisor::spawn(
            config.heartbeat.clone(),
            links.clone(),
            clock.clone(),
            jitter,
            console.clone(),
        ));
        let burst = BurstEncoder::spawn(&config.burst, Arc::new(links.clone()));
        let channels = Driver::spawn(clients, heartbeat.clone(), &config.events, clock.clone());
        let validator =
            ValidatorHandle::spawn(config.validator.clone(), channels.snapshots.clone(), clock, console.clone());

        info!("Glasses connection ready");
        Ok(Self {
            links,
            paginator: TextPaginator::new(&config.paginator),
            config,
            heartbeat,
            burst,
            validator,
            events: channels.events,
            snapshots: channels.snapshots,
            console,
            text_frames: SendTextBuilder::new(),
            cancel: channels.cancel,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bring both links up concurrently. Both are attempted; if either
    /// fails, both links are closed and the first failure is returned.
    pub async fn connect(&self) -> Result<()> {
        let results = join_all(Lens::ALL.map(|lens| self.connect_lens(lens))).await;
        let result: Result<()> = results.into_iter().collect();
        if let Err(err) = &result {
            warn!(error = %err, "Connect failed, closing both links");
            self.disconnect().await;
        }
        result
    }

    pub async fn connect_lens(&self, lens: Lens) -> Result<()> {
        self.links.client(lens).connect().await
    }

    /// Close both links. Idempotent.
    pub async fn disconnect(&self) {
        join_all(Lens::ALL.map(|lens| self.disconnect_lens(lens))).await;
    }

    pub async fn disconnect_lens(&self, lens: Lens) {
        self.links.client(lens).close().await;
        self.links.reset_sequence(lens);
    }

    pub fn connection_state(&self, lens: Lens) -> ConnectionState {
        self.links.client(lens).connection_state()
    }

    pub fn watch_connection_state(&self, lens: Lens) -> watch::Receiver<ConnectionState> {
        self.links.client(lens).state()
    }

    /// Negotiated MTU of `lens`.
    pub fn mtu(&self, lens: Lens) -> u16 {
        *self.links.client(lens).mtu().borrow()
    }

    /// Write raw bytes (or a string's UTF-8) to every lens in `target`.
    pub async fn send(&self, payload: impl AsRef<[u8]>, target: Target) -> Result<()> {
        let bytes = payload.as_ref();
        for &lens in target.lenses() {
            self.links.write(lens, bytes).await?;
        }
        Ok(())
    }

    /// Write a command to one lens and wait for its ack.
    pub async fn command(&self, lens: Lens, bytes: &[u8]) -> Result<CommandReply> {
        self.links.command(lens, bytes).await
    }

    /// Ask `lens` for its battery level and wait for the report.
    pub async fn request_battery(&self, lens: Lens) -> Result<TelemetryEvent> {
        self.request(lens, &commands::battery_request(), |event| {
            (event.opcode == OP_BATTERY && matches!(event.kind, EventKind::Battery { .. })).then(|| event.clone())
        })
        .await
    }

    /// Ask `lens` for its firmware banner.
    pub async fn request_firmware(&self, lens: Lens) -> Result<String> {
        self.request(lens, &commands::firmware_request(), |event| match &event.kind {
            EventKind::Vitals(vitals) => vitals.firmware_version.clone(),
            _ => None,
        })
        .await
    }

    /// Poll the link's RSSI once.
    pub async fn request_signal(&self, lens: Lens) -> Result<i16> {
        self.links.client(lens).read_rssi().await.ok_or(LinkError::NotConnected { lens })
    }

    /// Write `bytes` and wait for the first event from `lens` that `extract`
    /// accepts. A failed ack for the same opcode ends the wait early.
    async fn request<T>(
        &self,
        lens: Lens,
        bytes: &[u8],
        extract: impl Fn(&TelemetryEvent) -> Option<T>,
    ) -> Result<T> {
        let opcode = bytes.first().copied().unwrap_or_default();
        let mut events = self.events.subscribe();
        self.links.write(lens, bytes).await?;

        let reply = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.lens != lens => {}
                    Ok(event) => {
                        if let EventKind::Ack(ack) = &event.kind {
                            if event.opcode == opcode && !ack.success {
                                return Err(LinkError::Rejected { lens, opcode, busy: ack.busy });
                            }
                        }
                        if let Some(value) = extract(&event) {
                            return Ok(value);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(lens = %lens, skipped, "Request watcher lagged"),
                    Err(RecvError::Closed) => return Err(LinkError::ChannelClosed { channel: "events" }),
                }
            }
        };
        let timeout = self.links.ack_timeout();
        tokio::time::timeout(timeout, reply).await.map_err(|_| LinkError::timeout(timeout))?
    }

    /// Paginate `text` and show it with the default text screen status.
    /// Returns the number of frames sent per lens.
    pub async fn send_text(&self, text: &str, target: Target) -> Result<usize> {
        self.send_text_with_status(text, ScreenStatus::TextShow, target).await
    }

    /// Paginate `text` into send-text frames, waiting for every lens in
    /// `target` to acknowledge each frame before sending the next.
    pub async fn send_text_with_status(&self, text: &str, status: ScreenStatus, target: Target) -> Result<usize> {
        let pagination = self.paginator.paginate(text);
        let chunks = pagination.to_byte_arrays(self.text_capacity(target));
        let total = chunks.len();
        debug!(pages = total, screens = pagination.screen_count(), "Sending text");

        for (page, chunk) in chunks.iter().enumerate() {
            let frame = self.text_frames.build(page, total, status, chunk);
            for &lens in target.lenses() {
                self.links.command(lens, &frame).await?;
            }
        }
        Ok(total)
    }

    /// Text bytes that fit in one send-text write for every lens in `target`.
    fn text_capacity(&self, target: Target) -> usize {
        let mtu = target.lenses().iter().map(|&lens| self.mtu(lens)).min().unwrap_or_default() as usize;
        mtu.saturating_sub(ATT_OVERHEAD + send_text::HEADER_SIZE).max(1)
    }

    /// Queue a multi-chunk transfer.
    pub fn send_burst(&self, subcommand: u8, payload: impl Into<Vec<u8>>, target: Target) -> Result<()> {
        if self.burst.enqueue(subcommand, payload, target) {
            Ok(())
        } else {
            Err(LinkError::QueueFull { queue: "burst" })
        }
    }

    /// Single HUD text frame, bypassing the burst queue.
    pub async fn send_hud_text(&self, text: &str, target: Target) -> bool {
        self.burst.send_text(text, target).await
    }

    pub async fn send_clear(&self, target: Target) -> bool {
        self.burst.send_clear(target).await
    }

    pub fn burst_status(&self) -> watch::Receiver<BurstStatus> {
        self.burst.status()
    }

    pub fn estimate_chunk_count(&self, payload_len: usize) -> usize {
        self.burst.estimate_chunk_count(payload_len)
    }

    /// Typed events from both lenses, from now on.
    pub fn events(&self) -> BoxStream<'static, TelemetryEvent> {
        broadcast_stream(self.events.subscribe())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.events.subscribe()
    }

    /// The current snapshot followed by every update, capped at `rate`.
    pub fn snapshots(&self, rate: UpdateRate) -> BoxStream<'static, Arc<Snapshot>> {
        watch_stream(self.snapshots.clone(), rate)
    }

    /// Snapshot stream at the configured default rate.
    pub fn default_snapshots(&self) -> BoxStream<'static, Arc<Snapshot>> {
        self.snapshots(self.config.events.snapshot_rate)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    /// Heartbeat skips and validator warnings.
    pub fn console(&self) -> BoxStream<'static, ConsoleLine> {
        broadcast_stream(self.console.subscribe())
    }

    pub fn heartbeat_events(&self) -> BoxStream<'static, HeartbeatEvent> {
        broadcast_stream(self.heartbeat.subscribe())
    }

    pub fn heartbeat_states(&self) -> watch::Receiver<PerLens<LensHeartbeatState>> {
        self.heartbeat.states()
    }

    /// Stop every background task and close both links. Idempotent.
    pub async fn shutdown(&self) {
        self.stop_tasks();
        self.disconnect().await;
    }

    fn stop_tasks(&self) {
        self.cancel.cancel();
        self.heartbeat.shutdown();
        self.burst.shutdown();
        self.validator.shutdown();
    }
}

impl Drop for GlassesConnection {
    fn drop(&mut self) {
        debug!("Dropping glasses connection");
        self.stop_tasks();
        for client in self.links.clients().iter().map(|(_, client)| client) {
            client.abort();
        }
    }
}
