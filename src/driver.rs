//! Driver spawns the event pump that turns lens notifications into state

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::EventConfig;
use crate::heartbeat::{HeartbeatEvent, HeartbeatSupervisor};
use crate::protocol::Dispatcher;
use crate::telemetry::{Snapshot, TelemetryRepository};
use crate::transport::UartClient;
use crate::types::{AckType, Clock, ConnectionState, EventKind, Lens, PerLens, RawFrame, TelemetryEvent};

/// Result of spawning the driver
pub struct DriverChannels {
    /// Typed events from both lenses; subscribe for a receiver
    pub events: broadcast::Sender<TelemetryEvent>,
    /// Latest telemetry snapshot
    pub snapshots: watch::Receiver<Arc<Snapshot>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the event pump
///
/// A single pump task owns the [`Dispatcher`] and the
/// [`TelemetryRepository`], so both have exactly one writer. It listens to
/// both transport clients, publishes every decoded event and the resulting
/// snapshot, and keeps the heartbeat supervisor informed about link and case
/// state.
pub struct Driver;

impl Driver {
    /// Spawn the pump for `clients`.
    ///
    /// The pump stops when the returned token is cancelled.
    pub fn spawn(
        clients: PerLens<UartClient>,
        heartbeat: Arc<HeartbeatSupervisor>,
        config: &EventConfig,
        clock: Arc<dyn Clock>,
    ) -> DriverChannels {
        let (events_tx, _) = broadcast::channel(config.capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::default()));
        let cancel = CancellationToken::new();

        let pump = Pump {
            dispatcher: Dispatcher::new(config.gesture_dedupe_ms),
            repository: TelemetryRepository::new(),
            heartbeat,
            events: events_tx.clone(),
            snapshots: snapshot_tx,
            clock,
            fed_lid_open: None,
            fed_in_case: PerLens::default(),
            frame_count: 0,
            lagged: 0,
        };
        tokio::spawn(pump.run(clients, cancel.clone()));

        DriverChannels { events: events_tx, snapshots: snapshot_rx, cancel }
    }
}

struct Pump {
    dispatcher: Dispatcher,
    repository: TelemetryRepository,
    heartbeat: Arc<HeartbeatSupervisor>,
    events: broadcast::Sender<TelemetryEvent>,
    snapshots: watch::Sender<Arc<Snapshot>>,
    clock: Arc<dyn Clock>,
    // Last values handed to the supervisor; `None` means never fed
    fed_lid_open: Option<Option<bool>>,
    fed_in_case: PerLens<Option<Option<bool>>>,
    frame_count: u64,
    lagged: u64,
}

impl Pump {
    async fn run(mut self, clients: PerLens<UartClient>, cancel: CancellationToken) {
        info!("Event pump started");
        let mut left_frames = clients.left.frames();
        let mut right_frames = clients.right.frames();
        let mut left_state = clients.left.state();
        let mut right_state = clients.right.state();
        let mut left_armed = clients.left.armed();
        let mut right_armed = clients.right.armed();
        let mut left_rssi = clients.left.rssi();
        let mut right_rssi = clients.right.rssi();
        let mut beats = self.heartbeat.subscribe();

        // Links may already be up when the pump starts.
        for (lens, client) in clients.iter() {
            self.on_state(lens, client.connection_state());
            self.heartbeat.update_lens_connection(lens, client.is_armed());
        }

        loop {
            let keep_going = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Event pump cancelled");
                    break;
                }
                frame = left_frames.recv() => self.on_recv(Lens::Left, frame),
                frame = right_frames.recv() => self.on_recv(Lens::Right, frame),
                changed = left_state.changed() => {
                    let state = *left_state.borrow_and_update();
                    self.on_state(Lens::Left, state);
                    changed.is_ok()
                }
                changed = right_state.changed() => {
                    let state = *right_state.borrow_and_update();
                    self.on_state(Lens::Right, state);
                    changed.is_ok()
                }
                changed = left_armed.changed() => {
                    self.heartbeat.update_lens_connection(Lens::Left, *left_armed.borrow_and_update());
                    changed.is_ok()
                }
                changed = right_armed.changed() => {
                    self.heartbeat.update_lens_connection(Lens::Right, *right_armed.borrow_and_update());
                    changed.is_ok()
                }
                changed = left_rssi.changed() => {
                    let rssi = *left_rssi.borrow_and_update();
                    self.on_rssi(Lens::Left, rssi);
                    changed.is_ok()
                }
                changed = right_rssi.changed() => {
                    let rssi = *right_rssi.borrow_and_update();
                    self.on_rssi(Lens::Right, rssi);
                    changed.is_ok()
                }
                beat = beats.recv() => match beat {
                    Ok(event) => {
                        self.on_heartbeat(event);
                        true
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Heartbeat receiver lagged");
                        true
                    }
                    Err(RecvError::Closed) => false,
                },
            };
            if !keep_going {
                debug!("Event pump source closed, shutting down");
                break;
            }
        }

        info!(frames = self.frame_count, lagged = self.lagged, "Event pump ended");
    }

    fn on_recv(&mut self, lens: Lens, frame: Result<RawFrame, RecvError>) -> bool {
        match frame {
            Ok(frame) => {
                self.on_frame(&frame);
                true
            }
            Err(RecvError::Lagged(skipped)) => {
                self.lagged += skipped;
                warn!(lens = %lens, skipped, total = self.lagged, "Frame receiver lagged, frames dropped");
                true
            }
            Err(RecvError::Closed) => false,
        }
    }

    fn on_frame(&mut self, frame: &RawFrame) {
        self.frame_count += 1;
        let events = self.dispatcher.dispatch(frame);
        trace!(lens = %frame.lens, events = events.len(), frame = self.frame_count, "Frame dispatched");

        for event in events {
            let snapshot = self.repository.apply(&event);
            self.feed_heartbeat(&event, &snapshot);
            self.snapshots.send_replace(snapshot);
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    fn feed_heartbeat(&mut self, event: &TelemetryEvent, snapshot: &Snapshot) {
        let lens = event.lens;
        if let EventKind::Ack(_) = event.kind {
            self.heartbeat.on_ack(lens, event.timestamp, AckType::Binary);
            return;
        }

        let in_case = snapshot.lens(lens).in_case;
        if self.fed_in_case[lens] != Some(in_case) {
            debug!(lens = %lens, ?in_case, "In-case state changed");
            self.heartbeat.update_in_case(lens, in_case);
            self.fed_in_case[lens] = Some(in_case);
        }

        let lid_open = snapshot.case.lid_open.or(snapshot.case_open);
        if self.fed_lid_open != Some(lid_open) {
            debug!(?lid_open, "Lid state changed");
            self.heartbeat.update_lid_open(lid_open);
            self.fed_lid_open = Some(lid_open);
        }
    }

    fn on_state(&mut self, lens: Lens, state: ConnectionState) {
        debug!(lens = %lens, state = %state, "Connection state");
        match state {
            ConnectionState::Connected => {
                self.repository.set_connected(lens, true);
            }
            ConnectionState::Disconnected => {
                self.dispatcher.reset(lens);
                self.fed_in_case[lens] = None;
                if let Some(snapshot) = self.repository.set_connected(lens, false) {
                    info!("Every lens disconnected, telemetry reset");
                    self.fed_lid_open = None;
                    self.snapshots.send_replace(snapshot);
                }
            }
            ConnectionState::Connecting => {}
        }
    }

    fn on_rssi(&mut self, lens: Lens, rssi: Option<i16>) {
        if rssi.is_none() && self.repository.snapshot().lens(lens).rssi.is_none() {
            return;
        }
        let snapshot = self.repository.set_rssi(lens, rssi, self.clock.now_millis());
        self.snapshots.send_replace(snapshot);
    }

    fn on_heartbeat(&mut self, event: HeartbeatEvent) {
        let snapshot = match event {
            HeartbeatEvent::Success { lens, timestamp, latency_ms, .. } => {
                let pinged_at = timestamp.saturating_sub(latency_ms.unwrap_or(0));
                self.repository.update_heartbeat(lens, pinged_at, timestamp, 0, timestamp)
            }
            HeartbeatEvent::Miss { lens, timestamp, miss_count, .. } => {
                self.repository.update_heartbeat(lens, timestamp, 0, miss_count, timestamp)
            }
            HeartbeatEvent::Skipped { .. } => return,
        };
        self.snapshots.send_replace(snapshot);
    }
}
