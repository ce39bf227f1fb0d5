//! Per-lens UART transport client.
//!
//! A [`UartClient`] owns the link state of one lens. It brings the link up
//! (connect, discovery, MTU, notification arming), forwards notifications as
//! [`RawFrame`]s on a broadcast channel and publishes its connection state,
//! armed flag, MTU and RSSI on watch channels.
//!
//! Any link-level failure closes the client. It never reconnects on its own;
//! reconnect policy belongs to the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::protocol::looks_like_ack;
use crate::types::{Clock, ConnectionState, Lens, RawFrame, to_hex};
use crate::{LinkError, Result};

use super::peripheral::{Peripheral, PeripheralEvent};
use super::uuids::{CCCD, CCCD_NOTIFY, CCCD_NOTIFY_INDICATE, DEFAULT_MTU, NUS_RX, NUS_SERVICE, NUS_TX};

/// Resolved RX characteristic and the bring-up session of the current link.
#[derive(Default)]
struct LinkSlots {
    rx: Option<Uuid>,
    session: Option<CancellationToken>,
    /// Bring-up stopped at discovery with the link still up.
    halted: bool,
}

struct Shared {
    lens: Lens,
    peripheral: Arc<dyn Peripheral>,
    config: TransportConfig,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ConnectionState>,
    armed: watch::Sender<bool>,
    rssi: watch::Sender<Option<i16>>,
    mtu: watch::Sender<u16>,
    frames: broadcast::Sender<RawFrame>,
    slots: Mutex<LinkSlots>,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, LinkSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport client for one lens. Cloning yields another handle to the same
/// link.
#[derive(Clone)]
pub struct UartClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for UartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartClient")
            .field("lens", &self.shared.lens)
            .field("state", &*self.shared.state.borrow())
            .field("armed", &*self.shared.armed.borrow())
            .finish()
    }
}

impl UartClient {
    pub fn new(
        lens: Lens,
        peripheral: Arc<dyn Peripheral>,
        config: TransportConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (armed, _) = watch::channel(false);
        let (rssi, _) = watch::channel(None);
        let (mtu, _) = watch::channel(DEFAULT_MTU);
        let (frames, _) = broadcast::channel(config.frame_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                lens,
                peripheral,
                config,
                clock,
                state,
                armed,
                rssi,
                mtu,
                frames,
                slots: Mutex::new(LinkSlots::default()),
            }),
        }
    }

    pub fn lens(&self) -> Lens {
        self.shared.lens
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_armed(&self) -> bool {
        *self.shared.armed.borrow()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn armed(&self) -> watch::Receiver<bool> {
        self.shared.armed.subscribe()
    }

    pub fn rssi(&self) -> watch::Receiver<Option<i16>> {
        self.shared.rssi.subscribe()
    }

    pub fn mtu(&self) -> watch::Receiver<u16> {
        self.shared.mtu.subscribe()
    }

    /// Inbound notifications. Slow receivers lose the oldest frames.
    pub fn frames(&self) -> broadcast::Receiver<RawFrame> {
        self.shared.frames.subscribe()
    }

    /// Bring the link up. A no-op while already connecting or connected,
    /// except after a bring-up that halted at discovery: that link is closed
    /// and brought up again.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let lens = shared.lens;
        let halted = shared.slots().halted;
        if halted {
            info!(lens = %lens, "Retrying halted bring-up");
            self.close().await;
        }
        let started = shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(lens = %lens, "Connect ignored, link already active");
            return Ok(());
        }

        let session = CancellationToken::new();
        shared.slots().session = Some(session.clone());
        let events = shared.peripheral.events();
        info!(lens = %lens, "Connecting");

        tokio::select! {
            biased;
            result = self.bring_up(events, session.clone()) => result,
            _ = session.cancelled() => {
                Err(LinkError::connection_failed(lens, "link closed during bring-up"))
            }
        }
    }

    async fn bring_up(
        &self,
        events: broadcast::Receiver<PeripheralEvent>,
        session: CancellationToken,
    ) -> Result<()> {
        let shared = &self.shared;
        let lens = shared.lens;
        let config = &shared.config;

        if let Err(err) = shared.peripheral.connect().await {
            error!(lens = %lens, error = %err, "Link connect failed");
            self.close().await;
            return Err(err);
        }
        shared.state.send_replace(ConnectionState::Connected);
        info!(lens = %lens, "Link up");
        self.spawn_reader(events, session.clone());

        let services = match shared.peripheral.discover().await {
            Ok(services) => services,
            Err(err) => {
                error!(lens = %lens, error = %err, "Service discovery failed");
                self.close().await;
                return Err(err);
            }
        };

        // Missing service or characteristics leave the link up but unusable.
        let Some(service) = services.iter().find(|svc| svc.uuid == NUS_SERVICE) else {
            error!(lens = %lens, "UART service not found, link unusable");
            shared.slots().halted = true;
            return Err(LinkError::Discovery { lens, reason: "UART service not found".into() });
        };
        let has = |uuid: Uuid| service.characteristics.contains(&uuid);
        if let Some(missing) = [NUS_RX, NUS_TX].into_iter().find(|&uuid| !has(uuid)) {
            error!(lens = %lens, uuid = %missing, "UART characteristic missing, link unusable");
            shared.slots().halted = true;
            return Err(LinkError::MissingCharacteristic { lens, uuid: missing });
        }
        shared.slots().rx = Some(NUS_RX);

        tokio::time::sleep(config.step_delay()).await;
        match shared.peripheral.request_mtu(config.desired_mtu).await {
            Ok(mtu) => {
                info!(lens = %lens, requested = config.desired_mtu, mtu, "MTU negotiated");
                shared.mtu.send_replace(mtu);
            }
            Err(err) => {
                error!(lens = %lens, error = %err, "MTU request failed");
                self.close().await;
                return Err(err);
            }
        }

        tokio::time::sleep(config.step_delay()).await;
        if let Err(err) = self.arm(NUS_TX).await {
            error!(lens = %lens, error = %err, "Notification arming failed");
            self.close().await;
            return Err(err);
        }
        shared.armed.send_replace(true);
        info!(lens = %lens, "Notifications armed");

        if config.warm_up && !self.write(b"ver\n", false).await {
            warn!(lens = %lens, "Warm-up write failed");
        }

        if let Some(interval_ms) = config.rssi_poll_interval_ms.filter(|&ms| ms > 0) {
            self.spawn_rssi_poll(Duration::from_millis(interval_ms), session);
        }
        Ok(())
    }

    /// Write the CCCD, falling back to the notify+indicate value and then
    /// retrying the plain value.
    async fn arm(&self, tx: Uuid) -> Result<()> {
        let config = &self.shared.config;
        if self.arm_attempt(tx, CCCD_NOTIFY).await {
            return Ok(());
        }
        if self.arm_attempt(tx, CCCD_NOTIFY_INDICATE).await {
            return Ok(());
        }
        for retry in 1..=config.arm_retries {
            tokio::time::sleep(config.arm_retry_delay()).await;
            debug!(lens = %self.shared.lens, retry, "Retrying notification arming");
            if self.arm_attempt(tx, CCCD_NOTIFY).await {
                return Ok(());
            }
        }
        Err(LinkError::Arming { lens: self.shared.lens, attempts: 2 + config.arm_retries })
    }

    async fn arm_attempt(&self, tx: Uuid, value: [u8; 2]) -> bool {
        let shared = &self.shared;
        let write = shared.peripheral.write_descriptor(tx, CCCD, &value);
        match tokio::time::timeout(shared.config.arm_timeout(), write).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(lens = %shared.lens, value = %to_hex(&value), error = %err, "CCCD write failed");
                false
            }
            Err(_) => {
                warn!(lens = %shared.lens, value = %to_hex(&value), "CCCD write timed out");
                false
            }
        }
    }

    /// Queue a write on RX. Returns `false` when RX is not resolved or the
    /// link rejects the write.
    pub async fn write(&self, bytes: &[u8], with_response: bool) -> bool {
        let lens = self.shared.lens;
        let rx = self.shared.slots().rx;
        let Some(rx) = rx else {
            warn!(lens = %lens, len = bytes.len(), "Write dropped, RX characteristic not resolved");
            return false;
        };
        match self.shared.peripheral.write(rx, bytes, with_response).await {
            Ok(()) => {
                trace!(lens = %lens, hex = %to_hex(bytes), "TX");
                true
            }
            Err(err) => {
                warn!(lens = %lens, len = bytes.len(), error = %err, "Write rejected");
                false
            }
        }
    }

    /// Poll RSSI once. Updates the `rssi` watch on success.
    pub async fn read_rssi(&self) -> Option<i16> {
        let state = self.connection_state();
        if !state.is_connected() {
            return None;
        }
        match self.shared.peripheral.read_rssi().await {
            Ok(rssi) => {
                self.shared.rssi.send_replace(Some(rssi));
                Some(rssi)
            }
            Err(err) => {
                debug!(lens = %self.shared.lens, error = %err, "RSSI read failed");
                None
            }
        }
    }

    /// Tear the link down. Idempotent.
    pub async fn close(&self) {
        let shared = &self.shared;
        let session = {
            let mut slots = shared.slots();
            slots.rx = None;
            slots.halted = false;
            slots.session.take()
        };
        let Some(session) = session else {
            return;
        };
        session.cancel();
        shared.armed.send_replace(false);
        if let Err(err) = shared.peripheral.disconnect().await {
            debug!(lens = %shared.lens, error = %err, "Peripheral disconnect reported an error");
        }
        shared.state.send_replace(ConnectionState::Disconnected);
        shared.rssi.send_replace(None);
        shared.mtu.send_replace(DEFAULT_MTU);
        info!(lens = %shared.lens, "Link closed");
    }

    /// Stop the background tasks of the current session without touching the
    /// peripheral. Used from `Drop` paths that cannot await.
    pub fn abort(&self) {
        if let Some(session) = self.shared.slots().session.as_ref() {
            session.cancel();
        }
    }

    fn publish(&self, bytes: Vec<u8>) {
        let shared = &self.shared;
        if looks_like_ack(&bytes) {
            trace!(lens = %shared.lens, hex = %to_hex(&bytes), "RX [ACK]");
        } else {
            trace!(lens = %shared.lens, hex = %to_hex(&bytes), "RX");
        }
        let frame = RawFrame::new(shared.lens, shared.clock.now_millis(), bytes);
        // No subscribers is fine.
        let _ = shared.frames.send(frame);
    }

    fn spawn_reader(
        &self,
        mut events: broadcast::Receiver<PeripheralEvent>,
        session: CancellationToken,
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            let lens = client.shared.lens;
            loop {
                let event = tokio::select! {
                    _ = session.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(PeripheralEvent::Notification { characteristic, bytes }) => {
                        if characteristic == NUS_TX {
                            client.publish(bytes);
                        } else {
                            trace!(lens = %lens, %characteristic, "Ignoring foreign notification");
                        }
                    }
                    Ok(PeripheralEvent::Disconnected) => {
                        warn!(lens = %lens, "Peripheral disconnected");
                        client.close().await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(lens = %lens, skipped, "Peripheral events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(lens = %lens, "Peripheral event channel closed");
                        break;
                    }
                }
            }
            debug!(lens = %lens, "Notification reader stopped");
        });
    }

    fn spawn_rssi_poll(&self, every: Duration, session: CancellationToken) {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = session.cancelled() => break,
                    _ = ticker.tick() => {
                        client.read_rssi().await;
                    }
                }
            }
        });
    }
}
