//! Test doubles shared by unit tests and benches.
//!
//! - [`FakePeripheral`] is a scriptable GATT peripheral that records every
//!   write and can answer writes with notifications
//! - [`ManualClock`] and [`FixedJitter`] make timing deterministic
//! - the free functions build common frames

#![cfg(any(test, feature = "benchmark"))]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::heartbeat::JitterSource;
use crate::transport::{Peripheral, PeripheralEvent, ServiceInfo};
use crate::transport::uuids::{NUS_RX, NUS_SERVICE, NUS_TX};
use crate::types::{Clock, Lens, RawFrame};
use crate::{LinkError, Result};

/// The UART service with both characteristics, as a healthy lens reports it.
pub fn nus_services() -> Vec<ServiceInfo> {
    vec![ServiceInfo {
        uuid: NUS_SERVICE,
        characteristics: vec![NUS_RX, NUS_TX],
    }]
}

/// Behaviour knobs for a [`FakePeripheral`].
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub fail_connect: bool,
    pub services: Vec<ServiceInfo>,
    /// Number of CCCD writes that fail before one succeeds
    pub arm_failures: usize,
    /// CCCD writes never complete
    pub hang_arming: bool,
    pub fail_writes: bool,
    pub fail_mtu: bool,
    /// Largest MTU the peripheral accepts
    pub max_mtu: u16,
    pub rssi: i16,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            fail_connect: false,
            services: nus_services(),
            arm_failures: 0,
            hang_arming: false,
            fail_writes: false,
            fail_mtu: false,
            max_mtu: 517,
            rssi: -60,
        }
    }
}

/// One recorded characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub characteristic: Uuid,
    pub bytes: Vec<u8>,
    pub with_response: bool,
}

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct Recorded {
    descriptor_writes: Vec<Vec<u8>>,
    mtu_requests: Vec<u16>,
    writes: Vec<WriteRecord>,
}

/// In-memory peripheral for one lens.
pub struct FakePeripheral {
    lens: Lens,
    script: Mutex<FakeScript>,
    recorded: Mutex<Recorded>,
    responder: Mutex<Option<Responder>>,
    events: broadcast::Sender<PeripheralEvent>,
    arm_failures_seen: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl std::fmt::Debug for FakePeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakePeripheral").field("lens", &self.lens).finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakePeripheral {
    pub fn new(lens: Lens) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            lens,
            script: Mutex::new(FakeScript::default()),
            recorded: Mutex::new(Recorded::default()),
            responder: Mutex::new(None),
            events,
            arm_failures_seen: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, edit: impl FnOnce(&mut FakeScript)) {
        edit(&mut lock(&self.script));
    }

    /// Answer every successful RX write with the returned notifications.
    pub fn respond_with(&self, responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static) {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    pub fn notify(&self, bytes: &[u8]) {
        self.notify_on(NUS_TX, bytes);
    }

    pub fn notify_on(&self, characteristic: Uuid, bytes: &[u8]) {
        let _ = self.events.send(PeripheralEvent::Notification { characteristic, bytes: bytes.to_vec() });
    }

    /// Simulate the link dropping.
    pub fn drop_link(&self) {
        let _ = self.events.send(PeripheralEvent::Disconnected);
    }

    pub fn descriptor_writes(&self) -> Vec<Vec<u8>> {
        lock(&self.recorded).descriptor_writes.clone()
    }

    pub fn mtu_requests(&self) -> Vec<u16> {
        lock(&self.recorded).mtu_requests.clone()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.recorded).writes.clone()
    }

    /// Bytes of every RX write, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|w| w.bytes).collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.recorded).writes.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Peripheral for FakePeripheral {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if lock(&self.script).fail_connect {
            return Err(LinkError::connection_failed_with_source(
                self.lens,
                "peripheral unreachable",
                anyhow!("fake link refused").into(),
            ));
        }
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<ServiceInfo>> {
        Ok(lock(&self.script).services.clone())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        lock(&self.recorded).mtu_requests.push(mtu);
        let script = lock(&self.script);
        if script.fail_mtu {
            return Err(LinkError::connection_failed(self.lens, "MTU exchange failed"));
        }
        Ok(mtu.min(script.max_mtu))
    }

    async fn write_descriptor(&self, _characteristic: Uuid, _descriptor: Uuid, value: &[u8]) -> Result<()> {
        lock(&self.recorded).descriptor_writes.push(value.to_vec());
        let (hang, failures) = {
            let script = lock(&self.script);
            (script.hang_arming, script.arm_failures)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if self.arm_failures_seen.load(Ordering::SeqCst) < failures {
            self.arm_failures_seen.fetch_add(1, Ordering::SeqCst);
            return Err(LinkError::connection_failed(self.lens, "CCCD write rejected"));
        }
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, bytes: &[u8], with_response: bool) -> Result<()> {
        if lock(&self.script).fail_writes {
            return Err(LinkError::Write {
                lens: self.lens,
                len: bytes.len(),
                source: Some(anyhow!("fake write failure").into()),
            });
        }
        lock(&self.recorded).writes.push(WriteRecord {
            characteristic,
            bytes: bytes.to_vec(),
            with_response,
        });
        let replies = lock(&self.responder).as_ref().map(|respond| respond(bytes)).unwrap_or_default();
        for reply in replies {
            self.notify(&reply);
        }
        Ok(())
    }

    async fn read_rssi(&self) -> Result<i16> {
        Ok(lock(&self.script).rssi)
    }

    fn events(&self) -> broadcast::Receiver<PeripheralEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start)) }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Always returns the same offset, clamped to the requested range.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub i64);

impl JitterSource for FixedJitter {
    fn offset(&self, max: u64) -> i64 {
        let max = max.min(i64::MAX as u64) as i64;
        self.0.clamp(-max, max)
    }
}

/// `[opcode, 0xC9]`, the shortest successful ack.
pub fn ack_ok(opcode: u8) -> Vec<u8> {
    vec![opcode, 0xC9]
}

/// `[opcode, 0xCA]`, the shortest failure ack.
pub fn ack_fail(opcode: u8) -> Vec<u8> {
    vec![opcode, 0xCA]
}

pub fn raw_frame(lens: Lens, timestamp: u64, bytes: &[u8]) -> RawFrame {
    RawFrame::new(lens, timestamp, bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_demand() {
        let clock = ManualClock::new(100);
        let shared = clock.clone();
        clock.advance(50);
        assert_eq!(shared.now_millis(), 150);
        shared.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn fixed_jitter_respects_range() {
        assert_eq!(FixedJitter(400).offset(250), 250);
        assert_eq!(FixedJitter(-400).offset(250), -250);
        assert_eq!(FixedJitter(100).offset(250), 100);
        assert_eq!(FixedJitter(100).offset(0), 0);
    }

    #[tokio::test]
    async fn responder_replies_through_notifications() {
        let fake = FakePeripheral::new(Lens::Right);
        let mut events = fake.events();
        fake.respond_with(|bytes| vec![ack_ok(bytes[0])]);

        fake.write(NUS_RX, &[0x25, 0x01], false).await.unwrap();
        match events.recv().await.unwrap() {
            PeripheralEvent::Notification { bytes, .. } => assert_eq!(bytes, vec![0x25, 0xC9]),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(fake.written(), vec![vec![0x25, 0x01]]);
    }
}
