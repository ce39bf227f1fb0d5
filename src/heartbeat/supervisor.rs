//! Heartbeat supervisor loop
//!
//! One task drives both lenses. State changes arrive over an unbounded
//! control channel so callers never block, and every tick publishes the
//! per-lens state on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::{HeartbeatEvent, HeartbeatResult, HeartbeatSchedule, LensHeartbeatState};
use crate::config::HeartbeatConfig;
use crate::types::{AckType, Clock, ConsoleLine, Lens, PerLens};

/// Writes one heartbeat and waits for its reply.
#[async_trait::async_trait]
pub trait HeartbeatSender: Send + Sync + 'static {
    /// `None` when no write was possible.
    async fn send_heartbeat(&self, lens: Lens) -> Option<HeartbeatResult>;

    /// Whether the transport for `lens` can currently carry a write.
    fn is_link_up(&self, lens: Lens) -> bool;
}

/// Source of interval jitter.
pub trait JitterSource: Send + Sync + 'static {
    /// Offset in `-max..=max`.
    fn offset(&self, max: u64) -> i64;
}

/// Uniform jitter from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn offset(&self, max: u64) -> i64 {
        if max == 0 {
            return 0;
        }
        let max = i64::try_from(max).unwrap_or(i64::MAX);
        rand::rng().random_range(-max..=max)
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Connection(Lens, bool),
    LidOpen(Option<bool>),
    InCase(Lens, Option<bool>),
    Ack(Lens, u64, AckType),
}

/// Handle to the running supervisor loop.
///
/// Dropping the handle shuts the loop down.
#[derive(Debug)]
pub struct HeartbeatSupervisor {
    control: mpsc::UnboundedSender<Control>,
    events: broadcast::Sender<HeartbeatEvent>,
    states: watch::Receiver<PerLens<LensHeartbeatState>>,
    cancel: CancellationToken,
}

impl HeartbeatSupervisor {
    /// Spawn the loop. Skip notices are also published on `console`.
    pub fn spawn<S>(
        config: HeartbeatConfig,
        sender: S,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
        console: broadcast::Sender<ConsoleLine>,
    ) -> Self
    where
        S: HeartbeatSender,
    {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        let (states_tx, states_rx) = watch::channel(PerLens::default());
        let cancel = CancellationToken::new();

        let task = SupervisorTask {
            schedule: HeartbeatSchedule::new(config),
            sender,
            clock,
            jitter,
            events: events_tx.clone(),
            console,
            states: states_tx,
        };
        tokio::spawn(task.run(control_rx, cancel.clone()));

        Self { control: control_tx, events: events_tx, states: states_rx, cancel }
    }

    pub fn update_lens_connection(&self, lens: Lens, connected: bool) {
        self.control(Control::Connection(lens, connected));
    }

    pub fn update_lid_open(&self, lid_open: Option<bool>) {
        self.control(Control::LidOpen(lid_open));
    }

    pub fn update_in_case(&self, lens: Lens, in_case: Option<bool>) {
        self.control(Control::InCase(lens, in_case));
    }

    pub fn on_ack(&self, lens: Lens, timestamp: u64, ack_type: AckType) {
        self.control(Control::Ack(lens, timestamp, ack_type));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    pub fn states(&self) -> watch::Receiver<PerLens<LensHeartbeatState>> {
        self.states.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the loop and reset all state. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Heartbeat supervisor shutdown requested");
            self.cancel.cancel();
        }
    }

    fn control(&self, message: Control) {
        if self.control.send(message).is_err() {
            debug!("Heartbeat supervisor stopped, dropping state update");
        }
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SupervisorTask<S> {
    schedule: HeartbeatSchedule,
    sender: S,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    events: broadcast::Sender<HeartbeatEvent>,
    console: broadcast::Sender<ConsoleLine>,
    states: watch::Sender<PerLens<LensHeartbeatState>>,
}

impl<S: HeartbeatSender> SupervisorTask<S> {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>, cancel: CancellationToken) {
        info!("Heartbeat supervisor started");

        'ticks: loop {
            if cancel.is_cancelled() {
                break;
            }
            while let Ok(message) = control.try_recv() {
                self.apply(message);
            }

            let now = self.clock.now_millis();
            let plan = self.schedule.plan(now, |lens| self.sender.is_link_up(lens));
            for skipped in plan.skipped {
                self.report(skipped);
            }

            let dispatched = !plan.due.is_empty();
            for lens in plan.due {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break 'ticks,
                    result = self.sender.send_heartbeat(lens) => result,
                };
                let offset = self.jitter.offset(self.schedule.config().jitter_ms);
                let event = self.schedule.record(lens, now, result, offset);
                self.report(event);
            }
            self.publish_states();

            if dispatched {
                continue;
            }

            let wait = plan.wait_ms;
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = control.recv() => match message {
                    Some(message) => self.apply(message),
                    None => break,
                },
                _ = tokio::time::sleep(Duration::from_millis(wait.unwrap_or_default())), if wait.is_some() => {}
            }
        }

        self.schedule.reset();
        self.publish_states();
        info!("Heartbeat supervisor stopped");
    }

    fn apply(&mut self, message: Control) {
        let changed = match message {
            Control::Connection(lens, connected) => self.schedule.set_connected(lens, connected),
            Control::LidOpen(lid_open) => self.schedule.set_lid_open(lid_open),
            Control::InCase(lens, in_case) => self.schedule.set_in_case(lens, in_case),
            Control::Ack(lens, timestamp, ack_type) => {
                self.schedule.on_ack(lens, timestamp, ack_type);
                true
            }
        };
        if changed {
            debug!(?message, "Heartbeat state updated");
        }
    }

    fn report(&self, event: HeartbeatEvent) {
        match &event {
            HeartbeatEvent::Success { lens, sequence, elapsed_ms, latency_ms, .. } => {
                debug!(lens = %lens, sequence, elapsed_ms, ?latency_ms, "Heartbeat acknowledged");
            }
            HeartbeatEvent::Miss { lens, miss_count, rebond_needed, .. } => {
                warn!(lens = %lens, miss_count, "Heartbeat missed");
                if *rebond_needed {
                    warn!(lens = %lens, "Heartbeat miss threshold reached, rebond needed");
                }
            }
            HeartbeatEvent::Skipped { lens, reason, timestamp } => {
                info!(lens = %lens, %reason, "Heartbeat skipped");
                let line = ConsoleLine::new("PING", Some(*lens), format!("skipped ({reason})"), *timestamp);
                let _ = self.console.send(line);
            }
        }
        let _ = self.events.send(event);
    }

    fn publish_states(&self) {
        self.states.send_if_modified(|states| {
            if states == self.schedule.lenses() {
                false
            } else {
                *states = self.schedule.lenses().clone();
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FixedJitter;
    use crate::types::TokioClock;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    struct RecordingSender {
        clock: TokioClock,
        success: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<(Lens, u64)>>>,
    }

    impl RecordingSender {
        fn new(clock: TokioClock, success: bool) -> Self {
            Self { clock, success: Arc::new(AtomicBool::new(success)), sent: Arc::default() }
        }

        fn sent(&self) -> Vec<(Lens, u64)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl HeartbeatSender for RecordingSender {
        async fn send_heartbeat(&self, lens: Lens) -> Option<HeartbeatResult> {
            let mut sent = self.sent.lock().unwrap();
            let sequence = sent.len() as u8;
            sent.push((lens, self.clock.now_millis()));
            Some(HeartbeatResult {
                sequence,
                success: self.success.load(Ordering::SeqCst),
                timestamp: None,
                latency_ms: Some(5),
                ack_type: Some(AckType::Binary),
            })
        }

        fn is_link_up(&self, _lens: Lens) -> bool {
            true
        }
    }

    fn spawn(sender: RecordingSender, clock: TokioClock) -> (HeartbeatSupervisor, broadcast::Receiver<ConsoleLine>) {
        let (console, console_rx) = broadcast::channel(16);
        let supervisor = HeartbeatSupervisor::spawn(
            HeartbeatConfig::default(),
            sender,
            Arc::new(clock),
            Arc::new(FixedJitter(0)),
            console,
        );
        (supervisor, console_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn connected_lens_is_pinged_on_every_interval() {
        let _ = tracing_subscriber::fmt::try_init();
        let clock = TokioClock::new();
        let sender = RecordingSender::new(clock, true);
        let (supervisor, _console) = spawn(sender.clone(), clock);

        supervisor.update_lens_connection(Lens::Left, true);
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 3, "sent: {sent:?}");
        assert!(sent.iter().all(|(lens, _)| *lens == Lens::Left));
        for pair in sent.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= 5_000);
        }
        supervisor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_lid_skips_and_reopening_pings_immediately() {
        let clock = TokioClock::new();
        let sender = RecordingSender::new(clock, true);
        let (supervisor, mut console) = spawn(sender.clone(), clock);

        supervisor.update_lens_connection(Lens::Right, true);
        supervisor.update_lid_open(Some(false));

        let line = tokio::time::timeout(Duration::from_secs(1), console.recv())
            .await
            .expect("skip notice")
            .unwrap();
        assert_eq!(line.to_string(), "[PING][R] skipped (lid closed)");
        assert!(sender.sent().is_empty());

        supervisor.update_lid_open(Some(true));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn misses_saturate_and_flag_rebond() {
        let clock = TokioClock::new();
        let sender = RecordingSender::new(clock, false);
        let (supervisor, _console) = spawn(sender.clone(), clock);
        let mut events = supervisor.subscribe();

        supervisor.update_lens_connection(Lens::Left, true);
        tokio::time::sleep(Duration::from_millis(20_500)).await;

        let mut last_miss = None;
        while let Ok(event) = events.try_recv() {
            if let HeartbeatEvent::Miss { miss_count, rebond_needed, .. } = event {
                last_miss = Some((miss_count, rebond_needed));
            }
        }
        assert_eq!(last_miss, Some((3, true)));
        assert_eq!(supervisor.states().borrow().left.miss_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn in_case_lens_waits_until_removed() {
        let clock = TokioClock::new();
        let sender = RecordingSender::new(clock, true);
        let (supervisor, _console) = spawn(sender.clone(), clock);

        supervisor.update_in_case(Lens::Left, Some(true));
        supervisor.update_lens_connection(Lens::Left, true);
        tokio::time::sleep(Duration::from_millis(12_000)).await;
        assert!(sender.sent().is_empty());
        assert_eq!(supervisor.states().borrow().left.next_due_at, None);

        supervisor.update_in_case(Lens::Left, Some(false));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent_and_resets_state() {
        let clock = TokioClock::new();
        let sender = RecordingSender::new(clock, true);
        let (supervisor, _console) = spawn(sender.clone(), clock);
        let mut states = supervisor.states();

        supervisor.update_lens_connection(Lens::Left, true);
        states.wait_for(|s| s.left.last_success_at.is_some()).await.unwrap();

        supervisor.shutdown();
        supervisor.shutdown();
        assert!(!supervisor.is_running());
        states.wait_for(|s| *s == PerLens::default()).await.unwrap();

        let count = sender.sent().len();
        tokio::time::sleep(Duration::from_millis(15_000)).await;
        assert_eq!(sender.sent().len(), count);
    }

    #[test]
    fn random_offsets_stay_in_range() {
        let jitter = RandomJitter;
        let offsets: Vec<i64> = (0..1_000).map(|_| jitter.offset(250)).collect();
        assert!(offsets.iter().all(|o| (-250..=250).contains(o)));
        assert!(offsets.iter().any(|&o| o != offsets[0]));
        assert_eq!(jitter.offset(0), 0);
        assert!(jitter.offset(u64::MAX) >= -i64::MAX);
    }
}
