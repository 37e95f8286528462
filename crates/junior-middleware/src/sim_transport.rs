//! In-process vehicle.
//!
//! [`SimTransport`] behaves like a connected vehicle without any radio: it
//! records every command (and the exact bytes the BLE codec would write),
//! echoes motor values back as telemetry and lets a [`SimHandle`] inject
//! sensor readings or drop the link from outside the session loop.  Used by
//! the runtime tests and by the CLI's `sim` transport for dry runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use junior_types::{
    EventPayload, JuniorError, MotorCommand, TelemetryField, TelemetryMode, TelemetryReading,
    TelemetryValue,
};
use tracing::{debug, info};

use crate::codec::{self, WireWrite};
use crate::event_queue::EventSender;
use crate::transport::TransportSession;

const TRANSPORT: &str = "sim";
const SOURCE: &str = "junior-middleware::sim";

/// Commands kept for inspection; older entries are dropped so long dry runs
/// stay flat in memory.
pub const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    refuse_connect: bool,
    attempted: VecDeque<MotorCommand>,
    delivered: VecDeque<MotorCommand>,
    writes: VecDeque<WireWrite>,
    queued: Vec<TelemetryReading>,
    fail_send: Option<JuniorError>,
    fail_poll: Option<JuniorError>,
}

/// Control and inspection side of a [`SimTransport`].
#[derive(Clone)]
pub struct SimHandle {
    mode: TelemetryMode,
    events: EventSender,
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop or restore the link.  Dropping posts
    /// [`EventPayload::Disconnected`] like a real disconnect watcher would.
    pub fn set_connected(&self, connected: bool) {
        let was = std::mem::replace(&mut self.state().connected, connected);
        if was && !connected {
            let reason = "simulated link loss".to_string();
            if let Err(e) = self.events.post(SOURCE, EventPayload::Disconnected { reason }) {
                debug!(error = %e, "disconnect event dropped");
            }
        }
    }

    /// Make the next `connect` calls fail with [`JuniorError::Discovery`].
    pub fn refuse_connect(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    /// Make the next `send_command` fail with `error` after recording the
    /// attempt.  Nothing is delivered or echoed.
    pub fn fail_next_send(&self, error: JuniorError) {
        self.state().fail_send = Some(error);
    }

    /// Make the next `poll_telemetry` fail with `error`.  Queued readings stay
    /// queued for the poll after.
    pub fn fail_next_poll(&self, error: JuniorError) {
        self.state().fail_poll = Some(error);
    }

    /// Deliver a reading the way the configured mode would: through the event
    /// queue in notify mode, on the next poll otherwise.
    pub fn push_telemetry(&self, reading: TelemetryReading) {
        deliver(self.mode, &self.events, &mut self.state(), reading);
    }

    /// The most recent [`HISTORY_LIMIT`] commands accepted while connected.
    pub fn commands(&self) -> Vec<MotorCommand> {
        self.state().delivered.iter().copied().collect()
    }

    /// The most recent [`HISTORY_LIMIT`] commands the loop tried to send,
    /// connected or not.
    pub fn attempted(&self) -> Vec<MotorCommand> {
        self.state().attempted.iter().copied().collect()
    }

    pub fn last_attempted(&self) -> Option<MotorCommand> {
        self.state().attempted.back().copied()
    }

    /// BLE-encoded writes for the commands in [`SimHandle::commands`].
    pub fn writes(&self) -> Vec<WireWrite> {
        self.state().writes.iter().cloned().collect()
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, limit: usize) {
    if log.len() == limit {
        log.pop_front();
    }
    log.push_back(item);
}

fn deliver(
    mode: TelemetryMode,
    events: &EventSender,
    state: &mut SimState,
    reading: TelemetryReading,
) {
    match mode {
        TelemetryMode::Notify => {
            if let Err(e) = events.post(SOURCE, EventPayload::Telemetry(reading)) {
                debug!(error = %e, "telemetry event dropped");
            }
        }
        TelemetryMode::Poll => state.queued.push(reading),
    }
}

pub struct SimTransport {
    handle: SimHandle,
}

impl SimTransport {
    pub fn new(mode: TelemetryMode, events: EventSender) -> Self {
        Self {
            handle: SimHandle {
                mode,
                events,
                state: Arc::new(Mutex::new(SimState::default())),
            },
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl TransportSession for SimTransport {
    fn name(&self) -> &str {
        TRANSPORT
    }

    fn telemetry_mode(&self) -> TelemetryMode {
        self.handle.mode
    }

    async fn connect(&mut self) -> Result<(), JuniorError> {
        let mut state = self.handle.state();
        if state.refuse_connect {
            return Err(JuniorError::Discovery {
                address: "sim".to_string(),
            });
        }
        state.connected = true;
        drop(state);
        info!("simulated vehicle connected");
        let device = "sim".to_string();
        if let Err(e) = self.handle.events.post(SOURCE, EventPayload::Connected { device }) {
            debug!(error = %e, "connect event dropped");
        }
        Ok(())
    }

    async fn send_command(&mut self, command: &MotorCommand) -> Result<(), JuniorError> {
        let mode = self.handle.mode;
        let mut state = self.handle.state();
        push_bounded(&mut state.attempted, *command, HISTORY_LIMIT);
        if !state.connected {
            return Err(JuniorError::NotConnected(TRANSPORT.to_string()));
        }
        if let Some(e) = state.fail_send.take() {
            return Err(e);
        }
        push_bounded(&mut state.delivered, *command, HISTORY_LIMIT);
        let writes = codec::encode_command(command);
        let write_limit = HISTORY_LIMIT * writes.len();
        for write in writes {
            push_bounded(&mut state.writes, write, write_limit);
        }

        let echo = [
            (TelemetryField::MotorLeftEcho, TelemetryValue::Integer(i32::from(command.left))),
            (TelemetryField::MotorRightEcho, TelemetryValue::Integer(i32::from(command.right))),
            (TelemetryField::MotorLeftModeEcho, TelemetryValue::Flag(command.left_forward)),
            (TelemetryField::MotorRightModeEcho, TelemetryValue::Flag(command.right_forward)),
        ];
        for (field, value) in echo {
            deliver(mode, &self.handle.events, &mut state, TelemetryReading::new(field, value));
        }
        Ok(())
    }

    async fn poll_telemetry(&mut self) -> Result<Vec<TelemetryReading>, JuniorError> {
        if self.handle.mode == TelemetryMode::Notify {
            return Ok(Vec::new());
        }
        let mut state = self.handle.state();
        if let Some(e) = state.fail_poll.take() {
            return Err(e);
        }
        Ok(std::mem::take(&mut state.queued))
    }

    fn is_connected(&self) -> bool {
        self.handle.state().connected
    }

    async fn disconnect(&mut self) -> Result<(), JuniorError> {
        let mut state = self.handle.state();
        if state.connected {
            info!("simulated vehicle disconnected");
        }
        state.connected = false;
        state.queued.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::event_queue;

    #[tokio::test]
    async fn records_commands_and_wire_bytes() {
        let (tx, _rx) = event_queue(64);
        let mut sim = SimTransport::new(TelemetryMode::Poll, tx);
        let handle = sim.handle();
        sim.connect().await.unwrap();

        let cmd = MotorCommand::clamped(12, 250, false, true);
        sim.send_command(&cmd).await.unwrap();

        assert_eq!(handle.commands(), vec![cmd]);
        let writes = handle.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0].bytes, b"012");
        assert_eq!(writes[2].bytes, b"False");
    }

    #[tokio::test]
    async fn poll_mode_returns_echo_and_injected_readings() {
        let (tx, _rx) = event_queue(64);
        let mut sim = SimTransport::new(TelemetryMode::Poll, tx);
        let handle = sim.handle();
        sim.connect().await.unwrap();

        handle.push_telemetry(TelemetryReading::new(
            TelemetryField::UltrasonicDistance,
            TelemetryValue::Integer(25),
        ));
        sim.send_command(&MotorCommand::clamped(40, 40, true, true))
            .await
            .unwrap();

        let batch = sim.poll_telemetry().await.unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch[0].value, TelemetryValue::Integer(25));
        assert!(batch.contains(&TelemetryReading::new(
            TelemetryField::MotorLeftEcho,
            TelemetryValue::Integer(40)
        )));
        assert!(sim.poll_telemetry().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notify_mode_posts_events() {
        let (tx, mut rx) = event_queue(64);
        let mut sim = SimTransport::new(TelemetryMode::Notify, tx);
        let handle = sim.handle();
        sim.connect().await.unwrap();
        handle.push_telemetry(TelemetryReading::new(
            TelemetryField::Yaw,
            TelemetryValue::Float(1.5),
        ));

        assert!(sim.poll_telemetry().await.unwrap().is_empty());
        let events = rx.drain();
        assert!(matches!(events[0].payload, EventPayload::Connected { .. }));
        assert!(matches!(events[1].payload, EventPayload::Telemetry(_)));
    }

    #[tokio::test]
    async fn link_loss_rejects_commands_but_records_attempts() {
        let (tx, mut rx) = event_queue(64);
        let mut sim = SimTransport::new(TelemetryMode::Notify, tx);
        let handle = sim.handle();
        sim.connect().await.unwrap();
        rx.drain();

        handle.set_connected(false);
        assert!(!sim.is_connected());
        let err = sim.send_command(&MotorCommand::stop()).await.unwrap_err();
        assert_eq!(err, JuniorError::NotConnected("sim".to_string()));
        assert_eq!(handle.attempted().len(), 1);
        assert!(handle.commands().is_empty());

        let events = rx.drain();
        assert!(matches!(events[0].payload, EventPayload::Disconnected { .. }));
    }

    #[tokio::test]
    async fn history_is_capped_at_the_most_recent_commands() {
        let (tx, _rx) = event_queue(8);
        let mut sim = SimTransport::new(TelemetryMode::Poll, tx);
        let handle = sim.handle();
        sim.connect().await.unwrap();

        for m in 0..10_000 {
            sim.send_command(&MotorCommand::clamped(m % 256, 0, true, true))
                .await
                .unwrap();
            sim.poll_telemetry().await.unwrap();
        }

        assert_eq!(handle.attempted().len(), HISTORY_LIMIT);
        assert_eq!(handle.commands().len(), HISTORY_LIMIT);
        assert_eq!(handle.writes().len(), HISTORY_LIMIT * 4);
        assert_eq!(handle.last_attempted().map(|c| c.left), Some((9_999 % 256) as u8));
        assert_eq!(handle.commands()[0].left, ((10_000 - HISTORY_LIMIT) % 256) as u8);
        assert_eq!(handle.writes()[0].role, codec::CommandRole::MotorLeft);
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let (tx, _rx) = event_queue(8);
        let mut sim = SimTransport::new(TelemetryMode::Poll, tx);
        let handle = sim.handle();
        sim.connect().await.unwrap();

        let timeout = JuniorError::Timeout {
            transport: "sim".to_string(),
            after_ms: 500,
        };
        handle.fail_next_send(timeout.clone());
        assert_eq!(sim.send_command(&MotorCommand::stop()).await, Err(timeout.clone()));
        assert!(handle.commands().is_empty());
        assert_eq!(handle.attempted().len(), 1);

        handle.push_telemetry(TelemetryReading::new(
            TelemetryField::UltrasonicDistance,
            TelemetryValue::Integer(30),
        ));
        handle.fail_next_poll(timeout.clone());
        assert_eq!(sim.poll_telemetry().await, Err(timeout));
        assert_eq!(sim.poll_telemetry().await.unwrap().len(), 1);
        sim.send_command(&MotorCommand::stop()).await.unwrap();
    }

    #[tokio::test]
    async fn refused_connect_is_a_discovery_error() {
        let (tx, _rx) = event_queue(8);
        let mut sim = SimTransport::new(TelemetryMode::Poll, tx);
        sim.handle().refuse_connect(true);
        assert!(matches!(
            sim.connect().await,
            Err(JuniorError::Discovery { .. })
        ));
        assert!(!sim.is_connected());
    }
}
