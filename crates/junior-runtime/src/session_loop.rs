//! [`SessionLoop`] – the fixed-rate drive loop.
//!
//! Each tick, while [`LoopPhase::Running`]:
//!
//! 1. **Drain** – apply queued events (push telemetry, link notices) to the
//!    [`VehicleState`].
//! 2. **Cancel check** – honour the process-level shutdown flag.
//! 3. **Sample** – read the [`InputSource`]; a quit request stops the loop.
//! 4. **Command** – copy the sample into the commanded fields, pass it through
//!    the [`ObstacleGuard`] and send it.
//! 5. **Poll** – in poll mode, pull this tick's telemetry.
//! 6. **Link check** – feed the connection status to the [`LinkGuard`].
//!
//! Every exit path goes through [`SessionLoop::stop`], which zeroes the
//! motors, sends a best-effort stop and disconnects.
//!
//! # Example
//!
//! ```rust
//! use junior_hal::ScriptedInput;
//! use junior_middleware::{SimTransport, event_queue};
//! use junior_runtime::session_loop::{SessionConfig, SessionLoop, StopReason};
//! use junior_types::{MotorCommand, TelemetryMode};
//!
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let (tx, rx) = event_queue(64);
//! let sim = SimTransport::new(TelemetryMode::Poll, tx);
//! let input = ScriptedInput::new([MotorCommand::clamped(60, 60, true, true)]);
//!
//! let mut session = SessionLoop::new(SessionConfig::default(), Box::new(input), Box::new(sim), rx);
//! session.start().await.unwrap();
//! assert_eq!(session.run().await, StopReason::UserQuit);
//! # });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use junior_hal::InputSource;
use junior_middleware::{EventReceiver, TransportSession};
use junior_types::{EventPayload, JuniorError, TelemetryMode, VehicleState};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::link_guard::LinkGuard;
use crate::obstacle_guard::ObstacleGuard;

/// Ticks between debug snapshots of the vehicle state.
const STATE_LOG_EVERY: u64 = 40;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tick: Duration,
    /// Consecutive disconnected ticks tolerated in poll mode.  Notify-mode
    /// sessions stop on the first one.
    pub max_disconnected_ticks: u32,
    /// Inhibit forward motion below this ultrasonic distance.
    pub obstacle_stop_cm: Option<i32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(25),
            max_disconnected_ticks: 40,
            obstacle_stop_cm: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phases
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The operator's quit gesture.
    UserQuit,
    /// The transport stayed disconnected for too long.
    LinkLost,
    /// The process-level shutdown flag was raised (Ctrl-C).
    Cancelled,
    /// The input device could not be read.
    InputFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Running,
    /// Terminal.
    Stopped(StopReason),
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct SessionLoop {
    config: SessionConfig,
    input: Box<dyn InputSource>,
    transport: Box<dyn TransportSession>,
    events: EventReceiver,
    state: VehicleState,
    phase: LoopPhase,
    link_guard: LinkGuard,
    obstacle: ObstacleGuard,
    shutdown: Option<Arc<AtomicBool>>,
    ticks: u64,
}

impl SessionLoop {
    pub fn new(
        config: SessionConfig,
        input: Box<dyn InputSource>,
        transport: Box<dyn TransportSession>,
        events: EventReceiver,
    ) -> Self {
        let allowance = match transport.telemetry_mode() {
            TelemetryMode::Notify => 0,
            TelemetryMode::Poll => config.max_disconnected_ticks,
        };
        let obstacle = ObstacleGuard::new(config.obstacle_stop_cm);
        Self {
            config,
            input,
            transport,
            events,
            state: VehicleState::default(),
            phase: LoopPhase::Running,
            link_guard: LinkGuard::new(allowance),
            obstacle,
            shutdown: None,
            ticks: 0,
        }
    }

    /// Stop with [`StopReason::Cancelled`] once `flag` becomes `true`.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Connect the transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport's connect error after logging it; retrying
    /// is up to the caller.
    pub async fn start(&mut self) -> Result<(), JuniorError> {
        info!(
            transport = self.transport.name(),
            input = self.input.id(),
            mode = ?self.transport.telemetry_mode(),
            "starting session"
        );
        self.transport.connect().await.map_err(|e| {
            error!(error = %e, "connect failed");
            e
        })
    }

    /// Tick at the configured rate until the loop stops.
    #[instrument(skip(self), fields(transport = self.transport.name()))]
    pub async fn run(&mut self) -> StopReason {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let LoopPhase::Stopped(reason) = self.tick().await {
                return reason;
            }
        }
    }

    /// Advance one tick.  A stopped loop stays stopped.
    pub async fn tick(&mut self) -> LoopPhase {
        if let LoopPhase::Stopped(_) = self.phase {
            return self.phase;
        }
        self.ticks += 1;

        self.drain_events();

        if self
            .shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            info!("shutdown requested");
            self.stop(StopReason::Cancelled).await;
            return self.phase;
        }

        let sample = match self.input.sample() {
            Ok(sample) => sample,
            Err(e) => {
                error!(input = self.input.id(), error = %e, "input failure");
                self.stop(StopReason::InputFailure).await;
                return self.phase;
            }
        };
        if !sample.keep_running {
            info!("operator quit");
            self.stop(StopReason::UserQuit).await;
            return self.phase;
        }

        self.state.set_command(sample.command);
        let outgoing = self.obstacle.filter(self.state.command(), self.state.ultra_dist);
        if outgoing != sample.command {
            debug!(distance = self.state.ultra_dist, "obstacle guard holding forward motion");
        }
        match self.transport.send_command(&outgoing).await {
            Ok(()) => {}
            Err(JuniorError::NotConnected(_)) => trace!("command skipped, link down"),
            Err(e) => warn!(error = %e, "command send failed"),
        }

        if self.transport.telemetry_mode() == TelemetryMode::Poll {
            match self.transport.poll_telemetry().await {
                Ok(batch) => {
                    for reading in &batch {
                        if !self.state.apply(reading) {
                            debug!(field = %reading.field, "telemetry value kind mismatch");
                        }
                    }
                }
                Err(JuniorError::NotConnected(_)) => {}
                Err(e) => warn!(error = %e, "telemetry poll failed"),
            }
        }

        if self.link_guard.record(self.transport.is_connected()) {
            warn!(misses = self.link_guard.misses(), "link lost");
            self.stop(StopReason::LinkLost).await;
            return self.phase;
        }

        if self.ticks % STATE_LOG_EVERY == 0 {
            debug!(state = %self.state, "vehicle state");
        }
        self.phase
    }

    /// Shut the session down: zero the motors, send a stop, disconnect.
    ///
    /// Idempotent; a second call returns the original reason and sends
    /// nothing.
    pub async fn stop(&mut self, reason: StopReason) -> StopReason {
        if let LoopPhase::Stopped(original) = self.phase {
            return original;
        }
        self.state.zero_motors();
        if let Err(e) = self.transport.send_stop().await {
            warn!(error = %e, "stop command not delivered");
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
        self.phase = LoopPhase::Stopped(reason);
        info!(?reason, ticks = self.ticks, "session stopped");
        reason
    }

    fn drain_events(&mut self) {
        for event in self.events.drain() {
            match event.payload {
                EventPayload::Telemetry(reading) => {
                    if !self.state.apply(&reading) {
                        debug!(field = %reading.field, "telemetry value kind mismatch");
                    }
                }
                EventPayload::Connected { device } => {
                    info!(%device, source = %event.source, "link up");
                }
                EventPayload::Disconnected { reason } => {
                    warn!(%reason, source = %event.source, "link down");
                }
                EventPayload::TransportFault { transport, message } => {
                    warn!(%transport, %message, "transport fault");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use junior_hal::{InputSample, ScriptedInput};
    use junior_middleware::{SimHandle, SimTransport, event_queue};
    use junior_types::{MotorCommand, TelemetryField, TelemetryReading, TelemetryValue};

    fn forward(m: i32) -> MotorCommand {
        MotorCommand::clamped(m, m, true, true)
    }

    fn session(
        mode: TelemetryMode,
        input: Box<dyn InputSource>,
        config: SessionConfig,
    ) -> (SessionLoop, SimHandle) {
        let (tx, rx) = event_queue(256);
        let sim = SimTransport::new(mode, tx);
        let handle = sim.handle();
        (SessionLoop::new(config, input, Box::new(sim), rx), handle)
    }

    struct BrokenInput;

    impl InputSource for BrokenInput {
        fn id(&self) -> &str {
            "broken"
        }

        fn sample(&mut self) -> Result<InputSample, JuniorError> {
            Err(JuniorError::Input("unplugged".to_string()))
        }
    }

    #[tokio::test]
    async fn scripted_quit_sends_final_stop() {
        let script = [forward(50), forward(80)];
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::new(script)),
            SessionConfig::default(),
        );
        s.start().await.unwrap();

        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.state().motor_left, 50);
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.tick().await, LoopPhase::Stopped(StopReason::UserQuit));

        assert_eq!(sim.commands(), vec![forward(50), forward(80), MotorCommand::stop()]);
        assert_eq!(s.state().motor_left, 0);
        assert_eq!(s.state().motor_right, 0);
    }

    fn read(field: TelemetryField, value: TelemetryValue) -> TelemetryReading {
        TelemetryReading::new(field, value)
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_values() {
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(forward(60))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        sim.push_telemetry(read(TelemetryField::UltrasonicDistance, TelemetryValue::Integer(42)));
        sim.push_telemetry(read(TelemetryField::AccelX, TelemetryValue::Float(1.25)));
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.state().ultra_dist, 42);

        sim.push_telemetry(read(TelemetryField::UltrasonicDistance, TelemetryValue::Integer(7)));
        sim.fail_next_poll(JuniorError::Timeout {
            transport: "sim".to_string(),
            after_ms: 500,
        });
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.state().ultra_dist, 42);
        assert!((s.state().accel.x - 1.25).abs() < f32::EPSILON);

        sim.fail_next_poll(JuniorError::Decode {
            field: "ultrasonic_distance".to_string(),
            details: "short payload".to_string(),
        });
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.state().ultra_dist, 42);

        // The reading held back by the failures arrives on the next good poll.
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.state().ultra_dist, 7);
    }

    #[tokio::test]
    async fn mismatched_reading_leaves_field_untouched() {
        let (mut s, sim) = session(
            TelemetryMode::Notify,
            Box::new(ScriptedInput::endless(forward(20))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        sim.push_telemetry(read(TelemetryField::UltrasonicDistance, TelemetryValue::Integer(55)));
        s.tick().await;
        sim.push_telemetry(read(TelemetryField::UltrasonicDistance, TelemetryValue::Float(3.0)));
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert_eq!(s.state().ultra_dist, 55);
    }

    #[tokio::test]
    async fn failed_send_keeps_running_and_state() {
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(forward(90))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        sim.push_telemetry(read(TelemetryField::Roll, TelemetryValue::Float(0.5)));
        s.tick().await;

        sim.fail_next_send(JuniorError::Timeout {
            transport: "sim".to_string(),
            after_ms: 500,
        });
        assert_eq!(s.tick().await, LoopPhase::Running);
        assert!((s.state().orientation.roll - 0.5).abs() < f32::EPSILON);
        assert_eq!(s.state().motor_left, 90);
        assert_eq!(sim.commands().len(), 1);
        assert_eq!(sim.attempted().len(), 2);
    }

    #[tokio::test]
    async fn poll_mode_disconnect_stops_after_allowance() {
        let config = SessionConfig {
            max_disconnected_ticks: 3,
            ..SessionConfig::default()
        };
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(forward(100))),
            config,
        );
        s.start().await.unwrap();
        s.tick().await;
        s.tick().await;

        sim.set_connected(false);
        for _ in 0..3 {
            assert_eq!(s.tick().await, LoopPhase::Running);
        }
        assert_eq!(s.tick().await, LoopPhase::Stopped(StopReason::LinkLost));
        assert_eq!(sim.last_attempted(), Some(MotorCommand::stop()));
        assert_eq!(s.state().motor_left, 0);
    }

    #[tokio::test]
    async fn notify_mode_disconnect_stops_on_first_tick() {
        let (mut s, sim) = session(
            TelemetryMode::Notify,
            Box::new(ScriptedInput::endless(forward(100))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        assert_eq!(s.tick().await, LoopPhase::Running);

        sim.set_connected(false);
        assert_eq!(s.tick().await, LoopPhase::Stopped(StopReason::LinkLost));
        assert_eq!(sim.last_attempted(), Some(MotorCommand::stop()));
    }

    #[tokio::test]
    async fn notify_telemetry_lands_in_state() {
        let (mut s, sim) = session(
            TelemetryMode::Notify,
            Box::new(ScriptedInput::endless(forward(10))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        sim.push_telemetry(TelemetryReading::new(
            TelemetryField::Yaw,
            TelemetryValue::Float(0.75),
        ));
        sim.push_telemetry(TelemetryReading::new(
            TelemetryField::MagX,
            TelemetryValue::Float(2.0),
        ));
        s.tick().await;

        assert!((s.state().orientation.yaw - 0.75).abs() < f32::EPSILON);
        assert!(s.state().magnetometer.is_some());
    }

    #[tokio::test]
    async fn poll_telemetry_applies_motor_echo() {
        let (mut s, _sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(MotorCommand::clamped(30, 70, false, true))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        s.tick().await;

        assert_eq!(s.state().echo.left, 30);
        assert_eq!(s.state().echo.right, 70);
        assert!(!s.state().echo.left_forward);
    }

    #[tokio::test]
    async fn shutdown_flag_cancels() {
        let flag = Arc::new(AtomicBool::new(false));
        let (s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(forward(90))),
            SessionConfig::default(),
        );
        let mut s = s.with_shutdown_flag(Arc::clone(&flag));
        s.start().await.unwrap();
        s.tick().await;

        flag.store(true, Ordering::SeqCst);
        assert_eq!(s.tick().await, LoopPhase::Stopped(StopReason::Cancelled));
        assert_eq!(sim.commands().last(), Some(&MotorCommand::stop()));
    }

    #[tokio::test]
    async fn input_failure_stops_loop() {
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(BrokenInput),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        assert_eq!(s.tick().await, LoopPhase::Stopped(StopReason::InputFailure));
        assert_eq!(sim.commands(), vec![MotorCommand::stop()]);
    }

    #[tokio::test]
    async fn obstacle_guard_zeroes_transmitted_command_only() {
        let config = SessionConfig {
            obstacle_stop_cm: Some(20),
            ..SessionConfig::default()
        };
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(forward(80))),
            config,
        );
        s.start().await.unwrap();
        sim.push_telemetry(TelemetryReading::new(
            TelemetryField::UltrasonicDistance,
            TelemetryValue::Integer(10),
        ));
        // First tick sends at the sentinel distance, then polls the close reading.
        s.tick().await;
        s.tick().await;

        let sent = sim.commands();
        assert_eq!(sent[0], forward(80));
        assert!(sent[1].is_idle());
        assert_eq!(s.state().motor_left, 80);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::endless(forward(10))),
            SessionConfig::default(),
        );
        s.start().await.unwrap();
        assert_eq!(s.stop(StopReason::UserQuit).await, StopReason::UserQuit);
        assert_eq!(s.stop(StopReason::LinkLost).await, StopReason::UserQuit);
        assert_eq!(s.tick().await, LoopPhase::Stopped(StopReason::UserQuit));
        assert_eq!(sim.attempted().len(), 1);
    }

    #[tokio::test]
    async fn start_propagates_connect_failure() {
        let (mut s, sim) = session(
            TelemetryMode::Poll,
            Box::new(ScriptedInput::new(Vec::new())),
            SessionConfig::default(),
        );
        sim.refuse_connect(true);
        assert!(matches!(s.start().await, Err(JuniorError::Discovery { .. })));
    }

    #[tokio::test]
    async fn run_returns_reason() {
        let config = SessionConfig {
            tick: Duration::from_millis(1),
            ..SessionConfig::default()
        };
        let (mut s, sim) = session(
            TelemetryMode::Notify,
            Box::new(ScriptedInput::new([forward(1), forward(2), forward(3)])),
            config,
        );
        s.start().await.unwrap();
        assert_eq!(s.run().await, StopReason::UserQuit);
        assert_eq!(s.ticks(), 4);
        assert_eq!(sim.commands().len(), 4);
    }
}
