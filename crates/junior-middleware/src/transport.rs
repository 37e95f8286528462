//! The transport capability shared by BLE, HTTP and the simulator.
//!
//! The session loop never knows which link it is driving.  It holds a
//! `Box<dyn TransportSession>` and calls the operations below once per tick.
//!
//! # Contract
//!
//! * `connect` – establish the link.  BLE scans and subscribes, HTTP only
//!   marks itself ready.  The caller decides whether to retry.
//! * `send_command` – transmit one [`MotorCommand`].  No atomicity across the
//!   individual writes; the next tick's command overwrites a partial failure.
//! * `poll_telemetry` – in [`TelemetryMode::Poll`], return the readings
//!   gathered this tick.  In [`TelemetryMode::Notify`] readings arrive through
//!   the event queue and this returns an empty batch.
//! * `disconnect` – idempotent teardown.

use async_trait::async_trait;
use junior_types::{JuniorError, MotorCommand, TelemetryMode, TelemetryReading};

#[async_trait]
pub trait TransportSession: Send {
    /// Short label used in logs and errors, e.g. `"ble"`.
    fn name(&self) -> &str;

    fn telemetry_mode(&self) -> TelemetryMode;

    async fn connect(&mut self) -> Result<(), JuniorError>;

    async fn send_command(&mut self, command: &MotorCommand) -> Result<(), JuniorError>;

    /// Readings for this tick.  Fields that timed out or failed to decode are
    /// logged and left out; the loop keeps their previous values.
    async fn poll_telemetry(&mut self) -> Result<Vec<TelemetryReading>, JuniorError>;

    /// Last known link status.
    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), JuniorError>;

    /// Best-effort stop.  Defaults to sending [`MotorCommand::stop`].
    async fn send_stop(&mut self) -> Result<(), JuniorError> {
        self.send_command(&MotorCommand::stop()).await
    }
}
