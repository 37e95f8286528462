use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Highest magnitude the motor driver accepts (8-bit PWM duty cycle).
pub const MOTOR_MAX: u8 = 255;

/// Ultrasonic reading reported before the first echo arrives.
pub const ULTRASONIC_NO_ECHO: i32 = 300;

/// Clamp an arbitrary signed magnitude into the `[0, 255]` motor domain.
///
/// Every producer of motor magnitudes (keyboard steps, joystick mapping,
/// config-supplied values) goes through this function, so a value outside the
/// domain can never reach a transport.
pub fn clamp_motor(value: i32) -> u8 {
    value.clamp(0, i32::from(MOTOR_MAX)) as u8
}

/// Three-axis sample (accelerometer, magnetometer).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Orientation as reported by the vehicle's IMU fusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Commanded motor output for one tick.
///
/// Direction and magnitude are independent: `left_forward` says which way the
/// left wheel turns, `left` says how fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MotorCommand {
    pub left: u8,
    pub right: u8,
    pub left_forward: bool,
    pub right_forward: bool,
}

impl MotorCommand {
    /// Build a command from signed magnitudes, clamping both into range.
    pub fn clamped(left: i32, right: i32, left_forward: bool, right_forward: bool) -> Self {
        Self {
            left: clamp_motor(left),
            right: clamp_motor(right),
            left_forward,
            right_forward,
        }
    }

    /// Both motors at zero, both modes forward.
    pub fn stop() -> Self {
        Self {
            left: 0,
            right: 0,
            left_forward: true,
            right_forward: true,
        }
    }

    /// `true` when neither motor is being driven.
    pub fn is_idle(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

impl Default for MotorCommand {
    fn default() -> Self {
        Self::stop()
    }
}

/// Motor values echoed back by the vehicle firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorEcho {
    pub left: i32,
    pub right: i32,
    pub left_forward: bool,
    pub right_forward: bool,
}

impl Default for MotorEcho {
    fn default() -> Self {
        Self {
            left: 0,
            right: 0,
            left_forward: true,
            right_forward: true,
        }
    }
}

/// Latest known sensor readings and commanded motor outputs.
///
/// The session loop owns the only instance: input writes the `motor_*`
/// fields before transmission, telemetry writes the sensor fields after
/// reception, both on the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub accel: Vector3,
    pub orientation: Orientation,
    /// `None` until the first magnetometer notification arrives.
    pub magnetometer: Option<Vector3>,
    pub motor_left: u8,
    pub motor_right: u8,
    /// `true` is forward.
    pub motor_left_mode: bool,
    /// `true` is forward.
    pub motor_right_mode: bool,
    pub is_left_tracking: bool,
    pub is_right_tracking: bool,
    pub ultra_dist: i32,
    pub echo: MotorEcho,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            accel: Vector3::default(),
            orientation: Orientation::default(),
            magnetometer: None,
            motor_left: 0,
            motor_right: 0,
            motor_left_mode: true,
            motor_right_mode: true,
            is_left_tracking: false,
            is_right_tracking: false,
            ultra_dist: ULTRASONIC_NO_ECHO,
            echo: MotorEcho::default(),
        }
    }
}

impl VehicleState {
    /// Copy an input sample into the commanded fields.
    pub fn set_command(&mut self, command: MotorCommand) {
        self.motor_left = command.left;
        self.motor_right = command.right;
        self.motor_left_mode = command.left_forward;
        self.motor_right_mode = command.right_forward;
    }

    /// The commanded fields as a [`MotorCommand`].
    pub fn command(&self) -> MotorCommand {
        MotorCommand {
            left: self.motor_left,
            right: self.motor_right,
            left_forward: self.motor_left_mode,
            right_forward: self.motor_right_mode,
        }
    }

    /// Zero both magnitudes, leaving the direction flags untouched.
    pub fn zero_motors(&mut self) {
        self.motor_left = 0;
        self.motor_right = 0;
    }

    /// Apply one decoded telemetry sample.
    ///
    /// Returns `false` (and leaves the state untouched) when the value kind
    /// does not match the field, e.g. a flag delivered for `accel_x`.
    pub fn apply(&mut self, reading: &TelemetryReading) -> bool {
        use TelemetryField as F;
        use TelemetryValue as V;

        match (reading.field, reading.value) {
            (F::AccelX, V::Float(v)) => self.accel.x = v,
            (F::AccelY, V::Float(v)) => self.accel.y = v,
            (F::AccelZ, V::Float(v)) => self.accel.z = v,
            (F::Roll, V::Float(v)) => self.orientation.roll = v,
            (F::Pitch, V::Float(v)) => self.orientation.pitch = v,
            (F::Yaw, V::Float(v)) => self.orientation.yaw = v,
            (F::MagX, V::Float(v)) => self.magnetometer.get_or_insert_with(Vector3::default).x = v,
            (F::MagY, V::Float(v)) => self.magnetometer.get_or_insert_with(Vector3::default).y = v,
            (F::MagZ, V::Float(v)) => self.magnetometer.get_or_insert_with(Vector3::default).z = v,
            (F::LineLeft, V::Flag(b)) => self.is_left_tracking = b,
            (F::LineRight, V::Flag(b)) => self.is_right_tracking = b,
            (F::UltrasonicDistance, V::Integer(d)) => self.ultra_dist = d,
            (F::MotorLeftEcho, V::Integer(m)) => self.echo.left = m,
            (F::MotorRightEcho, V::Integer(m)) => self.echo.right = m,
            (F::MotorLeftModeEcho, V::Flag(b)) => self.echo.left_forward = b,
            (F::MotorRightModeEcho, V::Flag(b)) => self.echo.right_forward = b,
            _ => return false,
        }
        true
    }
}

impl fmt::Display for VehicleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acc {:.2},{:.2},{:.2} | rpy {:.2},{:.2},{:.2} | motors {}{} {}{} | line {}/{} | dist {}",
            self.accel.x,
            self.accel.y,
            self.accel.z,
            self.orientation.roll,
            self.orientation.pitch,
            self.orientation.yaw,
            if self.motor_left_mode { '+' } else { '-' },
            self.motor_left,
            if self.motor_right_mode { '+' } else { '-' },
            self.motor_right,
            u8::from(self.is_left_tracking),
            u8::from(self.is_right_tracking),
            self.ultra_dist,
        )
    }
}

/// How a telemetry field is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// 4-byte little-endian IEEE-754 float.
    Float32Le,
    /// Single byte, nonzero = true.
    BoolByte,
    /// Two's-complement little-endian integer of 1 to 8 bytes.
    SignedIntLe,
}

/// Every telemetry channel the vehicle can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryField {
    AccelX,
    AccelY,
    AccelZ,
    Roll,
    Pitch,
    Yaw,
    MagX,
    MagY,
    MagZ,
    LineLeft,
    LineRight,
    UltrasonicDistance,
    MotorLeftEcho,
    MotorRightEcho,
    MotorLeftModeEcho,
    MotorRightModeEcho,
}

impl TelemetryField {
    pub const ALL: [TelemetryField; 16] = [
        TelemetryField::AccelX,
        TelemetryField::AccelY,
        TelemetryField::AccelZ,
        TelemetryField::Roll,
        TelemetryField::Pitch,
        TelemetryField::Yaw,
        TelemetryField::MagX,
        TelemetryField::MagY,
        TelemetryField::MagZ,
        TelemetryField::LineLeft,
        TelemetryField::LineRight,
        TelemetryField::UltrasonicDistance,
        TelemetryField::MotorLeftEcho,
        TelemetryField::MotorRightEcho,
        TelemetryField::MotorLeftModeEcho,
        TelemetryField::MotorRightModeEcho,
    ];

    pub fn encoding(self) -> Encoding {
        use TelemetryField as F;
        match self {
            F::AccelX | F::AccelY | F::AccelZ | F::Roll | F::Pitch | F::Yaw | F::MagX
            | F::MagY | F::MagZ => Encoding::Float32Le,
            F::LineLeft | F::LineRight | F::MotorLeftModeEcho | F::MotorRightModeEcho => {
                Encoding::BoolByte
            }
            F::UltrasonicDistance | F::MotorLeftEcho | F::MotorRightEcho => Encoding::SignedIntLe,
        }
    }

    pub fn as_str(self) -> &'static str {
        use TelemetryField as F;
        match self {
            F::AccelX => "accel_x",
            F::AccelY => "accel_y",
            F::AccelZ => "accel_z",
            F::Roll => "roll",
            F::Pitch => "pitch",
            F::Yaw => "yaw",
            F::MagX => "mag_x",
            F::MagY => "mag_y",
            F::MagZ => "mag_z",
            F::LineLeft => "line_left",
            F::LineRight => "line_right",
            F::UltrasonicDistance => "ultrasonic_distance",
            F::MotorLeftEcho => "motor_left_echo",
            F::MotorRightEcho => "motor_right_echo",
            F::MotorLeftModeEcho => "motor_left_mode_echo",
            F::MotorRightModeEcho => "motor_right_mode_echo",
        }
    }
}

impl fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded value of a telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TelemetryValue {
    Float(f32),
    Flag(bool),
    Integer(i32),
}

/// One decoded telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub field: TelemetryField,
    pub value: TelemetryValue,
}

impl TelemetryReading {
    pub fn new(field: TelemetryField, value: TelemetryValue) -> Self {
        Self { field, value }
    }
}

/// Whether telemetry is pulled by the loop or pushed by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryMode {
    /// The loop reads every channel once per tick.
    Poll,
    /// The vehicle notifies; samples arrive through the event queue.
    #[default]
    Notify,
}

/// Envelope for everything delivered through the session event queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "junior-middleware::ble"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that flow from transports to the session loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Telemetry(TelemetryReading),
    Connected { device: String },
    Disconnected { reason: String },
    TransportFault { transport: String, message: String },
}

/// Error type spanning discovery, transport, decoding and input failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JuniorError {
    #[error("Discovery failed: no device with address {address} found")]
    Discovery { address: String },

    #[error("Connect failed on {transport}: {details}")]
    Connect { transport: String, details: String },

    #[error("Transport timeout on {transport} after {after_ms} ms")]
    Timeout { transport: String, after_ms: u64 },

    #[error("Decode error for {field}: {details}")]
    Decode { field: String, details: String },

    #[error("Session cancelled by operator")]
    UserCancel,

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Transport error on {transport}: {details}")]
    Transport { transport: String, details: String },

    #[error("Event queue error: {0}")]
    Channel(String),

    #[error("Input device error: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_motor_bounds() {
        assert_eq!(clamp_motor(-40), 0);
        assert_eq!(clamp_motor(0), 0);
        assert_eq!(clamp_motor(128), 128);
        assert_eq!(clamp_motor(255), 255);
        assert_eq!(clamp_motor(1_000), 255);
        for m in -300..600 {
            assert_eq!(i32::from(clamp_motor(m)), m.clamp(0, 255));
        }
    }

    #[test]
    fn vehicle_state_defaults() {
        let state = VehicleState::default();
        assert_eq!(state.ultra_dist, ULTRASONIC_NO_ECHO);
        assert!(state.motor_left_mode && state.motor_right_mode);
        assert_eq!(state.motor_left, 0);
        assert!(state.magnetometer.is_none());
    }

    #[test]
    fn set_command_keeps_direction_and_speed_independent() {
        let mut state = VehicleState::default();
        state.set_command(MotorCommand::clamped(300, 20, false, true));
        assert_eq!(state.motor_left, 255);
        assert_eq!(state.motor_right, 20);
        assert!(!state.motor_left_mode);
        assert!(state.motor_right_mode);

        state.zero_motors();
        assert_eq!(state.command(), MotorCommand::clamped(0, 0, false, true));
    }

    #[test]
    fn apply_updates_matching_field() {
        let mut state = VehicleState::default();
        assert!(state.apply(&TelemetryReading::new(
            TelemetryField::AccelY,
            TelemetryValue::Float(9.81)
        )));
        assert!(state.apply(&TelemetryReading::new(
            TelemetryField::LineRight,
            TelemetryValue::Flag(true)
        )));
        assert!(state.apply(&TelemetryReading::new(
            TelemetryField::UltrasonicDistance,
            TelemetryValue::Integer(-3)
        )));
        assert!((state.accel.y - 9.81).abs() < f32::EPSILON);
        assert!(state.is_right_tracking);
        assert_eq!(state.ultra_dist, -3);
    }

    #[test]
    fn apply_rejects_mismatched_value_kind() {
        let mut state = VehicleState::default();
        let before = state.clone();
        assert!(!state.apply(&TelemetryReading::new(
            TelemetryField::AccelX,
            TelemetryValue::Flag(true)
        )));
        assert_eq!(state, before);
    }

    #[test]
    fn magnetometer_appears_on_first_sample() {
        let mut state = VehicleState::default();
        state.apply(&TelemetryReading::new(
            TelemetryField::MagZ,
            TelemetryValue::Float(-0.5),
        ));
        let mag = state.magnetometer.expect("magnetometer populated");
        assert!((mag.z + 0.5).abs() < f32::EPSILON);
        assert_eq!(mag.x, 0.0);
    }

    #[test]
    fn every_field_has_a_unique_name() {
        let mut names: Vec<&str> = TelemetryField::ALL.iter().map(|f| f.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TelemetryField::ALL.len());
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "junior-middleware::ble",
            EventPayload::Telemetry(TelemetryReading::new(
                TelemetryField::Roll,
                TelemetryValue::Float(0.25),
            )),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        assert!(matches!(back.payload, EventPayload::Telemetry(r) if r.field == TelemetryField::Roll));
    }

    #[test]
    fn junior_error_display() {
        let err = JuniorError::Discovery {
            address: "AA:BB".to_string(),
        };
        assert!(err.to_string().contains("AA:BB"));

        let err = JuniorError::Timeout {
            transport: "http".to_string(),
            after_ms: 500,
        };
        assert!(err.to_string().contains("500 ms"));
    }
}
