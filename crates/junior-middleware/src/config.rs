//! Transport settings.
//!
//! These structs are embedded in the CLI's `config.toml` as the `[http]` and
//! `[ble]` sections; every field has a default so partial files load.

use junior_types::{TelemetryField, TelemetryMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::CommandRole;

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Query-parameter names understood by the Wi-Fi firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRoutes {
    pub forward: String,
    pub backward: String,
    pub stop: String,
    pub turn_left: String,
    pub turn_right: String,
    pub left_spd: String,
    pub right_spd: String,
    /// Value sent for the active direction parameter.  The firmware compares
    /// against the literal `True`.
    pub flag_value: String,
}

impl Default for HttpRoutes {
    fn default() -> Self {
        Self {
            forward: "forward".to_string(),
            backward: "backward".to_string(),
            stop: "stop".to_string(),
            turn_left: "turnLeft".to_string(),
            turn_right: "turnRight".to_string(),
            left_spd: "left_spd".to_string(),
            right_spd: "right_spd".to_string(),
            flag_value: "True".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub ip_addr: String,
    pub cmd_port: u16,
    pub cam_port: u16,
    pub command_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub camera_timeout_ms: u64,
    /// Upper bound on camera frames per second; `None` means uncapped.
    pub camera_max_fps: Option<u32>,
    pub routes: HttpRoutes,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            ip_addr: "127.0.0.1".to_string(),
            cmd_port: 81,
            cam_port: 80,
            command_timeout_ms: 500,
            stop_timeout_ms: 2_000,
            camera_timeout_ms: 500,
            camera_max_fps: None,
            routes: HttpRoutes::default(),
        }
    }
}

impl HttpConfig {
    pub fn command_url(&self) -> String {
        format!("http://{}:{}/", self.ip_addr, self.cmd_port)
    }

    pub fn camera_base_url(&self) -> String {
        format!("http://{}:{}", self.ip_addr, self.cam_port)
    }
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

/// Firmware characteristic UUID for table slot `n`.
const fn slot(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// UUIDs of every characteristic the vehicle exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleCharacteristics {
    pub motor_left: Uuid,
    pub motor_right: Uuid,
    pub motor_left_echo: Uuid,
    pub motor_right_echo: Uuid,
    pub accel_x: Uuid,
    pub accel_y: Uuid,
    pub accel_z: Uuid,
    pub roll: Uuid,
    pub pitch: Uuid,
    pub yaw: Uuid,
    pub mode_left: Uuid,
    pub mode_right: Uuid,
    pub mode_left_echo: Uuid,
    pub mode_right_echo: Uuid,
    pub line_left: Uuid,
    pub line_right: Uuid,
    pub ultrasonic: Uuid,
    pub mag_x: Uuid,
    pub mag_y: Uuid,
    pub mag_z: Uuid,
}

impl Default for BleCharacteristics {
    fn default() -> Self {
        Self {
            motor_left: slot(0x00),
            motor_right: slot(0x01),
            motor_left_echo: slot(0x02),
            motor_right_echo: slot(0x03),
            accel_x: slot(0x04),
            accel_y: slot(0x05),
            accel_z: slot(0x06),
            roll: slot(0x07),
            pitch: slot(0x08),
            yaw: slot(0x09),
            mode_left: slot(0x10),
            mode_right: slot(0x11),
            mode_left_echo: slot(0x12),
            mode_right_echo: slot(0x13),
            line_left: slot(0x14),
            line_right: slot(0x15),
            ultrasonic: slot(0x16),
            mag_x: slot(0x17),
            mag_y: slot(0x18),
            mag_z: slot(0x19),
        }
    }
}

impl BleCharacteristics {
    pub fn command(&self, role: CommandRole) -> Uuid {
        match role {
            CommandRole::MotorLeft => self.motor_left,
            CommandRole::MotorRight => self.motor_right,
            CommandRole::ModeLeft => self.mode_left,
            CommandRole::ModeRight => self.mode_right,
        }
    }

    pub fn telemetry(&self, field: TelemetryField) -> Uuid {
        use TelemetryField as F;
        match field {
            F::AccelX => self.accel_x,
            F::AccelY => self.accel_y,
            F::AccelZ => self.accel_z,
            F::Roll => self.roll,
            F::Pitch => self.pitch,
            F::Yaw => self.yaw,
            F::MagX => self.mag_x,
            F::MagY => self.mag_y,
            F::MagZ => self.mag_z,
            F::LineLeft => self.line_left,
            F::LineRight => self.line_right,
            F::UltrasonicDistance => self.ultrasonic,
            F::MotorLeftEcho => self.motor_left_echo,
            F::MotorRightEcho => self.motor_right_echo,
            F::MotorLeftModeEcho => self.mode_left_echo,
            F::MotorRightModeEcho => self.mode_right_echo,
        }
    }

    /// Reverse lookup used by the notification pump.
    pub fn field_for(&self, uuid: Uuid) -> Option<TelemetryField> {
        TelemetryField::ALL
            .into_iter()
            .find(|f| self.telemetry(*f) == uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// MAC address (or platform id on macOS) of the vehicle.
    pub device_addr: String,
    pub scan_secs: u64,
    pub telemetry: TelemetryMode,
    /// Per-read deadline in poll mode.
    pub read_timeout_ms: u64,
    pub characteristics: BleCharacteristics,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_addr: String::new(),
            scan_secs: 5,
            telemetry: TelemetryMode::Notify,
            read_timeout_ms: 500,
            characteristics: BleCharacteristics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uuids_follow_firmware_table() {
        let c = BleCharacteristics::default();
        assert_eq!(
            c.motor_left.to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(c.ultrasonic.to_string(), "00000000-0000-0000-0000-000000000016");
        assert_eq!(c.mode_right.to_string(), "00000000-0000-0000-0000-000000000011");
    }

    #[test]
    fn every_telemetry_field_has_a_distinct_uuid() {
        let c = BleCharacteristics::default();
        for field in TelemetryField::ALL {
            assert_eq!(c.field_for(c.telemetry(field)), Some(field));
        }
        assert_eq!(c.field_for(c.motor_left), None);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: HttpConfig = toml::from_str("ip_addr = \"10.0.0.7\"\n[routes]\nforward = \"go\"\n")
            .expect("valid toml");
        assert_eq!(cfg.ip_addr, "10.0.0.7");
        assert_eq!(cfg.cmd_port, 81);
        assert_eq!(cfg.routes.forward, "go");
        assert_eq!(cfg.routes.stop, "stop");
        assert_eq!(cfg.command_url(), "http://10.0.0.7:81/");
    }

    #[test]
    fn ble_telemetry_mode_is_lowercase_in_toml() {
        let cfg: BleConfig = toml::from_str("telemetry = \"poll\"\n").expect("valid toml");
        assert_eq!(cfg.telemetry, TelemetryMode::Poll);
        assert_eq!(cfg.read_timeout_ms, 500);
    }
}
