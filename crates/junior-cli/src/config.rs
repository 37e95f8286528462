//! Reads/writes `~/.junior/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use junior_middleware::{BleConfig, HttpConfig};
use junior_runtime::SessionConfig;

/// Which link `/drive` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ble,
    #[default]
    Http,
    /// In-process vehicle, for dry runs.
    Sim,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "ble"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Sim => write!(f, "sim"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ble" => Ok(TransportKind::Ble),
            "http" | "wifi" => Ok(TransportKind::Http),
            "sim" => Ok(TransportKind::Sim),
            other => Err(format!("unknown transport '{other}' (ble / http / sim)")),
        }
    }
}

/// Operator device.  `auto` prefers a connected gamepad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Auto,
    Keyboard,
    Gamepad,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Auto => write!(f, "auto"),
            InputKind::Keyboard => write!(f, "keyboard"),
            InputKind::Gamepad => write!(f, "gamepad"),
        }
    }
}

impl FromStr for InputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(InputKind::Auto),
            "keyboard" => Ok(InputKind::Keyboard),
            "gamepad" | "joystick" => Ok(InputKind::Gamepad),
            other => Err(format!("unknown input '{other}' (auto / keyboard / gamepad)")),
        }
    }
}

/// `[session]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Display name of the vehicle.
    pub name: String,
    pub transport: TransportKind,
    pub input: InputKind,
    pub tick_ms: u64,
    pub max_disconnected_ticks: u32,
    /// Keyboard throttle change per tick.
    pub motor_step: u8,
    pub deadzone: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obstacle_stop_cm: Option<i32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "MyCar".to_string(),
            transport: TransportKind::default(),
            input: InputKind::default(),
            tick_ms: 25,
            max_disconnected_ticks: 40,
            motor_step: junior_hal::input::DEFAULT_MOTOR_STEP,
            deadzone: junior_hal::input::DEFAULT_DEADZONE,
            obstacle_stop_cm: None,
        }
    }
}

/// Persisted user configuration stored in `~/.junior/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ble: BleConfig,
}

impl Config {
    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if !(10..=40).contains(&self.session.tick_ms) {
            return Err(format!(
                "session.tick_ms must be between 10 and 40, got {}",
                self.session.tick_ms
            ));
        }
        if !(0.0..1.0).contains(&self.session.deadzone) {
            return Err(format!(
                "session.deadzone must be in [0, 1), got {}",
                self.session.deadzone
            ));
        }
        if self.session.transport == TransportKind::Ble && self.ble.device_addr.trim().is_empty() {
            return Err("ble.device_addr must be set for the ble transport".to_string());
        }
        if self.session.transport == TransportKind::Http && self.http.ip_addr.trim().is_empty() {
            return Err("http.ip_addr must be set for the http transport".to_string());
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick: Duration::from_millis(self.session.tick_ms),
            max_disconnected_ticks: self.session.max_disconnected_ticks,
            obstacle_stop_cm: self.session.obstacle_stop_cm,
        }
    }
}

/// Return the path to `~/.junior/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".junior").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `JUNIOR_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `JUNIOR_TRANSPORT` | `session.transport` |
/// | `JUNIOR_VEHICLE_IP` | `http.ip_addr` |
/// | `JUNIOR_BLE_ADDR` | `ble.device_addr` |
/// | `JUNIOR_TICK_MS` | `session.tick_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("JUNIOR_TRANSPORT")
        && let Ok(kind) = v.parse::<TransportKind>()
    {
        cfg.session.transport = kind;
    }
    if let Ok(v) = std::env::var("JUNIOR_VEHICLE_IP") {
        cfg.http.ip_addr = v;
    }
    if let Ok(v) = std::env::var("JUNIOR_BLE_ADDR") {
        cfg.ble.device_addr = v;
    }
    if let Ok(v) = std::env::var("JUNIOR_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.session.tick_ms = ms;
    }
}

/// Save the config to disk, creating `~/.junior/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
