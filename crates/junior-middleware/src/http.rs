//! HTTP transport for the Wi-Fi firmware.
//!
//! Every command is an independent `GET` on the command port:
//!
//! ```text
//! GET http://{ip}:{cmd_port}/?forward=True&left_spd=1&right_spd=0.5
//! ```
//!
//! The response body is the ultrasonic distance as decimal text, so in this
//! transport telemetry rides on the command round-trip.  Readings are queued
//! by `send_command` and handed out by `poll_telemetry`.

use std::time::Duration;

use async_trait::async_trait;
use junior_types::{
    JuniorError, MOTOR_MAX, MotorCommand, TelemetryField, TelemetryMode, TelemetryReading,
    TelemetryValue,
};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::{HttpConfig, HttpRoutes};
use crate::transport::TransportSession;

const TRANSPORT: &str = "http";

/// Drive direction understood by the firmware's command handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Stop,
    TurnLeft,
    TurnRight,
}

impl Direction {
    /// Derive the direction from per-wheel modes.
    ///
    /// Both magnitudes zero is `Stop`; otherwise equal modes drive straight
    /// and opposite modes spin toward the backward wheel.
    pub fn from_command(command: &MotorCommand) -> Self {
        if command.is_idle() {
            return Direction::Stop;
        }
        match (command.left_forward, command.right_forward) {
            (true, true) => Direction::Forward,
            (false, false) => Direction::Backward,
            (false, true) => Direction::TurnLeft,
            (true, false) => Direction::TurnRight,
        }
    }

    fn route(self, routes: &HttpRoutes) -> &str {
        match self {
            Direction::Forward => &routes.forward,
            Direction::Backward => &routes.backward,
            Direction::Stop => &routes.stop,
            Direction::TurnLeft => &routes.turn_left,
            Direction::TurnRight => &routes.turn_right,
        }
    }
}

/// One firmware request: a direction flag plus optional wheel speeds in
/// `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HttpCommand {
    pub direction: Direction,
    pub left_spd: Option<f32>,
    pub right_spd: Option<f32>,
}

impl HttpCommand {
    pub fn new(direction: Direction, left_spd: f32, right_spd: f32) -> Self {
        Self {
            direction,
            left_spd: Some(left_spd.clamp(0.0, 1.0)),
            right_spd: Some(right_spd.clamp(0.0, 1.0)),
        }
    }

    /// `stop=True` with no speed parameters.
    pub fn stop() -> Self {
        Self {
            direction: Direction::Stop,
            left_spd: None,
            right_spd: None,
        }
    }

    /// Magnitudes become fractions of full scale.
    pub fn from_command(command: &MotorCommand) -> Self {
        let scale = f32::from(MOTOR_MAX);
        Self::new(
            Direction::from_command(command),
            f32::from(command.left) / scale,
            f32::from(command.right) / scale,
        )
    }

    /// Query pairs in the order the firmware documents them.
    pub fn query(&self, routes: &HttpRoutes) -> Vec<(String, String)> {
        let mut pairs = vec![(
            self.direction.route(routes).to_string(),
            routes.flag_value.clone(),
        )];
        if let Some(l) = self.left_spd {
            pairs.push((routes.left_spd.clone(), l.to_string()));
        }
        if let Some(r) = self.right_spd {
            pairs.push((routes.right_spd.clone(), r.to_string()));
        }
        pairs
    }
}

pub struct HttpSession {
    config: HttpConfig,
    client: reqwest::Client,
    connected: bool,
    pending: Vec<TelemetryReading>,
}

impl HttpSession {
    /// # Errors
    ///
    /// Returns [`JuniorError::Config`] when the HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self, JuniorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| JuniorError::Config(format!("http client: {e}")))?;
        Ok(Self {
            config,
            client,
            connected: false,
            pending: Vec::new(),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Send one command and return the distance the firmware answered with.
    ///
    /// A transport failure (timeout, refused connection, HTTP error status)
    /// marks the session disconnected; the next success marks it connected
    /// again.
    ///
    /// # Errors
    ///
    /// [`JuniorError::Timeout`] past `timeout`, [`JuniorError::Transport`] for
    /// other request failures, [`JuniorError::Decode`] when the body is not a
    /// number.
    pub async fn send_control(
        &mut self,
        command: &HttpCommand,
        timeout: Duration,
    ) -> Result<f32, JuniorError> {
        let result = self.request(command, timeout).await;
        match &result {
            Ok(_) | Err(JuniorError::Decode { .. }) => self.connected = true,
            Err(e) => {
                if self.connected {
                    warn!(error = %e, "vehicle HTTP link lost");
                }
                self.connected = false;
            }
        }
        result
    }

    async fn request(&self, command: &HttpCommand, timeout: Duration) -> Result<f32, JuniorError> {
        let query = command.query(&self.config.routes);
        debug!(?query, "http command");

        let response = self
            .client
            .get(self.config.command_url())
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| request_error(e, timeout))?;
        let body = response
            .text()
            .await
            .map_err(|e| request_error(e, timeout))?;
        codec::parse_distance(&body)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.config.command_timeout_ms)
    }
}

fn request_error(e: reqwest::Error, timeout: Duration) -> JuniorError {
    if e.is_timeout() {
        JuniorError::Timeout {
            transport: TRANSPORT.to_string(),
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        JuniorError::Transport {
            transport: TRANSPORT.to_string(),
            details: e.to_string(),
        }
    }
}

#[async_trait]
impl TransportSession for HttpSession {
    fn name(&self) -> &str {
        TRANSPORT
    }

    fn telemetry_mode(&self) -> TelemetryMode {
        TelemetryMode::Poll
    }

    async fn connect(&mut self) -> Result<(), JuniorError> {
        info!(url = %self.config.command_url(), "http session ready");
        self.connected = true;
        Ok(())
    }

    async fn send_command(&mut self, command: &MotorCommand) -> Result<(), JuniorError> {
        let timeout = self.command_timeout();
        let distance = self
            .send_control(&HttpCommand::from_command(command), timeout)
            .await?;
        self.pending.push(TelemetryReading::new(
            TelemetryField::UltrasonicDistance,
            TelemetryValue::Integer(distance.round() as i32),
        ));
        Ok(())
    }

    async fn poll_telemetry(&mut self) -> Result<Vec<TelemetryReading>, JuniorError> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) -> Result<(), JuniorError> {
        if self.connected {
            info!("http session closed");
        }
        self.connected = false;
        self.pending.clear();
        Ok(())
    }

    async fn send_stop(&mut self) -> Result<(), JuniorError> {
        let timeout = Duration::from_millis(self.config.stop_timeout_ms);
        self.send_control(&HttpCommand::stop(), timeout)
            .await
            .map(|_| ())
    }
}
