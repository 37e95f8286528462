//! Wires a [`SessionLoop`] from the saved configuration.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use junior_hal::{GamepadInput, InputSource, JoystickControl, KeyboardControl, TerminalKeyboard};
use junior_middleware::{
    BleSession, DEFAULT_QUEUE_CAPACITY, EventSender, HttpSession, SimTransport, TransportSession,
    event_queue,
};
use junior_runtime::SessionLoop;
use junior_types::{JuniorError, TelemetryMode};
use tracing::{info, warn};

use crate::config::{Config, InputKind, TransportKind};

pub fn build_transport(
    cfg: &Config,
    events: EventSender,
) -> Result<Box<dyn TransportSession>, JuniorError> {
    let transport: Box<dyn TransportSession> = match cfg.session.transport {
        TransportKind::Ble => Box::new(BleSession::new(cfg.ble.clone(), events)),
        TransportKind::Http => Box::new(HttpSession::new(cfg.http.clone())?),
        TransportKind::Sim => Box::new(SimTransport::new(TelemetryMode::Poll, events)),
    };
    Ok(transport)
}

/// Open the operator device.  `auto` falls back to the keyboard when no
/// gamepad is plugged in or the gamepad backend fails.
pub fn build_input(cfg: &Config) -> Result<Box<dyn InputSource>, JuniorError> {
    let joystick = JoystickControl::new(cfg.session.deadzone);
    match cfg.session.input {
        InputKind::Keyboard => keyboard(cfg),
        InputKind::Gamepad => GamepadInput::detect(joystick)?
            .map(|pad| Box::new(pad) as Box<dyn InputSource>)
            .ok_or_else(|| JuniorError::Input("no gamepad connected".to_string())),
        InputKind::Auto => match GamepadInput::detect(joystick) {
            Ok(Some(pad)) => Ok(Box::new(pad)),
            Ok(None) => keyboard(cfg),
            Err(e) => {
                warn!(error = %e, "gamepad unavailable, using keyboard");
                keyboard(cfg)
            }
        },
    }
}

fn keyboard(cfg: &Config) -> Result<Box<dyn InputSource>, JuniorError> {
    let keys = TerminalKeyboard::new(KeyboardControl::new(cfg.session.motor_step))?;
    Ok(Box::new(keys))
}

/// Build a ready-to-start loop that also stops when `shutdown` is raised.
pub fn build_session(
    cfg: &Config,
    input: Box<dyn InputSource>,
    shutdown: Arc<AtomicBool>,
) -> Result<SessionLoop, JuniorError> {
    cfg.validate().map_err(JuniorError::Config)?;
    let (tx, rx) = event_queue(DEFAULT_QUEUE_CAPACITY);
    let transport = build_transport(cfg, tx)?;
    info!(
        vehicle = %cfg.session.name,
        transport = %cfg.session.transport,
        input = input.id(),
        "session assembled"
    );
    Ok(SessionLoop::new(cfg.session_config(), input, transport, rx).with_shutdown_flag(shutdown))
}
