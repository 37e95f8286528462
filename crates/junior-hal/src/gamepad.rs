//! Gamepad device backed by gilrs.
//!
//! Left stick X steers, left stick Y is throttle (gilrs reports up as
//! positive).  `Start` or `Select` quits.

use gilrs::{Axis, Button, EventType, GamepadId, Gilrs};
use junior_types::JuniorError;
use tracing::{info, warn};

use crate::input::{InputSample, InputSource, JoystickControl};

pub struct GamepadInput {
    gilrs: Gilrs,
    active: GamepadId,
    name: String,
    control: JoystickControl,
}

impl GamepadInput {
    /// Open the first connected gamepad.
    ///
    /// Returns `Ok(None)` when gilrs works but no pad is plugged in, so the
    /// caller can fall back to the keyboard.
    ///
    /// # Errors
    ///
    /// Returns [`JuniorError::Input`] when the platform backend fails.
    pub fn detect(control: JoystickControl) -> Result<Option<Self>, JuniorError> {
        let gilrs =
            Gilrs::new().map_err(|e| JuniorError::Input(format!("gamepad backend: {e}")))?;
        let first = gilrs
            .gamepads()
            .find(|(_, pad)| pad.is_connected())
            .map(|(id, pad)| (id, pad.name().to_string()));

        match first {
            Some((active, name)) => {
                info!(gamepad = %name, "gamepad detected");
                Ok(Some(Self {
                    gilrs,
                    active,
                    name,
                    control,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl InputSource for GamepadInput {
    fn id(&self) -> &str {
        "gamepad"
    }

    fn sample(&mut self) -> Result<InputSample, JuniorError> {
        let mut quit = false;
        while let Some(ev) = self.gilrs.next_event() {
            if ev.id != self.active {
                continue;
            }
            match ev.event {
                EventType::ButtonPressed(Button::Start | Button::Select, _) => quit = true,
                EventType::Disconnected => {
                    warn!(gamepad = %self.name, "gamepad disconnected");
                    return Err(JuniorError::Input(format!(
                        "gamepad '{}' disconnected",
                        self.name
                    )));
                }
                _ => {}
            }
        }

        let pad = self.gilrs.gamepad(self.active);
        let command = self
            .control
            .apply(pad.value(Axis::LeftStickX), pad.value(Axis::LeftStickY));

        Ok(if quit {
            InputSample::quit(command)
        } else {
            InputSample::running(command)
        })
    }
}
