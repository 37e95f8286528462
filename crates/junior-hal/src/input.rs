//! Generic `InputSource` trait and the device-independent control mappings.
//!
//! Devices ([`TerminalKeyboard`][crate::keyboard::TerminalKeyboard],
//! [`GamepadInput`][crate::gamepad::GamepadInput]) only translate raw device
//! state into [`ControlKey`]s or axis values.  The mapping from that state to
//! a [`MotorCommand`] lives here so it can be tested without hardware.

use std::collections::HashSet;

use junior_types::{JuniorError, MOTOR_MAX, MotorCommand, clamp_motor};

/// Default magnitude change per tick for a held throttle key.
pub const DEFAULT_MOTOR_STEP: u8 = 10;

/// Default joystick steering deadzone around centre.
pub const DEFAULT_DEADZONE: f32 = 0.01;

/// What an input device produced for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSample {
    /// `false` once the operator asked to quit.
    pub keep_running: bool,
    pub command: MotorCommand,
}

impl InputSample {
    pub fn running(command: MotorCommand) -> Self {
        Self {
            keep_running: true,
            command,
        }
    }

    pub fn quit(command: MotorCommand) -> Self {
        Self {
            keep_running: false,
            command,
        }
    }
}

/// A human input device sampled once per tick.
///
/// Sampling must not block: the session loop calls [`InputSource::sample`]
/// inside its tick budget.  Sources are driven from the session task only,
/// so no `Send` bound is required (gilrs handles are not `Send` everywhere).
pub trait InputSource {
    /// Stable identifier used in logs, e.g. `"keyboard"`.
    fn id(&self) -> &str;

    /// Read the device and return this tick's command.
    ///
    /// # Errors
    ///
    /// Returns [`JuniorError::Input`] when the device can no longer be read.
    fn sample(&mut self) -> Result<InputSample, JuniorError>;
}

/// Logical keys understood by [`KeyboardControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKey {
    /// Left motor faster.
    W,
    /// Left motor slower.
    S,
    /// Left motor forward.
    A,
    /// Left motor backward.
    D,
    /// Right motor faster.
    Up,
    /// Right motor slower.
    Down,
    /// Right motor forward.
    Left,
    /// Right motor backward.
    Right,
    Quit,
}

/// Tank-style keyboard mapping: each side has its own throttle and
/// direction keys.
///
/// Magnitudes change by a fixed step per tick while a key is held and stay
/// where they are when released.  Direction keys latch a mode; they never
/// touch the magnitude.
#[derive(Debug, Clone)]
pub struct KeyboardControl {
    left_step: i32,
    right_step: i32,
    command: MotorCommand,
}

impl KeyboardControl {
    /// Same step for both motors.
    pub fn new(step: u8) -> Self {
        Self::with_steps(step, step)
    }

    pub fn with_steps(left_step: u8, right_step: u8) -> Self {
        Self {
            left_step: i32::from(left_step),
            right_step: i32::from(right_step),
            command: MotorCommand::stop(),
        }
    }

    /// The command as of the last [`apply`][Self::apply].
    pub fn command(&self) -> MotorCommand {
        self.command
    }

    /// Fold the keys held during this tick into the command.
    pub fn apply(&mut self, held: &HashSet<ControlKey>) -> InputSample {
        if held.contains(&ControlKey::Quit) {
            return InputSample::quit(self.command);
        }

        let mut left = i32::from(self.command.left);
        let mut right = i32::from(self.command.right);

        if held.contains(&ControlKey::Up) {
            right += self.right_step;
        } else if held.contains(&ControlKey::Down) {
            right -= self.right_step;
        }

        if held.contains(&ControlKey::W) {
            left += self.left_step;
        } else if held.contains(&ControlKey::S) {
            left -= self.left_step;
        }

        if held.contains(&ControlKey::A) {
            self.command.left_forward = true;
        } else if held.contains(&ControlKey::D) {
            self.command.left_forward = false;
        }

        if held.contains(&ControlKey::Left) {
            self.command.right_forward = true;
        } else if held.contains(&ControlKey::Right) {
            self.command.right_forward = false;
        }

        self.command.left = clamp_motor(left);
        self.command.right = clamp_motor(right);
        InputSample::running(self.command)
    }
}

impl Default for KeyboardControl {
    fn default() -> Self {
        Self::new(DEFAULT_MOTOR_STEP)
    }
}

/// Single-stick joystick mapping.
///
/// Both motors run at `|throttle|` scaled to `[0, 255]`; steering outside the
/// deadzone spins the wheels in opposite directions, inside it both follow
/// the throttle sign.
#[derive(Debug, Clone)]
pub struct JoystickControl {
    deadzone: f32,
}

impl JoystickControl {
    pub fn new(deadzone: f32) -> Self {
        Self {
            deadzone: deadzone.abs(),
        }
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    /// Map normalised axes to a command.
    ///
    /// `steering` is negative to the left, `throttle` positive forward; both
    /// nominally in `[-1, 1]`.  Values beyond the range saturate.
    pub fn apply(&self, steering: f32, throttle: f32) -> MotorCommand {
        let magnitude = Self::interpolate(throttle);

        let (left_forward, right_forward) = if steering < -self.deadzone {
            (false, true)
        } else if steering > self.deadzone {
            (true, false)
        } else {
            let forward = throttle > 0.0;
            (forward, forward)
        };

        MotorCommand {
            left: magnitude,
            right: magnitude,
            left_forward,
            right_forward,
        }
    }

    /// Linear map of `|axis|` from `[0, 1]` onto `[0, 255]`, truncating.
    fn interpolate(axis: f32) -> u8 {
        if !axis.is_finite() {
            return 0;
        }
        let scaled = axis.abs().min(1.0) * f32::from(MOTOR_MAX);
        clamp_motor(scaled as i32)
    }
}

impl Default for JoystickControl {
    fn default() -> Self {
        Self::new(DEFAULT_DEADZONE)
    }
}
