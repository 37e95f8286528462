//! `junior-hal` – operator devices and camera bytes.
//!
//! # Modules
//!
//! - [`input`] – the [`InputSource`] trait plus the pure keyboard and
//!   joystick mappings that turn device state into a
//!   [`MotorCommand`][junior_types::MotorCommand].
//! - [`keyboard`] – [`TerminalKeyboard`], a crossterm raw-mode device.
//! - [`gamepad`] – [`GamepadInput`], a gilrs-backed joystick device.
//! - [`sim`] – [`ScriptedInput`], replays a fixed list of commands.
//! - [`camera`] – JPEG frame type and the MJPEG stream splitter.

pub mod camera;
pub mod gamepad;
pub mod input;
pub mod keyboard;
pub mod sim;

pub use camera::{CameraFrame, MjpegSplitter, Resolution};
pub use gamepad::GamepadInput;
pub use input::{ControlKey, InputSample, InputSource, JoystickControl, KeyboardControl};
pub use keyboard::TerminalKeyboard;
pub use sim::ScriptedInput;
