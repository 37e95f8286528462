//! Terminal keyboard device.
//!
//! Puts the terminal into raw mode and collects every key event that arrived
//! since the previous tick.  Terminals only report presses and auto-repeats,
//! so a key counts as held for a tick when at least one event for it was
//! seen during that tick.

use std::collections::HashSet;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use junior_types::JuniorError;
use tracing::{debug, warn};

use crate::input::{ControlKey, InputSample, InputSource, KeyboardControl};

/// Raw-mode terminal keyboard feeding a [`KeyboardControl`].
///
/// Raw mode is restored when the value is dropped.
pub struct TerminalKeyboard {
    control: KeyboardControl,
}

impl TerminalKeyboard {
    /// Enable raw mode and wrap `control`.
    ///
    /// # Errors
    ///
    /// Returns [`JuniorError::Input`] when stdin is not a terminal.
    pub fn new(control: KeyboardControl) -> Result<Self, JuniorError> {
        terminal::enable_raw_mode()
            .map_err(|e| JuniorError::Input(format!("cannot enable raw mode: {e}")))?;
        debug!("terminal raw mode enabled");
        Ok(Self { control })
    }

    fn drain_keys(&mut self) -> Result<HashSet<ControlKey>, JuniorError> {
        let mut held = HashSet::new();
        while event::poll(Duration::ZERO)
            .map_err(|e| JuniorError::Input(format!("keyboard poll failed: {e}")))?
        {
            let ev = event::read()
                .map_err(|e| JuniorError::Input(format!("keyboard read failed: {e}")))?;
            if let Event::Key(key) = ev
                && key.kind != KeyEventKind::Release
                && let Some(control) = map_key(&key)
            {
                held.insert(control);
            }
        }
        Ok(held)
    }
}

impl InputSource for TerminalKeyboard {
    fn id(&self) -> &str {
        "keyboard"
    }

    fn sample(&mut self) -> Result<InputSample, JuniorError> {
        let held = self.drain_keys()?;
        Ok(self.control.apply(&held))
    }
}

impl Drop for TerminalKeyboard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Translate a terminal key event into a [`ControlKey`].
///
/// `Ctrl-C` maps to quit because raw mode swallows the signal.
pub fn map_key(key: &KeyEvent) -> Option<ControlKey> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') | KeyCode::Char('C') => Some(ControlKey::Quit),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'w' => Some(ControlKey::W),
            's' => Some(ControlKey::S),
            'a' => Some(ControlKey::A),
            'd' => Some(ControlKey::D),
            'q' => Some(ControlKey::Quit),
            _ => None,
        },
        KeyCode::Up => Some(ControlKey::Up),
        KeyCode::Down => Some(ControlKey::Down),
        KeyCode::Left => Some(ControlKey::Left),
        KeyCode::Right => Some(ControlKey::Right),
        KeyCode::Esc => Some(ControlKey::Quit),
        _ => None,
    }
}
