//! In-process input for tests and dry runs without an operator.
//!
//! # Example
//!
//! ```rust
//! use junior_hal::sim::ScriptedInput;
//! use junior_hal::input::InputSource;
//! use junior_types::MotorCommand;
//!
//! let mut input = ScriptedInput::new([MotorCommand::clamped(80, 80, true, true)]);
//! assert!(input.sample().unwrap().keep_running);
//! assert!(!input.sample().unwrap().keep_running); // script exhausted → quit
//! ```

use std::collections::VecDeque;

use junior_types::{JuniorError, MotorCommand};

use crate::input::{InputSample, InputSource};

/// Replays a fixed list of commands, one per tick.
///
/// Once the script runs out it either requests a stop or keeps repeating the
/// last command, depending on how it was built.
pub struct ScriptedInput {
    script: VecDeque<MotorCommand>,
    last: MotorCommand,
    endless: bool,
    taken: usize,
}

impl ScriptedInput {
    /// Play `commands` then ask to quit.
    pub fn new(commands: impl IntoIterator<Item = MotorCommand>) -> Self {
        Self {
            script: commands.into_iter().collect(),
            last: MotorCommand::stop(),
            endless: false,
            taken: 0,
        }
    }

    /// Hold `command` forever; never asks to quit.
    pub fn endless(command: MotorCommand) -> Self {
        Self {
            script: VecDeque::new(),
            last: command,
            endless: true,
            taken: 0,
        }
    }

    /// Number of samples handed out so far.
    pub fn samples_taken(&self) -> usize {
        self.taken
    }
}

impl InputSource for ScriptedInput {
    fn id(&self) -> &str {
        "scripted"
    }

    fn sample(&mut self) -> Result<InputSample, JuniorError> {
        self.taken += 1;
        match self.script.pop_front() {
            Some(command) => {
                self.last = command;
                Ok(InputSample::running(command))
            }
            None if self.endless => Ok(InputSample::running(self.last)),
            None => Ok(InputSample::quit(self.last)),
        }
    }
}
