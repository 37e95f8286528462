//! Ultrasonic stop for forward motion.

use junior_types::{MotorCommand, ULTRASONIC_NO_ECHO};

/// Zeroes forward commands while an obstacle is closer than the threshold.
///
/// Only a command with both wheels forward is inhibited; reversing or
/// spinning away stays possible.  The no-echo sentinel and negative readings
/// never inhibit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleGuard {
    min_distance: Option<i32>,
}

impl ObstacleGuard {
    pub fn new(min_distance: Option<i32>) -> Self {
        Self { min_distance }
    }

    pub fn disabled() -> Self {
        Self { min_distance: None }
    }

    pub fn min_distance(&self) -> Option<i32> {
        self.min_distance
    }

    pub fn inhibits(&self, command: &MotorCommand, ultra_dist: i32) -> bool {
        let Some(min) = self.min_distance else {
            return false;
        };
        command.left_forward
            && command.right_forward
            && !command.is_idle()
            && ultra_dist != ULTRASONIC_NO_ECHO
            && (0..min).contains(&ultra_dist)
    }

    /// The command to actually transmit this tick.
    pub fn filter(&self, command: MotorCommand, ultra_dist: i32) -> MotorCommand {
        if self.inhibits(&command, ultra_dist) {
            MotorCommand {
                left: 0,
                right: 0,
                ..command
            }
        } else {
            command
        }
    }
}
