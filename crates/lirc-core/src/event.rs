//! IR broadcast events

use serde::{Deserialize, Serialize};
use std::fmt;

/// One infrared reception pushed by lircd
///
/// Wire format: `<16 hex digit code> <hex repeat> <button> <remote>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Decoded scan code
    pub code: u64,
    /// Repeat counter, 0 for the first press
    pub repeat: i64,
    /// Button name from the remote's config
    pub button: String,
    /// Remote name from the remote's config
    pub remote: String,
}

impl Event {
    /// True for the initial press, false for auto-repeats
    pub fn is_first_press(&self) -> bool {
        self.repeat == 0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x} {:x} {} {}",
            self.code, self.repeat, self.button, self.remote
        )
    }
}
