//! Command replies

use crate::error::{LircError, Result};
use serde::{Deserialize, Serialize};

/// Outcome of one command sent to lircd
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Command line echoed back by lircd
    pub command: String,
    /// SUCCESS (or bare END) vs ERROR
    pub success: bool,
    /// Number of data lines announced after DATA
    pub data_length: usize,
    /// Data lines in the order received
    #[serde(default)]
    pub data: Vec<String>,
}

impl Reply {
    /// Start a reply for the given command echo
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Data lines joined with single spaces
    pub fn message(&self) -> String {
        self.data.join(" ")
    }

    /// Map an ERROR reply to `LircError::CommandFailed`
    pub fn into_result(self) -> Result<Reply> {
        if self.success {
            Ok(self)
        } else {
            Err(LircError::CommandFailed {
                message: self.message(),
                command: self.command,
            })
        }
    }
}
