//! Reserved lines of the lircd reply grammar
//!
//! ```text
//! BEGIN
//! <command>
//! SUCCESS | ERROR
//! [DATA
//! <n>
//! <line 1> .. <line n>]
//! END
//! ```

/// Opens a reply record
pub const BEGIN: &str = "BEGIN";
/// Closes a reply record
pub const END: &str = "END";
/// Command succeeded
pub const SUCCESS: &str = "SUCCESS";
/// Command failed
pub const ERROR: &str = "ERROR";
/// Introduces the data section
pub const DATA: &str = "DATA";
/// Echo of the record lircd pushes to every client after a config reload
pub const SIGHUP: &str = "SIGHUP";
