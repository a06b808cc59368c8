//! Connection plumbing for lircd clients
//!
//! This crate provides:
//! - The lircd line protocol parser (broadcast events and framed replies)
//! - Transport abstractions (LineReader/LineWriter traits)
//! - TCP and Unix socket transports
//! - Background reader task routing events and replies

pub mod protocol;
pub mod state;
pub mod tcp;
pub mod transport;
#[cfg(unix)]
pub mod unix;

pub use protocol::{LircMessage, Parser, ParserState, parse_event};
pub use state::{ConnectionState, StateCell};
pub use transport::{
    LineReader, LineWriter, ReplyWaiter, StreamLineReader, StreamLineWriter, reader_task,
};
