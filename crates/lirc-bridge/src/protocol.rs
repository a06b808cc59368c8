//! Line protocol spoken by lircd
//!
//! One socket carries two record kinds:
//! - Broadcasts, one line each: `<code> <repeat> <button> <remote>`
//! - Replies, framed by `BEGIN` .. `END` (see [`lirc_core::markers`])
//!
//! [`ParserState`] is the record grammar. Each state has its own transition
//! function returning the next state and, optionally, a decoded message or
//! the reason the current line was rejected. [`Parser`] drives it line by
//! line and logs rejections.

use lirc_core::markers::{BEGIN, DATA, END, ERROR, SUCCESS};
use lirc_core::{Event, LircError, Reply, Result};
use tracing::warn;

/// A fully decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LircMessage {
    /// Unsolicited IR event
    Event(Event),
    /// Reply to a command
    Reply(Reply),
}

/// Position inside the record grammar
///
/// Reply states carry the reply built so far, so a record is only ever
/// handed out once its final `END` has been consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParserState {
    /// Between records
    #[default]
    Await,
    /// Saw `BEGIN`, next line is the command echo
    ReplyHeader,
    /// Expecting `SUCCESS`, `ERROR` or `END`
    Status(Reply),
    /// Expecting `DATA` or `END`
    DataStart(Reply),
    /// Expecting the data line count
    DataLen(Reply),
    /// Collecting data lines
    DataBody { reply: Reply, received: usize },
    /// Expecting the closing `END`
    DataEnd(Reply),
}

/// Result of feeding one line to a state
#[derive(Debug)]
pub struct Step {
    /// State for the next line
    pub next: ParserState,
    /// Emitted message, or why the line was rejected
    pub output: Option<Result<LircMessage>>,
}

impl Step {
    fn to(next: ParserState) -> Self {
        Self { next, output: None }
    }

    fn emit(message: LircMessage) -> Self {
        Self {
            next: ParserState::Await,
            output: Some(Ok(message)),
        }
    }

    fn reject(err: LircError) -> Self {
        Self {
            next: ParserState::Await,
            output: Some(Err(err)),
        }
    }
}

impl ParserState {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ParserState::Await => "await",
            ParserState::ReplyHeader => "reply-header",
            ParserState::Status(_) => "status",
            ParserState::DataStart(_) => "data-start",
            ParserState::DataLen(_) => "data-len",
            ParserState::DataBody { .. } => "data-body",
            ParserState::DataEnd(_) => "data-end",
        }
    }

    /// Consume one line (without its terminator)
    pub fn advance(self, line: &str) -> Step {
        match self {
            ParserState::Await => on_await(line),
            ParserState::ReplyHeader => on_reply_header(line),
            ParserState::Status(reply) => on_status(reply, line),
            ParserState::DataStart(reply) => on_data_start(reply, line),
            ParserState::DataLen(reply) => on_data_len(reply, line),
            ParserState::DataBody { reply, received } => on_data_body(reply, received, line),
            ParserState::DataEnd(reply) => on_data_end(reply, line),
        }
    }
}

fn on_await(line: &str) -> Step {
    if line == BEGIN {
        return Step::to(ParserState::ReplyHeader);
    }

    // Broken broadcasts are skipped without leaving Await
    match parse_event(line) {
        Ok(event) => Step::emit(LircMessage::Event(event)),
        Err(e) => Step::reject(e),
    }
}

fn on_reply_header(line: &str) -> Step {
    Step::to(ParserState::Status(Reply::new(line)))
}

fn on_status(mut reply: Reply, line: &str) -> Step {
    match line {
        SUCCESS => {
            reply.success = true;
            Step::to(ParserState::DataStart(reply))
        }
        ERROR => {
            reply.success = false;
            Step::to(ParserState::DataStart(reply))
        }
        END => {
            reply.success = true;
            Step::emit(LircMessage::Reply(reply))
        }
        other => Step::reject(LircError::ProtocolError(format!(
            "invalid status {:?} in reply to '{}'",
            other, reply.command
        ))),
    }
}

fn on_data_start(reply: Reply, line: &str) -> Step {
    match line {
        END => Step::emit(LircMessage::Reply(reply)),
        DATA => Step::to(ParserState::DataLen(reply)),
        other => Step::reject(LircError::ProtocolError(format!(
            "expected DATA or END in reply to '{}', got {:?}",
            reply.command, other
        ))),
    }
}

fn on_data_len(mut reply: Reply, line: &str) -> Step {
    let length = match line.parse::<usize>() {
        Ok(length) => length,
        Err(_) => {
            return Step::reject(LircError::ProtocolError(format!(
                "invalid data length {:?} in reply to '{}'",
                line, reply.command
            )));
        }
    };

    reply.data_length = length;
    reply.data.clear();
    if length == 0 {
        Step::to(ParserState::DataEnd(reply))
    } else {
        Step::to(ParserState::DataBody { reply, received: 0 })
    }
}

fn on_data_body(mut reply: Reply, received: usize, line: &str) -> Step {
    if received < reply.data_length {
        reply.data.push(line.to_string());
    }
    let received = received + 1;

    if received >= reply.data_length {
        Step::to(ParserState::DataEnd(reply))
    } else {
        Step::to(ParserState::DataBody { reply, received })
    }
}

fn on_data_end(reply: Reply, line: &str) -> Step {
    if line == END {
        Step::emit(LircMessage::Reply(reply))
    } else {
        Step::reject(LircError::ProtocolError(format!(
            "expected END after data of '{}', got {:?}",
            reply.command, line
        )))
    }
}

/// Decode a broadcast line: `<code> <repeat> <button> <remote>`
///
/// The code must be 16 hex digits and is read big-endian, so
/// [`Event::code`] equals the number lircd printed.
pub fn parse_event(line: &str) -> Result<Event> {
    let fields: Vec<&str> = line.split(' ').collect();
    let [code, repeat, button, remote] = fields[..] else {
        return Err(LircError::InvalidEvent(format!(
            "expected 4 fields, got {}",
            fields.len()
        )));
    };

    let bytes = hex::decode(code)
        .map_err(|e| LircError::InvalidEvent(format!("code not parseable: {}", e)))?;
    let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
        LircError::InvalidEvent(format!("code has wrong length: {} bytes", bytes.len()))
    })?;

    let repeat = i64::from_str_radix(repeat, 16)
        .map_err(|e| LircError::InvalidEvent(format!("invalid repeat count: {}", e)))?;

    Ok(Event {
        code: u64::from_be_bytes(bytes),
        repeat,
        button: button.to_string(),
        remote: remote.to_string(),
    })
}

/// Stateful line classifier
#[derive(Debug, Default)]
pub struct Parser {
    state: ParserState,
}

impl Parser {
    /// Create a parser waiting for the next record
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Feed one line, returning a message if it completed a record
    pub fn feed(&mut self, line: &str) -> Option<LircMessage> {
        let step = std::mem::take(&mut self.state).advance(line);
        self.state = step.next;

        match step.output {
            Some(Ok(message)) => Some(message),
            Some(Err(e)) => {
                warn!("Discarding lircd line {:?}: {}", line, e);
                None
            }
            None => None,
        }
    }
}
