//! Transport abstractions for lircd connections
//!
//! Provides LineReader/LineWriter traits over newline-delimited text, generic
//! implementations for any tokio byte stream, and the background reader task
//! that turns incoming lines into events and replies.

use crate::protocol::{LircMessage, Parser};
use crate::state::{ConnectionState, StateCell};
use async_trait::async_trait;
use lirc_core::markers::SIGHUP;
use lirc_core::{Event, LircError, Reply, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Replies kept for waiters that have not registered yet
const MAX_BACKLOG: usize = 64;

/// Trait for async line reading from a transport
#[async_trait]
pub trait LineReader: Send {
    /// Next line without its terminator, `None` at end of stream
    ///
    /// Must be cancel safe: [`reader_task`] polls it inside `select!`.
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// Trait for async line writing to a transport
#[async_trait]
pub trait LineWriter: Send {
    /// Write `line` plus a newline and flush
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Close the write direction
    async fn shutdown(&mut self) -> Result<()>;
}

/// Line reader over any async byte stream
pub struct StreamLineReader<R>(Lines<BufReader<R>>);

impl<R: AsyncRead + Unpin> StreamLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self(BufReader::new(inner).lines())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineReader for StreamLineReader<R> {
    async fn read_line(&mut self) -> Result<Option<String>> {
        // Lines::next_line is cancel safe
        self.0
            .next_line()
            .await
            .map_err(|e| LircError::ConnectionError(format!("Read failed: {}", e)))
    }
}

/// Line writer over any async byte stream
pub struct StreamLineWriter<W>(W);

impl<W: AsyncWrite + Unpin> StreamLineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self(inner)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> LineWriter for StreamLineWriter<W> {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        self.0
            .write_all(buf.as_bytes())
            .await
            .map_err(|e| LircError::ConnectionError(format!("Write failed: {}", e)))?;

        // Flush to ensure the command reaches lircd
        self.0
            .flush()
            .await
            .map_err(|e| LircError::ConnectionError(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.0
            .shutdown()
            .await
            .map_err(|e| LircError::ConnectionError(format!("Shutdown failed: {}", e)))
    }
}

/// A caller waiting for the reply to one command
#[derive(Debug)]
pub struct ReplyWaiter {
    /// Command as written, used to check lircd's echo
    pub command: String,
    /// Where the reply goes
    pub tx: oneshot::Sender<Reply>,
}

impl ReplyWaiter {
    /// Create a waiter and the receiver its reply arrives on
    pub fn new(command: impl Into<String>) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command: command.into(),
                tx,
            },
            rx,
        )
    }

    fn complete(self, reply: Reply) {
        if reply.command != self.command {
            warn!(
                "Reply echo mismatch: expected '{}', got '{}'",
                self.command, reply.command
            );
        }
        if let Err(reply) = self.tx.send(reply) {
            debug!("Dropping reply to '{}': caller stopped waiting", reply.command);
        }
    }
}

/// FIFO matching of replies to waiters
///
/// lircd answers commands in the order they were written, and waiters are
/// registered in write order, so the oldest waiter owns the next reply.
/// The echoed command line corrects that order when a record was lost:
/// - an abandoned waiter whose echo does not match lost its reply and is skipped
/// - a reply whose echo matches a later waiter goes to that waiter
/// - `SIGHUP` records nobody asked for are dropped
#[derive(Debug, Default)]
struct ReplyRouter {
    pending: VecDeque<ReplyWaiter>,
    backlog: VecDeque<Reply>,
}

impl ReplyRouter {
    fn register(&mut self, waiter: ReplyWaiter) {
        match self.backlog.pop_front() {
            Some(reply) => waiter.complete(reply),
            None => self.pending.push_back(waiter),
        }
    }

    fn deliver(&mut self, reply: Reply) {
        let requested = self.pending.iter().any(|w| w.command == reply.command);
        if reply.command == SIGHUP && !requested {
            warn!("lircd reloaded its configuration (unsolicited SIGHUP reply)");
            return;
        }

        // Callers that gave up after their record was discarded
        while let Some(waiter) = self.pending.front() {
            if !waiter.tx.is_closed() || waiter.command == reply.command {
                break;
            }
            debug!("Dropping abandoned waiter for '{}'", waiter.command);
            self.pending.pop_front();
        }

        if self.pending.is_empty() {
            if self.backlog.len() == MAX_BACKLOG {
                if let Some(dropped) = self.backlog.pop_front() {
                    warn!("Reply backlog full, dropping reply to '{}'", dropped.command);
                }
            }
            debug!("Reply to '{}' arrived before its waiter", reply.command);
            self.backlog.push_back(reply);
            return;
        }

        let index = self
            .pending
            .iter()
            .position(|w| w.command == reply.command)
            .unwrap_or(0);
        if index > 0 {
            warn!(
                "Reply to '{}' skipped {} earlier command(s) whose reply was lost",
                reply.command, index
            );
        }
        if let Some(waiter) = self.pending.remove(index) {
            waiter.complete(reply);
        }
    }
}

/// Background reader task for one lircd connection
///
/// This task:
/// - Reads lines from the transport and runs them through the [`Parser`]
/// - Publishes broadcast events on `event_tx`
/// - Hands each reply to its pending waiter (see `ReplyRouter`) and taps it
///   to `reply_tx`
///
/// It stops at end of stream, on a read error, or once every request sender
/// is dropped. On exit it marks `state` closed and drops pending waiters, so
/// their callers see the channel close instead of blocking. Loss of a
/// connection that was still `Open` is logged as a warning; a stop after a
/// deliberate close is not.
///
/// # Arguments
/// - `reader`: The transport reader
/// - `request_rx`: Waiters registered by the command path, in write order
/// - `event_tx`: Broadcast sender for IR events
/// - `reply_tx`: Broadcast sender observing every reply
/// - `state`: Connection state shared with `close`
pub async fn reader_task<R: LineReader>(
    mut reader: R,
    mut request_rx: mpsc::Receiver<ReplyWaiter>,
    event_tx: broadcast::Sender<Event>,
    reply_tx: broadcast::Sender<Reply>,
    state: StateCell,
) {
    let mut parser = Parser::new();
    let mut router = ReplyRouter::default();

    let outcome: Result<()> = loop {
        tokio::select! {
            // Registrations first: a waiter written before its reply is read
            // must be queued before that reply is routed
            biased;

            req = request_rx.recv() => {
                match req {
                    Some(waiter) => router.register(waiter),
                    None => {
                        debug!("Request channel closed, reader task exiting");
                        break Ok(());
                    }
                }
            }

            line = reader.read_line() => {
                match line {
                    Ok(Some(line)) => match parser.feed(&line) {
                        Some(LircMessage::Event(event)) => {
                            debug!("lircd event: {}", event);
                            // Ignore send errors (no subscribers)
                            let _ = event_tx.send(event);
                        }
                        Some(LircMessage::Reply(reply)) => {
                            debug!(
                                "lircd reply: '{}' success={} data={:?}",
                                reply.command, reply.success, reply.data
                            );
                            let _ = reply_tx.send(reply.clone());
                            router.deliver(reply);
                        }
                        None => {}
                    },
                    Ok(None) => break Err(LircError::ConnectionClosed),
                    Err(e) => break Err(e),
                }
            }
        }
    };

    match (state.mark_closed(), outcome) {
        (ConnectionState::Open, Err(e)) => warn!("lircd connection lost: {}", e),
        (ConnectionState::Open, Ok(())) => debug!("lircd client dropped, reader stopped"),
        (_, _) => debug!("lircd reader stopped after close"),
    }

    if !router.pending.is_empty() {
        debug!(
            "Releasing {} caller(s) still waiting for a reply",
            router.pending.len()
        );
    }
}
