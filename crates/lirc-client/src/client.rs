//! lircd session: commands, replies and the event stream

use crate::config::{Endpoint, LircConfig};
use lirc_bridge::{
    ConnectionState, LineReader, LineWriter, ReplyWaiter, StateCell, StreamLineReader,
    StreamLineWriter, reader_task, tcp,
};
use lirc_core::{Event, LircError, Reply, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Write side of the connection, guarded as one unit so waiters are
/// registered in the same order their commands hit the socket
struct CommandChannel {
    writer: Box<dyn LineWriter>,
    request_tx: mpsc::Sender<ReplyWaiter>,
}

/// Client for one lircd connection
///
/// A background task reads the socket for the lifetime of the connection,
/// publishing IR events on [`events`](Self::events) and routing replies back
/// to [`command`](Self::command) callers. Commands from several tasks may share
/// one client; each caller receives the reply to its own command.
pub struct LircClient {
    /// Human readable endpoint for logs
    endpoint: String,
    /// Optional deadline for each reply
    reply_timeout: Option<Duration>,
    /// Lifecycle shared with the reader task
    state: StateCell,
    /// Writer and waiter queue (None once closed)
    channel: Mutex<Option<CommandChannel>>,
    /// Template for event subscriptions
    event_rx: broadcast::Receiver<Event>,
    /// Template for reply subscriptions
    reply_rx: broadcast::Receiver<Reply>,
    /// Background reader task handle
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LircClient {
    /// Connect to the endpoint in `config`
    pub async fn connect(config: &LircConfig) -> Result<Self> {
        let label = config.endpoint.to_string();
        match &config.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let (reader, writer) = lirc_bridge::unix::connect(path).await?;
                Ok(Self::from_transport(reader, writer, config, label))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(LircError::ConfigError(
                "Unix sockets are not supported on this platform".into(),
            )),
            Endpoint::Tcp(address) => {
                let (reader, writer) = tcp::connect(address).await?;
                Ok(Self::from_transport(reader, writer, config, label))
            }
        }
    }

    /// Connect to lircd's Unix socket with default settings
    pub async fn connect_unix(path: impl Into<PathBuf>) -> Result<Self> {
        Self::connect(&LircConfig::with_endpoint(Endpoint::Unix(path.into()))).await
    }

    /// Connect to `lircd --listen` at `host[:port]` with default settings
    pub async fn connect_tcp(address: &str) -> Result<Self> {
        Self::connect(&LircConfig::with_endpoint(Endpoint::tcp(address)?)).await
    }

    /// Wrap an already open duplex stream
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: &LircConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_transport(
            StreamLineReader::new(read_half),
            StreamLineWriter::new(write_half),
            config,
            "stream",
        )
    }

    /// Start the reader task over an already split transport
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_transport<R, W>(
        reader: R,
        writer: W,
        config: &LircConfig,
        endpoint: impl Into<String>,
    ) -> Self
    where
        R: LineReader + 'static,
        W: LineWriter + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel(config.request_capacity.max(1));
        let (event_tx, event_rx) = broadcast::channel(config.event_capacity.max(1));
        let (reply_tx, reply_rx) = broadcast::channel(config.reply_capacity.max(1));
        let state = StateCell::new();

        // The reader task owns the broadcast senders: once it stops,
        // every subscriber sees the stream close
        let handle = tokio::spawn(reader_task(
            reader,
            request_rx,
            event_tx,
            reply_tx,
            state.clone(),
        ));

        Self {
            endpoint: endpoint.into(),
            reply_timeout: config.reply_timeout,
            state,
            channel: Mutex::new(Some(CommandChannel {
                writer: Box::new(writer),
                request_tx,
            })),
            event_rx,
            reply_rx,
            reader_handle: Mutex::new(Some(handle)),
        }
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Subscribe to IR events received from now on
    ///
    /// The receiver yields `Closed` once the connection is closed or lost.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.event_rx.resubscribe()
    }

    /// Subscribe to every reply decoded from now on, whoever sent the command
    pub fn replies(&self) -> broadcast::Receiver<Reply> {
        self.reply_rx.resubscribe()
    }

    /// Send a raw command line and wait for its reply
    ///
    /// Returns the reply as received, including ERROR replies. Fails with
    /// `ConnectionClosed` when the connection is closed or lost before the
    /// reply arrives, and with `Timeout` when a reply timeout is configured
    /// and elapses.
    pub async fn command(&self, command: &str) -> Result<Reply> {
        if command.contains('\n') {
            return Err(LircError::ProtocolError(format!(
                "command must be a single line: {:?}",
                command
            )));
        }
        if !self.state.is_open() {
            return Err(LircError::ConnectionClosed);
        }

        let reply_rx = {
            let mut guard = self.channel.lock().await;
            let channel = guard.as_mut().ok_or(LircError::ConnectionClosed)?;

            let (waiter, reply_rx) = ReplyWaiter::new(command);
            channel
                .request_tx
                .send(waiter)
                .await
                .map_err(|_| LircError::ConnectionClosed)?;

            debug!("lircd command: {}", command);
            channel.writer.write_line(command).await?;
            reply_rx
        };

        let reply = match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, reply_rx)
                .await
                .map_err(|_| LircError::Timeout(limit))?,
            None => reply_rx.await,
        };

        reply.map_err(|_| LircError::ConnectionClosed)
    }

    /// Send an IR code once: `SEND_ONCE <remote> <button> [count]`
    pub async fn send(&self, command: &str) -> Result<()> {
        self.command(&format!("SEND_ONCE {}", command))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Hold a button: `SEND_START`, wait `duration`, `SEND_STOP`
    ///
    /// SEND_STOP is not sent when SEND_START fails.
    pub async fn send_long(&self, command: &str, duration: Duration) -> Result<()> {
        self.command(&format!("SEND_START {}", command))
            .await?
            .into_result()?;

        tokio::time::sleep(duration).await;

        self.command(&format!("SEND_STOP {}", command))
            .await?
            .into_result()?;
        Ok(())
    }

    /// lircd version string
    pub async fn version(&self) -> Result<String> {
        let reply = self.command("VERSION").await?.into_result()?;
        reply
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LircError::ProtocolError("VERSION reply carried no data".into()))
    }

    /// Names of the remotes lircd has loaded
    pub async fn list_remotes(&self) -> Result<Vec<String>> {
        Ok(self.command("LIST").await?.into_result()?.data)
    }

    /// Codes of one remote, as `<code> <button>` lines
    pub async fn list_codes(&self, remote: &str) -> Result<Vec<String>> {
        Ok(self
            .command(&format!("LIST {}", remote))
            .await?
            .into_result()?
            .data)
    }

    /// Close the connection
    ///
    /// Stops the reader task, which closes the event stream and releases any
    /// caller still waiting in [`command`](Self::command). Safe to call more
    /// than once and after the connection was lost.
    pub async fn close(&self) -> Result<()> {
        if self.state.begin_close() {
            info!("Closing lircd connection to {}", self.endpoint);
        }

        if let Some(mut channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.writer.shutdown().await {
                debug!("lircd write shutdown failed: {}", e);
            }
            // Dropping request_tx stops the reader task
        }

        let handle = self.reader_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("lircd reader task failed: {}", e);
            }
        }

        self.state.mark_closed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
        duplex, split,
    };
    use tokio_test::{assert_err, assert_ok};

    /// The daemon end of a duplex pipe
    struct FakeDaemon {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeDaemon {
        async fn expect(&mut self) -> String {
            self.lines.next_line().await.unwrap().expect("client hung up")
        }

        async fn push(&mut self, text: &str) {
            self.writer.write_all(text.as_bytes()).await.unwrap();
        }

        /// Answer every command until the client hangs up, failing those
        /// starting with `fail_prefix`; returns the commands seen
        async fn serve(mut self, fail_prefix: Option<&str>) -> Vec<String> {
            let mut seen = Vec::new();
            while let Some(command) = self.lines.next_line().await.unwrap() {
                let failed = fail_prefix.is_some_and(|p| command.starts_with(p));
                let text = if failed {
                    wire_reply(&command, false, &["transmission", "failed"])
                } else {
                    wire_reply(&command, true, &[])
                };
                seen.push(command);
                self.push(&text).await;
            }
            seen
        }
    }

    fn wire_reply(command: &str, success: bool, data: &[&str]) -> String {
        let mut text = format!(
            "BEGIN\n{}\n{}\n",
            command,
            if success { "SUCCESS" } else { "ERROR" }
        );
        if !data.is_empty() {
            text.push_str(&format!("DATA\n{}\n", data.len()));
            for line in data {
                text.push_str(line);
                text.push('\n');
            }
        }
        text.push_str("END\n");
        text
    }

    fn connected(config: &LircConfig) -> (LircClient, FakeDaemon) {
        let (client_side, daemon_side) = duplex(8192);
        let client = LircClient::from_stream(client_side, config);
        let (read_half, writer) = split(daemon_side);
        let daemon = FakeDaemon {
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        (client, daemon)
    }

    #[tokio::test]
    async fn test_command_returns_data_lines() {
        let (client, mut daemon) = connected(&LircConfig::default());

        let (reply, ()) = tokio::join!(client.command("LIST"), async {
            assert_eq!(daemon.expect().await, "LIST");
            daemon
                .push(&wire_reply("LIST", true, &["samsung", "sony", "philips"]))
                .await;
        });

        let reply = reply.unwrap();
        assert!(reply.success);
        assert_eq!(reply.data_length, 3);
        assert_eq!(reply.data, vec!["samsung", "sony", "philips"]);
    }

    #[tokio::test]
    async fn test_send_error_carries_data_lines() {
        let (client, mut daemon) = connected(&LircConfig::default());

        let (result, ()) = tokio::join!(client.send("tv KEY_FOO"), async {
            let command = daemon.expect().await;
            assert_eq!(command, "SEND_ONCE tv KEY_FOO");
            daemon
                .push(&wire_reply(&command, false, &["unknown", "command:", "\"KEY_FOO\""]))
                .await;
        });

        match result {
            Err(LircError::CommandFailed { command, message }) => {
                assert_eq!(command, "SEND_ONCE tv KEY_FOO");
                assert_eq!(message, "unknown command: \"KEY_FOO\"");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_success() {
        let (client, daemon) = connected(&LircConfig::default());
        let daemon = tokio::spawn(daemon.serve(None));

        assert_ok!(client.send("tv KEY_POWER").await);
        assert_ok!(client.close().await);
        assert_eq!(daemon.await.unwrap(), vec!["SEND_ONCE tv KEY_POWER"]);
    }

    #[tokio::test]
    async fn test_send_long_holds_between_start_and_stop() {
        let (client, daemon) = connected(&LircConfig::default());
        let daemon = tokio::spawn(daemon.serve(None));

        let started = Instant::now();
        assert_ok!(client.send_long("tv KEY_VOL", Duration::from_millis(200)).await);
        assert!(started.elapsed() >= Duration::from_millis(200));

        assert_ok!(client.close().await);
        assert_eq!(
            daemon.await.unwrap(),
            vec!["SEND_START tv KEY_VOL", "SEND_STOP tv KEY_VOL"]
        );
    }

    #[tokio::test]
    async fn test_send_long_skips_stop_when_start_fails() {
        let (client, daemon) = connected(&LircConfig::default());
        let daemon = tokio::spawn(daemon.serve(Some("SEND_START")));

        let started = Instant::now();
        let err = client
            .send_long("tv KEY_VOL", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, LircError::CommandFailed { .. }));
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_ok!(client.close().await);
        assert_eq!(daemon.await.unwrap(), vec!["SEND_START tv KEY_VOL"]);
    }

    #[tokio::test]
    async fn test_send_long_reports_stop_failure() {
        let (client, daemon) = connected(&LircConfig::default());
        let daemon = tokio::spawn(daemon.serve(Some("SEND_STOP")));

        let err = client
            .send_long("tv KEY_VOL", Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            LircError::CommandFailed { command, message } => {
                assert_eq!(command, "SEND_STOP tv KEY_VOL");
                assert_eq!(message, "transmission failed");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }

        assert_ok!(client.close().await);
        assert_eq!(daemon.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_buffered_replies_keep_command_order() {
        let (client, mut daemon) = connected(&LircConfig::default());
        daemon.push(&wire_reply("A", true, &["first"])).await;
        daemon.push(&wire_reply("B", true, &["second"])).await;

        let a = client.command("A").await.unwrap();
        let b = client.command("B").await.unwrap();
        assert_eq!(a.command, "A");
        assert_eq!(a.data, vec!["first"]);
        assert_eq!(b.command, "B");
        assert_eq!(b.data, vec!["second"]);

        assert_eq!(daemon.expect().await, "A");
        assert_eq!(daemon.expect().await, "B");
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_their_own_reply() {
        let (client, daemon) = connected(&LircConfig::default());
        let client = Arc::new(client);
        let daemon = tokio::spawn(daemon.serve(None));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let client = Arc::clone(&client);
                tokio::spawn(async move {
                    let command = format!("SEND_ONCE tv KEY_{}", i);
                    let reply = client.command(&command).await.unwrap();
                    assert_eq!(reply.command, command);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_ok!(client.close().await);
        assert_eq!(daemon.await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_events_stream() {
        let (client, mut daemon) = connected(&LircConfig::default());
        let mut events = client.events();

        daemon.push("AABBCC 0 KEY_BROKEN TV\n").await;
        daemon.push("AABBCCDDEEFF0011 5 KEY_POWER TV\n").await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.code, 0xAABB_CCDD_EEFF_0011);
        assert_eq!(event.repeat, 5);
        assert_eq!(event.button, "KEY_POWER");
        assert_eq!(event.remote, "TV");
    }

    #[tokio::test]
    async fn test_events_and_replies_interleave() {
        let (client, mut daemon) = connected(&LircConfig::default());
        let mut events = client.events();
        let mut replies = client.replies();

        let (reply, ()) = tokio::join!(client.command("VERSION"), async {
            daemon.expect().await;
            daemon.push("0000000000000001 0 KEY_1 tv\n").await;
            daemon
                .push(&wire_reply("VERSION", true, &["0.10.2"]))
                .await;
            daemon.push("0000000000000002 0 KEY_2 tv\n").await;
        });

        assert_eq!(reply.unwrap().data, vec!["0.10.2"]);
        assert_eq!(events.recv().await.unwrap().button, "KEY_1");
        assert_eq!(events.recv().await.unwrap().button, "KEY_2");
        assert_eq!(replies.recv().await.unwrap().command, "VERSION");
    }

    #[tokio::test]
    async fn test_malformed_reply_is_dropped() {
        let (client, mut daemon) = connected(&LircConfig::default());

        let (reply, ()) = tokio::join!(client.command("VERSION"), async {
            daemon.expect().await;
            daemon.push("BEGIN\nVERSION\nWHATEVER\n").await;
            daemon
                .push(&wire_reply("VERSION", true, &["0.10.2"]))
                .await;
        });

        assert_eq!(reply.unwrap().data, vec!["0.10.2"]);
    }

    #[tokio::test]
    async fn test_wrappers() {
        let (client, mut daemon) = connected(&LircConfig::default());

        let (version, ()) = tokio::join!(client.version(), async {
            let command = daemon.expect().await;
            daemon.push(&wire_reply(&command, true, &["0.10.2"])).await;
        });
        assert_eq!(version.unwrap(), "0.10.2");

        let (codes, ()) = tokio::join!(client.list_codes("tv"), async {
            let command = daemon.expect().await;
            assert_eq!(command, "LIST tv");
            daemon
                .push(&wire_reply(
                    &command,
                    true,
                    &["00000000000010ec KEY_POWER", "00000000000010ed KEY_MUTE"],
                ))
                .await;
        });
        assert_eq!(codes.unwrap().len(), 2);

        let (remotes, ()) = tokio::join!(client.list_remotes(), async {
            let command = daemon.expect().await;
            daemon.push(&wire_reply(&command, false, &["no", "remotes"])).await;
        });
        assert!(matches!(remotes, Err(LircError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, mut daemon) = connected(&LircConfig::default());
        let mut events = client.events();

        assert_ok!(client.close().await);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_ok!(client.close().await);

        // Nothing is delivered after close
        let _ = daemon.writer.write_all(b"0000000000000001 0 KEY_1 tv\n").await;
        assert!(matches!(
            events.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        assert!(matches!(
            client.command("VERSION").await,
            Err(LircError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_connection_loss_releases_caller() {
        let (client, mut daemon) = connected(&LircConfig::default());

        let (reply, ()) = tokio::join!(client.command("VERSION"), async {
            daemon.expect().await;
            drop(daemon);
        });

        assert!(matches!(reply, Err(LircError::ConnectionClosed)));
        assert_ok!(client.close().await);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_releases_waiting_caller() {
        let (client, mut daemon) = connected(&LircConfig::default());

        let (reply, ()) = tokio::join!(client.command("VERSION"), async {
            daemon.expect().await;
            assert_ok!(client.close().await);
        });

        assert!(matches!(reply, Err(LircError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let config = LircConfig::default().reply_timeout(Duration::from_millis(50));
        let (client, mut daemon) = connected(&config);

        let (reply, ()) = tokio::join!(client.command("VERSION"), async {
            daemon.expect().await;
        });

        assert!(matches!(reply, Err(LircError::Timeout(_))));
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_timeout_after_discarded_reply_keeps_correlation() {
        let config = LircConfig::default().reply_timeout(Duration::from_millis(100));
        let (client, mut daemon) = connected(&config);

        let (a, ()) = tokio::join!(client.command("A"), async {
            assert_eq!(daemon.expect().await, "A");
            daemon.push("BEGIN\nA\nGARBAGE\n").await;
        });
        assert!(matches!(a, Err(LircError::Timeout(_))));

        for (command, data) in [("B", "second"), ("C", "third")] {
            let (reply, ()) = tokio::join!(client.command(command), async {
                let seen = daemon.expect().await;
                assert_eq!(seen, command);
                daemon.push(&wire_reply(&seen, true, &[data])).await;
            });
            let reply = reply.unwrap();
            assert_eq!(reply.command, command);
            assert_eq!(reply.data, vec![data]);
        }
    }

    #[tokio::test]
    async fn test_unsolicited_sighup_does_not_shift_replies() {
        let (client, mut daemon) = connected(&LircConfig::default());
        let mut replies = client.replies();
        daemon.push("BEGIN\nSIGHUP\nEND\n").await;

        // The reload record is still visible on the tap
        assert_eq!(replies.recv().await.unwrap().command, "SIGHUP");

        let (version, ()) = tokio::join!(client.version(), async {
            let command = daemon.expect().await;
            daemon.push(&wire_reply(&command, true, &["0.10.2"])).await;
        });
        assert_eq!(version.unwrap(), "0.10.2");

        let (remotes, ()) = tokio::join!(client.list_remotes(), async {
            let command = daemon.expect().await;
            assert_eq!(command, "LIST");
            daemon.push(&wire_reply(&command, true, &["tv", "dvd"])).await;
        });
        assert_eq!(remotes.unwrap(), vec!["tv", "dvd"]);
    }

    #[tokio::test]
    async fn test_multiline_command_rejected() {
        let (client, _daemon) = connected(&LircConfig::default());
        assert_err!(client.command("SEND_ONCE tv\nKEY_OK").await);
    }

    #[tokio::test]
    async fn test_connect_tcp_bad_address() {
        assert!(matches!(
            LircClient::connect_tcp("host:notaport").await,
            Err(LircError::ConfigError(_))
        ));
    }
}
