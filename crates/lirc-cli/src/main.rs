//! lirc: command line access to lircd
//!
//! Listens for IR button events or sends IR codes through a running lircd,
//! over its Unix socket (default `/var/run/lirc/lircd`) or TCP.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lirc_client::{Endpoint, LircClient, LircConfig, LircError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "lirc")]
#[command(about = "Listen to and send infrared codes through lircd")]
struct Args {
    /// lircd socket path (overrides LIRC_SOCKET_PATH)
    #[arg(long, conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// lircd TCP address, host[:port]
    #[arg(long)]
    tcp: Option<String>,

    /// Give up on a reply after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print button events until interrupted
    Listen {
        /// One JSON object per event
        #[arg(long)]
        json: bool,

        /// Skip auto-repeat events, print only initial presses
        #[arg(long)]
        no_repeat: bool,
    },
    /// Send a code once
    Send { remote: String, button: String },
    /// Hold a button for a while
    SendLong {
        remote: String,
        button: String,
        /// How long to hold, in milliseconds
        #[arg(long, default_value = "200")]
        duration_ms: u64,
    },
    /// Send an arbitrary lircd command and print the reply
    Raw {
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
    /// Print the lircd version
    Version,
    /// List remotes, or the codes of one remote
    List { remote: Option<String> },
}

impl Args {
    fn config(&self) -> Result<LircConfig> {
        let mut config = LircConfig::from_env()?;
        if let Some(path) = &self.socket {
            config.endpoint = Endpoint::Unix(path.clone());
        }
        if let Some(address) = &self.tcp {
            config.endpoint = Endpoint::tcp(address)?;
        }
        if let Some(ms) = self.timeout_ms {
            config.reply_timeout = Some(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

async fn listen(client: &LircClient, json: bool, no_repeat: bool) -> Result<()> {
    let mut events = client.events();
    info!("Listening for IR events on {}", client.endpoint());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if no_repeat && !event.is_first_press() => {}
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else {
                        println!("{}", event);
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} events", missed),
                Err(RecvError::Closed) => return Err(LircError::ConnectionClosed.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                return Ok(());
            }
        }
    }
}

async fn run(client: &LircClient, command: Command) -> Result<()> {
    match command {
        Command::Listen { json, no_repeat } => listen(client, json, no_repeat).await?,
        Command::Send { remote, button } => {
            client.send(&format!("{} {}", remote, button)).await?;
        }
        Command::SendLong {
            remote,
            button,
            duration_ms,
        } => {
            client
                .send_long(
                    &format!("{} {}", remote, button),
                    Duration::from_millis(duration_ms),
                )
                .await?;
        }
        Command::Raw { words } => {
            let reply = client.command(&words.join(" ")).await?;
            println!("{}", if reply.success { "SUCCESS" } else { "ERROR" });
            for line in reply.data {
                println!("{}", line);
            }
        }
        Command::Version => println!("{}", client.version().await?),
        Command::List { remote } => {
            let lines = match remote {
                Some(remote) => client.list_codes(&remote).await?,
                None => client.list_remotes().await?,
            };
            for line in lines {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.config()?;
    let client = LircClient::connect(&config)
        .await
        .with_context(|| format!("cannot reach lircd at {}", config.endpoint))?;

    let result = run(&client, args.command).await;
    client.close().await?;
    result.map_err(|e| {
        let lost = e
            .downcast_ref::<LircError>()
            .is_some_and(LircError::is_connection_lost);
        if lost {
            e.context(format!("lost connection to lircd at {}", config.endpoint))
        } else {
            e
        }
    })
}
