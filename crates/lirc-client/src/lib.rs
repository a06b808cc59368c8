//! Async client for the lircd daemon
//!
//! Connects to lircd over its Unix socket or TCP, streams IR button events,
//! and sends IR codes:
//!
//! ```no_run
//! # async fn demo() -> lirc_client::Result<()> {
//! use lirc_client::LircClient;
//! use std::time::Duration;
//!
//! let client = LircClient::connect_unix("/var/run/lirc/lircd").await?;
//! let mut events = client.events();
//!
//! client.send("tv KEY_POWER").await?;
//! client.send_long("tv KEY_VOLUMEUP", Duration::from_millis(500)).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{} pressed on {}", event.button, event.remote);
//! }
//! client.close().await
//! # }
//! ```

mod client;
pub mod config;

pub use client::LircClient;
pub use config::{Endpoint, LircConfig};
pub use lirc_bridge::ConnectionState;
pub use lirc_core::{Event, LircError, Reply, Result};
