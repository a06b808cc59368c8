//! Unix socket transport for lircd (the default `/var/run/lirc/lircd`)

use crate::transport::{StreamLineReader, StreamLineWriter};
use lirc_core::{LircError, Result};
use std::path::Path;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::info;

/// Unix socket read half
pub type UnixLineReader = StreamLineReader<OwnedReadHalf>;

/// Unix socket write half
pub type UnixLineWriter = StreamLineWriter<OwnedWriteHalf>;

/// Dial lircd's socket and split the stream
pub async fn connect(path: impl AsRef<Path>) -> Result<(UnixLineReader, UnixLineWriter)> {
    let path = path.as_ref();
    info!("Connecting to lircd at {}", path.display());

    let stream = UnixStream::connect(path).await.map_err(|e| {
        LircError::ConnectionError(format!("Failed to connect to {}: {}", path.display(), e))
    })?;

    let (read_half, write_half) = stream.into_split();
    Ok((
        StreamLineReader::new(read_half),
        StreamLineWriter::new(write_half),
    ))
}
