//! TCP transport for lircd (`lircd --listen`)

use crate::transport::{StreamLineReader, StreamLineWriter};
use lirc_core::{LircError, Result};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

/// TCP read half
pub type TcpLineReader = StreamLineReader<OwnedReadHalf>;

/// TCP write half
pub type TcpLineWriter = StreamLineWriter<OwnedWriteHalf>;

/// Dial lircd at `host:port` and split the stream
pub async fn connect(address: &str) -> Result<(TcpLineReader, TcpLineWriter)> {
    info!("Connecting to lircd at {}", address);

    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| LircError::ConnectionError(format!("Failed to connect to {}: {}", address, e)))?;

    // Commands are single short lines
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }

    let (read_half, write_half) = stream.into_split();
    Ok((
        StreamLineReader::new(read_half),
        StreamLineWriter::new(write_half),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LineReader, LineWriter};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_line_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let daemon = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.split();
            let mut lines = BufReader::new(read_half).lines();
            let command = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all(format!("BEGIN\n{}\nEND\n", command).as_bytes())
                .await
                .unwrap();
        });

        let (mut reader, mut writer) = connect(&address).await.unwrap();
        writer.write_line("VERSION").await.unwrap();

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("BEGIN"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("VERSION"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("END"));

        daemon.await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        match connect(&address).await {
            Err(LircError::ConnectionError(msg)) => assert!(msg.contains(&address)),
            Err(e) => panic!("Expected ConnectionError, got {}", e),
            Ok(_) => panic!("Expected connect to fail"),
        }
    }
}
