use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::prelude::Message;
use crate::Handler;

/// DNS over TCP listener, per RFC 7766: each message on the wire is
/// prefixed with a two byte big-endian length.
pub struct TcpServer<H> {
    address: SocketAddr,
    handler: Arc<H>,
}

impl<H: Handler + Send + Sync + 'static> TcpServer<H> {
    pub fn new(address: SocketAddr, handler: H) -> Self {
        Self {
            address,
            handler: Arc::new(handler),
        }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.address).await?;

        loop {
            let (stream, peer) = listener.accept().await?;
            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(error) = Self::handle_connection(stream, peer, handler).await {
                    tracing::error!("error handling tcp connection from {peer:?}: {error:?}");
                }
            });
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        address: SocketAddr,
        handler: Arc<H>,
    ) -> std::io::Result<()> {
        loop {
            let mut len_buf = [0u8; 2];
            if stream.read_exact(&mut len_buf).await.is_err() {
                return Ok(());
            }
            let size = u16::from_be_bytes(len_buf) as usize;

            let mut buffer = [0u8; 512];
            stream.read_exact(&mut buffer[..size]).await?;

            let request = Message {
                address,
                buffer,
                size,
            };
            tracing::debug!("received message from {address:?}");

            let response = handler.handle(request).await;

            let len = (response.size as u16).to_be_bytes();
            stream.write_all(&len).await?;
            stream.write_all(&response.buffer[..response.size]).await?;
        }
    }
}
