use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};

use donos_proto::packet::header::Header;
use donos_proto::packet::question::Question;
use donos_proto::packet::{DnsPacket, QueryType};
use donos_proto::BytePacketBuffer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::prelude::{Client, ClientError};

/// DNS over TCP, per RFC 7766: each message is prefixed by a two byte
/// big-endian length.
#[derive(Debug)]
pub struct TcpClient {
    identifier: String,
    address: SocketAddr,
    next_id: AtomicU16,
}

impl TcpClient {
    pub fn new<I: Into<String>>(identifier: I, address: SocketAddr) -> Self {
        Self {
            identifier: identifier.into(),
            address,
            next_id: AtomicU16::new(1),
        }
    }

    fn next_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Client for TcpClient {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn resolve(&self, kind: QueryType, hostname: &str) -> Result<DnsPacket, ClientError> {
        let mut packet = DnsPacket {
            header: Header::question(self.next_id()),
            questions: vec![Question::new(hostname.to_string(), kind)],
            ..Default::default()
        };
        let request = packet
            .create_buffer()
            .map_err(|err| ClientError::Io(err.to_string()))?;

        let mut stream = TcpStream::connect(self.address)
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;

        let len = request.pos() as u16;
        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        stream
            .write_all(&request.buf[..request.pos()])
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;

        let mut len_buf = [0u8; 2];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        let size = u16::from_be_bytes(len_buf) as usize;

        let mut response = BytePacketBuffer::default();
        stream
            .read_exact(&mut response.buf[..size])
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;

        DnsPacket::try_from(response).map_err(|err| ClientError::Io(err.to_string()))
    }
}
