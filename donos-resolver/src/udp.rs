use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};

use donos_proto::packet::header::Header;
use donos_proto::packet::question::Question;
use donos_proto::packet::{DnsPacket, QueryType};
use donos_proto::BytePacketBuffer;
use tokio::net::UdpSocket;

use crate::prelude::{Client, ClientError};

/// Plain UDP upstream, per RFC 1035.
#[derive(Debug)]
pub struct UdpClient {
    identifier: String,
    address: SocketAddr,
    next_id: AtomicU16,
}

impl UdpClient {
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
impl Client for UdpClient {
    fn kind(&self) -> &'static str {
        "udp"
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

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        socket
            .connect(self.address)
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        socket
            .send(&request.buf[..request.pos()])
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;

        let mut response = BytePacketBuffer::default();
        let size = socket
            .recv(&mut response.buf)
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        if size == 0 {
            return Err(ClientError::Unknown);
        }

        DnsPacket::try_from(response).map_err(|err| ClientError::Io(err.to_string()))
    }
}
