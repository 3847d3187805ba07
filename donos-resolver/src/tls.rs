use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use donos_proto::packet::header::Header;
use donos_proto::packet::question::Question;
use donos_proto::packet::{DnsPacket, QueryType};
use donos_proto::BytePacketBuffer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, ServerName};
use tokio_rustls::TlsConnector;

use crate::prelude::{Client, ClientError};

/// DNS over TLS, per RFC 7858.
#[derive(Debug)]
pub struct TlsClient {
    identifier: String,
    address: SocketAddr,
    server_name: ServerName,
    connector: TlsConnector,
    next_id: AtomicU16,
}

impl TlsClient {
    pub fn new<I: Into<String>>(identifier: I, address: SocketAddr, server_name: ServerName) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            identifier: identifier.into(),
            address,
            server_name,
            connector: TlsConnector::from(Arc::new(config)),
            next_id: AtomicU16::new(1),
        }
    }

    /// Parses an upstream address in `host:port` or `host:port=sni` form,
    /// where the `sni` suffix overrides the certificate name checked
    /// against (useful when the IP has no matching reverse record).
    pub fn parse_server_name(spec: &str) -> Result<(String, ServerName), ClientError> {
        let (addr_part, sni_part) = match spec.split_once('=') {
            Some((addr, sni)) => (addr, sni),
            None => {
                let host = spec
                    .rsplit_once(':')
                    .map(|(host, _)| host)
                    .unwrap_or(spec);
                (spec, host)
            }
        };
        let server_name = ServerName::try_from(sni_part)
            .map_err(|_| ClientError::Io(format!("invalid server name: {sni_part}")))?;
        Ok((addr_part.to_string(), server_name))
    }

    fn next_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Client for TlsClient {
    fn kind(&self) -> &'static str {
        "tls"
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

        let stream = TcpStream::connect(self.address)
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        let mut stream = self
            .connector
            .connect(self.server_name.clone(), stream)
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

#[cfg(test)]
mod tests {
    #[test]
    fn should_parse_address_with_sni_override() {
        let (addr, name) = super::TlsClient::parse_server_name("1.1.1.1:853=cloudflare-dns.com")
            .unwrap();
        assert_eq!(addr, "1.1.1.1:853");
        assert_eq!(format!("{name:?}"), format!("{:?}", tokio_rustls::rustls::ServerName::try_from("cloudflare-dns.com").unwrap()));
    }

    #[test]
    fn should_parse_address_without_sni_override() {
        let (addr, _name) = super::TlsClient::parse_server_name("dns.example.com:853").unwrap();
        assert_eq!(addr, "dns.example.com:853");
    }
}
