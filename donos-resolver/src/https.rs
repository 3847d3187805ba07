use std::sync::atomic::{AtomicU16, Ordering};

use donos_proto::packet::header::Header;
use donos_proto::packet::question::Question;
use donos_proto::packet::{DnsPacket, QueryType};
use donos_proto::BytePacketBuffer;

use crate::prelude::{Client, ClientError};

const DNS_MESSAGE_MIME: &str = "application/dns-message";
const DNS_UDPWIREFORMAT_MIME: &str = "application/dns-udpwireformat";

/// DNS over HTTPS, per RFC 8484, using the POST wire-format variant.
#[derive(Debug)]
pub struct HttpsClient {
    identifier: String,
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU16,
}

impl HttpsClient {
    pub fn new<I: Into<String>, E: Into<String>>(identifier: I, endpoint: E) -> Self {
        Self {
            identifier: identifier.into(),
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
            next_id: AtomicU16::new(1),
        }
    }

    fn next_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Client for HttpsClient {
    fn kind(&self) -> &'static str {
        "https"
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

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE_MIME)
            .header(reqwest::header::ACCEPT, DNS_MESSAGE_MIME)
            .body(request.buf[..request.pos()].to_vec())
            .send()
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?
            .error_for_status()
            .map_err(|err| ClientError::Io(err.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if content_type != DNS_MESSAGE_MIME && content_type != DNS_UDPWIREFORMAT_MIME {
            return Err(ClientError::Io(format!(
                "unexpected response content-type: {content_type:?}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::Io(err.to_string()))?;
        if body.len() > 512 {
            return Err(ClientError::Io("response larger than 512 bytes".into()));
        }

        let mut buffer = BytePacketBuffer::default();
        buffer.buf[..body.len()].copy_from_slice(&body);

        DnsPacket::try_from(buffer).map_err(|err| ClientError::Io(err.to_string()))
    }
}
