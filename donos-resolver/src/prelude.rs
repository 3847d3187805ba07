use donos_proto::packet::{DnsPacket, QueryType};

#[derive(Clone, Debug)]
pub enum ClientError {
    Unknown,
    Io(String),
    Timeout,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown resolution failure"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for ClientError {}

/// A single upstream DNS transport: UDP, TCP, DoT or DoH.
#[async_trait::async_trait]
pub trait Client: std::fmt::Debug + Send + Sync {
    fn kind(&self) -> &'static str;
    fn identifier(&self) -> &str;

    async fn resolve(&self, kind: QueryType, hostname: &str) -> Result<DnsPacket, ClientError>;
}
