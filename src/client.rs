//! Upstream client (C2 wrapper): builds a `donos_resolver::Multiplexer`
//! from configuration and wraps it with the fixed per-query timeout every
//! client contract promises.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use donos_proto::packet::{DnsPacket, QueryType};
use donos_resolver::prelude::ClientError;
use donos_resolver::tls::TlsClient;
use donos_resolver::{https::HttpsClient, prelude::Client, tcp::TcpClient, udp::UdpClient};
use donos_resolver::{Multiplexer, MultiplexerBuilder, MultiplexerBuilderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Udp,
    Tcp,
    TcpTls,
    Https,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Udp
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "Config::default_timeout")]
    pub timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            timeout: Self::default_timeout(),
        }
    }
}

impl Config {
    fn default_timeout() -> u64 {
        5
    }
}

#[derive(Debug)]
pub enum BuildError {
    NoResolvers,
    InvalidAddress(String),
    HttpsRequiresHttpsScheme(String),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResolvers => write!(f, "no resolvers configured"),
            Self::InvalidAddress(addr) => write!(f, "invalid resolver address: {addr}"),
            Self::HttpsRequiresHttpsScheme(addr) => {
                write!(f, "resolver.protocol=https requires an https:// url, got {addr}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl From<MultiplexerBuilderError> for BuildError {
    fn from(_: MultiplexerBuilderError) -> Self {
        Self::NoResolvers
    }
}

fn resolve_socket_addr(addr: &str) -> Result<SocketAddr, BuildError> {
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| BuildError::InvalidAddress(addr.to_string()))
}

fn build_multiplexer(resolvers: &[String], protocol: Protocol) -> Result<Multiplexer, BuildError> {
    let mut builder = MultiplexerBuilder::default();

    for (idx, resolver) in resolvers.iter().enumerate() {
        let client: Arc<dyn Client> = match protocol {
            Protocol::Udp => Arc::new(UdpClient::new(
                format!("udp-{idx}"),
                resolve_socket_addr(resolver)?,
            )),
            Protocol::Tcp => Arc::new(TcpClient::new(
                format!("tcp-{idx}"),
                resolve_socket_addr(resolver)?,
            )),
            Protocol::TcpTls => {
                let (addr_part, server_name) = TlsClient::parse_server_name(resolver)
                    .map_err(|_| BuildError::InvalidAddress(resolver.clone()))?;
                Arc::new(TlsClient::new(
                    format!("tls-{idx}"),
                    resolve_socket_addr(&addr_part)?,
                    server_name,
                ))
            }
            Protocol::Https => {
                if !resolver.starts_with("https://") {
                    return Err(BuildError::HttpsRequiresHttpsScheme(resolver.clone()));
                }
                Arc::new(HttpsClient::new(format!("https-{idx}"), resolver.clone()))
            }
        };
        builder.add_client(client);
    }

    Ok(builder.build()?)
}

/// The per-query-timeout-wrapped multiplexer every caller (the proxy, the
/// cache's prefetch refresher) issues upstream queries through.
#[derive(Debug)]
pub struct Resolver {
    multiplexer: Multiplexer,
    timeout: Duration,
}

impl Resolver {
    pub fn new(multiplexer: Multiplexer, timeout: Duration) -> Self {
        Self { multiplexer, timeout }
    }

    pub fn build(resolvers: &[String], config: &Config) -> Result<Self, BuildError> {
        if resolvers.is_empty() {
            return Err(BuildError::NoResolvers);
        }
        Ok(Self::new(
            build_multiplexer(resolvers, config.protocol)?,
            Duration::from_secs(config.timeout),
        ))
    }

    pub async fn resolve(&self, kind: QueryType, hostname: &str) -> Result<DnsPacket, ClientError> {
        match tokio::time::timeout(self.timeout, self.multiplexer.resolve(kind, hostname)).await {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(_)) => Err(ClientError::Unknown),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn building_with_no_resolvers_fails() {
        let error = Resolver::build(&[], &Config::default()).unwrap_err();
        assert!(matches!(error, BuildError::NoResolvers));
    }

    #[test]
    fn https_protocol_requires_https_scheme() {
        let error = Resolver::build(
            &["http://1.1.1.1/dns-query".to_string()],
            &Config {
                protocol: Protocol::Https,
                timeout: 5,
            },
        )
        .unwrap_err();
        assert!(matches!(error, BuildError::HttpsRequiresHttpsScheme(_)));
    }

    #[test]
    fn udp_protocol_builds_from_valid_socket_addresses() {
        let resolver = Resolver::build(
            &["1.1.1.1:53".to_string()],
            &Config {
                protocol: Protocol::Udp,
                timeout: 5,
            },
        );
        assert!(resolver.is_ok());
    }
}
