#[cfg(feature = "mock")]
pub mod mock;
pub mod prelude;

pub mod https;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::sync::Arc;

use donos_proto::packet::{DnsPacket, QueryType};

#[derive(Clone, Debug)]
pub enum MultiplexerBuilderError {
    NoClient,
}

#[derive(Debug, Default)]
pub struct MultiplexerBuilder {
    clients: Vec<Arc<dyn prelude::Client>>,
}

impl MultiplexerBuilder {
    pub fn add_client(&mut self, value: Arc<dyn prelude::Client>) {
        self.clients.push(value);
    }

    pub fn with_client(mut self, value: Arc<dyn prelude::Client>) -> Self {
        self.clients.push(value);
        self
    }

    pub fn build(self) -> Result<Multiplexer, MultiplexerBuilderError> {
        if self.clients.is_empty() {
            return Err(MultiplexerBuilderError::NoClient);
        }
        Ok(Multiplexer {
            clients: self.clients,
        })
    }
}

#[derive(Clone, Debug)]
pub enum MultiplexerError {
    Failed(Vec<prelude::ClientError>),
}

/// Fans a single query out to every configured [`prelude::Client`]
/// concurrently and returns the first successful answer. Tasks still
/// in flight after the winner lands keep running to completion; their
/// results are discarded.
#[derive(Debug)]
pub struct Multiplexer {
    clients: Vec<Arc<dyn prelude::Client>>,
}

impl Multiplexer {
    pub async fn resolve(
        &self,
        kind: QueryType,
        hostname: &str,
    ) -> Result<DnsPacket, MultiplexerError> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(self.clients.len().max(1));

        for client in self.clients.iter().cloned() {
            let tx = tx.clone();
            let hostname = hostname.to_string();
            tokio::spawn(async move {
                let result = client.resolve(kind, &hostname).await;
                // Best effort: the receiver may already be gone once a
                // winner was picked, nothing to do if the send fails.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut errors = Vec::with_capacity(self.clients.len());
        while let Some(result) = rx.recv().await {
            match result {
                Ok(packet) => return Ok(packet),
                Err(err) => errors.push(err),
            }
        }
        Err(MultiplexerError::Failed(errors))
    }
}

#[cfg(test)]
mod tests {
    use donos_proto::packet::QueryType;

    #[test]
    fn multiplexer_builder_should_error_if_no_client() {
        let builder = super::MultiplexerBuilder::default().build();
        assert!(builder.is_err());
    }

    #[tokio::test]
    async fn multiplexer_should_call_clients() {
        let multiplexer = super::MultiplexerBuilder::default()
            .with_client(std::sync::Arc::new(crate::mock::MockClient::new("first")))
            .build()
            .unwrap();
        let _ = multiplexer.resolve(QueryType::A, "foo.bar").await.unwrap_err();
    }

    #[tokio::test]
    async fn multiplexer_should_return_first_success() {
        use donos_proto::packet::{header::Header, DnsPacket};

        let mut packet = DnsPacket {
            header: Header::question(1),
            ..Default::default()
        };
        packet.header = packet.header.response();

        let multiplexer = super::MultiplexerBuilder::default()
            .with_client(std::sync::Arc::new(crate::mock::MockClient::new("empty")))
            .with_client(std::sync::Arc::new(
                crate::mock::MockClient::new("answering").with_response(
                    QueryType::A,
                    "foo.bar",
                    packet,
                ),
            ))
            .build()
            .unwrap();

        let resolved = multiplexer.resolve(QueryType::A, "foo.bar").await.unwrap();
        assert!(resolved.header.response);
    }
}
