use std::collections::HashMap;

use crate::prelude::{Client, ClientError};
use donos_proto::packet::{DnsPacket, QueryType};

#[derive(Debug)]
pub struct MockClient {
    identifier: String,
    responses: HashMap<(QueryType, &'static str), DnsPacket>,
}

impl MockClient {
    pub fn new<I: Into<String>>(identifier: I) -> Self {
        Self {
            identifier: identifier.into(),
            responses: Default::default(),
        }
    }

    pub fn with_response(
        mut self,
        kind: QueryType,
        hostname: &'static str,
        packet: DnsPacket,
    ) -> Self {
        self.responses.insert((kind, hostname), packet);
        self
    }
}

#[async_trait::async_trait]
impl Client for MockClient {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn resolve(&self, kind: QueryType, hostname: &str) -> Result<DnsPacket, ClientError> {
        if let Some(found) = self.responses.get(&(kind, hostname)) {
            Ok(found.clone())
        } else {
            Err(ClientError::Unknown)
        }
    }
}
