use std::net::SocketAddr;
use std::sync::Arc;

use donos_proto::packet::header::{Header, ResponseCode};
use donos_proto::packet::question::Question;
use donos_proto::packet::record::Record;
use donos_proto::packet::DnsPacket;
use donos_proto::BytePacketBuffer;
use donos_server::prelude::Message;

use crate::cache::Cache;
use crate::client::Resolver;
use crate::hijack::HijackEngine;
use crate::log::{Entry as LogEntry, LogWriter};
use crate::message;

/// Composes the hijack engine, the cache and the upstream multiplexer into
/// one request pipeline: hijack short-circuits, then cache, then upstream,
/// recording every terminal outcome to the log writer.
pub struct DnsHandler {
    hijack: Arc<HijackEngine>,
    cache: Arc<Cache>,
    resolver: Arc<Resolver>,
    log: Arc<LogWriter>,
}

impl DnsHandler {
    pub fn new(
        hijack: Arc<HijackEngine>,
        cache: Arc<Cache>,
        resolver: Arc<Resolver>,
        log: Arc<LogWriter>,
    ) -> Self {
        Self {
            hijack,
            cache,
            resolver,
            log,
        }
    }

    /// Builds a response around `question`/`records`, reusing the
    /// request's id and recursion-desired bit but stamping the response
    /// bit and recursion-available itself.
    fn respond(request_header: &Header, question: Question, records: Vec<Record>, code: ResponseCode) -> DnsPacket {
        let mut response = DnsPacket {
            header: request_header.response(),
            questions: vec![question],
            answers: records,
            ..Default::default()
        };
        response.header.response_code = code;
        response
    }

    fn servfail(request_header: &Header, question: Option<Question>) -> DnsPacket {
        let mut response = DnsPacket {
            header: request_header.response(),
            questions: question.into_iter().collect(),
            ..Default::default()
        };
        response.header.response_code = ResponseCode::ServerFailure;
        response
    }

    async fn process(&self, address: &SocketAddr, request: &DnsPacket) -> DnsPacket {
        let question = match request.questions.as_slice() {
            [single] => single.clone(),
            _ => return Self::servfail(&request.header, request.questions.first().cloned()),
        };

        if let Some(records) = self.hijack.hijack(&question).await {
            let response = Self::respond(&request.header, question.clone(), records, ResponseCode::NoError);
            self.log
                .record(LogEntry {
                    remote_addr: *address,
                    hijacked: true,
                    qtype: question.qtype,
                    question: question.name,
                    answers: message::answers(&response),
                })
                .await;
            return response;
        }

        let key = message::new_key(&question.name, question.qtype, question.qclass);

        if let Some(cached) = self.cache.get(key).await {
            // SetReply: the stored body is reused verbatim, only the
            // header id (and recursion-desired) are stamped to match this
            // request.
            let mut response = Self::respond(
                &request.header,
                question.clone(),
                cached.answers.clone(),
                cached.header.response_code,
            );
            response.authorities = cached.authorities.clone();
            response.resources = cached.resources.clone();
            self.log
                .record(LogEntry {
                    remote_addr: *address,
                    hijacked: false,
                    qtype: question.qtype,
                    question: question.name,
                    answers: message::answers(&response),
                })
                .await;
            return response;
        }

        match self.resolver.resolve(question.qtype, &question.name).await {
            Ok(upstream) => {
                self.cache.set(key, question.clone(), upstream.clone()).await;

                let mut response = Self::respond(
                    &request.header,
                    question.clone(),
                    upstream.answers.clone(),
                    upstream.header.response_code,
                );
                response.authorities = upstream.authorities.clone();
                response.resources = upstream.resources.clone();
                self.log
                    .record(LogEntry {
                        remote_addr: *address,
                        hijacked: false,
                        qtype: question.qtype,
                        question: question.name,
                        answers: message::answers(&response),
                    })
                    .await;
                response
            }
            Err(err) => {
                tracing::debug!("upstream exchange failed for {}: {err}", question.name);
                Self::servfail(&request.header, Some(question))
            }
        }
    }
}

#[async_trait::async_trait]
impl donos_server::Handler for DnsHandler {
    #[tracing::instrument(skip_all, fields(origin = ?message.address, id = tracing::field::Empty))]
    async fn handle(&self, message: Message) -> Message {
        let Message { address, buffer, size: _ } = message;

        let buffer = BytePacketBuffer::new(buffer);
        let request = match DnsPacket::try_from(buffer) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!("unable to parse query from {address:?}: {err:?}");
                let response = Self::servfail(&Header::default(), None);
                return Self::encode(address, response);
            }
        };

        tracing::Span::current().record("id", request.header.id);

        let response = self.process(&address, &request).await;
        Self::encode(address, response)
    }
}

impl DnsHandler {
    fn encode(address: SocketAddr, mut response: DnsPacket) -> Message {
        match response.create_buffer() {
            Ok(buffer) => Message {
                address,
                buffer: buffer.buf,
                size: buffer.pos(),
            },
            Err(err) => {
                tracing::warn!("failed to encode response: {err:?}");
                let mut fallback = DnsPacket {
                    header: response.header,
                    ..Default::default()
                };
                fallback.header.response_code = ResponseCode::ServerFailure;
                let buffer = fallback
                    .create_buffer()
                    .expect("a question-less response always encodes");
                Message {
                    address,
                    buffer: buffer.buf,
                    size: buffer.pos(),
                }
            }
        }
    }
}
