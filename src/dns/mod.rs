//! Proxy / request pipeline (C8): the glue between the hijack engine, the
//! cache and the upstream multiplexer that answers every incoming query.

pub mod handler;

pub use handler::DnsHandler;
