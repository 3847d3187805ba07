use criterion::{black_box, criterion_group, criterion_main, Criterion};
use donos_proto::packet::header::Header;
use donos_proto::packet::question::Question;
use donos_proto::packet::record::Record;
use donos_proto::packet::QueryType;
use donos_proto::{BytePacketBuffer, DnsPacket};
use std::net::Ipv4Addr;

fn query_packet() -> Vec<u8> {
    let mut packet = DnsPacket {
        header: Header::question(1),
        questions: vec![Question::new("google.com".into(), QueryType::A)],
        ..Default::default()
    };
    let buffer = packet.create_buffer().unwrap();
    buffer.buf[..buffer.pos()].to_vec()
}

fn response_packet() -> Vec<u8> {
    let mut packet = DnsPacket {
        header: Header::question(1).response(),
        questions: vec![Question::new("google.com".into(), QueryType::A)],
        ..Default::default()
    };
    packet.answers.push(Record::A {
        domain: "google.com".into(),
        addr: Ipv4Addr::new(172, 217, 20, 206),
        ttl: 8,
    });
    let buffer = packet.create_buffer().unwrap();
    buffer.buf[..buffer.pos()].to_vec()
}

fn decoding(packet: &[u8]) {
    let buffer = BytePacketBuffer::from(packet.to_vec());
    let _packet = DnsPacket::try_from(buffer).unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let query = query_packet();
    let response = response_packet();
    c.bench_function("decoding query packet", |b| {
        b.iter(|| decoding(black_box(&query)))
    });
    c.bench_function("decoding response packet", |b| {
        b.iter(|| decoding(black_box(&response)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
