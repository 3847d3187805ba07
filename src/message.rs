//! Message utilities (C1): minimum TTL, textual answer flattening and the
//! cache key fingerprint, shared by every component that touches a
//! [`DnsPacket`].

use donos_proto::packet::record::Record;
use donos_proto::packet::{DnsClass, DnsPacket, QueryType};

/// The 32-bit hash identifying a cached query.
pub type Fingerprint = u32;

/// RFC 2181's maximum TTL, used as the "never cacheable" ceiling returned
/// by [`min_ttl`] when a message carries no eligible records.
pub const MAX_TTL: u32 = (1u32 << 31) - 1;

const OPT_QTYPE: u16 = 41;

fn is_opt(record: &Record) -> bool {
    matches!(record, Record::Unknown { qtype, .. } if *qtype == OPT_QTYPE)
}

/// Smallest TTL across answer/authority/additional sections, skipping OPT
/// pseudo-records. An empty eligible set returns [`MAX_TTL`].
pub fn min_ttl(packet: &DnsPacket) -> u32 {
    packet
        .answers
        .iter()
        .chain(packet.authorities.iter())
        .chain(packet.resources.iter())
        .filter(|record| !is_opt(record))
        .map(|record| record.ttl())
        .min()
        .unwrap_or(MAX_TTL)
}

/// Flattens the answer section to its textual form: the address for
/// A/AAAA, the exchange for MX, the target name for NS/CNAME/PTR. Unknown
/// record types contribute nothing.
pub fn answers(packet: &DnsPacket) -> Vec<String> {
    packet
        .answers
        .iter()
        .filter_map(|record| match record {
            Record::A { addr, .. } => Some(addr.to_string()),
            Record::AAAA { addr, .. } => Some(addr.to_string()),
            Record::MX { host, .. } => Some(host.clone()),
            Record::NS { host, .. } | Record::CNAME { host, .. } | Record::PTR { host, .. } => {
                Some(host.clone())
            }
            Record::Unknown { .. } => None,
        })
        .collect()
}

/// FNV-1a-32 over the lowercase name bytes, followed by the big-endian
/// qtype and qclass. Distinct `(name, qtype, qclass)` triples fingerprint
/// to distinct keys with overwhelming probability; collisions are
/// tolerated since every cache entry also stores the original question.
pub fn new_key(name: &str, qtype: QueryType, qclass: DnsClass) -> Fingerprint {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET_BASIS;
    let mut step = |byte: u8| {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    };

    for byte in name.to_lowercase().into_bytes() {
        step(byte);
    }
    for byte in qtype.into_num().to_be_bytes() {
        step(byte);
    }
    for byte in (qclass as u16).to_be_bytes() {
        step(byte);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use donos_proto::packet::header::Header;
    use std::net::Ipv4Addr;

    #[test]
    fn min_ttl_of_empty_message_is_max() {
        let packet = DnsPacket::default();
        assert_eq!(min_ttl(&packet), MAX_TTL);
    }

    #[test]
    fn min_ttl_ignores_opt_records() {
        let mut packet = DnsPacket {
            header: Header::question(1),
            ..Default::default()
        };
        packet.answers.push(Record::A {
            domain: "foo.".into(),
            addr: Ipv4Addr::new(1, 2, 3, 4),
            ttl: 30,
        });
        packet.resources.push(Record::Unknown {
            domain: ".".into(),
            qtype: OPT_QTYPE,
            data_len: 0,
            ttl: 1,
        });
        assert_eq!(min_ttl(&packet), 30);
    }

    #[test]
    fn answers_flattens_known_types() {
        let mut packet = DnsPacket::default();
        packet.answers.push(Record::A {
            domain: "foo.".into(),
            addr: Ipv4Addr::new(1, 2, 3, 4),
            ttl: 30,
        });
        packet.answers.push(Record::CNAME {
            domain: "foo.".into(),
            host: "bar.".into(),
            ttl: 30,
        });
        packet.answers.push(Record::Unknown {
            domain: "foo.".into(),
            qtype: 999,
            data_len: 0,
            ttl: 30,
        });
        assert_eq!(answers(&packet), vec!["1.2.3.4".to_string(), "bar.".to_string()]);
    }

    #[test]
    fn new_key_is_deterministic_and_collision_free_for_spot_vectors() {
        let a = new_key("foo.", QueryType::A, DnsClass::Internet);
        let b = new_key("foo.", QueryType::AAAA, DnsClass::Internet);
        let c = new_key("foo.", QueryType::A, DnsClass::Chaos);
        let d = new_key("bar.", QueryType::A, DnsClass::Internet);

        assert_eq!(a, new_key("foo.", QueryType::A, DnsClass::Internet));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_ne!(b, c);
        assert_ne!(b, d);
        assert_ne!(c, d);
    }
}
