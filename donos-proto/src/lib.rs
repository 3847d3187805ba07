pub mod buffer;
pub mod packet;

pub use buffer::BytePacketBuffer;
pub use packet::DnsPacket;

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::packet::header::Header;
    use crate::packet::question::Question;
    use crate::packet::record::Record;
    use crate::packet::{DnsPacket, QueryType};

    #[test]
    fn should_round_trip_a_response_packet() {
        let mut packet = DnsPacket {
            header: Header::question(38005).response(),
            questions: vec![Question::new("google.com".into(), QueryType::A)],
            ..Default::default()
        };
        packet.answers.push(Record::A {
            domain: "google.com".into(),
            addr: Ipv4Addr::new(172, 217, 20, 206),
            ttl: 8,
        });

        let buffer = packet.create_buffer().unwrap();
        let decoded = DnsPacket::try_from(buffer).unwrap();

        assert_eq!(decoded.header.id, 38005);
        assert!(decoded.header.recursion_desired);
        assert!(!decoded.header.truncated_message);

        assert_eq!(decoded.questions.len(), 1);
        assert_eq!(decoded.questions[0].name, "google.com");
        assert_eq!(decoded.questions[0].qtype, QueryType::A);

        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(
            decoded.answers[0],
            Record::A {
                domain: String::from("google.com"),
                addr: Ipv4Addr::new(172, 217, 20, 206),
                ttl: 8,
            }
        );

        assert!(decoded.authorities.is_empty());
        assert!(decoded.resources.is_empty());
    }
}
