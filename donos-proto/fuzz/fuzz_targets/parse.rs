#![no_main]

use donos_proto::{BytePacketBuffer, DnsPacket};

libfuzzer_sys::fuzz_target!(|buffer: BytePacketBuffer| {
    let _ = DnsPacket::try_from(buffer);
});
