//! ICMP echo request encoding and reply validation

use std::net::Ipv4Addr;

/// ICMP echo header size; requests carry no payload
pub const ICMP_HEADER_LEN: usize = 8;

/// Receive buffer size: maximum IPv4 header plus the minimum ICMP header
pub const PACKET_LEN: usize = 68;

const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
const ICMP_TYPE_ECHO_REPLY: u8 = 0;
const IPPROTO_ICMP: u8 = 1;

/// RFC 1071 internet checksum
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Encode one echo request, checksum filled in
pub fn encode_echo_request(id: u16, seq: u16) -> [u8; ICMP_HEADER_LEN] {
    let mut packet = [0u8; ICMP_HEADER_LEN];
    packet[0] = ICMP_TYPE_ECHO_REQUEST;
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Outcome of inspecting a received datagram
#[derive(Debug, PartialEq, Eq)]
pub enum ReplyVerdict {
    /// A valid echo reply from the monitored target
    EchoReply,
    /// Something else; drop it and keep listening
    Discard(&'static str),
}

/// Validate a raw-socket datagram as an echo reply from `target`
///
/// Raw ICMP receives include the IPv4 header, whose length is variable;
/// the ICMP offset comes from the header-length field.
pub fn classify_reply(datagram: &[u8], target: Ipv4Addr) -> ReplyVerdict {
    if datagram.len() < 20 {
        return ReplyVerdict::Discard("truncated IPv4 header");
    }
    if datagram[0] >> 4 != 4 {
        return ReplyVerdict::Discard("not IPv4");
    }
    let ihl = usize::from(datagram[0] & 0x0F) * 4;
    if ihl < 20 || datagram.len() < ihl + ICMP_HEADER_LEN {
        return ReplyVerdict::Discard("truncated datagram");
    }
    let src = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    if src != target {
        return ReplyVerdict::Discard("unexpected source");
    }
    if datagram[9] != IPPROTO_ICMP {
        return ReplyVerdict::Discard("not ICMP");
    }
    if datagram[ihl] != ICMP_TYPE_ECHO_REPLY {
        return ReplyVerdict::Discard("not an echo reply");
    }
    ReplyVerdict::EchoReply
}

/// Build an echo reply datagram as a raw socket would deliver it
#[cfg(test)]
pub fn build_reply(src: Ipv4Addr, icmp_type: u8, proto: u8) -> Vec<u8> {
    let mut datagram = vec![0u8; 20 + ICMP_HEADER_LEN];
    datagram[0] = 0x45; // version 4, 20-byte header
    datagram[9] = proto;
    datagram[12..16].copy_from_slice(&src.octets());
    datagram[20] = icmp_type;
    datagram
}
