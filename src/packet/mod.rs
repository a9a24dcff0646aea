//! IPv4/TCP/UDP/ICMP packet codec. Hand-rolled byte parsing in the
//! teacher's `tunnel::protocol::Frame` idiom (`encode`/`decode` over
//! explicit byte offsets) rather than a declarative parser-combinator crate —
//! these headers are fixed-layout and small enough that a combinator adds
//! indirection without buying anything.

pub mod checksum;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod udp;

use crate::error::PacketError;

/// The transport-layer payload of a parsed IPv4 packet, tagged by protocol.
#[derive(Debug)]
pub enum Transport<'a> {
    Tcp(tcp::TcpHeader, &'a [u8]),
    Udp(udp::UdpHeader, &'a [u8]),
    Icmp(icmp::IcmpEcho, &'a [u8]),
}

/// Parse a raw packet read from the TUN device into its IPv4 header and
/// demultiplexed transport payload. Any failure here means the packet is
/// dropped silently at the call site.
pub fn parse_packet(data: &[u8]) -> Result<(ipv4::Ipv4Header, Transport<'_>), PacketError> {
    let (header, payload) = ipv4::parse_ipv4(data)?;
    let transport = match header.protocol {
        ipv4::PROTO_TCP => {
            let (tcp_header, tcp_payload) = tcp::parse_tcp(payload)?;
            Transport::Tcp(tcp_header, tcp_payload)
        }
        ipv4::PROTO_UDP => {
            let (udp_header, udp_payload) = udp::parse_udp(payload)?;
            Transport::Udp(udp_header, udp_payload)
        }
        ipv4::PROTO_ICMP => {
            let (echo, icmp_payload) = icmp::parse_icmp_echo(payload)?;
            Transport::Icmp(echo, icmp_payload)
        }
        other => return Err(PacketError::UnsupportedProtocol(other)),
    };
    Ok((header, transport))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_tcp_by_protocol_number() {
        let segment = tcp::build_tcp([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0, tcp::FLAG_SYN, 1024, &[]);
        let ip = ipv4::build_ipv4_header(1, ipv4::PROTO_TCP, 64, [10, 0, 0, 1], [10, 0, 0, 2], segment.len());
        let mut packet = ip.to_vec();
        packet.extend_from_slice(&segment);

        match parse_packet(&packet).unwrap().1 {
            Transport::Tcp(header, _) => assert_eq!(header.dst_port, 2),
            _ => panic!("expected TCP"),
        }
    }

    #[test]
    fn unsupported_protocol_is_rejected() {
        let ip = ipv4::build_ipv4_header(1, 253, 64, [10, 0, 0, 1], [10, 0, 0, 2], 0);
        assert!(matches!(
            parse_packet(&ip),
            Err(PacketError::UnsupportedProtocol(253))
        ));
    }
}
