//! UDP header parsing and building.

use super::checksum::transport_checksum;
use crate::error::PacketError;

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

pub fn parse_udp(data: &[u8]) -> Result<(UdpHeader, &[u8]), PacketError> {
    if data.len() < HEADER_LEN {
        return Err(PacketError::TooShort {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let header = UdpHeader {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        length: u16::from_be_bytes([data[4], data[5]]),
    };
    let payload_end = (header.length as usize).max(HEADER_LEN).min(data.len());
    Ok((header, &data[HEADER_LEN..payload_end]))
}

/// Build a complete UDP datagram with a valid checksum. A zero result is
/// mapped to `0xffff` per RFC 768 (zero means "no checksum computed").
pub fn build_udp(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut datagram = vec![0u8; HEADER_LEN + payload.len()];
    datagram[0..2].copy_from_slice(&src_port.to_be_bytes());
    datagram[2..4].copy_from_slice(&dst_port.to_be_bytes());
    let length = datagram.len() as u16;
    datagram[4..6].copy_from_slice(&length.to_be_bytes());
    datagram[6..8].copy_from_slice(&[0, 0]);
    datagram[8..].copy_from_slice(payload);

    let mut csum = transport_checksum(src_ip, dst_ip, super::ipv4::PROTO_UDP, &datagram);
    if csum == 0 {
        csum = 0xffff;
    }
    datagram[6..8].copy_from_slice(&csum.to_be_bytes());
    datagram
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ports_and_payload() {
        let dgram = build_udp([10, 0, 0, 1], [8, 8, 8, 8], 5353, 53, b"query");
        let (header, payload) = parse_udp(&dgram).unwrap();
        assert_eq!(header.src_port, 5353);
        assert_eq!(header.dst_port, 53);
        assert_eq!(payload, b"query");
    }

    #[test]
    fn rejects_short_datagram() {
        assert!(matches!(parse_udp(&[0u8; 4]), Err(PacketError::TooShort { .. })));
    }
}
