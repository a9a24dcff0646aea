//! TCP header parsing and building for the synthetic responder.

use super::checksum::transport_checksum;
use crate::error::PacketError;

pub const MIN_HEADER_LEN: usize = 20;

pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_RST: u8 = 0x04;
pub const FLAG_PSH: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
}

impl TcpHeader {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Parse a TCP segment's header, returning the header and the payload slice
/// following the (possibly option-extended) header.
pub fn parse_tcp(data: &[u8]) -> Result<(TcpHeader, &[u8]), PacketError> {
    if data.len() < MIN_HEADER_LEN {
        return Err(PacketError::TooShort {
            expected: MIN_HEADER_LEN,
            actual: data.len(),
        });
    }

    let data_offset = (data[12] >> 4) as usize * 4;
    if data_offset < MIN_HEADER_LEN || data.len() < data_offset {
        return Err(PacketError::TooShort {
            expected: data_offset.max(MIN_HEADER_LEN),
            actual: data.len(),
        });
    }

    let header = TcpHeader {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        flags: data[13],
        window: u16::from_be_bytes([data[14], data[15]]),
    };

    Ok((header, &data[data_offset..]))
}

/// Build a complete TCP segment (20-byte header, no options) with a valid
/// checksum against the given pseudo-header addresses.
#[allow(clippy::too_many_arguments)]
pub fn build_tcp(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut segment = vec![0u8; MIN_HEADER_LEN + payload.len()];
    segment[0..2].copy_from_slice(&src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&dst_port.to_be_bytes());
    segment[4..8].copy_from_slice(&seq.to_be_bytes());
    segment[8..12].copy_from_slice(&ack.to_be_bytes());
    segment[12] = (5 << 4) as u8; // data offset: 5 words, no options
    segment[13] = flags;
    segment[14..16].copy_from_slice(&window.to_be_bytes());
    segment[16..18].copy_from_slice(&[0, 0]); // checksum placeholder
    segment[18..20].copy_from_slice(&[0, 0]); // urgent pointer
    segment[20..].copy_from_slice(payload);

    let csum = transport_checksum(src_ip, dst_ip, super::ipv4::PROTO_TCP, &segment);
    segment[16..18].copy_from_slice(&csum.to_be_bytes());
    segment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let segment = build_tcp(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            12345,
            443,
            1000,
            2000,
            FLAG_SYN | FLAG_ACK,
            65535,
            &[],
        );
        let (header, payload) = parse_tcp(&segment).unwrap();
        assert_eq!(header.src_port, 12345);
        assert_eq!(header.dst_port, 443);
        assert_eq!(header.seq, 1000);
        assert_eq!(header.ack, 2000);
        assert!(header.has_flag(FLAG_SYN));
        assert!(header.has_flag(FLAG_ACK));
        assert!(!header.has_flag(FLAG_FIN));
        assert!(payload.is_empty());
    }

    #[test]
    fn checksum_is_valid_over_pseudo_header() {
        let src = [192, 168, 1, 1];
        let dst = [192, 168, 1, 2];
        let segment = build_tcp(src, dst, 1, 2, 0, 0, FLAG_SYN, 1024, b"hi");
        let csum = transport_checksum(src, dst, super::super::ipv4::PROTO_TCP, &segment);
        assert_eq!(csum, 0);
    }

    #[test]
    fn rejects_truncated_header() {
        let short = [0u8; 10];
        assert!(matches!(parse_tcp(&short), Err(PacketError::TooShort { .. })));
    }
}
