//! VLESS v0 request/response framing, encoded with `bytes::Buf`/
//! `BufMut` in the same explicit-offset style as the teacher's
//! `tunnel::protocol::Frame::encode`/`decode`.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::error::VlessError;

const VERSION: u8 = 0;

/// VLESS command byte. TCP is the only command this tunnel issues; UDP
/// (`0x02`) is left unimplemented since this crate bypasses the tunnel for
/// UDP entirely.
pub const CMD_TCP: u8 = 0x01;

const ADDR_TYPE_IPV4: u8 = 0x01;
const ADDR_TYPE_DOMAIN: u8 = 0x02;
const ADDR_TYPE_IPV6: u8 = 0x03;

/// A destination address as it appears in a VLESS request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

/// Build the VLESS v0 request header prefix: version, UUID, zero-length
/// addon, command, destination port and address. The caller appends the
/// first chunk of host payload immediately after: the header is deferred
/// and merged with the first outbound data unless early data is supplied
/// at `connect` time.
pub fn build_request_header(uuid: Uuid, dst_port: u16, dst_addr: &Address) -> Result<BytesMut, VlessError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(VERSION);
    buf.put_slice(uuid.as_bytes());
    buf.put_u8(0); // addon length: this tunnel sends no addons
    buf.put_u8(CMD_TCP);
    buf.put_u16(dst_port);

    match dst_addr {
        Address::Ipv4(addr) => {
            buf.put_u8(ADDR_TYPE_IPV4);
            buf.put_slice(&addr.octets());
        }
        Address::Domain(name) => {
            if name.len() > 255 {
                return Err(VlessError::DomainTooLong(name.len()));
            }
            buf.put_u8(ADDR_TYPE_DOMAIN);
            buf.put_u8(name.len() as u8);
            buf.put_slice(name.as_bytes());
        }
        Address::Ipv6(addr) => {
            buf.put_u8(ADDR_TYPE_IPV6);
            buf.put_slice(&addr.octets());
        }
    }

    Ok(buf)
}

/// Strip the VLESS v0 response header from the first frame received from
/// the relay. The header is `version (1) + addon_length (1) + addon bytes`,
/// i.e. `2 + addon_length` bytes total — NOT a fixed 2 bytes, since a relay
/// may send non-empty addons.
pub fn strip_response_header(data: &[u8]) -> Result<&[u8], VlessError> {
    if data.len() < 2 {
        return Err(VlessError::ResponseTooShort {
            expected: 2,
            actual: data.len(),
        });
    }
    let addon_length = data[1] as usize;
    let header_len = 2 + addon_length;
    if data.len() < header_len {
        return Err(VlessError::ResponseTooShort {
            expected: header_len,
            actual: data.len(),
        });
    }
    Ok(&data[header_len..])
}

/// Parse an address type + address from a VLESS-encoded buffer. Used by
/// tests and any future inbound-request decoding; the core client only
/// builds requests, but this mirrors `decode` symmetry in the teacher's
/// frame codec.
pub fn parse_address(buf: &mut impl Buf) -> Result<Address, VlessError> {
    if !buf.has_remaining() {
        return Err(VlessError::ResponseTooShort {
            expected: 1,
            actual: 0,
        });
    }
    let addr_type = buf.get_u8();
    match addr_type {
        ADDR_TYPE_IPV4 => {
            if buf.remaining() < 4 {
                return Err(VlessError::ResponseTooShort {
                    expected: 4,
                    actual: buf.remaining(),
                });
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            Ok(Address::Ipv4(Ipv4Addr::from(octets)))
        }
        ADDR_TYPE_DOMAIN => {
            if !buf.has_remaining() {
                return Err(VlessError::ResponseTooShort {
                    expected: 1,
                    actual: 0,
                });
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(VlessError::ResponseTooShort {
                    expected: len,
                    actual: buf.remaining(),
                });
            }
            let mut name = vec![0u8; len];
            buf.copy_to_slice(&mut name);
            String::from_utf8(name)
                .map(Address::Domain)
                .map_err(|e| VlessError::InvalidIpv6(e.to_string()))
        }
        ADDR_TYPE_IPV6 => {
            if buf.remaining() < 16 {
                return Err(VlessError::ResponseTooShort {
                    expected: 16,
                    actual: buf.remaining(),
                });
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            Ok(Address::Ipv6(Ipv6Addr::from(octets)))
        }
        other => Err(VlessError::UnsupportedAddressType(other)),
    }
}

/// Canonicalize an IPv6 literal by round-tripping through `Ipv6Addr`, whose
/// `Display` implementation already produces the RFC 5952 compressed form.
pub fn canonicalize_ipv6(literal: &str) -> Result<String, VlessError> {
    literal
        .parse::<Ipv6Addr>()
        .map(|addr| addr.to_string())
        .map_err(|_| VlessError::InvalidIpv6(literal.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ipv4_request_header() {
        let uuid = Uuid::nil();
        let header = build_request_header(uuid, 443, &Address::Ipv4(Ipv4Addr::new(93, 184, 216, 34))).unwrap();
        assert_eq!(header[0], VERSION);
        assert_eq!(&header[1..17], uuid.as_bytes());
        assert_eq!(header[17], 0); // addon length
        assert_eq!(header[18], CMD_TCP);
        assert_eq!(&header[19..21], &443u16.to_be_bytes());
        assert_eq!(header[21], ADDR_TYPE_IPV4);
        assert_eq!(&header[22..26], &[93, 184, 216, 34]);
    }

    #[test]
    fn builds_domain_request_header() {
        let header = build_request_header(Uuid::nil(), 80, &Address::Domain("example.com".into())).unwrap();
        assert_eq!(header[21], ADDR_TYPE_DOMAIN);
        assert_eq!(header[22], 11);
        assert_eq!(&header[23..34], b"example.com");
    }

    #[test]
    fn rejects_overlong_domain() {
        let long = "a".repeat(256);
        assert!(matches!(
            build_request_header(Uuid::nil(), 80, &Address::Domain(long)),
            Err(VlessError::DomainTooLong(256))
        ));
    }

    #[test]
    fn strips_response_header_by_addon_length_not_fixed_two_bytes() {
        let mut raw = vec![VERSION, 3, 0xaa, 0xbb, 0xcc];
        raw.extend_from_slice(b"payload");
        let stripped = strip_response_header(&raw).unwrap();
        assert_eq!(stripped, b"payload");
    }

    #[test]
    fn strips_response_header_with_zero_addon() {
        let mut raw = vec![VERSION, 0];
        raw.extend_from_slice(b"payload");
        let stripped = strip_response_header(&raw).unwrap();
        assert_eq!(stripped, b"payload");
    }

    #[test]
    fn response_shorter_than_addon_length_errors() {
        let raw = vec![VERSION, 5, 1, 2]; // claims 5 addon bytes, only has 2
        assert!(matches!(
            strip_response_header(&raw),
            Err(VlessError::ResponseTooShort { .. })
        ));
    }

    #[test]
    fn ipv6_canonicalizes_to_compressed_form() {
        assert_eq!(
            canonicalize_ipv6("2001:0db8:0000:0000:0000:0000:0000:0001").unwrap(),
            "2001:db8::1"
        );
    }

    #[test]
    fn address_round_trips_through_parse() {
        let header = build_request_header(Uuid::nil(), 53, &Address::Ipv6(Ipv6Addr::LOCALHOST)).unwrap();
        let mut buf = &header[21..]; // skip to address-type byte
        let parsed = parse_address(&mut buf).unwrap();
        assert_eq!(parsed, Address::Ipv6(Ipv6Addr::LOCALHOST));
    }
}
