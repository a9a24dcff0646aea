//! Deterministic scenario tests covering synthetic TCP SYN-ACK, VLESS
//! request/response framing, and ICMP echo — all driven against in-memory
//! byte buffers with no TUN fd or network socket required.

use vless_tun_core::packet::icmp;
use vless_tun_core::packet::ipv4::{self, PROTO_ICMP};
use vless_tun_core::packet::tcp::{self, FLAG_ACK, FLAG_SYN};
use vless_tun_core::vless::{self, Address};
use uuid::Uuid;

#[test]
fn scenario_tcp_syn_gets_synthetic_syn_ack() {
    let client_isn = 42u32;
    let syn = tcp::build_tcp([10, 0, 0, 5], [93, 184, 216, 34], 51000, 80, client_isn, 0, FLAG_SYN, 65535, &[]);
    let (parsed_syn, _) = tcp::parse_tcp(&syn).unwrap();
    assert!(parsed_syn.has_flag(FLAG_SYN));

    // Responder's reaction: SYN-ACK with a fresh ISN, acking client_isn + 1.
    let server_isn = 9000u32;
    let syn_ack = tcp::build_tcp(
        [93, 184, 216, 34],
        [10, 0, 0, 5],
        80,
        51000,
        server_isn,
        client_isn.wrapping_add(1),
        FLAG_SYN | FLAG_ACK,
        65535,
        &[],
    );
    let (header, _) = tcp::parse_tcp(&syn_ack).unwrap();
    assert_eq!(header.seq, server_isn);
    assert_eq!(header.ack, client_isn + 1);
    assert!(header.has_flag(FLAG_SYN) && header.has_flag(FLAG_ACK));
}

#[test]
fn scenario_vless_request_header_and_first_payload_merge_into_one_frame() {
    let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
    let header = vless::build_request_header(uuid, 443, &Address::Domain("example.com".into())).unwrap();

    let http_request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let mut first_frame = header.to_vec();
    first_frame.extend_from_slice(http_request);

    // The relay sees one frame carrying both the header and the request.
    assert_eq!(first_frame[0], 0); // version
    assert_eq!(&first_frame[1..17], uuid.as_bytes());
    assert!(first_frame.ends_with(http_request));
}

#[test]
fn scenario_vless_response_header_stripped_by_two_plus_addon_length() {
    // A relay that sends a 4-byte addon, not the naive fixed-2-byte case.
    let mut response = vec![0u8, 4, 0xde, 0xad, 0xbe, 0xef];
    response.extend_from_slice(b"response-body");

    let stripped = vless::strip_response_header(&response).unwrap();
    assert_eq!(stripped, b"response-body");
}

#[test]
fn scenario_icmp_echo_request_gets_swapped_address_reply() {
    let identification = 77;
    let src = [10, 0, 0, 9];
    let dst = [1, 1, 1, 1];

    let echo_request = icmp::build_echo_reply(0xabcd, 3, b"ping!"); // reuse builder, flip type below
    let mut request = echo_request.clone();
    request[0] = icmp::TYPE_ECHO_REQUEST;
    // recompute checksum after flipping the type byte
    request[2] = 0;
    request[3] = 0;
    let csum = vless_tun_core::packet::checksum::checksum(&request);
    request[2..4].copy_from_slice(&csum.to_be_bytes());

    let ip_request = ipv4::build_ipv4_header(identification, PROTO_ICMP, 64, src, dst, request.len());
    let mut packet = ip_request.to_vec();
    packet.extend_from_slice(&request);

    let (ip_header, transport) = vless_tun_core::packet::parse_packet(&packet).unwrap();
    let (echo, payload) = match transport {
        vless_tun_core::packet::Transport::Icmp(echo, payload) => (echo, payload),
        _ => panic!("expected ICMP"),
    };
    assert_eq!(echo.icmp_type, icmp::TYPE_ECHO_REQUEST);

    let reply = icmp::build_echo_reply(echo.identifier, echo.sequence, payload);
    let reply_ip = ipv4::build_ipv4_header(identification, PROTO_ICMP, 64, ip_header.dst, ip_header.src, reply.len());

    assert_eq!(reply_ip.to_vec()[12..16], dst); // reply source = original dest
    assert_eq!(reply_ip.to_vec()[16..20], src); // reply dest = original source
    let (reply_echo, reply_payload) = icmp::parse_icmp_echo(&reply).unwrap();
    assert_eq!(reply_echo.icmp_type, icmp::TYPE_ECHO_REPLY);
    assert_eq!(reply_payload, b"ping!");
}

#[test]
fn scenario_non_ipv4_and_unsupported_protocol_packets_are_dropped_not_panicked() {
    let mut ipv6ish = [0u8; 40];
    ipv6ish[0] = 0x60; // version 6
    assert!(vless_tun_core::packet::parse_packet(&ipv6ish).is_err());

    let unsupported = ipv4::build_ipv4_header(1, 132, 64, [1, 2, 3, 4], [5, 6, 7, 8], 0); // SCTP, protocol 132
    assert!(vless_tun_core::packet::parse_packet(&unsupported).is_err());
}

#[test]
fn scenario_ipv6_destination_round_trips_through_canonical_form() {
    let literal = "fe80:0000:0000:0000:0202:b3ff:fe1e:8329";
    let canonical = vless::canonicalize_ipv6(literal).unwrap();
    let round_tripped = vless::canonicalize_ipv6(&canonical).unwrap();
    assert_eq!(canonical, round_tripped);
    assert_eq!(canonical, "fe80::202:b3ff:fe1e:8329");
}
