//! Synthetic ICMP echo responder. Stateless: every inbound echo request is
//! answered immediately with a swapped-address echo reply, the same
//! request/response turnaround `TcpFlow` uses for the SYN-ACK, just without
//! any session to track.

use tracing::{debug, trace};

use crate::packet::icmp::{self, TYPE_ECHO_REQUEST};
use crate::packet::ipv4::{self, Ipv4Header};
use crate::tun::TunWriter;

/// Handle one inbound IPv4 packet already known to carry ICMP. Only type 8
/// (echo request) is answered; anything else is dropped.
pub async fn handle_icmp_packet(header: &Ipv4Header, echo: &icmp::IcmpEcho, payload: &[u8], tun_writer: &TunWriter) {
    if echo.icmp_type != TYPE_ECHO_REQUEST {
        trace!(icmp_type = echo.icmp_type, "ignoring non-echo-request ICMP packet");
        return;
    }

    let reply_icmp = icmp::build_echo_reply(echo.identifier, echo.sequence, payload);
    let reply_ip = ipv4::build_ipv4_header(
        header.identification,
        ipv4::PROTO_ICMP,
        64,
        header.dst,
        header.src,
        reply_icmp.len(),
    );

    let mut packet = Vec::with_capacity(reply_ip.len() + reply_icmp.len());
    packet.extend_from_slice(&reply_ip);
    packet.extend_from_slice(&reply_icmp);

    debug!(
        src = ?header.dst,
        dst = ?header.src,
        identifier = echo.identifier,
        sequence = echo.sequence,
        "answering ICMP echo request"
    );

    if tun_writer.send(packet).await.is_err() {
        tracing::warn!("TUN writer closed while sending ICMP echo reply");
    }
}
