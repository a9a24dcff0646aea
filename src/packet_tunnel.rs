//! `PacketTunnel`: the IPv4/TCP/UDP/ICMP demultiplexer. One task reads the
//! TUN device and hands each packet to the matching protocol handler; all
//! three handlers share the single serialized [`crate::tun::TunWriter`] for
//! replies.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::bypass::BypassFn;
use crate::config::TunnelConfig;
use crate::icmp_responder;
use crate::packet::{self, Transport};
use crate::stats::Counters;
use crate::tcp_flow::TcpFlowTable;
use crate::tun::{TunDevice, TunWriter};
use crate::udp_session::UdpSessionTable;

/// Shared tables and collaborators the demux loop and sweepers need.
pub struct PacketTunnel {
    pub tcp_flows: Arc<TcpFlowTable>,
    pub udp_sessions: Arc<UdpSessionTable>,
    pub config: Arc<TunnelConfig>,
    pub bypass: BypassFn,
    pub stats: Arc<Counters>,
}

impl PacketTunnel {
    pub fn new(config: Arc<TunnelConfig>, bypass: BypassFn, stats: Arc<Counters>) -> Self {
        Self {
            tcp_flows: Arc::new(TcpFlowTable::new()),
            udp_sessions: Arc::new(UdpSessionTable::new()),
            config,
            bypass,
            stats,
        }
    }

    /// Read and dispatch packets from `tun` until the device errors out or
    /// the caller drops the returned task.
    pub async fn run(self: Arc<Self>, tun: Arc<TunDevice>, tun_writer: TunWriter) {
        let mut buf = vec![0u8; self.config.mtu.max(1500)];
        loop {
            let n = match tun.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "TUN read failed, demux loop exiting");
                    return;
                }
            };
            if n == 0 {
                continue;
            }

            let data = &buf[..n];
            let (header, transport) = match packet::parse_packet(data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    trace!(error = %e, "dropping malformed packet");
                    continue;
                }
            };

            match transport {
                Transport::Tcp(tcp_header, payload) => {
                    self.tcp_flows
                        .handle_segment(
                            header.src,
                            header.dst,
                            header.identification,
                            tcp_header,
                            payload,
                            Arc::clone(&self.config),
                            Arc::clone(&self.bypass),
                            tun_writer.clone(),
                            Arc::clone(&self.stats),
                        )
                        .await;
                }
                Transport::Udp(udp_header, payload) => {
                    self.udp_sessions
                        .handle_datagram(
                            header.src,
                            header.dst,
                            header.identification,
                            udp_header,
                            payload,
                            Arc::clone(&self.bypass),
                            tun_writer.clone(),
                            Arc::clone(&self.stats),
                        )
                        .await;
                }
                Transport::Icmp(echo, payload) => {
                    icmp_responder::handle_icmp_packet(&header, &echo, payload, &tun_writer).await;
                }
            }
        }
    }

    /// Periodically reap idle TCP flows and UDP sessions.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(UdpSessionTable::sweep_interval());
        loop {
            interval.tick().await;
            self.tcp_flows.sweep().await;
            self.udp_sessions.sweep().await;
        }
    }
}
