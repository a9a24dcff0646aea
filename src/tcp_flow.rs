//! Synthetic TCP responder and per-flow state machine.
//!
//! There is no real TCP stack here: a flow exists the moment a SYN arrives,
//! gets a synthetic SYN-ACK with a random ISN, and once the handshake's
//! final ACK lands, host payload is piped into a VLESS [`crate::tunnel::Tunnel`]
//! and relay payload is piped back out as synthetic data segments. No
//! retransmission, no congestion control, no window scaling — the flow
//! either makes forward progress or times out and is torn down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bypass::BypassFn;
use crate::config::TunnelConfig;
use crate::flow_key::FlowKey;
use crate::packet::tcp::{self, FLAG_ACK, FLAG_FIN, FLAG_PSH, FLAG_SYN};
use crate::stats::Counters;
use crate::tun::TunWriter;
use crate::tunnel::Tunnel;
use crate::vless::Address;

/// Maximum host-originated bytes buffered ahead of the tunnel being ready.
const HOST_BUFFER_CAPACITY: usize = 64 * 1024;
/// How long a flow waits for the VLESS tunnel to connect before giving up
/// (silently — no RST is sent).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Maximum TCP segment payload, derived from the configured MTU (20-byte
/// IPv4 header + 20-byte TCP header, no options).
const IP_TCP_HEADER_BYTES: usize = 40;
/// A flow with no activity in either direction for this long is reaped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    SynReceived,
    Established,
    Closed,
}

struct SeqState {
    /// Next sequence number this responder will use when sending data.
    server_seq: u32,
    /// Next sequence number expected from the client (our ack field).
    client_ack: u32,
}

/// One synthetic TCP flow.
pub struct TcpFlow {
    key: FlowKey,
    state: RwLock<FlowState>,
    seq: Mutex<SeqState>,
    host_to_tunnel: mpsc::Sender<Vec<u8>>,
    last_activity: Mutex<Instant>,
}

impl TcpFlow {
    fn key(&self) -> FlowKey {
        self.key
    }

    async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    async fn is_idle(&self) -> bool {
        self.last_activity.lock().await.elapsed() > IDLE_TIMEOUT
    }
}

/// The table of live flows, keyed by 4-tuple, shared across the demux task
/// and the idle sweeper.
#[derive(Default)]
pub struct TcpFlowTable {
    flows: RwLock<HashMap<FlowKey, Arc<TcpFlow>>>,
}

impl TcpFlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch one inbound TCP segment. `header_src`/`header_dst` are the
    /// IPv4 addresses from the packet's IP header, `identification` seeds
    /// the IP ID field of any synthetic reply.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_segment(
        &self,
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        identification: u16,
        header: tcp::TcpHeader,
        payload: &[u8],
        config: Arc<TunnelConfig>,
        bypass: BypassFn,
        tun_writer: TunWriter,
        stats: Arc<Counters>,
    ) {
        let key = FlowKey::new(src_ip, header.src_port, dst_ip, header.dst_port);

        if header.has_flag(FLAG_SYN) && !header.has_flag(FLAG_ACK) {
            self.start_flow(key, src_ip, dst_ip, identification, header, config, bypass, tun_writer, stats)
                .await;
            return;
        }

        let flow = {
            let flows = self.flows.read().await;
            flows.get(&key).cloned()
        };

        let Some(flow) = flow else {
            debug!(%key, "segment for unknown flow, dropping");
            return;
        };

        flow.touch().await;

        if header.has_flag(tcp::FLAG_RST) || header.has_flag(FLAG_FIN) {
            self.close_flow(&key).await;
            return;
        }

        let mut state = flow.state.write().await;
        match *state {
            FlowState::SynReceived => {
                if header.has_flag(FLAG_ACK) {
                    *state = FlowState::Established;
                    info!(%key, "TCP handshake complete");
                }
            }
            FlowState::Established => {}
            FlowState::Closed => return,
        }
        drop(state);

        if !payload.is_empty() {
            let mut seq = flow.seq.lock().await;
            seq.client_ack = header.seq.wrapping_add(payload.len() as u32);
            let (server_seq, client_ack) = (seq.server_seq, seq.client_ack);
            drop(seq);

            let ack = tcp::build_tcp(
                dst_ip,
                src_ip,
                key.dst_port,
                key.src_port,
                server_seq,
                client_ack,
                FLAG_ACK,
                65535,
                &[],
            );
            let ip_header = crate::packet::ipv4::build_ipv4_header(
                identification,
                crate::packet::ipv4::PROTO_TCP,
                64,
                dst_ip,
                src_ip,
                ack.len(),
            );
            let mut packet = ip_header.to_vec();
            packet.extend_from_slice(&ack);
            if tun_writer.send(packet).await.is_err() {
                warn!(%key, "TUN writer closed while acking host segment");
            }

            if flow.host_to_tunnel.try_send(payload.to_vec()).is_err() {
                warn!(%key, "host->tunnel buffer full, dropping segment");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_flow(
        &self,
        key: FlowKey,
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        identification: u16,
        syn: tcp::TcpHeader,
        config: Arc<TunnelConfig>,
        bypass: BypassFn,
        tun_writer: TunWriter,
        stats: Arc<Counters>,
    ) {
        let server_isn = rand::thread_rng().next_u32();
        let client_next = syn.seq.wrapping_add(1);

        let (host_to_tunnel, host_rx) = mpsc::channel(HOST_BUFFER_CAPACITY / 1460 + 1);

        let flow = Arc::new(TcpFlow {
            key,
            state: RwLock::new(FlowState::SynReceived),
            seq: Mutex::new(SeqState {
                server_seq: server_isn.wrapping_add(1),
                client_ack: client_next,
            }),
            host_to_tunnel,
            last_activity: Mutex::new(Instant::now()),
        });

        self.flows.write().await.insert(key, Arc::clone(&flow));

        let syn_ack = tcp::build_tcp(
            dst_ip,
            src_ip,
            key.dst_port,
            key.src_port,
            server_isn,
            client_next,
            FLAG_SYN | FLAG_ACK,
            65535,
            &[],
        );
        let ip_header = crate::packet::ipv4::build_ipv4_header(
            identification,
            crate::packet::ipv4::PROTO_TCP,
            64,
            dst_ip,
            src_ip,
            syn_ack.len(),
        );
        let mut packet = ip_header.to_vec();
        packet.extend_from_slice(&syn_ack);
        if tun_writer.send(packet).await.is_err() {
            warn!(%key, "TUN writer closed while sending SYN-ACK");
            return;
        }

        info!(%key, "synthetic SYN-ACK sent, awaiting handshake completion");

        tokio::spawn(run_flow(
            flow,
            src_ip,
            dst_ip,
            identification,
            config,
            bypass,
            tun_writer,
            stats,
            host_rx,
        ));
    }

    async fn close_flow(&self, key: &FlowKey) {
        if let Some(flow) = self.flows.write().await.remove(key) {
            *flow.state.write().await = FlowState::Closed;
            debug!(%key, "flow closed");
        }
    }

    /// Remove flows idle for longer than [`IDLE_TIMEOUT`].
    pub async fn sweep(&self) {
        let mut flows = self.flows.write().await;
        let mut dead = Vec::new();
        for (key, flow) in flows.iter() {
            if flow.is_idle().await {
                dead.push(*key);
            }
        }
        for key in dead {
            flows.remove(&key);
            debug!(%key, "reaped idle TCP flow");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_flow(
    flow: Arc<TcpFlow>,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    identification: u16,
    config: Arc<TunnelConfig>,
    bypass: BypassFn,
    tun_writer: TunWriter,
    stats: Arc<Counters>,
    mut host_rx: mpsc::Receiver<Vec<u8>>,
) {
    let key = flow.key();

    // Wait for the handshake's final ACK before dialing out, but don't
    // block forever — the host may never complete it.
    let handshake_deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        if *flow.state.read().await == FlowState::Established {
            break;
        }
        if Instant::now() > handshake_deadline {
            debug!(%key, "handshake never completed, abandoning flow");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // First chunk of host data (if any arrived promptly) becomes VLESS
    // early data so the header and payload go out in one frame.
    let early = tokio::time::timeout(Duration::from_millis(200), host_rx.recv()).await;
    let early_data = match early {
        Ok(Some(data)) => Some(data),
        _ => None,
    };

    let dst_addr = Address::Ipv4(std::net::Ipv4Addr::from(dst_ip));
    let connect_result = tokio::time::timeout(
        CONNECT_TIMEOUT,
        Tunnel::connect(&config, &bypass, dst_addr, key.dst_port, early_data.as_deref()),
    )
    .await;

    let tunnel = match connect_result {
        Ok(Ok(tunnel)) => tunnel,
        Ok(Err(e)) => {
            warn!(%key, error = %e, "tunnel connect failed, dropping flow silently (no RST)");
            return;
        }
        Err(_) => {
            warn!(%key, "tunnel connect timed out, dropping flow silently (no RST)");
            return;
        }
    };
    let tunnel = Arc::new(tunnel);

    if let Some(data) = &early_data {
        stats.add_out(data.len() as u64);
    }

    let uplink = {
        let tunnel = Arc::clone(&tunnel);
        let flow = Arc::clone(&flow);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Some(data) = host_rx.recv().await {
                stats.add_out(data.len() as u64);
                if tunnel.send(&data).await.is_err() {
                    break;
                }
                flow.touch().await;
            }
        })
    };

    let downlink = {
        let tunnel = Arc::clone(&tunnel);
        let flow = Arc::clone(&flow);
        let stats = Arc::clone(&stats);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            let mss = config.mtu.saturating_sub(IP_TCP_HEADER_BYTES).max(1);
            'outer: loop {
                match tunnel.recv_stream().await {
                    Ok(Some(data)) => {
                        stats.add_in(data.len() as u64);
                        flow.touch().await;

                        for chunk in data.chunks(mss) {
                            let mut seq = flow.seq.lock().await;
                            let segment = tcp::build_tcp(
                                dst_ip,
                                src_ip,
                                key.dst_port,
                                key.src_port,
                                seq.server_seq,
                                seq.client_ack,
                                FLAG_ACK | FLAG_PSH,
                                65535,
                                chunk,
                            );
                            seq.server_seq = seq.server_seq.wrapping_add(chunk.len() as u32);
                            drop(seq);

                            let ip_header = crate::packet::ipv4::build_ipv4_header(
                                identification,
                                crate::packet::ipv4::PROTO_TCP,
                                64,
                                dst_ip,
                                src_ip,
                                segment.len(),
                            );
                            let mut packet = ip_header.to_vec();
                            packet.extend_from_slice(&segment);
                            if tun_writer.send(packet).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        })
    };

    tokio::select! {
        _ = uplink => {}
        _ = downlink => {}
    }

    tunnel.close().await;
    *flow.state.write().await = FlowState::Closed;
    debug!(%key, "flow relay finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_flows_are_reaped_after_five_minutes_connect_gives_up_after_fifteen_seconds() {
        assert_eq!(IDLE_TIMEOUT, Duration::from_secs(300));
        assert_eq!(CONNECT_TIMEOUT, Duration::from_secs(15));
    }

    #[test]
    fn downlink_segments_never_exceed_mss_derived_from_mtu() {
        let mtu = 1500usize;
        let mss = mtu.saturating_sub(IP_TCP_HEADER_BYTES).max(1);
        assert_eq!(mss, 1460);

        let data = vec![0u8; mss * 3 + 17];
        let chunks: Vec<_> = data.chunks(mss).collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() <= mss));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), data.len());
    }

    #[tokio::test]
    async fn syn_ack_uses_random_isn_and_acks_client_isn_plus_one() {
        let client_isn: u32 = 555;
        let server_isn: u32 = rand::thread_rng().next_u32();
        let syn_ack = tcp::build_tcp(
            [10, 0, 0, 2],
            [10, 0, 0, 1],
            443,
            50000,
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
}
