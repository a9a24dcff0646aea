//! UDP session table. UDP bypasses the VLESS tunnel entirely — each
//! session gets its own real, bypass-marked `UdpSocket` and datagrams are
//! relayed directly, with synthetic IP/UDP headers built for whatever
//! comes back. VLESS UDP command `0x02` is left unused; nothing here
//! depends on it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bypass::BypassFn;
use crate::error::SupervisorError;
use crate::flow_key::FlowKey;
use crate::packet::ipv4;
use crate::packet::udp;
use crate::stats::Counters;
use crate::tun::TunWriter;

/// Per-receive-loop-iteration timeout; a session whose socket has been
/// silent this long just loops back around to check for expiry/shutdown.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// A session with no traffic in either direction for this long is reaped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// How often the sweeper scans for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const DNS_PORT: u16 = 53;

struct UdpSession {
    last_activity: Mutex<Instant>,
}

impl UdpSession {
    async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    async fn is_idle(&self) -> bool {
        self.last_activity.lock().await.elapsed() > IDLE_TIMEOUT
    }
}

#[derive(Default)]
pub struct UdpSessionTable {
    sessions: Mutex<HashMap<FlowKey, Arc<UdpSession>>>,
}

impl UdpSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn handle_datagram(
        &self,
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        identification: u16,
        header: udp::UdpHeader,
        payload: &[u8],
        bypass: BypassFn,
        tun_writer: TunWriter,
        stats: Arc<Counters>,
    ) {
        let key = FlowKey::new(src_ip, header.src_port, dst_ip, header.dst_port);
        let is_dns = header.dst_port == DNS_PORT;

        let existing = {
            let sessions = self.sessions.lock().await;
            sessions.get(&key).is_some()
        };

        if existing {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(&key) {
                session.touch().await;
            }
            return;
        }

        let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(%key, error = %e, "failed to open bypass UDP socket");
                return;
            }
        };
        if !bypass(&socket2::SockRef::from(&socket)) {
            warn!(%key, error = %SupervisorError::BypassRejected, "UDP session socket bypass rejected, continuing unmarked");
        }

        let dst = std::net::SocketAddrV4::new(Ipv4Addr::from(dst_ip), header.dst_port);
        if let Err(e) = socket.connect(dst).await {
            warn!(%key, error = %e, "failed to connect bypass UDP socket");
            return;
        }

        let session = Arc::new(UdpSession {
            last_activity: Mutex::new(Instant::now()),
        });
        self.sessions.lock().await.insert(key, Arc::clone(&session));

        debug!(%key, dns = is_dns, "opened UDP session");

        if let Err(e) = socket.send(payload).await {
            warn!(%key, error = %e, "failed to send initial UDP datagram");
        } else {
            stats.add_out(payload.len() as u64);
        }

        tokio::spawn(run_session(key, socket, identification, session, tun_writer, stats, is_dns));
    }

    /// Remove sessions idle for longer than [`IDLE_TIMEOUT`].
    pub async fn sweep(&self) {
        let mut sessions = self.sessions.lock().await;
        let mut dead = Vec::new();
        for (key, session) in sessions.iter() {
            if session.is_idle().await {
                dead.push(*key);
            }
        }
        for key in dead {
            sessions.remove(&key);
            debug!(%key, "reaped idle UDP session");
        }
    }

    pub fn sweep_interval() -> Duration {
        SWEEP_INTERVAL
    }
}

async fn run_session(
    key: FlowKey,
    socket: UdpSocket,
    identification: u16,
    session: Arc<UdpSession>,
    tun_writer: TunWriter,
    stats: Arc<Counters>,
    is_dns: bool,
) {
    let mut buf = vec![0u8; 65535];
    loop {
        if session.is_idle().await {
            break;
        }
        match tokio::time::timeout(RECEIVE_TIMEOUT, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                session.touch().await;
                stats.add_in(n as u64);

                let reply_udp = udp::build_udp(
                    key.dst_ip.octets(),
                    key.src_ip.octets(),
                    key.dst_port,
                    key.src_port,
                    &buf[..n],
                );
                let reply_ip = ipv4::build_ipv4_header(
                    identification,
                    ipv4::PROTO_UDP,
                    64,
                    key.dst_ip.octets(),
                    key.src_ip.octets(),
                    reply_udp.len(),
                );
                let mut packet = reply_ip.to_vec();
                packet.extend_from_slice(&reply_udp);

                if is_dns {
                    debug!(%key, bytes = n, "dns response relayed");
                }

                if tun_writer.send(packet).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!(%key, error = %e, "UDP session receive error");
                break;
            }
            Err(_) => continue, // receive timeout, loop to re-check idleness
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_sessions_reaped_after_sixty_seconds_swept_every_thirty() {
        assert_eq!(RECEIVE_TIMEOUT, Duration::from_secs(5));
        assert_eq!(IDLE_TIMEOUT, Duration::from_secs(60));
        assert_eq!(SWEEP_INTERVAL, Duration::from_secs(30));
    }

    #[test]
    fn dns_port_constant_is_53() {
        assert_eq!(DNS_PORT, 53);
    }
}
