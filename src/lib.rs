//! Userspace data plane for a VLESS-over-WebSocket VPN: demultiplex IPv4
//! traffic read from a TUN device into synthetic TCP/UDP/ICMP handling, and
//! relay TCP payload through a VLESS request tunneled over a WebSocket
//! connection.

pub mod bypass;
pub mod config;
pub mod error;
pub mod flow_key;
pub mod icmp_responder;
pub mod packet;
pub mod packet_tunnel;
pub mod stats;
pub mod supervisor;
pub mod tcp_flow;
pub mod tun;
pub mod tunnel;
pub mod udp_session;
pub mod vless;

pub use bypass::BypassFn;
pub use config::{Security, TunnelConfig};
pub use error::SupervisorError;
pub use stats::StatsSink;
pub use supervisor::Supervisor;
