//! Flow identity shared by the TCP and UDP tables.

use std::fmt;
use std::net::Ipv4Addr;

/// Identifies a single TCP flow or UDP session by its 4-tuple, from the
/// perspective of the device behind the TUN (i.e. `src` is the device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl FlowKey {
    pub fn new(src_ip: [u8; 4], src_port: u16, dst_ip: [u8; 4], dst_port: u16) -> Self {
        Self {
            src_ip: Ipv4Addr::from(src_ip),
            src_port,
            dst_ip: Ipv4Addr::from(dst_ip),
            dst_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}:{}", self.src_ip, self.src_port, self.dst_ip, self.dst_port)
    }
}
