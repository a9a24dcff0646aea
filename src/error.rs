//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own error enum (mirrors the teacher's split
//! between `tunnel::protocol::ProtocolError` and the proxy-level filter
//! errors); [`SupervisorError`] is the only error type that crosses the
//! public API boundary, returned from [`crate::supervisor::Supervisor::start`].

use thiserror::Error;

/// Errors raised while parsing or building an IPv4/TCP/UDP/ICMP packet.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("not an IPv4 packet (version nibble = {0})")]
    NotIpv4(u8),
    #[error("unsupported transport protocol {0}")]
    UnsupportedProtocol(u8),
    #[error("IHL {0} is invalid (must be 5..=15)")]
    InvalidIhl(u8),
}

/// Errors raised while building or stripping a VLESS v0 frame.
#[derive(Debug, Error)]
pub enum VlessError {
    #[error("response header too short: expected {expected} bytes, got {actual}")]
    ResponseTooShort { expected: usize, actual: usize },
    #[error("unsupported address type 0x{0:02x}")]
    UnsupportedAddressType(u8),
    #[error("invalid IPv6 literal: {0}")]
    InvalidIpv6(String),
    #[error("domain name too long ({0} bytes, max 255)")]
    DomainTooLong(usize),
}

/// Errors raised by the WebSocket/VLESS tunnel layer.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("TUN write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("tunnel closed")]
    Closed,
}

/// Errors raised validating a [`crate::config::TunnelConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("uuid is not a valid 128-bit identity: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("port must be 1..=65535, got 0")]
    ZeroPort,
    #[error("ws_path must be an absolute path starting with '/', got {0:?}")]
    InvalidWsPath(String),
    #[error("security=tls requires a non-empty sni")]
    MissingSni,
    #[error("server must not be empty")]
    EmptyServer,
}

/// Top-level error returned from `Supervisor::start`, covering both an
/// invalid configuration and a failure to take ownership of the TUN
/// descriptor — both fail `start()` before any packet I/O begins.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to register TUN descriptor: {0}")]
    TunSetup(#[source] std::io::Error),
    #[error("bypass predicate rejected the control socket")]
    BypassRejected,
}
