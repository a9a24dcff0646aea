//! WebSocket connection establishment: TCP connect, bypass marking, TLS
//! upgrade and WebSocket handshake. Grounded in the teacher's
//! `tunnel::client::connect_and_run`/`configure_tcp_socket`, stripped of the
//! Aether-specific auth headers and reconnect-loop plumbing (each
//! [`super::Tunnel`] is a single, non-reconnecting session per flow).

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::bypass::{insecure_tls_config, trusted_tls_config, BypassFn};
use crate::config::{Security, TunnelConfig};
use crate::error::{SupervisorError, TunnelError};

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tokio_tungstenite::tungstenite::Message>;
pub type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Connect the underlying TCP socket, apply the bypass marking, perform the
/// (optional TLS) WebSocket upgrade, and split the stream into sink/source
/// halves ready for the writer and reader tasks.
pub async fn connect(config: &TunnelConfig, bypass: &BypassFn) -> Result<(WsSink, WsSource), TunnelError> {
    let request = config
        .ws_url()
        .into_client_request()
        .map_err(TunnelError::Handshake)?;

    let tcp_stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((config.server.as_str(), config.port)))
        .await
        .map_err(|_| TunnelError::ConnectTimeout(CONNECT_TIMEOUT))?
        .map_err(TunnelError::Io)?;

    if !bypass(&socket2::SockRef::from(&tcp_stream)) {
        warn!(error = %SupervisorError::BypassRejected, server = %config.server, "tunnel socket bypass rejected, continuing unmarked");
    }
    configure_tcp_socket(&tcp_stream);

    let connector = match config.security {
        Security::Tls => {
            let tls_config = if config.verify_tls {
                trusted_tls_config()
            } else {
                insecure_tls_config()
            };
            Some(tokio_tungstenite::Connector::Rustls(Arc::new(tls_config)))
        }
        Security::None => None,
    };

    let ws_config = WebSocketConfig {
        max_frame_size: Some(64 << 20),
        max_message_size: Some(64 << 20),
        ..Default::default()
    };

    let (ws_stream, _response) = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::client_async_tls_with_config(request, tcp_stream, Some(ws_config), connector),
    )
    .await
    .map_err(|_| TunnelError::ConnectTimeout(HANDSHAKE_TIMEOUT))?
    .map_err(TunnelError::Handshake)?;

    info!(server = %config.server, port = config.port, security = ?config.security, "tunnel connected");

    Ok(futures_util::StreamExt::split(ws_stream))
}

fn configure_tcp_socket(stream: &TcpStream) {
    let sock_ref = socket2::SockRef::from(stream);
    if let Err(e) = sock_ref.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on tunnel socket");
    }
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
    #[cfg(not(target_os = "windows"))]
    let keepalive = keepalive.with_retries(3);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to set TCP keepalive on tunnel socket");
    }
}
