//! The VLESS-over-WebSocket tunnel.
//!
//! One [`Tunnel`] is a single relayed TCP byte stream: `connect` opens the
//! WebSocket and defers the VLESS request header until the first call to
//! `send` (unless early data is supplied), `recv_stream` yields inbound
//! bytes with the VLESS response header already stripped from the first
//! frame, and `close` tears both directions down. Framing lives in
//! [`crate::vless`]; this module only owns the WebSocket plumbing, in the
//! same split the teacher keeps between `tunnel::protocol` (wire format) and
//! `tunnel::client`/`tunnel::writer` (transport).

pub mod client;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::bypass::BypassFn;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::vless::{self, Address};

/// Capacity of the inbound frame queue; a slow consumer backs up here before
/// frames start getting dropped.
const INBOUND_QUEUE_CAPACITY: usize = 1000;
/// How long a stalled consumer gets before an inbound frame is dropped.
const INBOUND_OFFER_TIMEOUT: Duration = Duration::from_millis(100);

/// A single relayed TCP stream over a VLESS/WebSocket connection.
pub struct Tunnel {
    outbound_tx: Mutex<Option<writer::OutboundSender>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    pending_header: Mutex<Option<BytesMut>>,
    closed: Arc<AtomicBool>,
}

impl Tunnel {
    /// Open the WebSocket connection to `config.server:config.port` and
    /// prepare (but do not necessarily send) the VLESS request header for
    /// `dst_addr:dst_port`. If `early_data` is `Some`, the header and the
    /// given bytes are sent immediately as the first outbound frame;
    /// otherwise the header is deferred until the first `send` call.
    pub async fn connect(
        config: &TunnelConfig,
        bypass: &BypassFn,
        dst_addr: Address,
        dst_port: u16,
        early_data: Option<&[u8]>,
    ) -> Result<Self, TunnelError> {
        let (ws_sink, ws_source) = client::connect(config, bypass).await?;

        let header = vless::build_request_header(config.uuid, dst_port, &dst_addr)
            .map_err(|e| TunnelError::Handshake(tokio_tungstenite::tungstenite::Error::Io(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            )))?;

        let (outbound_tx, writer_handle) = writer::spawn_writer(ws_sink);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let reader_handle = spawn_reader(ws_source, inbound_tx, Arc::clone(&closed));

        let tunnel = Tunnel {
            outbound_tx: Mutex::new(Some(outbound_tx)),
            inbound_rx: Mutex::new(inbound_rx),
            writer_handle: Mutex::new(Some(writer_handle)),
            reader_handle: Mutex::new(Some(reader_handle)),
            pending_header: Mutex::new(Some(header)),
            closed,
        };

        if let Some(data) = early_data {
            tunnel.send(data).await?;
        }

        Ok(tunnel)
    }

    /// Send host-originated bytes to the relay, prepending the deferred
    /// VLESS request header on the first call.
    pub async fn send(&self, data: &[u8]) -> Result<(), TunnelError> {
        let mut header_guard = self.pending_header.lock().await;
        let payload = if let Some(header) = header_guard.take() {
            let mut combined = header;
            combined.extend_from_slice(data);
            combined.to_vec()
        } else {
            data.to_vec()
        };
        drop(header_guard);

        let guard = self.outbound_tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(payload).await.map_err(|_| TunnelError::Closed),
            None => Err(TunnelError::Closed),
        }
    }

    /// Receive the next chunk of relay-originated bytes, with the VLESS
    /// response header already stripped from the first frame. Returns
    /// `Ok(None)` once the tunnel has closed and drained.
    pub async fn recv_stream(&self) -> Result<Option<Vec<u8>>, TunnelError> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }

    /// Tear down both directions. Idempotent — a second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outbound_tx.lock().await.take();
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.writer_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        debug!("tunnel closed");
    }
}

fn spawn_reader(
    mut ws_source: client::WsSource,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut first_response_consumed = false;

        loop {
            let message = match ws_source.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(error = %e, "tunnel read error, closing");
                    break;
                }
                None => {
                    debug!("tunnel read stream ended");
                    break;
                }
            };

            let data = match message {
                Message::Binary(data) => data,
                Message::Close(_) => {
                    debug!("tunnel received close frame");
                    break;
                }
                _ => continue,
            };

            let payload = if !first_response_consumed {
                first_response_consumed = true;
                match vless::strip_response_header(&data) {
                    Ok(stripped) => stripped.to_vec(),
                    Err(e) => {
                        warn!(error = %e, "malformed VLESS response header, closing tunnel");
                        break;
                    }
                }
            } else {
                data.to_vec()
            };

            if payload.is_empty() {
                continue;
            }

            match inbound_tx.send_timeout(payload, INBOUND_OFFER_TIMEOUT).await {
                Ok(()) => {}
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    warn!("inbound queue full, dropping frame from relay");
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => break,
            }
        }

        closed.store(true, Ordering::Release);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_queue_holds_a_thousand_frames_before_dropping() {
        assert_eq!(INBOUND_QUEUE_CAPACITY, 1000);
        assert_eq!(INBOUND_OFFER_TIMEOUT, Duration::from_millis(100));
    }

    fn idle_tunnel() -> Tunnel {
        let (_inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(1);
        Tunnel {
            outbound_tx: Mutex::new(None),
            inbound_rx: Mutex::new(inbound_rx),
            writer_handle: Mutex::new(None),
            reader_handle: Mutex::new(None),
            pending_header: Mutex::new(Some(BytesMut::from(&b"HEADER"[..]))),
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// `send` prepends the deferred VLESS header exactly once: the first
    /// call consumes `pending_header`, every later call sees it already gone.
    #[tokio::test]
    async fn pending_header_is_consumed_exactly_once_across_sends() {
        let tunnel = idle_tunnel();
        assert!(tunnel.pending_header.lock().await.is_some());

        // No outbound_tx installed, so `send` fails after taking the header —
        // that's fine, we only care about pending_header's own transition.
        let _ = tunnel.send(b"first").await;
        assert!(tunnel.pending_header.lock().await.is_none());

        let _ = tunnel.send(b"second").await;
        assert!(tunnel.pending_header.lock().await.is_none());
    }
}
