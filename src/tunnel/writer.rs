//! Dedicated WebSocket writer task.
//!
//! All outbound writes for a tunnel go through an mpsc channel to a single
//! writer task, serializing access to the sink the same way the teacher
//! serializes frame writes in `tunnel::writer::spawn_writer`. A stalled
//! write aborts the tunnel rather than hanging forever, and an idle
//! connection gets a periodic ping so the relay doesn't reap it.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Sender half — held by [`super::Tunnel`] and cloned nowhere else.
pub type OutboundSender = mpsc::Sender<Vec<u8>>;

/// A single write that doesn't complete within this long closes the tunnel.
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// How often an idle writer sends a keepalive ping.
const PING_INTERVAL: Duration = Duration::from_secs(20);

pub fn spawn_writer<S>(mut sink: S) -> (OutboundSender, JoinHandle<()>)
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);

    let handle = tokio::spawn(async move {
        let mut ping_tick = tokio::time::interval(PING_INTERVAL);
        ping_tick.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(data) = frame else { break; };
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Binary(data.into()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(error = %e, "failed to write frame to tunnel WebSocket");
                            break;
                        }
                        Err(_) => {
                            warn!(timeout_secs = WRITE_TIMEOUT.as_secs(), "tunnel write timed out, closing");
                            break;
                        }
                    }
                    ping_tick.reset();
                }
                _ = ping_tick.tick() => {
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Vec::new().into()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(error = %e, "failed to send tunnel keepalive ping");
                            break;
                        }
                        Err(_) => {
                            warn!(timeout_secs = WRITE_TIMEOUT.as_secs(), "tunnel keepalive ping timed out, closing");
                            break;
                        }
                    }
                }
            }
        }
        debug!("tunnel writer task exiting");
        let _ = sink.close().await;
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_timeout_and_ping_interval_are_fifteen_and_twenty_seconds() {
        assert_eq!(WRITE_TIMEOUT, Duration::from_secs(15));
        assert_eq!(PING_INTERVAL, Duration::from_secs(20));
    }
}
