//! `Supervisor`: process-facing lifecycle. Grounded in the teacher's
//! `app::run`/`wait_for_shutdown` shape — own every background task, start
//! them together, stop them together, idempotently.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bypass::BypassFn;
use crate::config::TunnelConfig;
use crate::error::SupervisorError;
use crate::packet_tunnel::PacketTunnel;
use crate::stats::{Counters, StatsSink};
use crate::tun::{self, TunDevice};

/// Owns every background task the data plane needs. `start` spawns them all;
/// `stop` tears them all down. Both are idempotent on a given instance — a
/// redundant `start()` after the first is a no-op, and a second `stop()` is
/// a no-op, matching the teacher's graceful-shutdown handling in `app.rs`.
#[derive(Default)]
pub struct Supervisor {
    demux_handle: Mutex<Option<JoinHandle<()>>>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    stats_handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Supervisor {
    /// A supervisor with no background tasks running yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config`, take ownership of the TUN descriptor the host
    /// handed in, and spawn the demux, sweeper, writer and stats tasks.
    /// Fails fast on an invalid configuration or TUN setup failure before
    /// any packet I/O begins. A redundant call on an already-started
    /// instance is ignored rather than spawning a second set of tasks.
    pub async fn start(
        &self,
        config: TunnelConfig,
        tun_fd: RawFd,
        bypass: BypassFn,
        stats_sink: StatsSink,
    ) -> Result<(), SupervisorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            info!("supervisor already started, ignoring redundant start");
            return Ok(());
        }

        config.validate()?;

        let tun = Arc::new(TunDevice::from_raw_fd(tun_fd).map_err(SupervisorError::TunSetup)?);
        let (tun_writer, writer_handle) = tun::spawn_writer(Arc::clone(&tun));

        let stats = Arc::new(Counters::new());
        let config = Arc::new(config);
        let packet_tunnel = Arc::new(PacketTunnel::new(Arc::clone(&config), bypass, Arc::clone(&stats)));

        let demux_handle = {
            let packet_tunnel = Arc::clone(&packet_tunnel);
            let tun = Arc::clone(&tun);
            let tun_writer = tun_writer.clone();
            tokio::spawn(async move { packet_tunnel.run(tun, tun_writer).await })
        };

        let sweeper_handle = {
            let packet_tunnel = Arc::clone(&packet_tunnel);
            tokio::spawn(async move { packet_tunnel.run_sweeper().await })
        };

        let stats_handle = tokio::spawn(stats_push_loop(Arc::clone(&stats), stats_sink));

        info!(server = %config.server, port = config.port, "supervisor started");

        *self.demux_handle.lock().await = Some(demux_handle);
        *self.sweeper_handle.lock().await = Some(sweeper_handle);
        *self.writer_handle.lock().await = Some(writer_handle);
        *self.stats_handle.lock().await = Some(stats_handle);

        Ok(())
    }

    /// Stop every background task. Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(h) = self.demux_handle.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.sweeper_handle.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.stats_handle.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.writer_handle.lock().await.take() {
            h.abort();
        }

        info!("supervisor stopped");
    }
}

async fn stats_push_loop(counters: Arc<Counters>, sink: StatsSink) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let (bytes_in, bytes_out) = counters.snapshot();
        sink(bytes_in, bytes_out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_consecutive_stops_leave_the_supervisor_stopped() {
        let supervisor = Supervisor::new();
        assert!(!supervisor.stopped.load(Ordering::Acquire));

        supervisor.stop().await;
        assert!(supervisor.stopped.load(Ordering::Acquire));

        supervisor.stop().await;
        assert!(supervisor.stopped.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn stopping_before_starting_never_panics() {
        let supervisor = Supervisor::new();
        supervisor.stop().await;
        supervisor.stop().await;
    }
}
