//! Demo harness: open a Linux TUN device, resolve a
//! [`vless_tun_core::TunnelConfig`] from CLI/env/TOML the way the teacher's
//! `main.rs` layers `Config`/`ConfigFile`, start the [`vless_tun_core::Supervisor`],
//! and wait for Ctrl-C/SIGTERM before stopping it. Real hosts (mobile VPN
//! APIs) hand in an already-open TUN fd and never touch this file.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vless_tun_core::config::{CliConfig, ConfigFile};
use vless_tun_core::{BypassFn, Supervisor};

const DEFAULT_CONFIG: &str = "vlesstund.toml";

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Open `/dev/net/tun` and attach it to `name` in TUN (no-PI) mode.
fn open_tun(name: &str) -> std::io::Result<RawFd> {
    const IFF_TUN: i16 = 0x0001;
    const IFF_NO_PI: i16 = 0x1000;
    const TUNSETIFF: libc::c_ulong = 0x400454ca;

    #[repr(C)]
    struct IfReq {
        name: [u8; 16],
        flags: i16,
        _pad: [u8; 22],
    }

    let path = std::ffi::CString::new("/dev/net/tun").unwrap();
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut req = IfReq {
        name: [0u8; 16],
        flags: IFF_TUN | IFF_NO_PI,
        _pad: [0u8; 22],
    };
    let name_bytes = name.as_bytes();
    let copy_len = name_bytes.len().min(15);
    req.name[..copy_len].copy_from_slice(&name_bytes[..copy_len]);

    let rc = unsafe { libc::ioctl(fd, TUNSETIFF as _, &mut req) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(fd)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let config_path = std::env::var("VLESSTUND_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let config_path = PathBuf::from(config_path);
    if config_path.exists() {
        ConfigFile::load(&config_path)?.inject_env();
    }

    let cli = CliConfig::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let tun_name = cli.tun_name.clone();
    let tunnel_config = cli.into_tunnel_config()?;

    let tun_fd = open_tun(&tun_name)?;
    tracing::info!(tun_name, "TUN device opened");

    let bypass: BypassFn = std::sync::Arc::new(|sock_ref: &socket2::SockRef<'_>| {
        // Real hosts mark sockets here (e.g. Android's VpnService.protect());
        // the demo binary relies on routing table exclusions instead.
        let _ = sock_ref;
        true
    });
    let stats_sink = std::sync::Arc::new(|bytes_in: u64, bytes_out: u64| {
        tracing::info!(bytes_in, bytes_out, "traffic stats");
    });

    let supervisor = Supervisor::new();
    supervisor.start(tunnel_config, tun_fd, bypass, stats_sink).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl-C, shutting down");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    supervisor.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
