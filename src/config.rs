//! Tunnel configuration: the data model the core is constructed from, plus
//! the demo binary's CLI/env/TOML layering (grounded in the teacher's
//! `Config`/`ConfigFile` split in `config.rs`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Transport security mode for the WebSocket connection to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    None,
    Tls,
}

/// Immutable tunnel configuration. Constructed by the host environment;
/// the core never reads files or URIs to build one.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Hostname or IP of the relay.
    pub server: String,
    /// Relay port, 1..=65535.
    pub port: u16,
    /// 128-bit VLESS user identity.
    pub uuid: Uuid,
    /// Absolute WebSocket upgrade path, e.g. `/ws`.
    pub ws_path: String,
    /// `Host` header value sent with the upgrade request.
    pub ws_host: String,
    /// `none` (ws://) or `tls` (wss://).
    pub security: Security,
    /// TLS SNI; required when `security == Tls`.
    pub sni: String,
    /// When false, disable certificate verification and hostname matching.
    pub verify_tls: bool,
    /// MTU assumed for TUN reads/writes (default 1500).
    pub mtu: usize,
}

impl TunnelConfig {
    /// Validate before `Supervisor::start` performs any I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::EmptyServer);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidWsPath(self.ws_path.clone()));
        }
        if self.security == Security::Tls && self.sni.is_empty() {
            return Err(ConfigError::MissingSni);
        }
        Ok(())
    }

    /// `ws://` or `wss://` scheme for this configuration.
    pub fn ws_scheme(&self) -> &'static str {
        match self.security {
            Security::None => "ws",
            Security::Tls => "wss",
        }
    }

    /// Build the full WebSocket URL for the upgrade request.
    pub fn ws_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.ws_scheme(),
            self.server,
            self.port,
            self.ws_path
        )
    }
}

// ---------------------------------------------------------------------------
// Demo binary CLI + TOML config (not part of the library's public contract)
// ---------------------------------------------------------------------------

/// CLI/env-derived configuration for `vlesstund`, the demo binary.
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about = "Demo harness for the VLESS-over-WebSocket tunnel core")]
pub struct CliConfig {
    #[arg(long, env = "VLESSTUN_SERVER")]
    pub server: String,

    #[arg(long, env = "VLESSTUN_PORT", default_value_t = 443)]
    pub port: u16,

    #[arg(long, env = "VLESSTUN_UUID")]
    pub uuid: String,

    #[arg(long, env = "VLESSTUN_WS_PATH", default_value = "/")]
    pub ws_path: String,

    #[arg(long, env = "VLESSTUN_WS_HOST")]
    pub ws_host: Option<String>,

    #[arg(long, env = "VLESSTUN_SECURITY", default_value = "tls")]
    pub security: String,

    #[arg(long, env = "VLESSTUN_SNI")]
    pub sni: Option<String>,

    #[arg(long, env = "VLESSTUN_VERIFY_TLS", default_value_t = true)]
    pub verify_tls: bool,

    #[arg(long, env = "VLESSTUN_MTU", default_value_t = 1500)]
    pub mtu: usize,

    #[arg(long, env = "VLESSTUN_TUN_NAME", default_value = "tun0")]
    pub tun_name: String,

    #[arg(long, env = "VLESSTUN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "VLESSTUN_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl CliConfig {
    /// Resolve into the library's immutable [`TunnelConfig`].
    pub fn into_tunnel_config(self) -> Result<TunnelConfig, ConfigError> {
        let uuid = Uuid::parse_str(&self.uuid)?;
        let security = match self.security.as_str() {
            "tls" => Security::Tls,
            _ => Security::None,
        };
        let ws_host = self.ws_host.unwrap_or_else(|| self.server.clone());
        let sni = self.sni.unwrap_or_else(|| self.server.clone());
        let cfg = TunnelConfig {
            server: self.server,
            port: self.port,
            uuid,
            ws_path: self.ws_path,
            ws_host,
            security,
            sni,
            verify_tls: self.verify_tls,
            mtu: self.mtu,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Serializable on-disk form, following the teacher's `ConfigFile`: every
/// field optional so only explicitly-set values are persisted, with
/// precedence CLI > env > file handled by `inject_env`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub uuid: Option<String>,
    pub ws_path: Option<String>,
    pub ws_host: Option<String>,
    pub security: Option<String>,
    pub sni: Option<String>,
    pub verify_tls: Option<bool>,
    pub mtu: Option<usize>,
    pub tun_name: Option<String>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Inject values as environment variables so clap picks them up. Only
    /// sets variables not already present, preserving CLI > env > file.
    pub fn inject_env(&self) {
        macro_rules! set {
            ($env:expr, $val:expr) => {
                if let Some(ref v) = $val {
                    if std::env::var($env).is_err() {
                        std::env::set_var($env, v.to_string());
                    }
                }
            };
        }
        set!("VLESSTUN_SERVER", self.server);
        set!("VLESSTUN_PORT", self.port);
        set!("VLESSTUN_UUID", self.uuid);
        set!("VLESSTUN_WS_PATH", self.ws_path);
        set!("VLESSTUN_WS_HOST", self.ws_host);
        set!("VLESSTUN_SECURITY", self.security);
        set!("VLESSTUN_SNI", self.sni);
        set!("VLESSTUN_VERIFY_TLS", self.verify_tls);
        set!("VLESSTUN_MTU", self.mtu);
        set!("VLESSTUN_TUN_NAME", self.tun_name);
        set!("VLESSTUN_LOG_LEVEL", self.log_level);
        set!("VLESSTUN_LOG_JSON", self.log_json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TunnelConfig {
        TunnelConfig {
            server: "relay.example.com".into(),
            port: 443,
            uuid: Uuid::nil(),
            ws_path: "/ws".into(),
            ws_host: "relay.example.com".into(),
            security: Security::Tls,
            sni: "relay.example.com".into(),
            verify_tls: true,
            mtu: 1500,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn empty_server_rejected() {
        let mut c = base();
        c.server.clear();
        assert!(matches!(c.validate(), Err(ConfigError::EmptyServer)));
    }

    #[test]
    fn zero_port_rejected() {
        let mut c = base();
        c.port = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroPort)));
    }

    #[test]
    fn relative_ws_path_rejected() {
        let mut c = base();
        c.ws_path = "ws".into();
        assert!(matches!(c.validate(), Err(ConfigError::InvalidWsPath(_))));
    }

    #[test]
    fn tls_without_sni_rejected() {
        let mut c = base();
        c.sni.clear();
        assert!(matches!(c.validate(), Err(ConfigError::MissingSni)));
    }

    #[test]
    fn ws_url_uses_scheme_from_security() {
        let c = base();
        assert_eq!(c.ws_url(), "wss://relay.example.com:443/ws");
        let mut plain = base();
        plain.security = Security::None;
        assert_eq!(plain.ws_url(), "ws://relay.example.com:443/ws");
    }
}
