use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

// =============================================================================
// File config (figment-deserialized from defaults / signal.toml / env vars)
// =============================================================================
//
//   signal.toml:     [server]
//                    port = 9000
//
//   env var:         SIGNAL_SERVER__PORT=9000   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Per-connection and coordinator tuning (lives under `[connection]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    /// Queued outbound messages per connection before deliveries are dropped
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Pending commands the coordinator accepts before callers wait
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    #[serde(default = "default_max_frame_kb")]
    pub max_frame_kb: usize,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
            command_capacity: default_command_capacity(),
            max_frame_kb: default_max_frame_kb(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_outbox_capacity() -> usize {
    64
}
fn default_command_capacity() -> usize {
    256
}
fn default_max_frame_kb() -> usize {
    64
}

/// Build a figment that layers: defaults → config file (if given) → SIGNAL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SIGNAL_SERVER__HOST=0.0.0.0`  →  `server.host = "0.0.0.0"`
///   `SIGNAL_CONNECTION__OUTBOX_CAPACITY=128`  →  `connection.outbox_capacity = 128`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("SIGNAL_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connection: ConnectionConfig,
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub outbox_capacity: usize,
    pub command_capacity: usize,
    /// Largest inbound WebSocket message accepted, in bytes
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            connection: ConnectionConfig {
                outbox_capacity: fc.connection.outbox_capacity.max(1),
                command_capacity: fc.connection.command_capacity.max(1),
                max_frame_bytes: fc.connection.max_frame_kb.saturating_mul(1024),
            },
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.server.port, 8000);
        assert_eq!(fc.connection.outbox_capacity, 64);
        assert_eq!(fc.connection.command_capacity, 256);
        assert_eq!(fc.connection.max_frame_kb, 64);
    }

    #[test]
    fn test_server_config_from_file() {
        let fc = FileConfig {
            server: ServerFileConfig {
                host: "0.0.0.0".to_string(),
                port: 9443,
            },
            connection: ConnectionFileConfig {
                outbox_capacity: 0,
                command_capacity: 32,
                max_frame_kb: 16,
            },
        };
        let sc = ServerConfig::from_file(&fc);
        assert_eq!(sc.bind_addr().unwrap(), "0.0.0.0:9443".parse().unwrap());
        // Zero-capacity channels are not allowed by tokio
        assert_eq!(sc.connection.outbox_capacity, 1);
        assert_eq!(sc.connection.command_capacity, 32);
        assert_eq!(sc.connection.max_frame_bytes, 16 * 1024);
    }

    #[test]
    fn test_huge_frame_limit_saturates() {
        let fc = FileConfig {
            connection: ConnectionFileConfig {
                max_frame_kb: usize::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        let sc = ServerConfig::from_file(&fc);
        assert_eq!(sc.connection.max_frame_bytes, usize::MAX);
    }

    #[test]
    fn test_bind_addr_rejects_hostname() {
        let sc = ServerConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(sc.bind_addr().is_err());
    }

    #[test]
    fn test_load_config_without_file() {
        let fc: FileConfig = load_config(None).extract().unwrap();
        assert_eq!(fc.connection.outbox_capacity, 64);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("signal.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9100\n\n[connection]\noutbox_capacity = 8\n",
        )
        .unwrap();

        let fc: FileConfig = load_config(Some(&path)).extract().unwrap();
        assert_eq!(fc.server.port, 9100);
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.connection.outbox_capacity, 8);
        assert_eq!(fc.connection.max_frame_kb, 64);
    }

    #[test]
    fn test_load_config_missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(Some(&tmp.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(fc.server.port, 8000);
    }
}
