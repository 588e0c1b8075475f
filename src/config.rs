//! Server configuration persisted as JSON.
//!
//! The file is optional. Anything missing or unreadable falls back to
//! defaults, and the normalized result is written back so operators can
//! see and edit the effective settings.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default location of the configuration file, relative to the host's
/// working directory.
pub const CONFIG_PATH: &str = "dfhack-config/remote-server.json";

/// Port used when neither the file nor the environment names one.
pub const DEFAULT_PORT: u16 = 5000;

/// Environment variable overriding [`DEFAULT_PORT`].
pub const PORT_ENV: &str = "DFHACK_PORT";

/// Parse a port number; zero, negative and out-of-range values are rejected.
pub fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port > 0)
}

/// Port from [`PORT_ENV`] if it holds a valid port, else [`DEFAULT_PORT`].
pub fn default_port() -> u16 {
    port_from(std::env::var(PORT_ENV).ok().as_deref())
}

/// Resolve an optional override value to a port.
fn port_from(value: Option<&str>) -> u16 {
    value.and_then(parse_port).unwrap_or(DEFAULT_PORT)
}

/// What the file may contain; every field optional and loosely typed.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    allow_remote: Option<bool>,
    port: Option<i64>,
}

/// Effective server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    /// Listen on all interfaces instead of loopback only.
    pub allow_remote: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allow_remote: false,
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Read `path`, falling back to defaults for anything unusable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<RawConfig>(&text) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                    RawConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No {}, using defaults", path.display());
                RawConfig::default()
            }
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                RawConfig::default()
            }
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Self {
        let port = match raw.port {
            Some(port) => match u16::try_from(port).ok().filter(|p| *p > 0) {
                Some(port) => port,
                None => {
                    tracing::warn!("Invalid port {} in server config, using default", port);
                    default_port()
                }
            },
            None => default_port(),
        };
        Self {
            allow_remote: raw.allow_remote.unwrap_or(false),
            port,
        }
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text + "\n")?;
        Ok(())
    }

    /// Load `path` and write the normalized result back.
    ///
    /// A failed write is logged and otherwise ignored.
    pub fn load_and_sync(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let config = Self::load(path);
        if let Err(e) = config.save(path) {
            tracing::warn!("Cannot write {}: {}", path.display(), e);
        }
        config
    }

    /// Address the listener binds to.
    pub fn listen_ip(&self) -> IpAddr {
        if self.allow_remote {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("5001"), Some(5001));
        assert_eq!(parse_port(" 80 "), Some(80));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("-1"), None);
        assert_eq!(parse_port("70000"), None);
        assert_eq!(parse_port("abc"), None);
    }

    #[test]
    fn test_port_override() {
        assert_eq!(port_from(Some("6001")), 6001);
        assert_eq!(port_from(Some("0")), DEFAULT_PORT);
        assert_eq!(port_from(Some("not a port")), DEFAULT_PORT);
        assert_eq!(port_from(None), DEFAULT_PORT);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::load(dir.path().join("absent.json"));
        assert!(!config.allow_remote);
        assert_eq!(config.port, default_port());
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote-server.json");
        fs::write(&path, "{ not json").unwrap();

        let config = ServerConfig::load(&path);
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_fields_are_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote-server.json");
        fs::write(&path, r#"{"allow_remote": true, "port": 6123}"#).unwrap();

        let config = ServerConfig::load(&path);
        assert!(config.allow_remote);
        assert_eq!(config.port, 6123);
        assert_eq!(config.listen_ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_invalid_port_falls_back() {
        for port in ["0", "-5", "65536"] {
            let raw: RawConfig =
                serde_json::from_str(&format!(r#"{{"port": {}}}"#, port)).unwrap();
            assert_eq!(ServerConfig::from_raw(raw).port, default_port());
        }
    }

    #[test]
    fn test_load_and_sync_writes_normalized_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dfhack-config").join("remote-server.json");

        let config = ServerConfig::load_and_sync(&path);
        assert!(path.exists());
        assert_eq!(config.listen_ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["allow_remote"], serde_json::json!(false));
        assert_eq!(written["port"], serde_json::json!(config.port));

        assert_eq!(ServerConfig::load(&path), config);
    }
}
