use facegrab_store::config::parse_var;
use facegrab_store::{Config, ConfigError};
use std::net::SocketAddr;

const DEFAULT_LISTEN_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8000);
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Daemon configuration, loaded from `FACEGRAB_*` environment variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Storage, model and matching settings shared with the CLI.
    pub store: Config,
    /// HTTP bind address (default: 127.0.0.1:8000).
    pub listen_addr: SocketAddr,
    /// Maximum request body size in bytes.
    pub max_upload_bytes: usize,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store = Config::from_lookup(&lookup)?;
        let listen_addr = parse_var::<SocketAddr>(&lookup, "FACEGRAB_LISTEN_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(DEFAULT_LISTEN_ADDR));
        let max_upload_bytes =
            parse_var(&lookup, "FACEGRAB_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        if max_upload_bytes == 0 {
            return Err(ConfigError::invalid(
                "FACEGRAB_MAX_UPLOAD_BYTES",
                0,
                "must be positive",
            ));
        }

        Ok(Self {
            store,
            listen_addr,
            max_upload_bytes,
        })
    }
}
