//! Server configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/relay-chat/server.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `server.id` (this server's nonzero generator id)
//!
//! # Relay
//! The `[relay]` table is optional; when absent the server runs standalone.
//! `relay.secret_file` names a file holding the shared secret; its contents
//! are read raw and trimmed of trailing whitespace.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/relay-chat/server.toml";

const DEFAULT_BIND: &str = "127.0.0.1:2007";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_POLL_MS: u64 = 5000;
const DEFAULT_BATCH_LIMIT: u32 = 32;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub schema_version: u32,
    pub server: CoreConfig,
    /// `None` when no `[relay]` table is present: the pump never runs.
    pub relay: Option<RelayConfig>,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// This server's generator id; every locally minted UUID carries it.
    pub id: u32,
    pub bind: String,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: String,
    /// The shared secret (file contents, not the file path).
    pub secret: Vec<u8>,
    pub poll_ms: u64,
    pub batch_limit: u32,
}

/// Error type for config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    server: Option<RawCoreConfig>,
    relay: Option<RawRelayConfig>,
}

#[derive(Debug, Deserialize)]
struct RawCoreConfig {
    id: Option<u32>,
    bind: Option<String>,
    data_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelayConfig {
    addr: Option<String>,
    secret_file: Option<String>,
    poll_ms: Option<u64>,
    batch_limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the config from the default path.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    load_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// Load and validate the config at `path`.
pub fn load_config_from(path: &Path) -> Result<ServerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let raw: RawConfig = toml::from_str(&text)?;
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<ServerConfig, ConfigError> {
    let schema_version = raw.schema_version.ok_or(ConfigError::Missing("schema_version"))?;
    if schema_version != 1 {
        return Err(ConfigError::Invalid {
            field: "schema_version",
            reason: format!("unsupported version {}", schema_version),
        });
    }

    let raw_server = raw.server.ok_or(ConfigError::Missing("server"))?;
    let id = raw_server.id.ok_or(ConfigError::Missing("server.id"))?;
    if id == 0 {
        return Err(ConfigError::Invalid {
            field: "server.id",
            reason: "generator id 0 is the NULL sentinel".to_owned(),
        });
    }
    let server = CoreConfig {
        id,
        bind: raw_server.bind.unwrap_or_else(|| DEFAULT_BIND.to_owned()),
        data_dir: PathBuf::from(
            raw_server
                .data_dir
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_owned()),
        ),
    };

    let relay = match raw.relay {
        None => None,
        Some(raw_relay) => {
            let addr = raw_relay.addr.ok_or(ConfigError::Missing("relay.addr"))?;
            let secret_file = raw_relay
                .secret_file
                .ok_or(ConfigError::Missing("relay.secret_file"))?;
            let secret = read_secret_file(Path::new(&secret_file))?;
            Some(RelayConfig {
                addr,
                secret,
                poll_ms: raw_relay.poll_ms.unwrap_or(DEFAULT_POLL_MS),
                batch_limit: raw_relay.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT),
            })
        }
    };

    Ok(ServerConfig {
        schema_version,
        server,
        relay,
    })
}

/// Read the relay secret: raw file contents, trailing whitespace trimmed.
fn read_secret_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let secret = raw[..end].to_vec();
    if secret.is_empty() {
        return Err(ConfigError::Invalid {
            field: "relay.secret_file",
            reason: "secret file is empty".to_owned(),
        });
    }
    Ok(secret)
}
