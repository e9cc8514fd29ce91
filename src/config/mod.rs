//! Configuration for the NFSv4.1 client.

use crate::error::{Nfs4Error, Result};
use crate::nfs::ChannelAttrs4;
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to mount.
    pub server: ServerConfig,
    /// AUTH_SYS credential and client owner.
    pub identity: IdentityConfig,
    /// Session negotiation.
    pub session: SessionConfig,
    /// Retries of transient server statuses.
    pub retry: RetryConfig,
    /// Parallel NFS.
    pub pnfs: PnfsConfig,
    /// Logging.
    pub observability: ObservabilityConfig,
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Nfs4Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Nfs4Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Default configuration pointed at `address`.
    pub fn for_server(address: SocketAddr) -> Self {
        Self {
            server: ServerConfig {
                address,
                ..ServerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.server.export.starts_with('/') {
            return Err(invalid("server.export", "Export path must be absolute"));
        }

        if self.server.request_timeout.is_zero() {
            return Err(invalid("server.request_timeout", "Request timeout must be non-zero"));
        }

        if self.identity.gids.len() > 16 {
            return Err(invalid("identity.gids", "AUTH_SYS carries at most 16 groups"));
        }

        if self.identity.machine_name.len() > 255 {
            return Err(invalid("identity.machine_name", "Machine name exceeds 255 bytes"));
        }

        if self.session.fore_channel.max_requests == 0 {
            return Err(invalid(
                "session.fore_channel.max_requests",
                "At least one slot is required",
            ));
        }

        // SEQUENCE plus at least one real operation.
        if self.session.fore_channel.max_operations < 2 {
            return Err(invalid(
                "session.fore_channel.max_operations",
                "Compounds need room for SEQUENCE and one operation",
            ));
        }

        if self.session.lease_fallback.is_zero() {
            return Err(invalid("session.lease_fallback", "Lease interval must be non-zero"));
        }

        if self.retry.max_attempts == Some(0) {
            return Err(invalid("retry.max_attempts", "At least one attempt is required"));
        }

        if self.pnfs.io_size == 0 {
            return Err(invalid("pnfs.io_size", "I/O size must be non-zero"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> Nfs4Error {
    Nfs4Error::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server address.
    pub address: SocketAddr,
    /// Exported path to use as the mount root.
    pub export: String,
    /// TCP connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-RPC timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 2049)),
            export: "/".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Client identity: AUTH_SYS credential and EXCHANGE_ID owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups.
    pub gids: Vec<u32>,
    /// Machine name in the AUTH_SYS credential.
    pub machine_name: String,
    /// Implementation id domain sent with EXCHANGE_ID.
    pub impl_domain: String,
    /// Implementation id name sent with EXCHANGE_ID.
    pub impl_name: String,
    /// Leading part of the client owner string.
    pub owner_prefix: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            gids: Vec::new(),
            machine_name: "localhost".to_string(),
            impl_domain: "nfs41-client.rs".to_string(),
            impl_name: concat!("nfs41-client ", env!("CARGO_PKG_VERSION")).to_string(),
            owner_prefix: "nfs41-client".to_string(),
        }
    }
}

/// Channel attributes requested at CREATE_SESSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub max_request_size: u32,
    pub max_response_size: u32,
    pub max_response_size_cached: u32,
    pub max_operations: u32,
    /// Slot table size.
    pub max_requests: u32,
}

impl ChannelConfig {
    /// Defaults for the fore channel: 1 MiB payloads plus header room.
    pub fn fore() -> Self {
        Self {
            max_request_size: 1024 * 1024 + 1024,
            max_response_size: 1024 * 1024 + 1024,
            max_response_size_cached: 8192,
            max_operations: 16,
            max_requests: 16,
        }
    }

    /// Defaults for the back channel, which this client never serves.
    pub fn back() -> Self {
        Self {
            max_request_size: 4096,
            max_response_size: 4096,
            max_response_size_cached: 0,
            max_operations: 2,
            max_requests: 1,
        }
    }

    pub fn to_attrs(&self) -> ChannelAttrs4 {
        ChannelAttrs4 {
            header_pad_size: 0,
            max_request_size: self.max_request_size,
            max_response_size: self.max_response_size,
            max_response_size_cached: self.max_response_size_cached,
            max_operations: self.max_operations,
            max_requests: self.max_requests,
            rdma_ird: None,
        }
    }
}

/// Session negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub fore_channel: ChannelConfig,
    pub back_channel: ChannelConfig,
    /// Lease interval when the server does not report one.
    #[serde(with = "humantime_serde")]
    pub lease_fallback: Duration,
    /// Callback program number announced at CREATE_SESSION.
    pub cb_program: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fore_channel: ChannelConfig::fore(),
            back_channel: ChannelConfig::back(),
            lease_fallback: Duration::from_secs(90),
            cb_program: 0x4000_0000,
        }
    }
}

/// Parallel NFS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PnfsConfig {
    /// Use layouts when the server offers them.
    pub enabled: bool,
    /// Largest READ/WRITE sent in one compound.
    pub io_size: u32,
    /// LAYOUTGET reply size limit.
    pub layout_maxcount: u32,
    /// LAYOUTGET minimum length.
    pub layout_min_length: u64,
}

impl Default for PnfsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            io_size: 1024 * 1024,
            layout_maxcount: 4096,
            layout_min_length: 0xff,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse = |digits: &str| {
            digits
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{}': {}", s, e))
        };
        if let Some(ms) = s.strip_suffix("ms") {
            parse(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(m) = s.strip_suffix('m') {
            parse(m).map(|v| Duration::from_secs(v * 60))
        } else {
            parse(s).map(Duration::from_millis)
        }
    }
}
