//! Logging and metrics.
//!
//! The library only emits through the `tracing` and `metrics` facades;
//! binaries decide where the output goes.

use crate::config::ObservabilityConfig;
use crate::error::{Nfs4Error, Result};
use crate::nfs::NfsStatus;
use ::tracing::info;
use metrics::{counter, histogram};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Nfs4Error::Config(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer().with_target(false))
            .try_init()
            .map_err(|e| Nfs4Error::Config(format!("Failed to init logging: {}", e)))?;
    }

    info!(level = %config.log_level, json = config.json_logs, "Logging initialized");
    Ok(())
}

/// Record a compound sent to a server.
pub fn record_compound(tag: &str) {
    counter!("nfs41_compounds_total", "tag" => tag.to_string()).increment(1);
}

/// Record a compound that ended with a non-OK status.
pub fn record_compound_error(tag: &str, status: NfsStatus) {
    counter!(
        "nfs41_compound_errors_total",
        "tag" => tag.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a retry of a transient status.
pub fn record_retry(status: NfsStatus) {
    counter!("nfs41_retries_total", "status" => status.to_string()).increment(1);
}

/// Record how long a caller waited for a session slot.
pub fn record_slot_wait(wait: Duration) {
    histogram!("nfs41_slot_wait_seconds").record(wait.as_secs_f64());
}

/// Record a lease renewal.
pub fn record_lease_renewal(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("nfs41_lease_renewals_total", "outcome" => outcome).increment(1);
}

/// Record bytes moved through a pNFS data server.
pub fn record_pnfs_io(server: SocketAddr, direction: &'static str, bytes: u64) {
    counter!(
        "nfs41_pnfs_bytes_total",
        "server" => server.to_string(),
        "direction" => direction
    )
    .increment(bytes);
}

/// Record I/O that fell back to the metadata server.
pub fn record_mds_fallback(reason: &'static str) {
    counter!("nfs41_pnfs_mds_fallbacks_total", "reason" => reason).increment(1);
}
