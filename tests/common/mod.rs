//! Common test utilities for integration tests.

pub mod fixtures;
pub mod mock_server;

use async_trait::async_trait;
use nfs41_client::error::{Nfs4Error, Result};
use nfs41_client::nfs::{Connector, RpcTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// Re-export common types
pub use fixtures::*;
pub use mock_server::*;

/// Connector over registered mock servers that counts connection attempts.
///
/// Unregistered addresses refuse the connection.
pub struct MockConnector {
    servers: Mutex<HashMap<SocketAddr, Arc<MockServer>>>,
    attempts: Mutex<HashMap<SocketAddr, usize>>,
    delay: Duration,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Each connection attempt takes `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            servers: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            delay,
        })
    }

    pub fn register(&self, addr: SocketAddr, server: Arc<MockServer>) {
        self.servers.lock().insert(addr, server);
    }

    pub fn attempts(&self, addr: SocketAddr) -> usize {
        self.attempts.lock().get(&addr).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().values().sum()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn RpcTransport>> {
        *self.attempts.lock().entry(addr).or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let server = self.servers.lock().get(&addr).cloned();
        match server {
            Some(server) => Ok(MockConnection::new(server)),
            None => Err(Nfs4Error::Transport(format!("connect to {}: connection refused", addr))),
        }
    }
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("nfs41_client=debug")
        .try_init();
}
