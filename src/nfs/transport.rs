//! ONC RPC transport.
//!
//! [`RpcTransport`] is the seam between the session logic and the wire:
//! the session client hands it procedure arguments and gets back the
//! procedure results. [`TcpTransport`] speaks RPC v2 with record marking
//! and multiplexes concurrent calls over one connection by xid.

use super::protocol::{OpaqueAuth, RecordMarking, RpcCall, XdrCodec};
use crate::config::ServerConfig;
use crate::error::{Nfs4Error, Result};
use crate::resilience::with_timeout;
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A connection that carries RPC calls.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Issue one call and return the procedure result bytes.
    async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        credential: &OpaqueAuth,
        args: Vec<u8>,
    ) -> Result<Vec<u8>>;

    /// Close the connection. Outstanding calls fail.
    async fn close(&self);
}

/// Opens transports to servers named by address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn RpcTransport>>;
}

type PendingCalls = Arc<DashMap<u32, oneshot::Sender<Result<Vec<u8>>>>>;

/// RPC over a single TCP connection.
pub struct TcpTransport {
    peer: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: PendingCalls,
    closed: Arc<AtomicBool>,
    next_xid: AtomicU32,
    request_timeout: Duration,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Connect to `peer` and start routing replies.
    pub async fn connect(
        peer: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let stream = with_timeout(connect_timeout, &format!("connect to {}", peer), async {
            TcpStream::connect(peer)
                .await
                .map_err(|e| Nfs4Error::Transport(format!("connect to {}: {}", peer, e)))
        })
        .await?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let pending: PendingCalls = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(Self::read_loop(
            peer,
            read_half,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        info!(peer = %peer, "RPC connection established");

        Ok(Arc::new(Self {
            peer,
            writer: Mutex::new(Some(write_half)),
            pending,
            closed,
            next_xid: AtomicU32::new(rand::random()),
            request_timeout,
            reader: parking_lot::Mutex::new(Some(reader)),
        }))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn read_loop(
        peer: SocketAddr,
        mut reader: OwnedReadHalf,
        pending: PendingCalls,
        closed: Arc<AtomicBool>,
    ) {
        let reason = loop {
            let record = match RecordMarking::read_record(&mut reader).await {
                Ok(record) => record,
                Err(e) => break e.to_string(),
            };

            let Some(xid) = record.get(..4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]])) else {
                warn!(peer = %peer, "Discarding runt RPC record");
                continue;
            };

            match pending.remove(&xid) {
                Some((_, tx)) => {
                    let _ = tx.send(Ok(record));
                }
                None => debug!(peer = %peer, xid, "Reply for unknown xid"),
            }
        };

        debug!(peer = %peer, reason = %reason, "RPC reader stopped");
        closed.store(true, Ordering::SeqCst);
        fail_pending(&pending, &format!("connection to {} lost: {}", peer, reason));
    }
}

fn fail_pending(pending: &PendingCalls, reason: &str) {
    let xids: Vec<u32> = pending.iter().map(|entry| *entry.key()).collect();
    for xid in xids {
        if let Some((_, tx)) = pending.remove(&xid) {
            let _ = tx.send(Err(Nfs4Error::Transport(reason.to_string())));
        }
    }
}

#[async_trait]
impl RpcTransport for TcpTransport {
    async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        credential: &OpaqueAuth,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);

        let mut message = XdrCodec::new();
        message.encode_rpc_call(&RpcCall::new(xid, program, version, procedure, credential.clone()));
        message.encode_raw(&args);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(xid, tx);
        // The reader marks the connection closed before draining; checking
        // after the insert means the call is either drained or refused here.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&xid);
            return Err(Nfs4Error::Transport(format!("connection to {} is closed", self.peer)));
        }

        {
            let mut writer = self.writer.lock().await;
            let sent = match writer.as_mut() {
                Some(stream) => RecordMarking::write_record(stream, message.as_bytes()).await,
                None => Err(Nfs4Error::Transport(format!("connection to {} is closed", self.peer))),
            };
            if let Err(e) = sent {
                self.pending.remove(&xid);
                return Err(e);
            }
        }

        let peer = self.peer;
        let received = with_timeout(self.request_timeout, &format!("xid {} to {}", xid, peer), async {
            rx.await
                .map_err(|_| Nfs4Error::Transport(format!("connection to {} dropped xid {}", peer, xid)))?
        })
        .await;
        let record = match received {
            Ok(record) => record,
            Err(e) => {
                self.pending.remove(&xid);
                return Err(e);
            }
        };

        XdrCodec::from_bytes(record).decode_rpc_reply()?.into_result()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(mut stream) = self.writer.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %self.peer, error = %e, "Shutdown of RPC connection failed");
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        fail_pending(&self.pending, &format!("connection to {} closed", self.peer));
        info!(peer = %self.peer, "RPC connection closed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Opens [`TcpTransport`]s with the configured timeouts.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.connect_timeout, config.request_timeout)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn RpcTransport>> {
        let transport = TcpTransport::connect(addr, self.connect_timeout, self.request_timeout).await?;
        Ok(transport)
    }
}
