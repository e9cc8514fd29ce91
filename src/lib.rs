//! nfs41-client - An NFSv4.1 client engine with pNFS file layout support.
//!
//! The crate speaks NFSv4.1 over ONC RPC: it establishes a session with a
//! server, dispatches compounds under the session's slot-based flow control,
//! keeps the lease alive, and reads and writes striped files directly on
//! pNFS data servers.
//!
//! # Features
//!
//! - **Sessions**: EXCHANGE_ID, CREATE_SESSION and slot sequencing with reply caching.
//! - **Compounds**: An append-only builder covering the operations the client issues.
//! - **Retry**: Transient server statuses are retried after a random pause.
//! - **pNFS**: File layouts, device resolution and data server sessions.
//! - **Attributes**: Positional decoding of the standard attribute subset.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       nfs41-client                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Mount Layer: Nfs4Client | paths | whole-file I/O           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session Layer: SessionClient | Slot Table | Lease Renewer  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pNFS Layer: Layouts | Device Cache | Data Server Sessions  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Wire Layer: XDR Codec | Attributes | RPC over TCP          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use nfs41_client::{ClientConfig, Nfs4Client};
//!
//! #[tokio::main]
//! async fn main() -> nfs41_client::Result<()> {
//!     let config = ClientConfig::for_server("192.0.2.10:2049".parse().unwrap());
//!     let client = Nfs4Client::mount(config).await?;
//!
//!     for entry in client.readdir("/").await? {
//!         println!("{}", entry.name);
//!     }
//!
//!     client.unmount().await
//! }
//! ```

pub mod config;
pub mod error;

pub mod nfs;
pub mod resilience;

pub mod cli;
pub mod client;
pub mod observability;

// Re-exports
pub use client::{DirectoryEntry, Nfs4Client, OpenFile};
pub use config::ClientConfig;
pub use error::{Nfs4Error, Result};
