//! NFSv4.1 protocol engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Protocol Engine                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Dispatch: Compound Builder │ Session Client │ Retry Policy     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Session: Slot Table │ Sequencing │ Lease Renewer               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  pNFS: Layouts │ Device Cache │ Data Server Sessions            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Wire: XDR Codec │ Attributes │ ONC RPC over TCP                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! ## Sessions
//! - EXCHANGE_ID / CREATE_SESSION / DESTROY_SESSION / DESTROY_CLIENTID
//! - Slot table bounding in-flight compounds, SEQUENCE stamped per call
//! - Lease renewal while idle
//!
//! ## pNFS file layouts
//! - LAYOUTGET, GETDEVICEINFO, LAYOUTCOMMIT, LAYOUTRETURN
//! - Dense and sparse striping
//! - Data server sessions created on first use and shared
//!
//! # Example
//!
//! ```rust,ignore
//! use nfs41_client::nfs::{ClientRole, CompoundBuilder, SessionClient, TcpConnector};
//!
//! let transport = TcpConnector::from_config(&config.server).connect(addr).await?;
//! let client = SessionClient::new(transport, config, ClientRole::Metadata);
//! client.establish().await?;
//! client.create_session().await?;
//!
//! let request = CompoundBuilder::new().with_tag("root").with_putrootfh().with_getfh().build();
//! let response = client.dispatch(&request).await?;
//! ```

pub mod attributes;
pub mod client;
pub mod codec;
pub mod compound;
mod error;
pub mod lease;
pub mod pnfs;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use attributes::{standard_bitmap, StandardAttributes, STANDARD_ATTRIBUTES};
pub use client::{ClientRole, SessionClient};
pub use compound::{
    ChannelAttrs4, CompoundBuilder, CompoundRequest, CompoundResponse, NfsArgOp4, NfsOpNum4,
    NfsResOp4, OpResult, SequenceArgs4,
};
pub use error::NfsStatus;
pub use lease::{LeaseRenewer, Renewable};
pub use pnfs::{DataServerEntry, FileDeviceAddress, FileLayoutSegment, LayoutMap, PnfsManager, Stripe};
pub use protocol::{OpaqueAuth, XdrCodec};
pub use session::{ClientIdentity, ServerRoles, Session, SessionSlot, SessionState, SlotTable};
pub use transport::{Connector, RpcTransport, TcpConnector, TcpTransport};
pub use types::*;
