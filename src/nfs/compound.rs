//! NFSv4.1 COMPOUND requests and responses.
//!
//! COMPOUND is the only data-carrying NFSv4 procedure: an ordered list of
//! operations evaluated against a current file handle until the first
//! failure. [`CompoundBuilder`] assembles the list; [`CompoundResponse`]
//! holds the positional results.

use super::error::NfsStatus;
use super::types::*;
use crate::error::{Nfs4Error, Result};
use bytes::Bytes;

/// Minor version spoken by this client.
pub const NFS4_MINOR_VERSION: u32 = 1;

/// NFSv4.1 operation codes used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NfsOpNum4 {
    Close = 4,
    Create = 6,
    Getattr = 9,
    Getfh = 10,
    Lookup = 15,
    Open = 18,
    Putfh = 22,
    Putrootfh = 24,
    Read = 25,
    Readdir = 26,
    Remove = 28,
    Restorefh = 31,
    Savefh = 32,
    Write = 38,
    ExchangeId = 42,
    CreateSession = 43,
    DestroySession = 44,
    Getdeviceinfo = 47,
    Getdevicelist = 48,
    Layoutcommit = 49,
    Layoutget = 50,
    Layoutreturn = 51,
    Sequence = 53,
    DestroyClientId = 57,
    ReclaimComplete = 58,
    /// Illegal operation.
    Illegal = 10044,
}

impl NfsOpNum4 {
    /// Convert from u32.
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            4 => Some(Self::Close),
            6 => Some(Self::Create),
            9 => Some(Self::Getattr),
            10 => Some(Self::Getfh),
            15 => Some(Self::Lookup),
            18 => Some(Self::Open),
            22 => Some(Self::Putfh),
            24 => Some(Self::Putrootfh),
            25 => Some(Self::Read),
            26 => Some(Self::Readdir),
            28 => Some(Self::Remove),
            31 => Some(Self::Restorefh),
            32 => Some(Self::Savefh),
            38 => Some(Self::Write),
            42 => Some(Self::ExchangeId),
            43 => Some(Self::CreateSession),
            44 => Some(Self::DestroySession),
            47 => Some(Self::Getdeviceinfo),
            48 => Some(Self::Getdevicelist),
            49 => Some(Self::Layoutcommit),
            50 => Some(Self::Layoutget),
            51 => Some(Self::Layoutreturn),
            53 => Some(Self::Sequence),
            57 => Some(Self::DestroyClientId),
            58 => Some(Self::ReclaimComplete),
            10044 => Some(Self::Illegal),
            _ => None,
        }
    }
}

/// EXCHANGE_ID flag: client accepts the metadata server role.
pub const EXCHGID4_FLAG_USE_PNFS_MDS: u32 = 0x0002_0000;
/// EXCHANGE_ID flag: client accepts the data server role.
pub const EXCHGID4_FLAG_USE_PNFS_DS: u32 = 0x0004_0000;
/// EXCHANGE_ID flag: client accepts a plain NFS server.
pub const EXCHGID4_FLAG_USE_NON_PNFS: u32 = 0x0001_0000;

/// Client owner for EXCHANGE_ID. The verifier precedes the owner id on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOwner4 {
    pub verifier: Verifier4,
    pub ownerid: Vec<u8>,
}

/// Implementation identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsImplId4 {
    pub domain: String,
    pub name: String,
    pub date: NfsTime4,
}

/// Server owner from EXCHANGE_ID.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerOwner4 {
    pub minor_id: u64,
    pub major_id: Vec<u8>,
}

/// Channel attributes negotiated by CREATE_SESSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAttrs4 {
    pub header_pad_size: u32,
    pub max_request_size: u32,
    pub max_response_size: u32,
    pub max_response_size_cached: u32,
    pub max_operations: u32,
    pub max_requests: u32,
    pub rdma_ird: Option<u32>,
}

/// SEQUENCE arguments stamped onto every in-session compound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceArgs4 {
    pub session_id: SessionId4,
    pub sequence_id: u32,
    pub slot_id: u32,
    pub highest_slot_id: u32,
    pub cache_this: bool,
}

/// An operation and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfsArgOp4 {
    Close {
        seqid: u32,
        stateid: Stateid4,
    },
    Create {
        objtype: CreateType4,
        name: String,
        attrs: Attr4,
    },
    Getattr {
        attr_request: AttrBitmap,
    },
    Getfh,
    Lookup {
        name: String,
    },
    Open {
        seqid: u32,
        share_access: u32,
        share_deny: u32,
        owner: OpenOwner4,
        openhow: OpenFlag4,
        claim: OpenClaim4,
    },
    Putfh {
        fh: NfsFh4,
    },
    Putrootfh,
    Read {
        stateid: Stateid4,
        offset: u64,
        count: u32,
    },
    Readdir {
        cookie: u64,
        cookieverf: Verifier4,
        dircount: u32,
        maxcount: u32,
        attr_request: AttrBitmap,
    },
    Remove {
        target: String,
    },
    Restorefh,
    Savefh,
    Write {
        stateid: Stateid4,
        offset: u64,
        stable: StableHow4,
        data: Bytes,
    },
    ExchangeId {
        client_owner: ClientOwner4,
        flags: u32,
        impl_id: Option<NfsImplId4>,
    },
    CreateSession {
        clientid: u64,
        sequence: u32,
        flags: u32,
        fore_chan_attrs: ChannelAttrs4,
        back_chan_attrs: ChannelAttrs4,
        cb_program: u32,
    },
    DestroySession {
        session_id: SessionId4,
    },
    Getdeviceinfo {
        device_id: DeviceId4,
        layout_type: u32,
        maxcount: u32,
        notify_types: AttrBitmap,
    },
    Getdevicelist {
        layout_type: u32,
        maxdevices: u32,
        cookie: u64,
        cookieverf: Verifier4,
    },
    Layoutcommit {
        offset: u64,
        length: u64,
        reclaim: bool,
        stateid: Stateid4,
        new_offset: Option<u64>,
        time_modify: Option<NfsTime4>,
        layout_update: LayoutUpdate4,
    },
    Layoutget {
        signal_avail: bool,
        layout_type: u32,
        iomode: Layoutiomode4,
        offset: u64,
        length: u64,
        minlength: u64,
        stateid: Stateid4,
        maxcount: u32,
    },
    Layoutreturn {
        reclaim: bool,
        layout_type: u32,
        iomode: Layoutiomode4,
        layoutreturn: LayoutReturn4,
    },
    Sequence(SequenceArgs4),
    DestroyClientId {
        clientid: u64,
    },
    ReclaimComplete {
        one_fs: bool,
    },
}

impl NfsArgOp4 {
    /// Operation code of this argument.
    pub fn op_num(&self) -> NfsOpNum4 {
        match self {
            Self::Close { .. } => NfsOpNum4::Close,
            Self::Create { .. } => NfsOpNum4::Create,
            Self::Getattr { .. } => NfsOpNum4::Getattr,
            Self::Getfh => NfsOpNum4::Getfh,
            Self::Lookup { .. } => NfsOpNum4::Lookup,
            Self::Open { .. } => NfsOpNum4::Open,
            Self::Putfh { .. } => NfsOpNum4::Putfh,
            Self::Putrootfh => NfsOpNum4::Putrootfh,
            Self::Read { .. } => NfsOpNum4::Read,
            Self::Readdir { .. } => NfsOpNum4::Readdir,
            Self::Remove { .. } => NfsOpNum4::Remove,
            Self::Restorefh => NfsOpNum4::Restorefh,
            Self::Savefh => NfsOpNum4::Savefh,
            Self::Write { .. } => NfsOpNum4::Write,
            Self::ExchangeId { .. } => NfsOpNum4::ExchangeId,
            Self::CreateSession { .. } => NfsOpNum4::CreateSession,
            Self::DestroySession { .. } => NfsOpNum4::DestroySession,
            Self::Getdeviceinfo { .. } => NfsOpNum4::Getdeviceinfo,
            Self::Getdevicelist { .. } => NfsOpNum4::Getdevicelist,
            Self::Layoutcommit { .. } => NfsOpNum4::Layoutcommit,
            Self::Layoutget { .. } => NfsOpNum4::Layoutget,
            Self::Layoutreturn { .. } => NfsOpNum4::Layoutreturn,
            Self::Sequence(_) => NfsOpNum4::Sequence,
            Self::DestroyClientId { .. } => NfsOpNum4::DestroyClientId,
            Self::ReclaimComplete { .. } => NfsOpNum4::ReclaimComplete,
        }
    }
}

/// READDIR entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry4 {
    pub cookie: u64,
    pub name: String,
    pub attrs: Attr4,
}

/// OPEN result body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResult4 {
    pub stateid: Stateid4,
    pub cinfo: ChangeInfo4,
    pub rflags: u32,
    pub attrset: AttrBitmap,
    pub delegation: OpenDelegation4,
}

/// EXCHANGE_ID result body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeIdResult4 {
    pub clientid: u64,
    pub sequenceid: u32,
    pub flags: u32,
    pub server_owner: ServerOwner4,
    pub server_scope: Vec<u8>,
    pub server_impl_id: Option<NfsImplId4>,
}

/// CREATE_SESSION result body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionResult4 {
    pub session_id: SessionId4,
    pub sequence: u32,
    pub flags: u32,
    pub fore_chan_attrs: ChannelAttrs4,
    pub back_chan_attrs: ChannelAttrs4,
}

/// SEQUENCE result body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceResult4 {
    pub session_id: SessionId4,
    pub sequence_id: u32,
    pub slot_id: u32,
    pub highest_slot_id: u32,
    pub target_highest_slot_id: u32,
    pub status_flags: u32,
}

/// Operation-specific result data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// Status-only result (including every failed operation).
    None,
    Close(Stateid4),
    Create {
        cinfo: ChangeInfo4,
        attrset: AttrBitmap,
    },
    Getattr(Attr4),
    Getfh(NfsFh4),
    Open(OpenResult4),
    Read {
        eof: bool,
        data: Bytes,
    },
    Readdir {
        cookieverf: Verifier4,
        entries: Vec<DirEntry4>,
        eof: bool,
    },
    Remove(ChangeInfo4),
    Write {
        count: u32,
        committed: StableHow4,
        verifier: Verifier4,
    },
    ExchangeId(ExchangeIdResult4),
    CreateSession(CreateSessionResult4),
    Sequence(SequenceResult4),
    Getdeviceinfo {
        device_addr: DeviceAddr4,
        notification: AttrBitmap,
    },
    /// GETDEVICEINFO failed with NFS4ERR_TOOSMALL.
    GetdeviceinfoTooSmall {
        mincount: u32,
    },
    Getdevicelist {
        cookie: u64,
        cookieverf: Verifier4,
        device_ids: Vec<DeviceId4>,
        eof: bool,
    },
    Layoutcommit {
        new_size: Option<u64>,
    },
    Layoutget {
        return_on_close: bool,
        stateid: Stateid4,
        layouts: Vec<Layout4>,
    },
    /// LAYOUTGET failed with NFS4ERR_LAYOUTTRYLATER.
    LayoutgetTryLater {
        will_signal: bool,
    },
    Layoutreturn {
        stateid: Option<Stateid4>,
    },
}

/// One entry of the COMPOUND result array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsResOp4 {
    pub op: NfsOpNum4,
    pub status: NfsStatus,
    pub result: OpResult,
}

/// COMPOUND request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundRequest {
    /// Diagnostic tag echoed by the server.
    pub tag: String,
    /// Minor version (1 for NFSv4.1).
    pub minorversion: u32,
    /// Operations to perform.
    pub operations: Vec<NfsArgOp4>,
}

impl CompoundRequest {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            minorversion: NFS4_MINOR_VERSION,
            operations: Vec::new(),
        }
    }

    /// SEQUENCE arguments if the compound starts with one.
    pub fn sequence(&self) -> Option<&SequenceArgs4> {
        match self.operations.first() {
            Some(NfsArgOp4::Sequence(args)) => Some(args),
            _ => None,
        }
    }
}

/// Append-only builder for [`CompoundRequest`].
///
/// ```rust
/// use nfs41_client::nfs::{CompoundBuilder, NfsArgOp4};
///
/// let request = CompoundBuilder::new()
///     .with_tag("lookup")
///     .with_putrootfh()
///     .with_lookup_path("/exports//data/")
///     .with_getfh()
///     .build();
/// assert_eq!(request.operations.len(), 4);
/// assert_eq!(request.operations[1], NfsArgOp4::Lookup { name: "exports".into() });
/// ```
#[derive(Debug, Default)]
pub struct CompoundBuilder {
    tag: String,
    operations: Vec<NfsArgOp4>,
}

impl CompoundBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Append an arbitrary operation.
    pub fn with_op(mut self, op: NfsArgOp4) -> Self {
        self.operations.push(op);
        self
    }

    pub fn with_putfh(self, fh: &NfsFh4) -> Self {
        self.with_op(NfsArgOp4::Putfh { fh: fh.clone() })
    }

    pub fn with_putrootfh(self) -> Self {
        self.with_op(NfsArgOp4::Putrootfh)
    }

    pub fn with_lookup(self, name: impl Into<String>) -> Self {
        self.with_op(NfsArgOp4::Lookup { name: name.into() })
    }

    /// One LOOKUP per non-empty path component.
    pub fn with_lookup_path(self, path: &str) -> Self {
        path.split('/')
            .filter(|component| !component.is_empty())
            .fold(self, |builder, component| builder.with_lookup(component))
    }

    pub fn with_getfh(self) -> Self {
        self.with_op(NfsArgOp4::Getfh)
    }

    pub fn with_getattr(self, bits: &[u32]) -> Self {
        self.with_op(NfsArgOp4::Getattr {
            attr_request: AttrBitmap::from_bits(bits),
        })
    }

    pub fn with_savefh(self) -> Self {
        self.with_op(NfsArgOp4::Savefh)
    }

    pub fn with_restorefh(self) -> Self {
        self.with_op(NfsArgOp4::Restorefh)
    }

    pub fn with_readdir(
        self,
        cookie: u64,
        cookieverf: Verifier4,
        dircount: u32,
        maxcount: u32,
        attr_request: AttrBitmap,
    ) -> Self {
        self.with_op(NfsArgOp4::Readdir {
            cookie,
            cookieverf,
            dircount,
            maxcount,
            attr_request,
        })
    }

    pub fn with_open(
        self,
        share_access: u32,
        owner: OpenOwner4,
        openhow: OpenFlag4,
        name: impl Into<String>,
    ) -> Self {
        self.with_op(NfsArgOp4::Open {
            seqid: 0,
            share_access,
            share_deny: ShareDeny4::NONE,
            owner,
            openhow,
            claim: OpenClaim4::Null(name.into()),
        })
    }

    /// CLOSE; the seqid is ignored by NFSv4.1 servers and sent as zero.
    pub fn with_close(self, stateid: Stateid4) -> Self {
        self.with_op(NfsArgOp4::Close { seqid: 0, stateid })
    }

    pub fn with_mkdir(self, name: impl Into<String>, attrs: Attr4) -> Self {
        self.with_op(NfsArgOp4::Create {
            objtype: CreateType4::Directory,
            name: name.into(),
            attrs,
        })
    }

    pub fn with_remove(self, name: impl Into<String>) -> Self {
        self.with_op(NfsArgOp4::Remove {
            target: name.into(),
        })
    }

    pub fn with_read(self, stateid: Stateid4, offset: u64, count: u32) -> Self {
        self.with_op(NfsArgOp4::Read {
            stateid,
            offset,
            count,
        })
    }

    pub fn with_write(self, stateid: Stateid4, offset: u64, data: Bytes) -> Self {
        self.with_op(NfsArgOp4::Write {
            stateid,
            offset,
            stable: StableHow4::FileSync,
            data,
        })
    }

    pub fn with_exchange_id(
        self,
        client_owner: ClientOwner4,
        flags: u32,
        impl_id: Option<NfsImplId4>,
    ) -> Self {
        self.with_op(NfsArgOp4::ExchangeId {
            client_owner,
            flags,
            impl_id,
        })
    }

    pub fn with_create_session(
        self,
        clientid: u64,
        sequence: u32,
        fore_chan_attrs: ChannelAttrs4,
        back_chan_attrs: ChannelAttrs4,
        cb_program: u32,
    ) -> Self {
        self.with_op(NfsArgOp4::CreateSession {
            clientid,
            sequence,
            flags: 0,
            fore_chan_attrs,
            back_chan_attrs,
            cb_program,
        })
    }

    pub fn with_destroy_session(self, session_id: SessionId4) -> Self {
        self.with_op(NfsArgOp4::DestroySession { session_id })
    }

    pub fn with_destroy_clientid(self, clientid: u64) -> Self {
        self.with_op(NfsArgOp4::DestroyClientId { clientid })
    }

    pub fn with_reclaim_complete(self, one_fs: bool) -> Self {
        self.with_op(NfsArgOp4::ReclaimComplete { one_fs })
    }

    pub fn with_layoutget(
        self,
        iomode: Layoutiomode4,
        offset: u64,
        length: u64,
        minlength: u64,
        stateid: Stateid4,
        maxcount: u32,
    ) -> Self {
        self.with_op(NfsArgOp4::Layoutget {
            signal_avail: false,
            layout_type: Layouttype4::NfsV41Files as u32,
            iomode,
            offset,
            length,
            minlength,
            stateid,
            maxcount,
        })
    }

    /// LAYOUTRETURN of a file-scoped range.
    pub fn with_layoutreturn(self, offset: u64, length: u64, body: Vec<u8>, stateid: Stateid4) -> Self {
        self.with_op(NfsArgOp4::Layoutreturn {
            reclaim: false,
            layout_type: Layouttype4::NfsV41Files as u32,
            iomode: Layoutiomode4::Any,
            layoutreturn: LayoutReturn4::File {
                offset,
                length,
                stateid,
                body,
            },
        })
    }

    pub fn with_layoutcommit(self, offset: u64, length: u64, stateid: Stateid4, new_offset: Option<u64>) -> Self {
        self.with_op(NfsArgOp4::Layoutcommit {
            offset,
            length,
            reclaim: false,
            stateid,
            new_offset,
            time_modify: None,
            layout_update: LayoutUpdate4 {
                layout_type: Layouttype4::NfsV41Files as u32,
                body: Vec::new(),
            },
        })
    }

    pub fn with_getdeviceinfo(self, device_id: DeviceId4, maxcount: u32) -> Self {
        self.with_op(NfsArgOp4::Getdeviceinfo {
            device_id,
            layout_type: Layouttype4::NfsV41Files as u32,
            maxcount,
            notify_types: AttrBitmap::new(),
        })
    }

    pub fn with_getdevicelist(self, maxdevices: u32, cookie: u64, cookieverf: Verifier4) -> Self {
        self.with_op(NfsArgOp4::Getdevicelist {
            layout_type: Layouttype4::NfsV41Files as u32,
            maxdevices,
            cookie,
            cookieverf,
        })
    }

    /// Fix the operation array.
    pub fn build(self) -> CompoundRequest {
        CompoundRequest {
            tag: self.tag,
            minorversion: NFS4_MINOR_VERSION,
            operations: self.operations,
        }
    }
}

/// COMPOUND response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundResponse {
    /// Status of the last evaluated operation.
    pub status: NfsStatus,
    /// Tag echoed from request.
    pub tag: String,
    /// Results of each evaluated operation.
    pub results: Vec<NfsResOp4>,
}

impl CompoundResponse {
    /// Create a new successful response.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            status: NfsStatus::Ok,
            tag: tag.into(),
            results: Vec::new(),
        }
    }

    /// Add an operation result.
    pub fn add_result(&mut self, result: NfsResOp4) {
        if result.status != NfsStatus::Ok && self.status == NfsStatus::Ok {
            self.status = result.status;
        }
        self.results.push(result);
    }

    /// Operation that stopped the compound, if any.
    pub fn failed_op(&self) -> Option<NfsOpNum4> {
        self.results
            .iter()
            .find(|r| !r.status.is_success())
            .map(|r| r.op)
    }

    /// Last result produced by `op`.
    pub fn result_of(&self, op: NfsOpNum4) -> Result<&OpResult> {
        self.results
            .iter()
            .rev()
            .find(|r| r.op == op)
            .map(|r| &r.result)
            .ok_or_else(|| Nfs4Error::xdr(format!("compound '{}' has no {:?} result", self.tag, op)))
    }

    pub fn getfh(&self) -> Result<&NfsFh4> {
        match self.result_of(NfsOpNum4::Getfh)? {
            OpResult::Getfh(fh) => Ok(fh),
            other => Err(unexpected(NfsOpNum4::Getfh, other)),
        }
    }

    pub fn getattr(&self) -> Result<&Attr4> {
        match self.result_of(NfsOpNum4::Getattr)? {
            OpResult::Getattr(attrs) => Ok(attrs),
            other => Err(unexpected(NfsOpNum4::Getattr, other)),
        }
    }

    pub fn open(&self) -> Result<&OpenResult4> {
        match self.result_of(NfsOpNum4::Open)? {
            OpResult::Open(open) => Ok(open),
            other => Err(unexpected(NfsOpNum4::Open, other)),
        }
    }

    pub fn sequence(&self) -> Option<&SequenceResult4> {
        match self.results.first() {
            Some(NfsResOp4 {
                result: OpResult::Sequence(seq),
                ..
            }) => Some(seq),
            _ => None,
        }
    }
}

fn unexpected(op: NfsOpNum4, result: &OpResult) -> Nfs4Error {
    Nfs4Error::xdr(format!("unexpected {:?} result: {:?}", op, result))
}
