//! ONC RPC and XDR plumbing.
//!
//! This module handles the low-level RPC protocol for NFSv4.1,
//! including XDR encoding/decoding, RPC call/reply headers and
//! record-marked framing over a byte stream.

use crate::error::{Nfs4Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// NFS RPC program number.
pub const NFS_PROGRAM: u32 = 100003;

/// NFSv4 version number.
pub const NFS_V4: u32 = 4;

/// RPC version.
pub const RPC_VERSION: u32 = 2;

/// NULL procedure.
pub const PROC_NULL: u32 = 0;

/// COMPOUND procedure.
pub const PROC_COMPOUND: u32 = 1;

/// Largest record we are willing to assemble from fragments.
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

const LAST_FRAGMENT: u32 = 0x8000_0000;

/// RPC message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RpcMsgType {
    /// Call message.
    Call = 0,
    /// Reply message.
    Reply = 1,
}

/// RPC reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RpcReplyStatus {
    /// Message accepted.
    Accepted = 0,
    /// Message denied.
    Denied = 1,
}

/// RPC accept status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RpcAcceptStatus {
    /// Success.
    Success = 0,
    /// Program unavailable.
    ProgUnavail = 1,
    /// Program version mismatch.
    ProgMismatch = 2,
    /// Procedure unavailable.
    ProcUnavail = 3,
    /// Garbage arguments.
    GarbageArgs = 4,
    /// System error.
    SystemErr = 5,
}

impl RpcAcceptStatus {
    fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(Self::Success),
            1 => Some(Self::ProgUnavail),
            2 => Some(Self::ProgMismatch),
            3 => Some(Self::ProcUnavail),
            4 => Some(Self::GarbageArgs),
            5 => Some(Self::SystemErr),
            _ => None,
        }
    }
}

/// RPC authentication flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AuthFlavor {
    /// No authentication.
    None = 0,
    /// Unix/System authentication.
    Unix = 1,
}

/// RPC credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueAuth {
    /// Authentication flavor.
    pub flavor: u32,
    /// Authentication body.
    pub body: Vec<u8>,
}

impl OpaqueAuth {
    /// Create null authentication.
    pub fn null() -> Self {
        Self {
            flavor: AuthFlavor::None as u32,
            body: Vec::new(),
        }
    }

    /// Create AUTH_SYS credentials stamped with the current time.
    pub fn unix(uid: u32, gid: u32, gids: &[u32], machine_name: &str) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let mut body = XdrCodec::new();
        body.encode_u32(stamp);
        body.encode_string(machine_name);
        body.encode_u32(uid);
        body.encode_u32(gid);
        // RFC 5531 caps the supplementary list at 16 entries.
        body.encode_u32_array(&gids[..gids.len().min(16)]);

        Self {
            flavor: AuthFlavor::Unix as u32,
            body: body.into_bytes(),
        }
    }
}

/// RPC call header.
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// Transaction ID.
    pub xid: u32,
    /// RPC version (should be 2).
    pub rpc_vers: u32,
    /// Program number.
    pub prog: u32,
    /// Program version.
    pub vers: u32,
    /// Procedure number.
    pub proc_num: u32,
    /// Credentials.
    pub cred: OpaqueAuth,
    /// Verifier.
    pub verf: OpaqueAuth,
}

impl RpcCall {
    /// Create a call header for the given program triple.
    pub fn new(xid: u32, prog: u32, vers: u32, proc_num: u32, cred: OpaqueAuth) -> Self {
        Self {
            xid,
            rpc_vers: RPC_VERSION,
            prog,
            vers,
            proc_num,
            cred,
            verf: OpaqueAuth::null(),
        }
    }
}

/// RPC reply message.
#[derive(Debug, Clone)]
pub struct RpcReply {
    /// Transaction ID.
    pub xid: u32,
    /// Reply status.
    pub reply_status: RpcReplyStatus,
    /// Accept status (if accepted).
    pub accept_status: Option<RpcAcceptStatus>,
    /// Verifier (if accepted).
    pub verf: Option<OpaqueAuth>,
    /// Reply data.
    pub data: Vec<u8>,
}

impl RpcReply {
    /// Create a successful reply.
    pub fn success(xid: u32, data: Vec<u8>) -> Self {
        Self {
            xid,
            reply_status: RpcReplyStatus::Accepted,
            accept_status: Some(RpcAcceptStatus::Success),
            verf: Some(OpaqueAuth::null()),
            data,
        }
    }

    /// Create an error reply.
    pub fn error(xid: u32, status: RpcAcceptStatus) -> Self {
        Self {
            xid,
            reply_status: RpcReplyStatus::Accepted,
            accept_status: Some(status),
            verf: Some(OpaqueAuth::null()),
            data: Vec::new(),
        }
    }

    /// Turn an accepted, successful reply into its payload.
    pub fn into_result(self) -> Result<Vec<u8>> {
        match (self.reply_status, self.accept_status) {
            (RpcReplyStatus::Accepted, Some(RpcAcceptStatus::Success)) => Ok(self.data),
            (RpcReplyStatus::Accepted, status) => Err(Nfs4Error::Transport(format!(
                "RPC xid {} not executed: {:?}",
                self.xid, status
            ))),
            (RpcReplyStatus::Denied, _) => Err(Nfs4Error::Transport(format!(
                "RPC xid {} denied by server",
                self.xid
            ))),
        }
    }
}

/// XDR codec for encoding/decoding NFS data.
#[derive(Debug)]
pub struct XdrCodec {
    /// Internal buffer.
    buffer: Vec<u8>,
    /// Current position for reading.
    position: usize,
}

impl XdrCodec {
    /// Create a new empty codec.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            position: 0,
        }
    }

    /// Create a codec from existing data.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            buffer: data,
            position: 0,
        }
    }

    /// Get the encoded data.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    // === Encoding methods ===

    /// Encode a u32.
    pub fn encode_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Encode a u64.
    pub fn encode_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Encode an i64.
    pub fn encode_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Encode a bool.
    pub fn encode_bool(&mut self, value: bool) {
        self.encode_u32(u32::from(value));
    }

    /// Encode opaque data (fixed length).
    pub fn encode_opaque_fixed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        let pad = (4 - (data.len() % 4)) % 4;
        self.buffer.extend_from_slice(&[0u8; 3][..pad]);
    }

    /// Encode opaque data (variable length).
    pub fn encode_opaque(&mut self, data: &[u8]) {
        self.encode_u32(data.len() as u32);
        self.encode_opaque_fixed(data);
    }

    /// Encode a string.
    pub fn encode_string(&mut self, s: &str) {
        self.encode_opaque(s.as_bytes());
    }

    /// Encode an array of u32.
    pub fn encode_u32_array(&mut self, values: &[u32]) {
        self.encode_u32(values.len() as u32);
        for v in values {
            self.encode_u32(*v);
        }
    }

    /// Append already-encoded XDR.
    pub fn encode_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    // === Decoding methods ===

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                Nfs4Error::xdr(format!(
                    "need {} bytes at offset {}, have {}",
                    len,
                    self.position,
                    self.remaining()
                ))
            })?;
        let start = self.position;
        self.position = end;
        Ok(&self.buffer[start..end])
    }

    /// Decode a fixed-size byte array.
    pub fn decode_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let padded = (N + 3) / 4 * 4;
        let bytes = self.take(padded)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[..N]);
        Ok(out)
    }

    /// Decode a u32.
    pub fn decode_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.decode_array::<4>()?))
    }

    /// Decode a u64.
    pub fn decode_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.decode_array::<8>()?))
    }

    /// Decode an i64.
    pub fn decode_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.decode_array::<8>()?))
    }

    /// Decode a bool.
    pub fn decode_bool(&mut self) -> Result<bool> {
        match self.decode_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Nfs4Error::xdr(format!("invalid bool {}", other))),
        }
    }

    /// Decode opaque data (fixed length).
    pub fn decode_opaque_fixed(&mut self, len: usize) -> Result<Vec<u8>> {
        let padded_len = len
            .checked_add(3)
            .map(|l| l / 4 * 4)
            .ok_or_else(|| Nfs4Error::xdr("opaque length overflow"))?;
        let bytes = self.take(padded_len)?;
        Ok(bytes[..len].to_vec())
    }

    /// Decode opaque data (variable length).
    pub fn decode_opaque(&mut self) -> Result<Vec<u8>> {
        let len = self.decode_u32()? as usize;
        if len > self.remaining() {
            return Err(Nfs4Error::xdr(format!(
                "opaque of {} bytes exceeds remaining {}",
                len,
                self.remaining()
            )));
        }
        self.decode_opaque_fixed(len)
    }

    /// Decode a string.
    pub fn decode_string(&mut self) -> Result<String> {
        let bytes = self.decode_opaque()?;
        String::from_utf8(bytes).map_err(|e| Nfs4Error::xdr(format!("invalid utf-8: {}", e)))
    }

    /// Decode an array length, refusing counts the buffer cannot hold.
    pub fn decode_count(&mut self, min_item_size: usize) -> Result<usize> {
        let count = self.decode_u32()? as usize;
        if count.saturating_mul(min_item_size.max(1)) > self.remaining() {
            return Err(Nfs4Error::xdr(format!("array count {} too large", count)));
        }
        Ok(count)
    }

    /// Decode an array of u32.
    pub fn decode_u32_array(&mut self) -> Result<Vec<u32>> {
        let count = self.decode_count(4)?;
        (0..count).map(|_| self.decode_u32()).collect()
    }

    /// Consume everything left in the buffer.
    pub fn decode_rest(&mut self) -> Vec<u8> {
        let rest = self.buffer[self.position..].to_vec();
        self.position = self.buffer.len();
        rest
    }

    /// Decode OpaqueAuth.
    pub fn decode_opaque_auth(&mut self) -> Result<OpaqueAuth> {
        let flavor = self.decode_u32()?;
        let body = self.decode_opaque()?;
        Ok(OpaqueAuth { flavor, body })
    }

    /// Encode OpaqueAuth.
    pub fn encode_opaque_auth(&mut self, auth: &OpaqueAuth) {
        self.encode_u32(auth.flavor);
        self.encode_opaque(&auth.body);
    }

    // === RPC headers ===

    /// Encode an RPC call header; procedure arguments follow.
    pub fn encode_rpc_call(&mut self, call: &RpcCall) {
        self.encode_u32(call.xid);
        self.encode_u32(RpcMsgType::Call as u32);
        self.encode_u32(call.rpc_vers);
        self.encode_u32(call.prog);
        self.encode_u32(call.vers);
        self.encode_u32(call.proc_num);
        self.encode_opaque_auth(&call.cred);
        self.encode_opaque_auth(&call.verf);
    }

    /// Decode an RPC call header.
    pub fn decode_rpc_call(&mut self) -> Result<RpcCall> {
        let xid = self.decode_u32()?;
        let msg_type = self.decode_u32()?;
        if msg_type != RpcMsgType::Call as u32 {
            return Err(Nfs4Error::xdr("expected RPC call message"));
        }

        let rpc_vers = self.decode_u32()?;
        let prog = self.decode_u32()?;
        let vers = self.decode_u32()?;
        let proc_num = self.decode_u32()?;
        let cred = self.decode_opaque_auth()?;
        let verf = self.decode_opaque_auth()?;

        Ok(RpcCall {
            xid,
            rpc_vers,
            prog,
            vers,
            proc_num,
            cred,
            verf,
        })
    }

    /// Encode an RPC reply.
    pub fn encode_rpc_reply(&mut self, reply: &RpcReply) {
        self.encode_u32(reply.xid);
        self.encode_u32(RpcMsgType::Reply as u32);
        self.encode_u32(reply.reply_status as u32);

        if reply.reply_status == RpcReplyStatus::Accepted {
            if let Some(ref verf) = reply.verf {
                self.encode_opaque_auth(verf);
            }
            if let Some(status) = reply.accept_status {
                self.encode_u32(status as u32);
            }
            self.buffer.extend_from_slice(&reply.data);
        }
    }

    /// Decode an RPC reply; the rest of the buffer becomes its payload.
    pub fn decode_rpc_reply(&mut self) -> Result<RpcReply> {
        let xid = self.decode_u32()?;
        if self.decode_u32()? != RpcMsgType::Reply as u32 {
            return Err(Nfs4Error::xdr("expected RPC reply message"));
        }

        match self.decode_u32()? {
            0 => {
                let verf = self.decode_opaque_auth()?;
                let accept = self.decode_u32()?;
                let accept_status = RpcAcceptStatus::from_u32(accept)
                    .ok_or_else(|| Nfs4Error::xdr(format!("unknown accept status {}", accept)))?;
                Ok(RpcReply {
                    xid,
                    reply_status: RpcReplyStatus::Accepted,
                    accept_status: Some(accept_status),
                    verf: Some(verf),
                    data: self.decode_rest(),
                })
            }
            1 => Ok(RpcReply {
                xid,
                reply_status: RpcReplyStatus::Denied,
                accept_status: None,
                verf: None,
                data: self.decode_rest(),
            }),
            other => Err(Nfs4Error::xdr(format!("unknown reply status {}", other))),
        }
    }
}

impl Default for XdrCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Record marking (RFC 5531 section 11) over an async byte stream.
pub struct RecordMarking;

impl RecordMarking {
    /// Read one record, joining fragments.
    pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
        let mut result = Vec::new();
        loop {
            let header = reader.read_u32().await?;
            let last_fragment = header & LAST_FRAGMENT != 0;
            let length = (header & !LAST_FRAGMENT) as usize;

            if result.len() + length > MAX_RECORD_SIZE {
                return Err(Nfs4Error::Transport(format!(
                    "record exceeds {} bytes",
                    MAX_RECORD_SIZE
                )));
            }

            let start = result.len();
            result.resize(start + length, 0);
            reader.read_exact(&mut result[start..]).await?;

            if last_fragment {
                break;
            }
        }
        Ok(result)
    }

    /// Write a record as a single last fragment.
    pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
        let header = LAST_FRAGMENT | (data.len() as u32);
        writer.write_all(&header.to_be_bytes()).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}
