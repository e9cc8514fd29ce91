//! XDR encoding of COMPOUND arguments and results.
//!
//! The client encodes arguments and decodes results. The opposite
//! direction is kept alongside so that a server-side peer (the in-memory
//! server used by the integration tests, or a proxy) speaks exactly the
//! same wire format.

use super::compound::*;
use super::error::NfsStatus;
use super::protocol::XdrCodec;
use super::types::*;
use crate::error::{Nfs4Error, Result};
use bytes::Bytes;

const OPEN4_NOCREATE: u32 = 0;
const OPEN4_CREATE: u32 = 1;
const UNCHECKED4: u32 = 0;
const GUARDED4: u32 = 1;
const CLAIM_NULL: u32 = 0;

const OPEN_DELEGATE_NONE: u32 = 0;
const OPEN_DELEGATE_READ: u32 = 1;
const OPEN_DELEGATE_WRITE: u32 = 2;
const OPEN_DELEGATE_NONE_EXT: u32 = 3;
const NFS_LIMIT_SIZE: u32 = 1;
const NFS_LIMIT_BLOCKS: u32 = 2;
const WND4_CONTENTION: u32 = 1;
const WND4_RESOURCE: u32 = 2;

const SP4_NONE: u32 = 0;
const AUTH_NONE: u32 = 0;

const LAYOUTRETURN4_FILE: u32 = 1;
const LAYOUTRETURN4_FSID: u32 = 2;
const LAYOUTRETURN4_ALL: u32 = 3;

/// Serialize a COMPOUND request.
pub fn encode_compound_args(request: &CompoundRequest) -> Vec<u8> {
    let mut xdr = XdrCodec::new();
    xdr.encode_string(&request.tag);
    xdr.encode_u32(request.minorversion);
    xdr.encode_u32(request.operations.len() as u32);
    for op in &request.operations {
        encode_op_args(&mut xdr, op);
    }
    xdr.into_bytes()
}

/// Serialize a COMPOUND request with a SEQUENCE operation prepended.
pub fn encode_compound_args_in_session(request: &CompoundRequest, sequence: &SequenceArgs4) -> Vec<u8> {
    let mut xdr = XdrCodec::new();
    xdr.encode_string(&request.tag);
    xdr.encode_u32(request.minorversion);
    xdr.encode_u32(request.operations.len() as u32 + 1);
    encode_op_args(&mut xdr, &NfsArgOp4::Sequence(*sequence));
    for op in &request.operations {
        encode_op_args(&mut xdr, op);
    }
    xdr.into_bytes()
}

/// Parse a COMPOUND request.
pub fn decode_compound_args(data: Vec<u8>) -> Result<CompoundRequest> {
    let mut xdr = XdrCodec::from_bytes(data);
    let tag = xdr.decode_string()?;
    let minorversion = xdr.decode_u32()?;
    let count = xdr.decode_count(4)?;
    let mut operations = Vec::with_capacity(count);
    for _ in 0..count {
        operations.push(decode_op_args(&mut xdr)?);
    }
    Ok(CompoundRequest {
        tag,
        minorversion,
        operations,
    })
}

/// Serialize a COMPOUND reply.
pub fn encode_compound_res(response: &CompoundResponse) -> Vec<u8> {
    let mut xdr = XdrCodec::new();
    xdr.encode_u32(response.status.to_u32());
    xdr.encode_string(&response.tag);
    xdr.encode_u32(response.results.len() as u32);
    for res in &response.results {
        encode_op_res(&mut xdr, res);
    }
    xdr.into_bytes()
}

/// Parse a COMPOUND reply.
pub fn decode_compound_res(data: Vec<u8>) -> Result<CompoundResponse> {
    let mut xdr = XdrCodec::from_bytes(data);
    let status = decode_status(&mut xdr)?;
    let tag = xdr.decode_string()?;
    let count = xdr.decode_count(8)?;
    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        results.push(decode_op_res(&mut xdr)?);
    }
    Ok(CompoundResponse {
        status,
        tag,
        results,
    })
}

// === Shared structures ===

fn decode_status(xdr: &mut XdrCodec) -> Result<NfsStatus> {
    let code = xdr.decode_u32()?;
    NfsStatus::from_u32(code).ok_or(Nfs4Error::UnknownStatus(code))
}

fn decode_op_num(xdr: &mut XdrCodec) -> Result<NfsOpNum4> {
    let code = xdr.decode_u32()?;
    NfsOpNum4::from_u32(code).ok_or_else(|| Nfs4Error::xdr(format!("unsupported operation {}", code)))
}

pub(crate) fn encode_stateid(xdr: &mut XdrCodec, stateid: &Stateid4) {
    xdr.encode_u32(stateid.seqid);
    xdr.encode_opaque_fixed(&stateid.other);
}

pub(crate) fn decode_stateid(xdr: &mut XdrCodec) -> Result<Stateid4> {
    let seqid = xdr.decode_u32()?;
    let other = xdr.decode_array::<12>()?;
    Ok(Stateid4 { seqid, other })
}

fn encode_verifier(xdr: &mut XdrCodec, verifier: &Verifier4) {
    xdr.encode_opaque_fixed(&verifier.0);
}

fn decode_verifier(xdr: &mut XdrCodec) -> Result<Verifier4> {
    Ok(Verifier4(xdr.decode_array::<8>()?))
}

fn encode_session_id(xdr: &mut XdrCodec, session_id: &SessionId4) {
    xdr.encode_opaque_fixed(&session_id.0);
}

fn decode_session_id(xdr: &mut XdrCodec) -> Result<SessionId4> {
    Ok(SessionId4(xdr.decode_array::<NFS4_SESSIONID_SIZE>()?))
}

pub(crate) fn encode_bitmap(xdr: &mut XdrCodec, bitmap: &AttrBitmap) {
    xdr.encode_u32_array(&bitmap.0);
}

pub(crate) fn decode_bitmap(xdr: &mut XdrCodec) -> Result<AttrBitmap> {
    Ok(AttrBitmap(xdr.decode_u32_array()?))
}

fn encode_fattr4(xdr: &mut XdrCodec, attrs: &Attr4) {
    encode_bitmap(xdr, &attrs.attrmask);
    xdr.encode_opaque(&attrs.attr_vals);
}

fn decode_fattr4(xdr: &mut XdrCodec) -> Result<Attr4> {
    let attrmask = decode_bitmap(xdr)?;
    let attr_vals = xdr.decode_opaque()?;
    Ok(Attr4 {
        attrmask,
        attr_vals,
    })
}

fn encode_fh(xdr: &mut XdrCodec, fh: &NfsFh4) {
    xdr.encode_opaque(&fh.0);
}

fn decode_fh(xdr: &mut XdrCodec) -> Result<NfsFh4> {
    let fh = NfsFh4(xdr.decode_opaque()?);
    if fh.0.len() > NfsFh4::MAX_SIZE {
        return Err(Nfs4Error::xdr(format!("file handle of {} bytes", fh.0.len())));
    }
    Ok(fh)
}

pub(crate) fn encode_nfstime(xdr: &mut XdrCodec, time: &NfsTime4) {
    xdr.encode_i64(time.seconds);
    xdr.encode_u32(time.nseconds);
}

pub(crate) fn decode_nfstime(xdr: &mut XdrCodec) -> Result<NfsTime4> {
    let seconds = xdr.decode_i64()?;
    let nseconds = xdr.decode_u32()?;
    Ok(NfsTime4 { seconds, nseconds })
}

fn encode_change_info(xdr: &mut XdrCodec, cinfo: &ChangeInfo4) {
    xdr.encode_bool(cinfo.atomic);
    xdr.encode_u64(cinfo.before);
    xdr.encode_u64(cinfo.after);
}

fn decode_change_info(xdr: &mut XdrCodec) -> Result<ChangeInfo4> {
    Ok(ChangeInfo4 {
        atomic: xdr.decode_bool()?,
        before: xdr.decode_u64()?,
        after: xdr.decode_u64()?,
    })
}

fn encode_channel_attrs(xdr: &mut XdrCodec, attrs: &ChannelAttrs4) {
    xdr.encode_u32(attrs.header_pad_size);
    xdr.encode_u32(attrs.max_request_size);
    xdr.encode_u32(attrs.max_response_size);
    xdr.encode_u32(attrs.max_response_size_cached);
    xdr.encode_u32(attrs.max_operations);
    xdr.encode_u32(attrs.max_requests);
    match attrs.rdma_ird {
        Some(ird) => xdr.encode_u32_array(&[ird]),
        None => xdr.encode_u32(0),
    }
}

fn decode_channel_attrs(xdr: &mut XdrCodec) -> Result<ChannelAttrs4> {
    let header_pad_size = xdr.decode_u32()?;
    let max_request_size = xdr.decode_u32()?;
    let max_response_size = xdr.decode_u32()?;
    let max_response_size_cached = xdr.decode_u32()?;
    let max_operations = xdr.decode_u32()?;
    let max_requests = xdr.decode_u32()?;
    let rdma = xdr.decode_u32_array()?;
    if rdma.len() > 1 {
        return Err(Nfs4Error::xdr("ca_rdma_ird holds at most one value"));
    }
    Ok(ChannelAttrs4 {
        header_pad_size,
        max_request_size,
        max_response_size,
        max_response_size_cached,
        max_operations,
        max_requests,
        rdma_ird: rdma.first().copied(),
    })
}

fn encode_impl_id(xdr: &mut XdrCodec, impl_id: &Option<NfsImplId4>) {
    match impl_id {
        Some(id) => {
            xdr.encode_u32(1);
            xdr.encode_string(&id.domain);
            xdr.encode_string(&id.name);
            encode_nfstime(xdr, &id.date);
        }
        None => xdr.encode_u32(0),
    }
}

fn decode_impl_id(xdr: &mut XdrCodec) -> Result<Option<NfsImplId4>> {
    match xdr.decode_u32()? {
        0 => Ok(None),
        1 => Ok(Some(NfsImplId4 {
            domain: xdr.decode_string()?,
            name: xdr.decode_string()?,
            date: decode_nfstime(xdr)?,
        })),
        n => Err(Nfs4Error::xdr(format!("{} implementation ids", n))),
    }
}

fn encode_optional<T>(xdr: &mut XdrCodec, value: &Option<T>, encode: impl FnOnce(&mut XdrCodec, &T)) {
    match value {
        Some(v) => {
            xdr.encode_bool(true);
            encode(xdr, v);
        }
        None => xdr.encode_bool(false),
    }
}

fn decode_optional<T>(
    xdr: &mut XdrCodec,
    decode: impl FnOnce(&mut XdrCodec) -> Result<T>,
) -> Result<Option<T>> {
    if xdr.decode_bool()? {
        Ok(Some(decode(xdr)?))
    } else {
        Ok(None)
    }
}

fn decode_iomode(xdr: &mut XdrCodec) -> Result<Layoutiomode4> {
    let mode = xdr.decode_u32()?;
    Layoutiomode4::from_u32(mode).ok_or_else(|| Nfs4Error::xdr(format!("unknown iomode {}", mode)))
}

fn encode_nfsace(xdr: &mut XdrCodec, ace: &Nfsace4) {
    xdr.encode_u32(ace.ace_type);
    xdr.encode_u32(ace.flag);
    xdr.encode_u32(ace.access_mask);
    xdr.encode_string(&ace.who);
}

fn decode_nfsace(xdr: &mut XdrCodec) -> Result<Nfsace4> {
    Ok(Nfsace4 {
        ace_type: xdr.decode_u32()?,
        flag: xdr.decode_u32()?,
        access_mask: xdr.decode_u32()?,
        who: xdr.decode_string()?,
    })
}

fn encode_delegation(xdr: &mut XdrCodec, delegation: &OpenDelegation4) {
    match delegation {
        OpenDelegation4::None => xdr.encode_u32(OPEN_DELEGATE_NONE),
        OpenDelegation4::Read {
            stateid,
            recall,
            permissions,
        } => {
            xdr.encode_u32(OPEN_DELEGATE_READ);
            encode_stateid(xdr, stateid);
            xdr.encode_bool(*recall);
            encode_nfsace(xdr, permissions);
        }
        OpenDelegation4::Write {
            stateid,
            recall,
            space_limit,
            permissions,
        } => {
            xdr.encode_u32(OPEN_DELEGATE_WRITE);
            encode_stateid(xdr, stateid);
            xdr.encode_bool(*recall);
            match space_limit {
                SpaceLimit4::Size(size) => {
                    xdr.encode_u32(NFS_LIMIT_SIZE);
                    xdr.encode_u64(*size);
                }
                SpaceLimit4::Blocks {
                    num_blocks,
                    bytes_per_block,
                } => {
                    xdr.encode_u32(NFS_LIMIT_BLOCKS);
                    xdr.encode_u32(*num_blocks);
                    xdr.encode_u32(*bytes_per_block);
                }
            }
            encode_nfsace(xdr, permissions);
        }
        OpenDelegation4::NoneExt { why, will_signal } => {
            xdr.encode_u32(OPEN_DELEGATE_NONE_EXT);
            xdr.encode_u32(*why);
            if matches!(*why, WND4_CONTENTION | WND4_RESOURCE) {
                xdr.encode_bool(will_signal.unwrap_or(false));
            }
        }
    }
}

fn decode_delegation(xdr: &mut XdrCodec) -> Result<OpenDelegation4> {
    match xdr.decode_u32()? {
        OPEN_DELEGATE_NONE => Ok(OpenDelegation4::None),
        OPEN_DELEGATE_READ => Ok(OpenDelegation4::Read {
            stateid: decode_stateid(xdr)?,
            recall: xdr.decode_bool()?,
            permissions: decode_nfsace(xdr)?,
        }),
        OPEN_DELEGATE_WRITE => {
            let stateid = decode_stateid(xdr)?;
            let recall = xdr.decode_bool()?;
            let space_limit = match xdr.decode_u32()? {
                NFS_LIMIT_SIZE => SpaceLimit4::Size(xdr.decode_u64()?),
                NFS_LIMIT_BLOCKS => SpaceLimit4::Blocks {
                    num_blocks: xdr.decode_u32()?,
                    bytes_per_block: xdr.decode_u32()?,
                },
                other => return Err(Nfs4Error::xdr(format!("unknown space limit {}", other))),
            };
            Ok(OpenDelegation4::Write {
                stateid,
                recall,
                space_limit,
                permissions: decode_nfsace(xdr)?,
            })
        }
        OPEN_DELEGATE_NONE_EXT => {
            let why = xdr.decode_u32()?;
            let will_signal = if matches!(why, WND4_CONTENTION | WND4_RESOURCE) {
                Some(xdr.decode_bool()?)
            } else {
                None
            };
            Ok(OpenDelegation4::NoneExt { why, will_signal })
        }
        other => Err(Nfs4Error::xdr(format!("unknown delegation type {}", other))),
    }
}

// === Arguments ===

fn encode_op_args(xdr: &mut XdrCodec, op: &NfsArgOp4) {
    xdr.encode_u32(op.op_num() as u32);
    match op {
        NfsArgOp4::Close { seqid, stateid } => {
            xdr.encode_u32(*seqid);
            encode_stateid(xdr, stateid);
        }
        NfsArgOp4::Create {
            objtype,
            name,
            attrs,
        } => {
            match objtype {
                CreateType4::Directory => xdr.encode_u32(NfsFtype4::Dir as u32),
            }
            xdr.encode_string(name);
            encode_fattr4(xdr, attrs);
        }
        NfsArgOp4::Getattr { attr_request } => encode_bitmap(xdr, attr_request),
        NfsArgOp4::Getfh
        | NfsArgOp4::Putrootfh
        | NfsArgOp4::Restorefh
        | NfsArgOp4::Savefh => {}
        NfsArgOp4::Lookup { name } => xdr.encode_string(name),
        NfsArgOp4::Open {
            seqid,
            share_access,
            share_deny,
            owner,
            openhow,
            claim,
        } => {
            xdr.encode_u32(*seqid);
            xdr.encode_u32(*share_access);
            xdr.encode_u32(*share_deny);
            xdr.encode_u64(owner.clientid);
            xdr.encode_opaque(&owner.owner);
            match openhow {
                OpenFlag4::NoCreate => xdr.encode_u32(OPEN4_NOCREATE),
                OpenFlag4::Create(how) => {
                    xdr.encode_u32(OPEN4_CREATE);
                    match how {
                        CreateHow4::Unchecked(attrs) => {
                            xdr.encode_u32(UNCHECKED4);
                            encode_fattr4(xdr, attrs);
                        }
                        CreateHow4::Guarded(attrs) => {
                            xdr.encode_u32(GUARDED4);
                            encode_fattr4(xdr, attrs);
                        }
                    }
                }
            }
            match claim {
                OpenClaim4::Null(name) => {
                    xdr.encode_u32(CLAIM_NULL);
                    xdr.encode_string(name);
                }
            }
        }
        NfsArgOp4::Putfh { fh } => encode_fh(xdr, fh),
        NfsArgOp4::Read {
            stateid,
            offset,
            count,
        } => {
            encode_stateid(xdr, stateid);
            xdr.encode_u64(*offset);
            xdr.encode_u32(*count);
        }
        NfsArgOp4::Readdir {
            cookie,
            cookieverf,
            dircount,
            maxcount,
            attr_request,
        } => {
            xdr.encode_u64(*cookie);
            encode_verifier(xdr, cookieverf);
            xdr.encode_u32(*dircount);
            xdr.encode_u32(*maxcount);
            encode_bitmap(xdr, attr_request);
        }
        NfsArgOp4::Remove { target } => xdr.encode_string(target),
        NfsArgOp4::Write {
            stateid,
            offset,
            stable,
            data,
        } => {
            encode_stateid(xdr, stateid);
            xdr.encode_u64(*offset);
            xdr.encode_u32(*stable as u32);
            xdr.encode_opaque(data);
        }
        NfsArgOp4::ExchangeId {
            client_owner,
            flags,
            impl_id,
        } => {
            encode_verifier(xdr, &client_owner.verifier);
            xdr.encode_opaque(&client_owner.ownerid);
            xdr.encode_u32(*flags);
            xdr.encode_u32(SP4_NONE);
            encode_impl_id(xdr, impl_id);
        }
        NfsArgOp4::CreateSession {
            clientid,
            sequence,
            flags,
            fore_chan_attrs,
            back_chan_attrs,
            cb_program,
        } => {
            xdr.encode_u64(*clientid);
            xdr.encode_u32(*sequence);
            xdr.encode_u32(*flags);
            encode_channel_attrs(xdr, fore_chan_attrs);
            encode_channel_attrs(xdr, back_chan_attrs);
            xdr.encode_u32(*cb_program);
            // One AUTH_NONE callback security parameter.
            xdr.encode_u32(1);
            xdr.encode_u32(AUTH_NONE);
        }
        NfsArgOp4::DestroySession { session_id } => encode_session_id(xdr, session_id),
        NfsArgOp4::Getdeviceinfo {
            device_id,
            layout_type,
            maxcount,
            notify_types,
        } => {
            xdr.encode_opaque_fixed(device_id);
            xdr.encode_u32(*layout_type);
            xdr.encode_u32(*maxcount);
            encode_bitmap(xdr, notify_types);
        }
        NfsArgOp4::Getdevicelist {
            layout_type,
            maxdevices,
            cookie,
            cookieverf,
        } => {
            xdr.encode_u32(*layout_type);
            xdr.encode_u32(*maxdevices);
            xdr.encode_u64(*cookie);
            encode_verifier(xdr, cookieverf);
        }
        NfsArgOp4::Layoutcommit {
            offset,
            length,
            reclaim,
            stateid,
            new_offset,
            time_modify,
            layout_update,
        } => {
            xdr.encode_u64(*offset);
            xdr.encode_u64(*length);
            xdr.encode_bool(*reclaim);
            encode_stateid(xdr, stateid);
            encode_optional(xdr, new_offset, |x, v| x.encode_u64(*v));
            encode_optional(xdr, time_modify, encode_nfstime);
            xdr.encode_u32(layout_update.layout_type);
            xdr.encode_opaque(&layout_update.body);
        }
        NfsArgOp4::Layoutget {
            signal_avail,
            layout_type,
            iomode,
            offset,
            length,
            minlength,
            stateid,
            maxcount,
        } => {
            xdr.encode_bool(*signal_avail);
            xdr.encode_u32(*layout_type);
            xdr.encode_u32(*iomode as u32);
            xdr.encode_u64(*offset);
            xdr.encode_u64(*length);
            xdr.encode_u64(*minlength);
            encode_stateid(xdr, stateid);
            xdr.encode_u32(*maxcount);
        }
        NfsArgOp4::Layoutreturn {
            reclaim,
            layout_type,
            iomode,
            layoutreturn,
        } => {
            xdr.encode_bool(*reclaim);
            xdr.encode_u32(*layout_type);
            xdr.encode_u32(*iomode as u32);
            match layoutreturn {
                LayoutReturn4::File {
                    offset,
                    length,
                    stateid,
                    body,
                } => {
                    xdr.encode_u32(LAYOUTRETURN4_FILE);
                    xdr.encode_u64(*offset);
                    xdr.encode_u64(*length);
                    encode_stateid(xdr, stateid);
                    xdr.encode_opaque(body);
                }
                LayoutReturn4::Fsid => xdr.encode_u32(LAYOUTRETURN4_FSID),
                LayoutReturn4::All => xdr.encode_u32(LAYOUTRETURN4_ALL),
            }
        }
        NfsArgOp4::Sequence(args) => {
            encode_session_id(xdr, &args.session_id);
            xdr.encode_u32(args.sequence_id);
            xdr.encode_u32(args.slot_id);
            xdr.encode_u32(args.highest_slot_id);
            xdr.encode_bool(args.cache_this);
        }
        NfsArgOp4::DestroyClientId { clientid } => xdr.encode_u64(*clientid),
        NfsArgOp4::ReclaimComplete { one_fs } => xdr.encode_bool(*one_fs),
    }
}

fn decode_op_args(xdr: &mut XdrCodec) -> Result<NfsArgOp4> {
    let op = match decode_op_num(xdr)? {
        NfsOpNum4::Close => NfsArgOp4::Close {
            seqid: xdr.decode_u32()?,
            stateid: decode_stateid(xdr)?,
        },
        NfsOpNum4::Create => {
            let objtype = match xdr.decode_u32()? {
                t if t == NfsFtype4::Dir as u32 => CreateType4::Directory,
                other => return Err(Nfs4Error::xdr(format!("unsupported create type {}", other))),
            };
            NfsArgOp4::Create {
                objtype,
                name: xdr.decode_string()?,
                attrs: decode_fattr4(xdr)?,
            }
        }
        NfsOpNum4::Getattr => NfsArgOp4::Getattr {
            attr_request: decode_bitmap(xdr)?,
        },
        NfsOpNum4::Getfh => NfsArgOp4::Getfh,
        NfsOpNum4::Lookup => NfsArgOp4::Lookup {
            name: xdr.decode_string()?,
        },
        NfsOpNum4::Open => {
            let seqid = xdr.decode_u32()?;
            let share_access = xdr.decode_u32()?;
            let share_deny = xdr.decode_u32()?;
            let owner = OpenOwner4 {
                clientid: xdr.decode_u64()?,
                owner: xdr.decode_opaque()?,
            };
            let openhow = match xdr.decode_u32()? {
                OPEN4_NOCREATE => OpenFlag4::NoCreate,
                OPEN4_CREATE => match xdr.decode_u32()? {
                    UNCHECKED4 => OpenFlag4::Create(CreateHow4::Unchecked(decode_fattr4(xdr)?)),
                    GUARDED4 => OpenFlag4::Create(CreateHow4::Guarded(decode_fattr4(xdr)?)),
                    other => return Err(Nfs4Error::xdr(format!("unsupported createmode {}", other))),
                },
                other => return Err(Nfs4Error::xdr(format!("unknown opentype {}", other))),
            };
            let claim = match xdr.decode_u32()? {
                CLAIM_NULL => OpenClaim4::Null(xdr.decode_string()?),
                other => return Err(Nfs4Error::xdr(format!("unsupported open claim {}", other))),
            };
            NfsArgOp4::Open {
                seqid,
                share_access,
                share_deny,
                owner,
                openhow,
                claim,
            }
        }
        NfsOpNum4::Putfh => NfsArgOp4::Putfh { fh: decode_fh(xdr)? },
        NfsOpNum4::Putrootfh => NfsArgOp4::Putrootfh,
        NfsOpNum4::Read => NfsArgOp4::Read {
            stateid: decode_stateid(xdr)?,
            offset: xdr.decode_u64()?,
            count: xdr.decode_u32()?,
        },
        NfsOpNum4::Readdir => NfsArgOp4::Readdir {
            cookie: xdr.decode_u64()?,
            cookieverf: decode_verifier(xdr)?,
            dircount: xdr.decode_u32()?,
            maxcount: xdr.decode_u32()?,
            attr_request: decode_bitmap(xdr)?,
        },
        NfsOpNum4::Remove => NfsArgOp4::Remove {
            target: xdr.decode_string()?,
        },
        NfsOpNum4::Restorefh => NfsArgOp4::Restorefh,
        NfsOpNum4::Savefh => NfsArgOp4::Savefh,
        NfsOpNum4::Write => {
            let stateid = decode_stateid(xdr)?;
            let offset = xdr.decode_u64()?;
            let stable_raw = xdr.decode_u32()?;
            let stable = StableHow4::from_u32(stable_raw)
                .ok_or_else(|| Nfs4Error::xdr(format!("unknown stable_how {}", stable_raw)))?;
            NfsArgOp4::Write {
                stateid,
                offset,
                stable,
                data: Bytes::from(xdr.decode_opaque()?),
            }
        }
        NfsOpNum4::ExchangeId => {
            let verifier = decode_verifier(xdr)?;
            let ownerid = xdr.decode_opaque()?;
            let flags = xdr.decode_u32()?;
            let how = xdr.decode_u32()?;
            if how != SP4_NONE {
                return Err(Nfs4Error::xdr(format!("unsupported state protection {}", how)));
            }
            NfsArgOp4::ExchangeId {
                client_owner: ClientOwner4 { verifier, ownerid },
                flags,
                impl_id: decode_impl_id(xdr)?,
            }
        }
        NfsOpNum4::CreateSession => {
            let clientid = xdr.decode_u64()?;
            let sequence = xdr.decode_u32()?;
            let flags = xdr.decode_u32()?;
            let fore_chan_attrs = decode_channel_attrs(xdr)?;
            let back_chan_attrs = decode_channel_attrs(xdr)?;
            let cb_program = xdr.decode_u32()?;
            let parms = xdr.decode_count(4)?;
            for _ in 0..parms {
                let flavor = xdr.decode_u32()?;
                if flavor != AUTH_NONE {
                    return Err(Nfs4Error::xdr(format!("unsupported callback flavor {}", flavor)));
                }
            }
            NfsArgOp4::CreateSession {
                clientid,
                sequence,
                flags,
                fore_chan_attrs,
                back_chan_attrs,
                cb_program,
            }
        }
        NfsOpNum4::DestroySession => NfsArgOp4::DestroySession {
            session_id: decode_session_id(xdr)?,
        },
        NfsOpNum4::Getdeviceinfo => NfsArgOp4::Getdeviceinfo {
            device_id: xdr.decode_array::<NFS4_DEVICEID4_SIZE>()?,
            layout_type: xdr.decode_u32()?,
            maxcount: xdr.decode_u32()?,
            notify_types: decode_bitmap(xdr)?,
        },
        NfsOpNum4::Getdevicelist => NfsArgOp4::Getdevicelist {
            layout_type: xdr.decode_u32()?,
            maxdevices: xdr.decode_u32()?,
            cookie: xdr.decode_u64()?,
            cookieverf: decode_verifier(xdr)?,
        },
        NfsOpNum4::Layoutcommit => NfsArgOp4::Layoutcommit {
            offset: xdr.decode_u64()?,
            length: xdr.decode_u64()?,
            reclaim: xdr.decode_bool()?,
            stateid: decode_stateid(xdr)?,
            new_offset: decode_optional(xdr, |x| x.decode_u64())?,
            time_modify: decode_optional(xdr, decode_nfstime)?,
            layout_update: LayoutUpdate4 {
                layout_type: xdr.decode_u32()?,
                body: xdr.decode_opaque()?,
            },
        },
        NfsOpNum4::Layoutget => NfsArgOp4::Layoutget {
            signal_avail: xdr.decode_bool()?,
            layout_type: xdr.decode_u32()?,
            iomode: decode_iomode(xdr)?,
            offset: xdr.decode_u64()?,
            length: xdr.decode_u64()?,
            minlength: xdr.decode_u64()?,
            stateid: decode_stateid(xdr)?,
            maxcount: xdr.decode_u32()?,
        },
        NfsOpNum4::Layoutreturn => {
            let reclaim = xdr.decode_bool()?;
            let layout_type = xdr.decode_u32()?;
            let iomode = decode_iomode(xdr)?;
            let layoutreturn = match xdr.decode_u32()? {
                LAYOUTRETURN4_FILE => LayoutReturn4::File {
                    offset: xdr.decode_u64()?,
                    length: xdr.decode_u64()?,
                    stateid: decode_stateid(xdr)?,
                    body: xdr.decode_opaque()?,
                },
                LAYOUTRETURN4_FSID => LayoutReturn4::Fsid,
                LAYOUTRETURN4_ALL => LayoutReturn4::All,
                other => return Err(Nfs4Error::xdr(format!("unknown layoutreturn type {}", other))),
            };
            NfsArgOp4::Layoutreturn {
                reclaim,
                layout_type,
                iomode,
                layoutreturn,
            }
        }
        NfsOpNum4::Sequence => NfsArgOp4::Sequence(SequenceArgs4 {
            session_id: decode_session_id(xdr)?,
            sequence_id: xdr.decode_u32()?,
            slot_id: xdr.decode_u32()?,
            highest_slot_id: xdr.decode_u32()?,
            cache_this: xdr.decode_bool()?,
        }),
        NfsOpNum4::DestroyClientId => NfsArgOp4::DestroyClientId {
            clientid: xdr.decode_u64()?,
        },
        NfsOpNum4::ReclaimComplete => NfsArgOp4::ReclaimComplete {
            one_fs: xdr.decode_bool()?,
        },
        NfsOpNum4::Illegal => return Err(Nfs4Error::xdr("OP_ILLEGAL in request")),
    };
    Ok(op)
}

// === Results ===

fn encode_op_res(xdr: &mut XdrCodec, res: &NfsResOp4) {
    xdr.encode_u32(res.op as u32);
    xdr.encode_u32(res.status.to_u32());
    match &res.result {
        OpResult::None => {}
        OpResult::Close(stateid) => encode_stateid(xdr, stateid),
        OpResult::Create { cinfo, attrset } => {
            encode_change_info(xdr, cinfo);
            encode_bitmap(xdr, attrset);
        }
        OpResult::Getattr(attrs) => encode_fattr4(xdr, attrs),
        OpResult::Getfh(fh) => encode_fh(xdr, fh),
        OpResult::Open(open) => {
            encode_stateid(xdr, &open.stateid);
            encode_change_info(xdr, &open.cinfo);
            xdr.encode_u32(open.rflags);
            encode_bitmap(xdr, &open.attrset);
            encode_delegation(xdr, &open.delegation);
        }
        OpResult::Read { eof, data } => {
            xdr.encode_bool(*eof);
            xdr.encode_opaque(data);
        }
        OpResult::Readdir {
            cookieverf,
            entries,
            eof,
        } => {
            encode_verifier(xdr, cookieverf);
            for entry in entries {
                xdr.encode_bool(true);
                xdr.encode_u64(entry.cookie);
                xdr.encode_string(&entry.name);
                encode_fattr4(xdr, &entry.attrs);
            }
            xdr.encode_bool(false);
            xdr.encode_bool(*eof);
        }
        OpResult::Remove(cinfo) => encode_change_info(xdr, cinfo),
        OpResult::Write {
            count,
            committed,
            verifier,
        } => {
            xdr.encode_u32(*count);
            xdr.encode_u32(*committed as u32);
            encode_verifier(xdr, verifier);
        }
        OpResult::ExchangeId(res) => {
            xdr.encode_u64(res.clientid);
            xdr.encode_u32(res.sequenceid);
            xdr.encode_u32(res.flags);
            xdr.encode_u32(SP4_NONE);
            xdr.encode_u64(res.server_owner.minor_id);
            xdr.encode_opaque(&res.server_owner.major_id);
            xdr.encode_opaque(&res.server_scope);
            encode_impl_id(xdr, &res.server_impl_id);
        }
        OpResult::CreateSession(res) => {
            encode_session_id(xdr, &res.session_id);
            xdr.encode_u32(res.sequence);
            xdr.encode_u32(res.flags);
            encode_channel_attrs(xdr, &res.fore_chan_attrs);
            encode_channel_attrs(xdr, &res.back_chan_attrs);
        }
        OpResult::Sequence(res) => {
            encode_session_id(xdr, &res.session_id);
            xdr.encode_u32(res.sequence_id);
            xdr.encode_u32(res.slot_id);
            xdr.encode_u32(res.highest_slot_id);
            xdr.encode_u32(res.target_highest_slot_id);
            xdr.encode_u32(res.status_flags);
        }
        OpResult::Getdeviceinfo {
            device_addr,
            notification,
        } => {
            xdr.encode_u32(device_addr.layout_type);
            xdr.encode_opaque(&device_addr.body);
            encode_bitmap(xdr, notification);
        }
        OpResult::GetdeviceinfoTooSmall { mincount } => xdr.encode_u32(*mincount),
        OpResult::Getdevicelist {
            cookie,
            cookieverf,
            device_ids,
            eof,
        } => {
            xdr.encode_u64(*cookie);
            encode_verifier(xdr, cookieverf);
            xdr.encode_u32(device_ids.len() as u32);
            for id in device_ids {
                xdr.encode_opaque_fixed(id);
            }
            xdr.encode_bool(*eof);
        }
        OpResult::Layoutcommit { new_size } => encode_optional(xdr, new_size, |x, v| x.encode_u64(*v)),
        OpResult::Layoutget {
            return_on_close,
            stateid,
            layouts,
        } => {
            xdr.encode_bool(*return_on_close);
            encode_stateid(xdr, stateid);
            xdr.encode_u32(layouts.len() as u32);
            for layout in layouts {
                xdr.encode_u64(layout.offset);
                xdr.encode_u64(layout.length);
                xdr.encode_u32(layout.iomode as u32);
                xdr.encode_u32(layout.layout_type);
                xdr.encode_opaque(&layout.body);
            }
        }
        OpResult::LayoutgetTryLater { will_signal } => xdr.encode_bool(*will_signal),
        OpResult::Layoutreturn { stateid } => encode_optional(xdr, stateid, encode_stateid),
    }
}

fn decode_op_res(xdr: &mut XdrCodec) -> Result<NfsResOp4> {
    let op = decode_op_num(xdr)?;
    let status = decode_status(xdr)?;

    if !status.is_success() {
        let result = match (op, status) {
            (NfsOpNum4::Layoutget, NfsStatus::LayoutTryLater) => OpResult::LayoutgetTryLater {
                will_signal: xdr.decode_bool()?,
            },
            (NfsOpNum4::Getdeviceinfo, NfsStatus::Toosmall) => OpResult::GetdeviceinfoTooSmall {
                mincount: xdr.decode_u32()?,
            },
            _ => OpResult::None,
        };
        return Ok(NfsResOp4 { op, status, result });
    }

    let result = match op {
        NfsOpNum4::Close => OpResult::Close(decode_stateid(xdr)?),
        NfsOpNum4::Create => OpResult::Create {
            cinfo: decode_change_info(xdr)?,
            attrset: decode_bitmap(xdr)?,
        },
        NfsOpNum4::Getattr => OpResult::Getattr(decode_fattr4(xdr)?),
        NfsOpNum4::Getfh => OpResult::Getfh(decode_fh(xdr)?),
        NfsOpNum4::Open => OpResult::Open(OpenResult4 {
            stateid: decode_stateid(xdr)?,
            cinfo: decode_change_info(xdr)?,
            rflags: xdr.decode_u32()?,
            attrset: decode_bitmap(xdr)?,
            delegation: decode_delegation(xdr)?,
        }),
        NfsOpNum4::Read => OpResult::Read {
            eof: xdr.decode_bool()?,
            data: Bytes::from(xdr.decode_opaque()?),
        },
        NfsOpNum4::Readdir => {
            let cookieverf = decode_verifier(xdr)?;
            let mut entries = Vec::new();
            while xdr.decode_bool()? {
                entries.push(DirEntry4 {
                    cookie: xdr.decode_u64()?,
                    name: xdr.decode_string()?,
                    attrs: decode_fattr4(xdr)?,
                });
            }
            OpResult::Readdir {
                cookieverf,
                entries,
                eof: xdr.decode_bool()?,
            }
        }
        NfsOpNum4::Remove => OpResult::Remove(decode_change_info(xdr)?),
        NfsOpNum4::Write => {
            let count = xdr.decode_u32()?;
            let committed_raw = xdr.decode_u32()?;
            let committed = StableHow4::from_u32(committed_raw)
                .ok_or_else(|| Nfs4Error::xdr(format!("unknown stable_how {}", committed_raw)))?;
            OpResult::Write {
                count,
                committed,
                verifier: decode_verifier(xdr)?,
            }
        }
        NfsOpNum4::ExchangeId => {
            let clientid = xdr.decode_u64()?;
            let sequenceid = xdr.decode_u32()?;
            let flags = xdr.decode_u32()?;
            let how = xdr.decode_u32()?;
            if how != SP4_NONE {
                return Err(Nfs4Error::xdr(format!("unsupported state protection {}", how)));
            }
            OpResult::ExchangeId(ExchangeIdResult4 {
                clientid,
                sequenceid,
                flags,
                server_owner: ServerOwner4 {
                    minor_id: xdr.decode_u64()?,
                    major_id: xdr.decode_opaque()?,
                },
                server_scope: xdr.decode_opaque()?,
                server_impl_id: decode_impl_id(xdr)?,
            })
        }
        NfsOpNum4::CreateSession => OpResult::CreateSession(CreateSessionResult4 {
            session_id: decode_session_id(xdr)?,
            sequence: xdr.decode_u32()?,
            flags: xdr.decode_u32()?,
            fore_chan_attrs: decode_channel_attrs(xdr)?,
            back_chan_attrs: decode_channel_attrs(xdr)?,
        }),
        NfsOpNum4::Sequence => OpResult::Sequence(SequenceResult4 {
            session_id: decode_session_id(xdr)?,
            sequence_id: xdr.decode_u32()?,
            slot_id: xdr.decode_u32()?,
            highest_slot_id: xdr.decode_u32()?,
            target_highest_slot_id: xdr.decode_u32()?,
            status_flags: xdr.decode_u32()?,
        }),
        NfsOpNum4::Getdeviceinfo => OpResult::Getdeviceinfo {
            device_addr: DeviceAddr4 {
                layout_type: xdr.decode_u32()?,
                body: xdr.decode_opaque()?,
            },
            notification: decode_bitmap(xdr)?,
        },
        NfsOpNum4::Getdevicelist => {
            let cookie = xdr.decode_u64()?;
            let cookieverf = decode_verifier(xdr)?;
            let count = xdr.decode_count(NFS4_DEVICEID4_SIZE)?;
            let device_ids = (0..count)
                .map(|_| xdr.decode_array::<NFS4_DEVICEID4_SIZE>())
                .collect::<Result<Vec<_>>>()?;
            OpResult::Getdevicelist {
                cookie,
                cookieverf,
                device_ids,
                eof: xdr.decode_bool()?,
            }
        }
        NfsOpNum4::Layoutcommit => OpResult::Layoutcommit {
            new_size: decode_optional(xdr, |x| x.decode_u64())?,
        },
        NfsOpNum4::Layoutget => {
            let return_on_close = xdr.decode_bool()?;
            let stateid = decode_stateid(xdr)?;
            let count = xdr.decode_count(28)?;
            let mut layouts = Vec::with_capacity(count);
            for _ in 0..count {
                layouts.push(Layout4 {
                    offset: xdr.decode_u64()?,
                    length: xdr.decode_u64()?,
                    iomode: decode_iomode(xdr)?,
                    layout_type: xdr.decode_u32()?,
                    body: xdr.decode_opaque()?,
                });
            }
            OpResult::Layoutget {
                return_on_close,
                stateid,
                layouts,
            }
        }
        NfsOpNum4::Layoutreturn => OpResult::Layoutreturn {
            stateid: decode_optional(xdr, decode_stateid)?,
        },
        NfsOpNum4::Putfh
        | NfsOpNum4::Putrootfh
        | NfsOpNum4::Lookup
        | NfsOpNum4::Restorefh
        | NfsOpNum4::Savefh
        | NfsOpNum4::DestroySession
        | NfsOpNum4::DestroyClientId
        | NfsOpNum4::ReclaimComplete
        | NfsOpNum4::Illegal => OpResult::None,
    };

    Ok(NfsResOp4 { op, status, result })
}
