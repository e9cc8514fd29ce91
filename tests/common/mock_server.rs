//! In-memory NFSv4.1 server.
//!
//! Speaks the real wire format through the codec's server direction and
//! validates SEQUENCE with the same slot logic a server uses, so the client
//! under test cannot tell it from a remote peer.

use async_trait::async_trait;
use nfs41_client::error::{Nfs4Error, Result};
use nfs41_client::nfs::attributes::encode;
use nfs41_client::nfs::codec::{decode_compound_args, encode_compound_res};
use nfs41_client::nfs::compound::{
    CreateSessionResult4, DirEntry4, ExchangeIdResult4, OpenResult4, SequenceResult4, ServerOwner4,
    EXCHGID4_FLAG_USE_NON_PNFS, EXCHGID4_FLAG_USE_PNFS_DS, EXCHGID4_FLAG_USE_PNFS_MDS,
};
use nfs41_client::nfs::protocol::{NFS_PROGRAM, NFS_V4, PROC_COMPOUND};
use nfs41_client::nfs::session::SequenceResult;
use nfs41_client::nfs::{
    attr_bits, Attr4, AttrBitmap, ChangeInfo4, CompoundResponse, CreateHow4,
    CreateType4, DeviceAddr4, DeviceId4, FileDeviceAddress, FileLayoutSegment, FsLocations4,
    Layout4, Layoutiomode4, Layouttype4, NfsArgOp4, NfsFh4, NfsFtype4, NfsOpNum4, NfsResOp4,
    NfsStatus, NfsTime4, OpResult, OpaqueAuth, OpenClaim4, OpenDelegation4, OpenFlag4,
    RpcTransport, SequenceArgs4, SessionId4, SessionSlot, StableHow4,
    StandardAttributes, Stateid4, Verifier4, STANDARD_ATTRIBUTES,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ROOT: &[u8] = b"root";
const FIXED_TIME: i64 = 1_700_000_000;
const LAYOUT_STATEID: Stateid4 = Stateid4 {
    seqid: 1,
    other: [0xAA; 12],
};

/// What a mock server is and how it behaves.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// EXCHGID4_FLAG_USE_* roles the server grants.
    pub roles: u32,
    pub lease_time: u32,
    /// Upper bound on the fore channel slot count.
    pub max_slots: u32,
    /// Slot count reported by CREATE_SESSION in place of the real one.
    pub advertised_slots: Option<u32>,
    pub layout_types: Vec<u32>,
    /// Whether GETDEVICELIST is implemented.
    pub device_list: bool,
    /// READDIR entries per reply.
    pub readdir_page: usize,
    /// Time every compound takes.
    pub delay: Duration,
}

impl ServerOptions {
    /// A server without pNFS.
    pub fn plain() -> Self {
        Self {
            roles: EXCHGID4_FLAG_USE_NON_PNFS,
            lease_time: 90,
            max_slots: 16,
            advertised_slots: None,
            layout_types: Vec::new(),
            device_list: false,
            readdir_page: 64,
            delay: Duration::ZERO,
        }
    }

    /// A metadata server offering file layouts.
    pub fn mds() -> Self {
        Self {
            roles: EXCHGID4_FLAG_USE_PNFS_MDS,
            layout_types: vec![Layouttype4::NfsV41Files as u32],
            device_list: true,
            ..Self::plain()
        }
    }

    pub fn data_server() -> Self {
        Self {
            roles: EXCHGID4_FLAG_USE_PNFS_DS,
            ..Self::plain()
        }
    }
}

/// One compound as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub tag: String,
    pub sequence: Option<SequenceArgs4>,
    /// Operations after SEQUENCE.
    pub ops: Vec<NfsOpNum4>,
}

/// A WRITE as the server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub fh: Vec<u8>,
    pub offset: u64,
    pub len: usize,
    pub stateid: Stateid4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub offset: u64,
    pub length: u64,
    pub new_offset: Option<u64>,
    pub stateid: Stateid4,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Dir(BTreeMap<String, Vec<u8>>),
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Node {
    fileid: u64,
    mode: u32,
    change: u64,
    kind: NodeKind,
}

impl Node {
    fn attributes(&self) -> StandardAttributes {
        let (file_type, size, numlinks) = match &self.kind {
            NodeKind::Dir(children) => (NfsFtype4::Dir, 4096, 2 + children.len() as u32),
            NodeKind::File(data) => (NfsFtype4::Reg, data.len() as u64, 1),
        };
        StandardAttributes {
            file_type: Some(file_type),
            size,
            fileid: self.fileid,
            mode: self.mode,
            numlinks,
            owner: "root@localdomain".into(),
            group: "wheel@localdomain".into(),
            space_used: size,
            time_access: NfsTime4::new(FIXED_TIME, 0),
            time_create: NfsTime4::new(FIXED_TIME, 0),
            time_metadata: NfsTime4::new(FIXED_TIME, self.change as u32),
            time_modify: NfsTime4::new(FIXED_TIME, self.change as u32),
        }
    }
}

#[derive(Default)]
struct FileHandles {
    current: Option<Vec<u8>>,
    saved: Option<Vec<u8>>,
}

#[derive(Default)]
struct ServerState {
    next_id: u64,
    clients: HashSet<u64>,
    sessions: HashMap<SessionId4, Vec<SessionSlot>>,
    destroyed_sessions: Vec<SessionId4>,
    destroyed_clients: Vec<u64>,
    nodes: HashMap<Vec<u8>, Node>,
    opens: HashSet<Stateid4>,
    injected: VecDeque<NfsStatus>,
    log: Vec<Recorded>,
    layouts: Vec<Layout4>,
    layout_iomodes: Vec<Layoutiomode4>,
    devices: BTreeMap<DeviceId4, DeviceAddr4>,
    getdeviceinfo_calls: usize,
    writes: Vec<WriteRecord>,
    commits: Vec<CommitRecord>,
    layout_returns: usize,
    locations: FsLocations4,
}

impl ServerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node(&self, fh: &Option<Vec<u8>>) -> std::result::Result<&Node, NfsStatus> {
        let fh = fh.as_ref().ok_or(NfsStatus::Nofilehandle)?;
        self.nodes.get(fh).ok_or(NfsStatus::Stale)
    }

    fn node_mut(&mut self, fh: &Option<Vec<u8>>) -> std::result::Result<&mut Node, NfsStatus> {
        let fh = fh.as_ref().ok_or(NfsStatus::Nofilehandle)?;
        self.nodes.get_mut(fh).ok_or(NfsStatus::Stale)
    }

    fn children(&self, fh: &Option<Vec<u8>>) -> std::result::Result<&BTreeMap<String, Vec<u8>>, NfsStatus> {
        match &self.node(fh)?.kind {
            NodeKind::Dir(children) => Ok(children),
            NodeKind::File(_) => Err(NfsStatus::Notdir),
        }
    }

    /// Insert a node under `parent` and return its handle.
    fn insert(&mut self, parent: &[u8], name: &str, mode: u32, kind: NodeKind) -> std::result::Result<Vec<u8>, NfsStatus> {
        let fileid = self.next_id();
        let fh = format!("fh-{}", fileid).into_bytes();
        match self.nodes.get_mut(parent).map(|node| &mut node.kind) {
            Some(NodeKind::Dir(children)) => {
                if children.contains_key(name) {
                    return Err(NfsStatus::Exist);
                }
                children.insert(name.to_string(), fh.clone());
            }
            Some(NodeKind::File(_)) => return Err(NfsStatus::Notdir),
            None => return Err(NfsStatus::Stale),
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.change += 1;
        }
        self.nodes.insert(
            fh.clone(),
            Node {
                fileid,
                mode,
                change: 1,
                kind,
            },
        );
        Ok(fh)
    }

    fn change_info(&self, fh: &Option<Vec<u8>>) -> ChangeInfo4 {
        let after = self.node(fh).map(|n| n.change).unwrap_or_default();
        ChangeInfo4 {
            atomic: true,
            before: after.saturating_sub(1),
            after,
        }
    }

    fn check_sequence(&mut self, seq: &SequenceArgs4) -> std::result::Result<SequenceResult, NfsStatus> {
        let slots = self
            .sessions
            .get_mut(&seq.session_id)
            .ok_or(NfsStatus::BadSession)?;
        let slot = slots.get_mut(seq.slot_id as usize).ok_or(NfsStatus::BadSlot)?;
        slot.process_sequence(seq.sequence_id)
            .map_err(|e| e.status().unwrap_or(NfsStatus::Serverfault))
    }
}

/// In-memory NFSv4.1 server reachable through [`RpcTransport`].
pub struct MockServer {
    options: ServerOptions,
    state: Mutex<ServerState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl MockServer {
    pub fn new(options: ServerOptions) -> Arc<Self> {
        let mut state = ServerState::default();
        state.nodes.insert(
            ROOT.to_vec(),
            Node {
                fileid: 1,
                mode: 0o755,
                change: 1,
                kind: NodeKind::Dir(BTreeMap::new()),
            },
        );
        state.next_id = 1;

        Arc::new(Self {
            options,
            state: Mutex::new(state),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn plain() -> Arc<Self> {
        Self::new(ServerOptions::plain())
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    fn resolve(state: &ServerState, path: &str) -> Option<Vec<u8>> {
        let mut fh = ROOT.to_vec();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match &state.nodes.get(&fh)?.kind {
                NodeKind::Dir(children) => fh = children.get(component)?.clone(),
                NodeKind::File(_) => return None,
            }
        }
        Some(fh)
    }

    fn create_at(&self, path: &str, kind: NodeKind, mode: u32) -> NfsFh4 {
        let mut state = self.state.lock();
        let (parent, name) = path.trim_matches('/').rsplit_once('/').unwrap_or(("", path.trim_matches('/')));
        let parent = Self::resolve(&state, parent).expect("parent directory exists");
        let fh = state.insert(&parent, name, mode, kind).expect("path is free");
        NfsFh4::new(fh)
    }

    pub fn add_dir(&self, path: &str) -> NfsFh4 {
        self.create_at(path, NodeKind::Dir(BTreeMap::new()), 0o755)
    }

    pub fn add_file(&self, path: &str, data: &[u8]) -> NfsFh4 {
        self.create_at(path, NodeKind::File(data.to_vec()), 0o644)
    }

    /// A file reachable only by handle, as data servers hold them.
    pub fn add_file_with_fh(&self, fh: &NfsFh4, data: &[u8]) {
        let mut state = self.state.lock();
        let fileid = state.next_id();
        state.nodes.insert(
            fh.data().to_vec(),
            Node {
                fileid,
                mode: 0o644,
                change: 1,
                kind: NodeKind::File(data.to_vec()),
            },
        );
    }

    pub fn fh_of(&self, path: &str) -> Option<NfsFh4> {
        Self::resolve(&self.state.lock(), path).map(NfsFh4::new)
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let fh = Self::resolve(&state, path)?;
        match &state.nodes.get(&fh)?.kind {
            NodeKind::File(data) => Some(data.clone()),
            NodeKind::Dir(_) => None,
        }
    }

    pub fn data_by_fh(&self, fh: &NfsFh4) -> Option<Vec<u8>> {
        match &self.state.lock().nodes.get(fh.data())?.kind {
            NodeKind::File(data) => Some(data.clone()),
            NodeKind::Dir(_) => None,
        }
    }

    pub fn mode_of(&self, path: &str) -> Option<u32> {
        let state = self.state.lock();
        let fh = Self::resolve(&state, path)?;
        state.nodes.get(&fh).map(|node| node.mode)
    }

    /// Layout segments handed out by LAYOUTGET.
    pub fn set_layout(&self, segments: &[FileLayoutSegment]) {
        self.state.lock().layouts = segments.iter().map(FileLayoutSegment::to_layout4).collect();
    }

    pub fn add_device(&self, id: DeviceId4, device: &FileDeviceAddress) {
        self.state.lock().devices.insert(
            id,
            DeviceAddr4 {
                layout_type: Layouttype4::NfsV41Files as u32,
                body: device.encode_body(),
            },
        );
    }

    pub fn set_locations(&self, locations: FsLocations4) {
        self.state.lock().locations = locations;
    }

    /// Fail the next `count` in-session compounds with `status`.
    pub fn inject(&self, status: NfsStatus, count: usize) {
        let mut state = self.state.lock();
        state.injected.extend(std::iter::repeat(status).take(count));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().log.clone()
    }

    pub fn requests_tagged(&self, tag: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.tag == tag).collect()
    }

    pub fn tags(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.tag).collect()
    }

    pub fn op_count(&self, op: NfsOpNum4) -> usize {
        self.requests()
            .iter()
            .map(|r| r.ops.iter().filter(|&&o| o == op).count())
            .sum()
    }

    pub fn getdeviceinfo_calls(&self) -> usize {
        self.state.lock().getdeviceinfo_calls
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().commits.clone()
    }

    pub fn layout_returns(&self) -> usize {
        self.state.lock().layout_returns
    }

    pub fn layout_iomodes(&self) -> Vec<Layoutiomode4> {
        self.state.lock().layout_iomodes.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn destroyed_sessions(&self) -> usize {
        self.state.lock().destroyed_sessions.len()
    }

    pub fn destroyed_clients(&self) -> usize {
        self.state.lock().destroyed_clients.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Execute one COMPOUND and return the encoded reply.
    fn handle(&self, args: Vec<u8>) -> Result<Vec<u8>> {
        let request = decode_compound_args(args)?;
        let mut state = self.state.lock();

        let sequence = request.sequence().copied();
        let skip = usize::from(sequence.is_some());
        state.log.push(Recorded {
            tag: request.tag.clone(),
            sequence,
            ops: request.operations[skip..].iter().map(NfsArgOp4::op_num).collect(),
        });

        let mut response = CompoundResponse::new(request.tag.clone());
        let mut ops = request.operations[skip..].iter();

        if let Some(seq) = sequence {
            match state.check_sequence(&seq) {
                Ok(SequenceResult::CachedReply(reply)) => return Ok(reply),
                Ok(SequenceResult::Execute) => {
                    let slots = state.sessions.get(&seq.session_id).map_or(0, |s| s.len() as u32);
                    response.add_result(ok(
                        NfsOpNum4::Sequence,
                        OpResult::Sequence(SequenceResult4 {
                            session_id: seq.session_id,
                            sequence_id: seq.sequence_id,
                            slot_id: seq.slot_id,
                            highest_slot_id: slots.saturating_sub(1),
                            target_highest_slot_id: slots.saturating_sub(1),
                            status_flags: 0,
                        }),
                    ));
                }
                Err(status) => {
                    response.add_result(failed(NfsOpNum4::Sequence, status));
                    return Ok(encode_compound_res(&response));
                }
            }

            if ops.len() > 0 {
                if let Some(status) = state.injected.pop_front() {
                    let op = ops.next().map_or(NfsOpNum4::Putrootfh, NfsArgOp4::op_num);
                    response.add_result(failed(op, status));
                    return Ok(Self::cache(&mut state, &seq, &response));
                }
            }
        } else if request.operations.iter().any(|op| matches!(op, NfsArgOp4::Sequence(_))) {
            response.add_result(failed(NfsOpNum4::Sequence, NfsStatus::SequencePos));
            return Ok(encode_compound_res(&response));
        }

        let mut handles = FileHandles::default();
        for op in ops {
            let result = self.execute(&mut state, &mut handles, op);
            let status = result.status;
            response.add_result(result);
            if !status.is_success() {
                break;
            }
        }

        match sequence {
            Some(seq) => Ok(Self::cache(&mut state, &seq, &response)),
            None => Ok(encode_compound_res(&response)),
        }
    }

    fn cache(state: &mut ServerState, seq: &SequenceArgs4, response: &CompoundResponse) -> Vec<u8> {
        let reply = encode_compound_res(response);
        if let Some(slot) = state
            .sessions
            .get_mut(&seq.session_id)
            .and_then(|slots| slots.get_mut(seq.slot_id as usize))
        {
            slot.cache_reply(reply.clone());
        }
        reply
    }

    fn execute(&self, state: &mut ServerState, fhs: &mut FileHandles, op: &NfsArgOp4) -> NfsResOp4 {
        let op_num = op.op_num();
        match self.execute_op(state, fhs, op) {
            Ok(result) => ok(op_num, result),
            Err(status) => failed(op_num, status),
        }
    }

    fn execute_op(
        &self,
        state: &mut ServerState,
        fhs: &mut FileHandles,
        op: &NfsArgOp4,
    ) -> std::result::Result<OpResult, NfsStatus> {
        match op {
            NfsArgOp4::ExchangeId { flags, .. } => {
                let mut granted = flags & self.options.roles;
                if granted & (EXCHGID4_FLAG_USE_PNFS_MDS | EXCHGID4_FLAG_USE_PNFS_DS) == 0 {
                    granted = EXCHGID4_FLAG_USE_NON_PNFS;
                }
                let clientid = state.next_id();
                state.clients.insert(clientid);
                Ok(OpResult::ExchangeId(ExchangeIdResult4 {
                    clientid,
                    sequenceid: 1,
                    flags: granted,
                    server_owner: ServerOwner4 {
                        minor_id: 0,
                        major_id: b"mock".to_vec(),
                    },
                    server_scope: b"mock".to_vec(),
                    server_impl_id: None,
                }))
            }
            NfsArgOp4::CreateSession {
                clientid,
                sequence,
                fore_chan_attrs,
                back_chan_attrs,
                ..
            } => {
                if !state.clients.contains(clientid) {
                    return Err(NfsStatus::StaleClientid);
                }
                let slots = fore_chan_attrs.max_requests.clamp(1, self.options.max_slots);
                let mut id = [0u8; 16];
                id[..8].copy_from_slice(&state.next_id().to_be_bytes());
                id[8..].copy_from_slice(&clientid.to_be_bytes());
                let session_id = SessionId4(id);
                state
                    .sessions
                    .insert(session_id, (0..slots).map(SessionSlot::new).collect());
                let mut fore = *fore_chan_attrs;
                fore.max_requests = self.options.advertised_slots.unwrap_or(slots);
                Ok(OpResult::CreateSession(CreateSessionResult4 {
                    session_id,
                    sequence: *sequence,
                    flags: 0,
                    fore_chan_attrs: fore,
                    back_chan_attrs: *back_chan_attrs,
                }))
            }
            NfsArgOp4::DestroySession { session_id } => {
                state.sessions.remove(session_id).ok_or(NfsStatus::BadSession)?;
                state.destroyed_sessions.push(*session_id);
                Ok(OpResult::None)
            }
            NfsArgOp4::DestroyClientId { clientid } => {
                if !state.clients.remove(clientid) {
                    return Err(NfsStatus::StaleClientid);
                }
                state.destroyed_clients.push(*clientid);
                Ok(OpResult::None)
            }
            NfsArgOp4::ReclaimComplete { .. } => Ok(OpResult::None),
            NfsArgOp4::Sequence(_) => Err(NfsStatus::SequencePos),

            NfsArgOp4::Putrootfh => {
                fhs.current = Some(ROOT.to_vec());
                Ok(OpResult::None)
            }
            NfsArgOp4::Putfh { fh } => {
                if !state.nodes.contains_key(fh.data()) {
                    return Err(NfsStatus::Stale);
                }
                fhs.current = Some(fh.data().to_vec());
                Ok(OpResult::None)
            }
            NfsArgOp4::Lookup { name } => {
                let child = state.children(&fhs.current)?.get(name).cloned().ok_or(NfsStatus::Noent)?;
                fhs.current = Some(child);
                Ok(OpResult::None)
            }
            NfsArgOp4::Getfh => {
                state.node(&fhs.current)?;
                Ok(OpResult::Getfh(NfsFh4::new(fhs.current.clone().unwrap_or_default())))
            }
            NfsArgOp4::Savefh => {
                state.node(&fhs.current)?;
                fhs.saved = fhs.current.clone();
                Ok(OpResult::None)
            }
            NfsArgOp4::Restorefh => {
                if fhs.saved.is_none() {
                    return Err(NfsStatus::Restorefh);
                }
                fhs.current = fhs.saved.clone();
                Ok(OpResult::None)
            }
            NfsArgOp4::Getattr { attr_request } => {
                let node = state.node(&fhs.current)?;
                self.getattr(state, node, attr_request).map(OpResult::Getattr)
            }
            NfsArgOp4::Readdir {
                cookie,
                attr_request,
                ..
            } => {
                let children = state.children(&fhs.current)?;
                let start = if *cookie == 0 { 0 } else { (*cookie - 2) as usize };
                let bits = standard_subset(attr_request);
                let mut entries = Vec::new();
                for (index, (name, fh)) in children.iter().enumerate().skip(start).take(self.options.readdir_page) {
                    let attrs = state.nodes[fh].attributes().to_attr4(&bits).map_err(|_| NfsStatus::Serverfault)?;
                    entries.push(DirEntry4 {
                        cookie: index as u64 + 3,
                        name: name.clone(),
                        attrs,
                    });
                }
                let eof = start + entries.len() >= children.len();
                Ok(OpResult::Readdir {
                    cookieverf: Verifier4::new(*b"mockverf"),
                    entries,
                    eof,
                })
            }
            NfsArgOp4::Create { objtype, name, attrs } => {
                if *objtype != CreateType4::Directory {
                    return Err(NfsStatus::Badtype);
                }
                let parent = fhs.current.clone().ok_or(NfsStatus::Nofilehandle)?;
                let mode = requested_mode(attrs, 0o755);
                let fh = state.insert(&parent, name, mode, NodeKind::Dir(BTreeMap::new()))?;
                let cinfo = state.change_info(&fhs.current);
                fhs.current = Some(fh);
                Ok(OpResult::Create {
                    cinfo,
                    attrset: attrs.attrmask.clone(),
                })
            }
            NfsArgOp4::Remove { target } => {
                let child = state.children(&fhs.current)?.get(target).cloned().ok_or(NfsStatus::Noent)?;
                if let Some(NodeKind::Dir(children)) = state.nodes.get(&child).map(|n| &n.kind) {
                    if !children.is_empty() {
                        return Err(NfsStatus::Notempty);
                    }
                }
                if let NodeKind::Dir(children) = &mut state.node_mut(&fhs.current)?.kind {
                    children.remove(target);
                }
                state.node_mut(&fhs.current)?.change += 1;
                state.nodes.remove(&child);
                Ok(OpResult::Remove(state.change_info(&fhs.current)))
            }
            NfsArgOp4::Open {
                share_access,
                openhow,
                claim,
                ..
            } => {
                if *share_access == 0 {
                    return Err(NfsStatus::Inval);
                }
                let OpenClaim4::Null(name) = claim;
                let parent = fhs.current.clone().ok_or(NfsStatus::Nofilehandle)?;
                let existing = state.children(&fhs.current)?.get(name).cloned();
                let fh = match (existing, openhow) {
                    (Some(_), OpenFlag4::Create(CreateHow4::Guarded(_))) => return Err(NfsStatus::Exist),
                    (Some(fh), _) => fh,
                    (None, OpenFlag4::Create(CreateHow4::Unchecked(attrs) | CreateHow4::Guarded(attrs))) => {
                        let mode = requested_mode(attrs, 0o644);
                        state.insert(&parent, name, mode, NodeKind::File(Vec::new()))?
                    }
                    (None, OpenFlag4::NoCreate) => return Err(NfsStatus::Noent),
                };
                if matches!(state.nodes.get(&fh).map(|n| &n.kind), Some(NodeKind::Dir(_))) {
                    return Err(NfsStatus::Isdir);
                }
                let mut other = [0u8; 12];
                other[4..].copy_from_slice(&state.next_id().to_be_bytes());
                let stateid = Stateid4::new(1, other);
                state.opens.insert(stateid);
                let cinfo = state.change_info(&fhs.current);
                fhs.current = Some(fh);
                Ok(OpResult::Open(OpenResult4 {
                    stateid,
                    cinfo,
                    rflags: 0,
                    attrset: AttrBitmap::new(),
                    delegation: OpenDelegation4::None,
                }))
            }
            NfsArgOp4::Close { stateid, .. } => {
                if !state.opens.remove(stateid) {
                    return Err(NfsStatus::BadStateid);
                }
                Ok(OpResult::Close(*stateid))
            }
            NfsArgOp4::Read { offset, count, .. } => match &state.node(&fhs.current)?.kind {
                NodeKind::File(data) => {
                    let start = (*offset as usize).min(data.len());
                    let end = start.saturating_add(*count as usize).min(data.len());
                    Ok(OpResult::Read {
                        eof: end >= data.len(),
                        data: data[start..end].to_vec().into(),
                    })
                }
                NodeKind::Dir(_) => Err(NfsStatus::Isdir),
            },
            NfsArgOp4::Write {
                stateid,
                offset,
                data,
                ..
            } => {
                let fh = fhs.current.clone().unwrap_or_default();
                let node = state.node_mut(&fhs.current)?;
                let NodeKind::File(contents) = &mut node.kind else {
                    return Err(NfsStatus::Isdir);
                };
                let start = *offset as usize;
                if contents.len() < start + data.len() {
                    contents.resize(start + data.len(), 0);
                }
                contents[start..start + data.len()].copy_from_slice(data);
                node.change += 1;
                state.writes.push(WriteRecord {
                    fh,
                    offset: *offset,
                    len: data.len(),
                    stateid: *stateid,
                });
                Ok(OpResult::Write {
                    count: data.len() as u32,
                    committed: StableHow4::FileSync,
                    verifier: Verifier4::new(*b"mockwrit"),
                })
            }
            NfsArgOp4::Layoutget { iomode, .. } => {
                state.node(&fhs.current)?;
                state.layout_iomodes.push(*iomode);
                if state.layouts.is_empty() {
                    return Err(NfsStatus::LayoutUnavailable);
                }
                Ok(OpResult::Layoutget {
                    return_on_close: false,
                    stateid: LAYOUT_STATEID,
                    layouts: state.layouts.clone(),
                })
            }
            NfsArgOp4::Getdeviceinfo { device_id, .. } => {
                state.getdeviceinfo_calls += 1;
                let device_addr = state.devices.get(device_id).cloned().ok_or(NfsStatus::Noent)?;
                Ok(OpResult::Getdeviceinfo {
                    device_addr,
                    notification: AttrBitmap::new(),
                })
            }
            NfsArgOp4::Getdevicelist { .. } => {
                if !self.options.device_list {
                    return Err(NfsStatus::Notsupp);
                }
                Ok(OpResult::Getdevicelist {
                    cookie: 0,
                    cookieverf: Verifier4::default(),
                    device_ids: state.devices.keys().copied().collect(),
                    eof: true,
                })
            }
            NfsArgOp4::Layoutcommit {
                offset,
                length,
                new_offset,
                stateid,
                ..
            } => {
                state.commits.push(CommitRecord {
                    offset: *offset,
                    length: *length,
                    new_offset: *new_offset,
                    stateid: *stateid,
                });
                Ok(OpResult::Layoutcommit {
                    new_size: new_offset.map(|o| o + 1),
                })
            }
            NfsArgOp4::Layoutreturn { .. } => {
                state.layout_returns += 1;
                Ok(OpResult::Layoutreturn { stateid: None })
            }
        }
    }

    fn getattr(&self, state: &ServerState, node: &Node, request: &AttrBitmap) -> std::result::Result<Attr4, NfsStatus> {
        let bits: Vec<u32> = request.iter().collect();
        let attrs = match bits.as_slice() {
            [attr_bits::SUPPORTED_ATTRS] => {
                let mut supported = AttrBitmap::from_bits(&STANDARD_ATTRIBUTES);
                for bit in [
                    attr_bits::SUPPORTED_ATTRS,
                    attr_bits::CHANGE,
                    attr_bits::LEASE_TIME,
                    attr_bits::FS_LOCATIONS,
                    attr_bits::FS_LAYOUT_TYPES,
                ] {
                    supported.set(bit);
                }
                encode::supported_attrs(&supported)
            }
            [attr_bits::LEASE_TIME] => encode::lease_time(self.options.lease_time),
            [attr_bits::FS_LAYOUT_TYPES] => encode::fs_layout_types(&self.options.layout_types),
            [attr_bits::FS_LOCATIONS] => encode::fs_locations(&state.locations),
            [attr_bits::CHANGE] => Attr4 {
                attrmask: AttrBitmap::from_bits(&[attr_bits::CHANGE]),
                attr_vals: node.change.to_be_bytes().to_vec(),
            },
            _ => node
                .attributes()
                .to_attr4(&standard_subset(request))
                .map_err(|_| NfsStatus::Serverfault)?,
        };
        Ok(attrs)
    }
}

fn ok(op: NfsOpNum4, result: OpResult) -> NfsResOp4 {
    NfsResOp4 {
        op,
        status: NfsStatus::Ok,
        result,
    }
}

fn failed(op: NfsOpNum4, status: NfsStatus) -> NfsResOp4 {
    NfsResOp4 {
        op,
        status,
        result: OpResult::None,
    }
}

fn standard_subset(request: &AttrBitmap) -> AttrBitmap {
    let bits: Vec<u32> = request.iter().filter(|bit| STANDARD_ATTRIBUTES.contains(bit)).collect();
    AttrBitmap::from_bits(&bits)
}

fn requested_mode(attrs: &Attr4, default: u32) -> u32 {
    if attrs.attrmask.is_set(attr_bits::MODE) {
        StandardAttributes::from_attr4(attrs).map_or(default, |a| a.mode)
    } else {
        default
    }
}

#[async_trait]
impl RpcTransport for MockServer {
    async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        _credential: &OpaqueAuth,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Nfs4Error::Transport("mock connection closed".into()));
        }
        assert_eq!((program, version, procedure), (NFS_PROGRAM, NFS_V4, PROC_COMPOUND));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.options.delay.is_zero() {
            tokio::time::sleep(self.options.delay).await;
        }
        let reply = self.handle(args);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport that hands its calls to a shared [`MockServer`].
///
/// Data server connections get one of these each, so closing a session
/// does not affect other clients of the same server.
pub struct MockConnection {
    server: Arc<MockServer>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new(server: Arc<MockServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RpcTransport for MockConnection {
    async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        credential: &OpaqueAuth,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Nfs4Error::Transport("mock connection closed".into()));
        }
        self.server.call(program, version, procedure, credential, args).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Which half of a call [`LossyConnection`] drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    /// The server never sees the call.
    Request,
    /// The server executes the call but the reply never arrives.
    Reply,
}

/// Transport to a [`MockServer`] that can lose one call on demand.
pub struct LossyConnection {
    server: Arc<MockServer>,
    next_loss: Mutex<Option<Loss>>,
}

impl LossyConnection {
    pub fn new(server: Arc<MockServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            next_loss: Mutex::new(None),
        })
    }

    /// Lose the next call.
    pub fn lose_next(&self, loss: Loss) {
        *self.next_loss.lock() = Some(loss);
    }
}

#[async_trait]
impl RpcTransport for LossyConnection {
    async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        credential: &OpaqueAuth,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let loss = self.next_loss.lock().take();
        match loss {
            Some(Loss::Request) => Err(Nfs4Error::Transport("request lost".into())),
            Some(Loss::Reply) => {
                self.server.call(program, version, procedure, credential, args).await?;
                Err(Nfs4Error::Timeout("reply lost".into()))
            }
            None => self.server.call(program, version, procedure, credential, args).await,
        }
    }

    async fn close(&self) {
        self.server.close().await;
    }
}
