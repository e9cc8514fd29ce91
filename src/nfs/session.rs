//! NFSv4.1 session and slot management.
//!
//! Sessions provide exactly-once semantics through slots: each slot
//! carries one request at a time and a sequence id that advances by one
//! per use. The client side hands out slots through [`SlotTable`]; the
//! server side validates sequence ids and replays cached replies through
//! [`SessionSlot`].

use super::compound::{ChannelAttrs4, ServerOwner4, EXCHGID4_FLAG_USE_PNFS_DS, EXCHGID4_FLAG_USE_PNFS_MDS};
use super::types::SessionId4;
use crate::error::{Nfs4Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Outcome of validating a sequence id on the serving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceResult {
    /// New request, execute it.
    Execute,
    /// Retransmission, answer with the cached reply.
    CachedReply(Vec<u8>),
}

/// Server-side view of one slot.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    /// Slot ID.
    pub slot_id: u32,
    /// Sequence id of the last executed request.
    pub last_sequence_id: u32,
    /// Reply to the last executed request, if it was kept.
    pub cached_reply: Option<Vec<u8>>,
    /// Last activity time.
    pub last_activity: Instant,
}

impl SessionSlot {
    pub fn new(slot_id: u32) -> Self {
        Self {
            slot_id,
            last_sequence_id: 0,
            cached_reply: None,
            last_activity: Instant::now(),
        }
    }

    /// Validate `sequence_id` against the slot and advance it.
    pub fn process_sequence(&mut self, sequence_id: u32) -> Result<SequenceResult> {
        self.last_activity = Instant::now();

        if sequence_id == self.last_sequence_id {
            return match &self.cached_reply {
                Some(reply) => {
                    debug!(slot = self.slot_id, sequence_id, "Replaying cached reply");
                    Ok(SequenceResult::CachedReply(reply.clone()))
                }
                None => Err(Nfs4Error::UncachedRetry {
                    slot: self.slot_id,
                    sequence: sequence_id,
                }),
            };
        }

        if sequence_id == self.last_sequence_id.wrapping_add(1) {
            self.last_sequence_id = sequence_id;
            self.cached_reply = None;
            return Ok(SequenceResult::Execute);
        }

        Err(Nfs4Error::SequenceMisordered {
            slot: self.slot_id,
            sequence: sequence_id,
        })
    }

    /// Keep the reply to the current request for retransmissions.
    pub fn cache_reply(&mut self, reply: Vec<u8>) {
        self.cached_reply = Some(reply);
    }
}

/// Client-side slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSlot {
    pub slot_id: u32,
    /// Last sequence id the server is known to have seen on this slot.
    pub sequence_id: u32,
    /// The last send on this slot got no reply.
    pub unconfirmed: bool,
}

/// Fixed pool of `max_requests` slots.
///
/// The semaphore admits at most one holder per slot; the free list says
/// which slot that holder gets. The lowest free slot id is handed out first.
#[derive(Debug)]
pub struct SlotTable {
    slots: Mutex<Vec<Option<ClientSlot>>>,
    permits: Arc<Semaphore>,
    max_requests: u32,
}

impl SlotTable {
    pub fn new(max_requests: u32) -> Arc<Self> {
        let max_requests = max_requests.max(1);
        let slots = (0..max_requests)
            .map(|slot_id| {
                Some(ClientSlot {
                    slot_id,
                    sequence_id: 0,
                    unconfirmed: false,
                })
            })
            .collect();
        Arc::new(Self {
            slots: Mutex::new(slots),
            permits: Arc::new(Semaphore::new(max_requests as usize)),
            max_requests,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Highest slot id the client may use.
    pub fn highest_slot_id(&self) -> u32 {
        self.max_requests - 1
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.max_requests as usize - self.permits.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> Result<SlotGuard> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Nfs4Error::StateConflict("session slot table is closed".into()))?;

        let slot = self
            .slots
            .lock()
            .iter_mut()
            .find_map(Option::take)
            .ok_or_else(|| Nfs4Error::StateConflict("no free slot despite permit".into()))?;

        Ok(SlotGuard {
            table: Arc::clone(self),
            slot: Some(slot),
            _permit: permit,
        })
    }

    /// Fail current and future waiters.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A held slot; returned to the table on drop.
#[derive(Debug)]
pub struct SlotGuard {
    table: Arc<SlotTable>,
    slot: Option<ClientSlot>,
    // Dropped after `Drop::drop` has put the slot back.
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn slot_id(&self) -> u32 {
        self.slot.map_or(0, |s| s.slot_id)
    }

    /// Advance and return the sequence id for the next send on this slot.
    pub fn next_sequence_id(&mut self) -> u32 {
        match self.slot.as_mut() {
            Some(slot) => {
                slot.sequence_id = slot.sequence_id.wrapping_add(1);
                slot.sequence_id
            }
            None => 0,
        }
    }

    /// Undo the last [`next_sequence_id`](Self::next_sequence_id) after a
    /// send that got no reply. The server may or may not have executed it,
    /// so the slot must be resynchronised before its next real request.
    pub fn rewind(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.sequence_id = slot.sequence_id.wrapping_sub(1);
            slot.unconfirmed = true;
        }
    }

    pub fn needs_resync(&self) -> bool {
        self.slot.map_or(false, |s| s.unconfirmed)
    }

    /// The server answered on this slot; client and server agree again.
    pub fn confirm(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.unconfirmed = false;
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(entry) = self.table.slots.lock().get_mut(slot.slot_id as usize) {
                *entry = Some(slot);
            }
        }
    }
}

/// pNFS roles granted by EXCHANGE_ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerRoles {
    pub metadata: bool,
    pub data: bool,
}

impl ServerRoles {
    pub fn from_flags(flags: u32) -> Self {
        Self {
            metadata: flags & EXCHGID4_FLAG_USE_PNFS_MDS != 0,
            data: flags & EXCHGID4_FLAG_USE_PNFS_DS != 0,
        }
    }
}

/// Client identity established by EXCHANGE_ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: u64,
    pub sequence_id: u32,
    pub roles: ServerRoles,
    pub server_owner: ServerOwner4,
}

/// An established session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId4,
    pub slots: Arc<SlotTable>,
    pub fore_chan_attrs: ChannelAttrs4,
    pub created_at: Instant,
}

impl Session {
    /// `fore_chan_attrs` as granted; callers clamp the slot count first.
    pub fn new(id: SessionId4, fore_chan_attrs: ChannelAttrs4) -> Self {
        Self {
            id,
            slots: SlotTable::new(fore_chan_attrs.max_requests),
            fore_chan_attrs,
            created_at: Instant::now(),
        }
    }
}

/// Lifecycle of a protocol instance.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Unestablished,
    Identified(ClientIdentity),
    Sessioned {
        identity: ClientIdentity,
        session: Arc<Session>,
    },
    Destroyed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unestablished => "unestablished",
            Self::Identified(_) => "identified",
            Self::Sessioned { .. } => "sessioned",
            Self::Destroyed => "destroyed",
        }
    }

    pub fn identity(&self) -> Option<&ClientIdentity> {
        match self {
            Self::Identified(identity) | Self::Sessioned { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            Self::Sessioned { session, .. } => Some(session),
            _ => None,
        }
    }
}
