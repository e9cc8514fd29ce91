//! Session client.
//!
//! One [`SessionClient`] drives one server connection through the NFSv4.1
//! lifecycle:
//!
//! ```text
//! Unestablished --EXCHANGE_ID--> Identified --CREATE_SESSION--> Sessioned
//!                                                                   |
//!                          Destroyed <--DESTROY_SESSION/CLIENTID----+
//! ```
//!
//! While sessioned, [`SessionClient::dispatch`] stamps every compound with
//! SEQUENCE on a free slot and retries transient statuses. The same type
//! serves the metadata server and, in the data role, each pNFS data server.

use super::attributes::decode_lease_time;
use super::codec::{decode_compound_res, encode_compound_args, encode_compound_args_in_session};
use super::compound::*;
use super::error::NfsStatus;
use super::lease::{LeaseRenewer, Renewable};
use super::protocol::{OpaqueAuth, NFS_PROGRAM, NFS_V4, PROC_COMPOUND};
use super::session::{ClientIdentity, ServerRoles, Session, SessionState, SlotGuard};
use super::transport::RpcTransport;
use super::types::*;
use crate::config::ClientConfig;
use crate::error::{Nfs4Error, Result};
use crate::observability;
use crate::resilience::{RetryDecision, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Which side of a pNFS deployment an instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Metadata server, or a plain NFSv4.1 server.
    Metadata,
    /// pNFS data server.
    Data,
}

impl ClientRole {
    /// EXCHANGE_ID flags requested for this role.
    pub fn exchange_flags(self) -> u32 {
        match self {
            ClientRole::Metadata => EXCHGID4_FLAG_USE_PNFS_MDS | EXCHGID4_FLAG_USE_NON_PNFS,
            ClientRole::Data => EXCHGID4_FLAG_USE_PNFS_DS,
        }
    }
}

/// NFSv4.1 protocol instance bound to one transport.
pub struct SessionClient {
    transport: Arc<dyn RpcTransport>,
    config: Arc<ClientConfig>,
    role: ClientRole,
    credential: OpaqueAuth,
    retry: RetryPolicy,
    state: Mutex<SessionState>,
    lease: Mutex<Option<LeaseRenewer>>,
    lease_time: Mutex<Option<Duration>>,
    last_reply: Mutex<Instant>,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn RpcTransport>, config: Arc<ClientConfig>, role: ClientRole) -> Arc<Self> {
        let identity = &config.identity;
        let credential = OpaqueAuth::unix(identity.uid, identity.gid, &identity.gids, &identity.machine_name);
        let retry = RetryPolicy::new(config.retry.clone());

        Arc::new(Self {
            transport,
            config,
            role,
            credential,
            retry,
            state: Mutex::new(SessionState::default()),
            lease: Mutex::new(None),
            lease_time: Mutex::new(None),
            last_reply: Mutex::new(Instant::now()),
        })
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Name of the current lifecycle state.
    pub fn state_name(&self) -> &'static str {
        self.state.lock().name()
    }

    pub fn identity(&self) -> Option<ClientIdentity> {
        self.state.lock().identity().cloned()
    }

    /// pNFS roles granted by the server; none before EXCHANGE_ID.
    pub fn server_roles(&self) -> ServerRoles {
        self.state.lock().identity().map(|i| i.roles).unwrap_or_default()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.state.lock().session().cloned()
    }

    /// Lease interval the renewer runs at, once sessioned.
    pub fn lease_time(&self) -> Option<Duration> {
        *self.lease_time.lock()
    }

    /// EXCHANGE_ID: obtain a client id and the pNFS roles.
    pub async fn establish(&self) -> Result<(u64, u32)> {
        {
            let state = self.state.lock();
            if !matches!(*state, SessionState::Unestablished) {
                return Err(Nfs4Error::StateConflict(format!(
                    "EXCHANGE_ID while {}",
                    state.name()
                )));
            }
        }

        let identity = &self.config.identity;
        let owner = ClientOwner4 {
            verifier: Verifier4::random(),
            ownerid: owner_string(&identity.owner_prefix).into_bytes(),
        };
        let impl_id = NfsImplId4 {
            domain: identity.impl_domain.clone(),
            name: identity.impl_name.clone(),
            date: NfsTime4::now(),
        };

        let request = CompoundBuilder::new()
            .with_tag("exchange_id")
            .with_exchange_id(owner, self.role.exchange_flags(), Some(impl_id))
            .build();
        let response = self.send_compound(&request).await?;

        let result = match response.result_of(NfsOpNum4::ExchangeId)? {
            OpResult::ExchangeId(result) => result.clone(),
            other => return Err(Nfs4Error::xdr(format!("unexpected EXCHANGE_ID result: {:?}", other))),
        };

        let roles = ServerRoles::from_flags(result.flags);
        if self.role == ClientRole::Data && !roles.data {
            warn!(client_id = result.clientid, "Server did not grant the data server role");
        }
        match &result.server_impl_id {
            Some(server) => info!(
                client_id = result.clientid,
                server = %server.name,
                mds = roles.metadata,
                ds = roles.data,
                "Client id established"
            ),
            None => info!(
                client_id = result.clientid,
                mds = roles.metadata,
                ds = roles.data,
                "Client id established"
            ),
        }

        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Unestablished) {
            return Err(Nfs4Error::StateConflict(format!(
                "EXCHANGE_ID raced with another transition to {}",
                state.name()
            )));
        }
        *state = SessionState::Identified(ClientIdentity {
            client_id: result.clientid,
            sequence_id: result.sequenceid,
            roles,
            server_owner: result.server_owner,
        });
        Ok((result.clientid, result.sequenceid))
    }

    /// CREATE_SESSION, then start renewing the lease.
    pub async fn create_session(self: &Arc<Self>) -> Result<()> {
        let identity = {
            let state = self.state.lock();
            match &*state {
                SessionState::Identified(identity) => identity.clone(),
                SessionState::Sessioned { .. } => {
                    return Err(Nfs4Error::StateConflict("session already exists".into()))
                }
                other => {
                    return Err(Nfs4Error::StateConflict(format!(
                        "CREATE_SESSION while {}",
                        other.name()
                    )))
                }
            }
        };

        let settings = &self.config.session;
        let request = CompoundBuilder::new()
            .with_tag("create_session")
            .with_create_session(
                identity.client_id,
                identity.sequence_id,
                settings.fore_channel.to_attrs(),
                settings.back_channel.to_attrs(),
                settings.cb_program,
            )
            .build();
        let response = self.send_compound(&request).await?;

        let result = match response.result_of(NfsOpNum4::CreateSession)? {
            OpResult::CreateSession(result) => result.clone(),
            other => return Err(Nfs4Error::xdr(format!("unexpected CREATE_SESSION result: {:?}", other))),
        };

        let mut fore_chan_attrs = result.fore_chan_attrs;
        let requested = settings.fore_channel.max_requests;
        if fore_chan_attrs.max_requests > requested {
            warn!(
                granted = fore_chan_attrs.max_requests,
                requested,
                "Server granted more slots than requested"
            );
            fore_chan_attrs.max_requests = requested;
        }
        let session = Arc::new(Session::new(result.session_id, fore_chan_attrs));
        info!(
            session = %session.id,
            slots = session.slots.max_requests(),
            "Session created"
        );

        {
            let mut state = self.state.lock();
            if !matches!(*state, SessionState::Identified(_)) {
                return Err(Nfs4Error::StateConflict(format!(
                    "CREATE_SESSION raced with another transition to {}",
                    state.name()
                )));
            }
            *state = SessionState::Sessioned {
                identity: ClientIdentity {
                    sequence_id: identity.sequence_id.wrapping_add(1),
                    ..identity.clone()
                },
                session,
            };
        }

        let fallback = settings.lease_fallback;
        let lease = if identity.roles.metadata {
            match self.query_lease_time().await {
                Ok(lease) if !lease.is_zero() => lease,
                Ok(_) => fallback,
                Err(e) => {
                    warn!(error = %e, fallback_secs = fallback.as_secs(), "Lease time query failed");
                    fallback
                }
            }
        } else {
            fallback
        };

        *self.lease_time.lock() = Some(lease);
        let renewer = LeaseRenewer::spawn(Arc::downgrade(self), lease);
        if let Some(previous) = self.lease.lock().replace(renewer) {
            // Unreachable through the state machine; stop rather than leak.
            tokio::spawn(previous.stop());
        }
        debug!(lease_secs = lease.as_secs(), "Lease renewer started");
        Ok(())
    }

    async fn query_lease_time(&self) -> Result<Duration> {
        let request = CompoundBuilder::new()
            .with_tag("get_lease_time")
            .with_putrootfh()
            .with_getattr(&[attr_bits::LEASE_TIME])
            .build();
        let response = self.dispatch(&request).await?;
        let seconds = decode_lease_time(response.getattr()?)?;
        Ok(Duration::from_secs(u64::from(seconds)))
    }

    /// Send `request` in the session.
    ///
    /// A SEQUENCE is prepended on a free slot; callers must not include one.
    /// Waits while all slots are busy.
    pub async fn dispatch(&self, request: &CompoundRequest) -> Result<CompoundResponse> {
        if request.sequence().is_some() {
            return Err(Nfs4Error::InvalidRequest(format!(
                "compound '{}' must not carry its own SEQUENCE",
                request.tag
            )));
        }

        let session = {
            let state = self.state.lock();
            state.session().cloned().ok_or_else(|| {
                Nfs4Error::StateConflict(format!(
                    "compound '{}' needs a session, client is {}",
                    request.tag,
                    state.name()
                ))
            })?
        };

        let waiting = Instant::now();
        let mut slot = session.slots.acquire().await?;
        observability::record_slot_wait(waiting.elapsed());

        self.send_with_retry(request, Some((&session, &mut slot))).await
    }

    /// Send `request` outside any session (EXCHANGE_ID, CREATE_SESSION,
    /// DESTROY_SESSION, DESTROY_CLIENTID).
    pub async fn send_compound(&self, request: &CompoundRequest) -> Result<CompoundResponse> {
        self.send_with_retry(request, None).await
    }

    async fn send_with_retry(
        &self,
        request: &CompoundRequest,
        mut slot: Option<(&Session, &mut SlotGuard)>,
    ) -> Result<CompoundResponse> {
        if let Some((session, guard)) = slot.as_mut() {
            if guard.needs_resync() {
                self.resync_slot(*session, &mut **guard).await?;
            }
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            let (args, sequence) = match slot.as_mut() {
                Some((session, guard)) => {
                    let sequence = SequenceArgs4 {
                        session_id: session.id,
                        sequence_id: guard.next_sequence_id(),
                        slot_id: guard.slot_id(),
                        highest_slot_id: session.slots.highest_slot_id(),
                        cache_this: false,
                    };
                    (encode_compound_args_in_session(request, &sequence), Some(sequence))
                }
                None => (encode_compound_args(request), None),
            };

            debug!(
                tag = %request.tag,
                slot = sequence.map(|s| s.slot_id),
                sequence = sequence.map(|s| s.sequence_id),
                attempt = attempts,
                "Sending compound"
            );
            observability::record_compound(&request.tag);

            let reply = match self
                .transport
                .call(NFS_PROGRAM, NFS_V4, PROC_COMPOUND, &self.credential, args)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    if let Some((_, guard)) = slot.as_mut() {
                        guard.rewind();
                    }
                    return Err(e);
                }
            };
            let response = decode_compound_res(reply)?;
            *self.last_reply.lock() = Instant::now();

            if response.status.is_success() {
                return Ok(response);
            }

            match self.retry.classify(response.status) {
                RetryDecision::Retry(delay) if self.retry.allows_another(attempts) => {
                    warn!(
                        tag = %request.tag,
                        status = %response.status,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying compound"
                    );
                    observability::record_retry(response.status);
                    time::sleep(delay).await;
                }
                RetryDecision::Retry(_) => {
                    observability::record_compound_error(&request.tag, response.status);
                    return Err(Nfs4Error::RetriesExhausted {
                        tag: request.tag.clone(),
                        status: response.status,
                        attempts,
                    });
                }
                RetryDecision::Fatal => {
                    observability::record_compound_error(&request.tag, response.status);
                    return Err(fatal_error(&response, sequence.as_ref()));
                }
            }
        }
    }

    /// Bring a slot back in step after a send that got no reply.
    ///
    /// The lost sequence id is sent again with nothing but SEQUENCE. A fresh
    /// execution, a replayed reply and RETRY_UNCACHED_REP all mean the
    /// server now holds that id, so the next real request uses the one after.
    async fn resync_slot(&self, session: &Session, guard: &mut SlotGuard) -> Result<()> {
        let request = CompoundBuilder::new().with_tag("resync_slot").build();
        let sequence = SequenceArgs4 {
            session_id: session.id,
            sequence_id: guard.next_sequence_id(),
            slot_id: guard.slot_id(),
            highest_slot_id: session.slots.highest_slot_id(),
            cache_this: false,
        };
        debug!(
            slot = sequence.slot_id,
            sequence = sequence.sequence_id,
            "Resynchronising slot"
        );

        let args = encode_compound_args_in_session(&request, &sequence);
        let reply = match self
            .transport
            .call(NFS_PROGRAM, NFS_V4, PROC_COMPOUND, &self.credential, args)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                guard.rewind();
                return Err(e);
            }
        };
        let response = decode_compound_res(reply)?;
        *self.last_reply.lock() = Instant::now();

        let sequenced = response
            .results
            .first()
            .map_or(false, |r| r.op == NfsOpNum4::Sequence && r.status.is_success());
        if sequenced || response.status == NfsStatus::RetryUncachedRep {
            guard.confirm();
            Ok(())
        } else {
            Err(fatal_error(&response, Some(&sequence)))
        }
    }

    /// READ through this server.
    pub async fn read(&self, fh: &NfsFh4, stateid: Stateid4, offset: u64, count: u32) -> Result<(Bytes, bool)> {
        let request = CompoundBuilder::new()
            .with_tag("read")
            .with_putfh(fh)
            .with_read(stateid, offset, count)
            .build();
        let response = self.dispatch(&request).await?;
        match response.result_of(NfsOpNum4::Read)? {
            OpResult::Read { eof, data } => Ok((data.clone(), *eof)),
            other => Err(Nfs4Error::xdr(format!("unexpected READ result: {:?}", other))),
        }
    }

    /// FILE_SYNC WRITE through this server; returns the bytes written.
    pub async fn write(&self, fh: &NfsFh4, stateid: Stateid4, offset: u64, data: Bytes) -> Result<u32> {
        let request = CompoundBuilder::new()
            .with_tag("write")
            .with_putfh(fh)
            .with_write(stateid, offset, data)
            .build();
        let response = self.dispatch(&request).await?;
        match response.result_of(NfsOpNum4::Write)? {
            OpResult::Write { count, .. } => Ok(*count),
            other => Err(Nfs4Error::xdr(format!("unexpected WRITE result: {:?}", other))),
        }
    }

    /// Tear down session, client id and connection.
    ///
    /// Every step runs even when an earlier one fails; the first failure is
    /// returned.
    pub async fn destroy(&self) -> Result<()> {
        let renewer = self.lease.lock().take();
        if let Some(renewer) = renewer {
            renewer.stop().await;
        }

        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Destroyed);
        let mut first_error = None;

        if let Some(session) = previous.session() {
            let request = CompoundBuilder::new()
                .with_tag("destroy_session")
                .with_destroy_session(session.id)
                .build();
            if let Err(e) = self.send_compound(&request).await {
                warn!(session = %session.id, error = %e, "DESTROY_SESSION failed");
                first_error.get_or_insert(e);
            }
            session.slots.close();
        }

        if let Some(identity) = previous.identity() {
            let request = CompoundBuilder::new()
                .with_tag("destroy_clientid")
                .with_destroy_clientid(identity.client_id)
                .build();
            if let Err(e) = self.send_compound(&request).await {
                warn!(client_id = identity.client_id, error = %e, "DESTROY_CLIENTID failed");
                first_error.get_or_insert(e);
            }
        }

        self.transport.close().await;
        info!(role = ?self.role, was = previous.name(), "Client destroyed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Renewable for SessionClient {
    fn idle_for(&self) -> Duration {
        self.last_reply.lock().elapsed()
    }

    async fn renew(&self) -> Result<()> {
        let request = CompoundBuilder::new().with_tag("sequence").build();
        self.dispatch(&request).await.map(|_| ())
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("role", &self.role)
            .field("state", &self.state_name())
            .finish()
    }
}

fn fatal_error(response: &CompoundResponse, sequence: Option<&SequenceArgs4>) -> Nfs4Error {
    match (response.status, sequence) {
        (NfsStatus::SeqMisordered, Some(seq)) => Nfs4Error::SequenceMisordered {
            slot: seq.slot_id,
            sequence: seq.sequence_id,
        },
        (NfsStatus::RetryUncachedRep, Some(seq)) => Nfs4Error::UncachedRetry {
            slot: seq.slot_id,
            sequence: seq.sequence_id,
        },
        (status, _) => Nfs4Error::Protocol {
            status,
            tag: response.tag.clone(),
            op: response.failed_op(),
        },
    }
}

/// Client owner string: `<prefix>: <user>-<pid>@<host>`.
fn owner_string(prefix: &str) -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "<nobody>".to_string());
    format!("{}: {}-{}@{}", prefix, user, std::process::id(), hostname())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|name| name.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
