//! pNFS file layouts.
//!
//! The metadata server hands out layouts that stripe a file across data
//! servers. This module decodes the file-layout bodies, maps byte ranges to
//! stripes, and keeps two load-once caches: device id to data server
//! addresses, and data server address to a connected [`SessionClient`].

use super::client::{ClientRole, SessionClient};
use super::compound::{CompoundBuilder, NfsOpNum4, OpResult};
use super::protocol::XdrCodec;
use super::transport::Connector;
use super::types::*;
use crate::config::ClientConfig;
use crate::error::{Nfs4Error, Result};
use crate::observability;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Low bits of `nfl_util` carrying flags.
pub const NFL4_UFLG_MASK: u32 = 0x0000_003F;
/// Data servers store stripes packed, without holes.
pub const NFL4_UFLG_DENSE: u32 = 0x0000_0001;
/// LAYOUTCOMMIT must go through the metadata server.
pub const NFL4_UFLG_COMMIT_THRU_MDS: u32 = 0x0000_0002;
/// Remaining bits of `nfl_util`: the stripe unit.
pub const NFL4_UFLG_STRIPE_UNIT_SIZE_MASK: u32 = 0xFFFF_FFC0;

const DEVICE_INFO_MAXCOUNT: u32 = 64 * 1024;

// ============================================================================
// Layout and device bodies
// ============================================================================

/// Decoded `nfsv4_1_file_layout4` plus the range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayoutSegment {
    pub offset: u64,
    pub length: u64,
    pub iomode: Layoutiomode4,
    pub device_id: DeviceId4,
    pub nfl_util: u32,
    pub first_stripe_index: u32,
    pub pattern_offset: u64,
    pub fh_list: Vec<NfsFh4>,
}

impl FileLayoutSegment {
    pub fn decode(layout: &Layout4) -> Result<Self> {
        if layout.layout_type != Layouttype4::NfsV41Files as u32 {
            return Err(Nfs4Error::MalformedLayout(format!(
                "layout type {} is not NFSV4_1_FILES",
                layout.layout_type
            )));
        }

        let mut xdr = XdrCodec::from_bytes(layout.body.clone());
        let device_id = xdr.decode_array::<NFS4_DEVICEID4_SIZE>().map_err(malformed)?;
        let nfl_util = xdr.decode_u32().map_err(malformed)?;
        let first_stripe_index = xdr.decode_u32().map_err(malformed)?;
        let pattern_offset = xdr.decode_u64().map_err(malformed)?;
        let count = xdr.decode_count(4).map_err(malformed)?;
        let mut fh_list = Vec::with_capacity(count);
        for _ in 0..count {
            let fh = xdr.decode_opaque().map_err(malformed)?;
            if fh.len() > NfsFh4::MAX_SIZE {
                return Err(Nfs4Error::MalformedLayout(format!("{}-byte file handle", fh.len())));
            }
            fh_list.push(NfsFh4::new(fh));
        }
        if fh_list.is_empty() {
            return Err(Nfs4Error::MalformedLayout("empty file handle list".into()));
        }

        Ok(Self {
            offset: layout.offset,
            length: layout.length,
            iomode: layout.iomode,
            device_id,
            nfl_util,
            first_stripe_index,
            pattern_offset,
            fh_list,
        })
    }

    /// Opaque layout body, as a server would send it.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut xdr = XdrCodec::new();
        xdr.encode_opaque_fixed(&self.device_id);
        xdr.encode_u32(self.nfl_util);
        xdr.encode_u32(self.first_stripe_index);
        xdr.encode_u64(self.pattern_offset);
        xdr.encode_u32(self.fh_list.len() as u32);
        for fh in &self.fh_list {
            xdr.encode_opaque(fh.data());
        }
        xdr.into_bytes()
    }

    pub fn to_layout4(&self) -> Layout4 {
        Layout4 {
            offset: self.offset,
            length: self.length,
            iomode: self.iomode,
            layout_type: Layouttype4::NfsV41Files as u32,
            body: self.encode_body(),
        }
    }

    pub fn stripe_unit(&self) -> u64 {
        u64::from(self.nfl_util & NFL4_UFLG_STRIPE_UNIT_SIZE_MASK)
    }

    pub fn is_dense(&self) -> bool {
        self.nfl_util & NFL4_UFLG_DENSE != 0
    }

    pub fn commit_through_mds(&self) -> bool {
        self.nfl_util & NFL4_UFLG_COMMIT_THRU_MDS != 0
    }

    /// First byte past the segment. An all-ones length reaches end of file.
    pub fn end(&self) -> u64 {
        if self.length == NFS4_UINT64_MAX {
            u64::MAX
        } else {
            self.offset.saturating_add(self.length)
        }
    }

    pub fn covers(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

/// Decoded `nfsv4_1_file_layout_ds_addr4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDeviceAddress {
    /// Stripe index to multipath list index.
    pub stripe_indices: Vec<u32>,
    /// Equivalent addresses of each data server.
    pub multipath: Vec<Vec<SocketAddr>>,
}

impl FileDeviceAddress {
    pub fn decode(addr: &DeviceAddr4) -> Result<Self> {
        if addr.layout_type != Layouttype4::NfsV41Files as u32 {
            return Err(Nfs4Error::MalformedLayout(format!(
                "device type {} is not NFSV4_1_FILES",
                addr.layout_type
            )));
        }

        let mut xdr = XdrCodec::from_bytes(addr.body.clone());
        let stripe_indices = xdr.decode_u32_array().map_err(malformed)?;
        let servers = xdr.decode_count(4).map_err(malformed)?;
        let mut multipath = Vec::with_capacity(servers);
        for _ in 0..servers {
            let paths = xdr.decode_count(8).map_err(malformed)?;
            let mut addresses = Vec::with_capacity(paths);
            for _ in 0..paths {
                let netid = xdr.decode_string().map_err(malformed)?;
                let uaddr = xdr.decode_string().map_err(malformed)?;
                addresses.push(parse_universal_address(&netid, &uaddr)?);
            }
            multipath.push(addresses);
        }

        if let Some(bad) = stripe_indices.iter().find(|&&i| i as usize >= multipath.len()) {
            return Err(Nfs4Error::MalformedLayout(format!(
                "stripe index {} beyond {} data servers",
                bad,
                multipath.len()
            )));
        }

        Ok(Self {
            stripe_indices,
            multipath,
        })
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut xdr = XdrCodec::new();
        xdr.encode_u32_array(&self.stripe_indices);
        xdr.encode_u32(self.multipath.len() as u32);
        for addresses in &self.multipath {
            xdr.encode_u32(addresses.len() as u32);
            for addr in addresses {
                let netid = if addr.is_ipv4() { "tcp" } else { "tcp6" };
                xdr.encode_string(netid);
                xdr.encode_string(&universal_address(*addr));
            }
        }
        xdr.into_bytes()
    }

    pub fn stripe_count(&self) -> usize {
        self.stripe_indices.len()
    }

    /// Addresses of the data server holding stripe `index`.
    pub fn servers_for(&self, index: u32) -> Result<&[SocketAddr]> {
        self.stripe_indices
            .get(index as usize)
            .and_then(|&ds| self.multipath.get(ds as usize))
            .map(Vec::as_slice)
            .ok_or_else(|| Nfs4Error::MalformedLayout(format!("no data server for stripe {}", index)))
    }
}

fn malformed(e: Nfs4Error) -> Nfs4Error {
    Nfs4Error::MalformedLayout(e.to_string())
}

/// Parse an RFC 5665 universal address (`h1.h2.h3.h4.p1.p2` or `ipv6.p1.p2`).
pub fn parse_universal_address(netid: &str, uaddr: &str) -> Result<SocketAddr> {
    let bad = || Nfs4Error::MalformedLayout(format!("bad {} universal address '{}'", netid, uaddr));

    let mut parts = uaddr.rsplitn(3, '.');
    let low: u16 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let high: u16 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let host: IpAddr = parts.next().and_then(|h| h.parse().ok()).ok_or_else(bad)?;
    if high > 255 || low > 255 {
        return Err(bad());
    }

    Ok(SocketAddr::new(host, (high << 8) | low))
}

/// Format `addr` as a universal address.
pub fn universal_address(addr: SocketAddr) -> String {
    let port = addr.port();
    format!("{}.{}.{}", addr.ip(), port >> 8, port & 0xff)
}

// ============================================================================
// Stripe mapping
// ============================================================================

/// One contiguous piece of a byte range, served by one data server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripe {
    pub device_id: DeviceId4,
    /// Stripe index within the device's pattern.
    pub index: u32,
    /// File handle to use on the data server.
    pub fh: NfsFh4,
    /// Multipath addresses of the data server.
    pub servers: Vec<SocketAddr>,
    pub file_offset: u64,
    /// Offset to send to the data server.
    pub ds_offset: u64,
    pub length: u64,
    pub commit_through_mds: bool,
}

#[derive(Debug, Clone)]
struct LayoutEntry {
    segment: FileLayoutSegment,
    device: Arc<FileDeviceAddress>,
}

/// Layout segments of one file, keyed by starting offset.
#[derive(Debug, Clone)]
pub struct LayoutMap {
    stateid: Stateid4,
    return_on_close: bool,
    segments: BTreeMap<u64, LayoutEntry>,
}

impl LayoutMap {
    pub fn new(stateid: Stateid4, return_on_close: bool) -> Self {
        Self {
            stateid,
            return_on_close,
            segments: BTreeMap::new(),
        }
    }

    /// Layout stateid for LAYOUTRETURN and LAYOUTCOMMIT.
    pub fn stateid(&self) -> Stateid4 {
        self.stateid
    }

    pub fn return_on_close(&self) -> bool {
        self.return_on_close
    }

    pub fn insert(&mut self, segment: FileLayoutSegment, device: Arc<FileDeviceAddress>) {
        self.segments.insert(segment.offset, LayoutEntry { segment, device });
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &FileLayoutSegment> {
        self.segments.values().map(|entry| &entry.segment)
    }

    fn entry_for(&self, offset: u64) -> Option<&LayoutEntry> {
        self.segments
            .range(..=offset)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.segment.covers(offset))
    }

    /// Split `[offset, offset + length)` into stripes in ascending order.
    ///
    /// The stripes cover the range exactly. `NoLayout` names the first byte
    /// no segment covers.
    pub fn stripe_for(&self, offset: u64, length: u64) -> Result<Vec<Stripe>> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| Nfs4Error::InvalidRequest(format!("range {}+{} overflows", offset, length)))?;

        let mut stripes = Vec::new();
        let mut cursor = offset;
        while cursor < end {
            let entry = self.entry_for(cursor).ok_or(Nfs4Error::NoLayout(cursor))?;
            let segment = &entry.segment;

            let unit = segment.stripe_unit();
            if unit == 0 {
                return Err(Nfs4Error::MalformedLayout("zero stripe unit".into()));
            }
            let stripe_count = entry.device.stripe_count() as u64;
            if stripe_count == 0 {
                return Err(Nfs4Error::MalformedLayout("device without stripes".into()));
            }
            let relative = cursor.checked_sub(segment.pattern_offset).ok_or_else(|| {
                Nfs4Error::MalformedLayout(format!(
                    "offset {} precedes pattern offset {}",
                    cursor, segment.pattern_offset
                ))
            })?;

            let su_number = relative / unit;
            let index = ((su_number + u64::from(segment.first_stripe_index)) % stripe_count) as u32;
            let unit_end = segment
                .pattern_offset
                .saturating_add((su_number + 1).saturating_mul(unit));
            let chunk_end = end.min(unit_end).min(segment.end());

            let ds_offset = if segment.is_dense() {
                (su_number / stripe_count) * unit + relative % unit
            } else {
                cursor
            };

            let fh = match segment.fh_list.as_slice() {
                [only] => only.clone(),
                list => list.get(index as usize).cloned().ok_or_else(|| {
                    Nfs4Error::MalformedLayout(format!(
                        "{} file handles for stripe index {}",
                        list.len(),
                        index
                    ))
                })?,
            };

            stripes.push(Stripe {
                device_id: segment.device_id,
                index,
                fh,
                servers: entry.device.servers_for(index)?.to_vec(),
                file_offset: cursor,
                ds_offset,
                length: chunk_end - cursor,
                commit_through_mds: segment.commit_through_mds(),
            });
            cursor = chunk_end;
        }

        Ok(stripes)
    }
}

// ============================================================================
// Topology manager
// ============================================================================

/// Cached connection state of one data server.
#[derive(Debug, Clone)]
pub enum DataServerEntry {
    Connected(Arc<SessionClient>),
    /// Connecting or session setup failed; kept for the mount's lifetime.
    Unreachable(String),
}

/// Layouts, devices and data server sessions of one mount.
pub struct PnfsManager {
    mds: Arc<SessionClient>,
    connector: Arc<dyn Connector>,
    config: Arc<ClientConfig>,
    devices: DashMap<DeviceId4, Arc<OnceCell<Arc<FileDeviceAddress>>>>,
    data_servers: DashMap<SocketAddr, Arc<OnceCell<DataServerEntry>>>,
}

impl PnfsManager {
    pub fn new(mds: Arc<SessionClient>, connector: Arc<dyn Connector>, config: Arc<ClientConfig>) -> Self {
        Self {
            mds,
            connector,
            config,
            devices: DashMap::new(),
            data_servers: DashMap::new(),
        }
    }

    /// LAYOUTGET for the whole file, resolving devices not seen before.
    pub async fn get_layout(&self, fh: &NfsFh4, stateid: Stateid4, iomode: Layoutiomode4) -> Result<LayoutMap> {
        let pnfs = &self.config.pnfs;
        let request = CompoundBuilder::new()
            .with_tag("layoutget")
            .with_putfh(fh)
            .with_layoutget(
                iomode,
                0,
                NFS4_UINT64_MAX,
                pnfs.layout_min_length,
                stateid,
                pnfs.layout_maxcount,
            )
            .build();
        let response = self.mds.dispatch(&request).await?;

        let (return_on_close, layout_stateid, layouts) = match response.result_of(NfsOpNum4::Layoutget)? {
            OpResult::Layoutget {
                return_on_close,
                stateid,
                layouts,
            } => (*return_on_close, *stateid, layouts),
            other => return Err(Nfs4Error::xdr(format!("unexpected LAYOUTGET result: {:?}", other))),
        };

        let mut map = LayoutMap::new(layout_stateid, return_on_close);
        for layout in layouts {
            let segment = FileLayoutSegment::decode(layout)?;
            let device = self.resolve_device(segment.device_id).await?;
            debug!(
                offset = segment.offset,
                length = segment.length,
                unit = segment.stripe_unit(),
                stripes = device.stripe_count(),
                dense = segment.is_dense(),
                "Layout segment"
            );
            map.insert(segment, device);
        }
        Ok(map)
    }

    /// Device address for `id`; GETDEVICEINFO runs at most once per id.
    pub async fn resolve_device(&self, id: DeviceId4) -> Result<Arc<FileDeviceAddress>> {
        let cell = self.devices.entry(id).or_default().clone();
        let device = cell
            .get_or_try_init(|| async {
                let device = self.fetch_device(id).await?;
                Ok::<_, Nfs4Error>(Arc::new(device))
            })
            .await?;
        Ok(Arc::clone(device))
    }

    async fn fetch_device(&self, id: DeviceId4) -> Result<FileDeviceAddress> {
        let request = CompoundBuilder::new()
            .with_tag("get_deviceinfo")
            .with_getdeviceinfo(id, DEVICE_INFO_MAXCOUNT)
            .build();
        let response = self.mds.dispatch(&request).await?;
        let device = match response.result_of(NfsOpNum4::Getdeviceinfo)? {
            OpResult::Getdeviceinfo { device_addr, .. } => FileDeviceAddress::decode(device_addr)?,
            other => return Err(Nfs4Error::xdr(format!("unexpected GETDEVICEINFO result: {:?}", other))),
        };
        info!(
            device = %hex(&id),
            stripes = device.stripe_count(),
            servers = device.multipath.len(),
            "Device resolved"
        );
        Ok(device)
    }

    /// Devices resolved so far.
    pub fn known_devices(&self) -> usize {
        self.devices.iter().filter(|entry| entry.value().initialized()).count()
    }

    /// Session with the data server at `addr`, connecting on first use.
    pub async fn data_server_for(&self, addr: SocketAddr) -> DataServerEntry {
        let cell = self.data_servers.entry(addr).or_default().clone();
        cell.get_or_init(|| async {
            match self.connect_data_server(addr).await {
                Ok(client) => DataServerEntry::Connected(client),
                Err(e) => {
                    warn!(server = %addr, error = %e, "Data server unreachable");
                    DataServerEntry::Unreachable(e.to_string())
                }
            }
        })
        .await
        .clone()
    }

    async fn connect_data_server(&self, addr: SocketAddr) -> Result<Arc<SessionClient>> {
        let transport = self.connector.connect(addr).await?;
        let client = SessionClient::new(transport, Arc::clone(&self.config), ClientRole::Data);

        let setup = async {
            client.establish().await?;
            client.create_session().await
        };
        if let Err(e) = setup.await {
            if let Err(cleanup) = client.destroy().await {
                debug!(server = %addr, error = %cleanup, "Cleanup after failed setup");
            }
            return Err(e);
        }

        info!(server = %addr, "Data server session established");
        Ok(client)
    }

    /// First connected data server among a stripe's multipath addresses.
    async fn route(&self, stripe: &Stripe) -> Option<(SocketAddr, Arc<SessionClient>)> {
        for &addr in &stripe.servers {
            match self.data_server_for(addr).await {
                DataServerEntry::Connected(client) => return Some((addr, client)),
                DataServerEntry::Unreachable(reason) => {
                    debug!(server = %addr, reason = %reason, "Skipping unreachable path")
                }
            }
        }
        None
    }

    /// Read `[offset, offset + length)` from the data servers in parallel.
    ///
    /// Stripes whose data server is unreachable are read through the
    /// metadata server with `mds_fh`. The result stops at end of file.
    pub async fn read(
        &self,
        mds_fh: &NfsFh4,
        stateid: Stateid4,
        layout: &LayoutMap,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let stripes = layout.stripe_for(offset, length)?;
        let parts = try_join_all(stripes.iter().map(|stripe| self.read_stripe(mds_fh, stateid, stripe))).await?;

        let mut data = Vec::with_capacity(parts.iter().map(Vec::len).sum());
        for (stripe, part) in stripes.iter().zip(parts) {
            let short = (part.len() as u64) < stripe.length;
            data.extend_from_slice(&part);
            if short {
                break;
            }
        }
        Ok(data)
    }

    async fn read_stripe(&self, mds_fh: &NfsFh4, stateid: Stateid4, stripe: &Stripe) -> Result<Vec<u8>> {
        let io_size = u64::from(self.config.pnfs.io_size);
        match self.route(stripe).await {
            Some((addr, ds)) => {
                let data = read_range(&ds, &stripe.fh, stateid, stripe.ds_offset, stripe.length, io_size).await?;
                observability::record_pnfs_io(addr, "read", data.len() as u64);
                Ok(data)
            }
            None => {
                observability::record_mds_fallback("unreachable");
                read_range(&self.mds, mds_fh, stateid, stripe.file_offset, stripe.length, io_size).await
            }
        }
    }

    /// Write `data` at `offset` through the data servers in parallel.
    ///
    /// Returns whether any written stripe needs LAYOUTCOMMIT through the
    /// metadata server.
    pub async fn write(
        &self,
        mds_fh: &NfsFh4,
        stateid: Stateid4,
        layout: &LayoutMap,
        offset: u64,
        data: Bytes,
    ) -> Result<bool> {
        let stripes = layout.stripe_for(offset, data.len() as u64)?;
        let writes = stripes.iter().map(|stripe| {
            let start = (stripe.file_offset - offset) as usize;
            let chunk = data.slice(start..start + stripe.length as usize);
            self.write_stripe(mds_fh, stateid, stripe, chunk)
        });
        try_join_all(writes).await?;
        Ok(stripes.iter().any(|stripe| stripe.commit_through_mds))
    }

    async fn write_stripe(&self, mds_fh: &NfsFh4, stateid: Stateid4, stripe: &Stripe, chunk: Bytes) -> Result<()> {
        let io_size = u64::from(self.config.pnfs.io_size);
        match self.route(stripe).await {
            Some((addr, ds)) => {
                let written = chunk.len() as u64;
                write_range(&ds, &stripe.fh, stateid, stripe.ds_offset, chunk, io_size).await?;
                observability::record_pnfs_io(addr, "write", written);
                Ok(())
            }
            None => {
                observability::record_mds_fallback("unreachable");
                write_range(&self.mds, mds_fh, stateid, stripe.file_offset, chunk, io_size).await
            }
        }
    }

    /// LAYOUTCOMMIT of `[0, end)` after writes ending at `end`.
    pub async fn commit_layout(&self, fh: &NfsFh4, layout: &LayoutMap, end: u64) -> Result<()> {
        if end == 0 {
            return Ok(());
        }
        let request = CompoundBuilder::new()
            .with_tag("layoutcommit")
            .with_putfh(fh)
            .with_layoutcommit(0, end, layout.stateid(), Some(end - 1))
            .build();
        self.mds.dispatch(&request).await?;
        debug!(end, "Layout committed");
        Ok(())
    }

    /// LAYOUTRETURN of the whole file.
    pub async fn return_layout(&self, fh: &NfsFh4, layout: &LayoutMap) -> Result<()> {
        let request = CompoundBuilder::new()
            .with_tag("layoutreturn")
            .with_putfh(fh)
            .with_layoutreturn(0, NFS4_UINT64_MAX, Vec::new(), layout.stateid())
            .build();
        self.mds.dispatch(&request).await?;
        Ok(())
    }

    /// Connected data server sessions.
    pub fn connected_data_servers(&self) -> Vec<(SocketAddr, Arc<SessionClient>)> {
        self.data_servers
            .iter()
            .filter_map(|entry| match entry.value().get() {
                Some(DataServerEntry::Connected(client)) => Some((*entry.key(), Arc::clone(client))),
                _ => None,
            })
            .collect()
    }

    /// Destroy every data server session; the first failure is returned.
    pub async fn destroy_all(&self) -> Result<()> {
        let clients = self.connected_data_servers();
        self.data_servers.clear();

        let mut first_error = None;
        for (addr, client) in clients {
            if let Err(e) = client.destroy().await {
                warn!(server = %addr, error = %e, "Data server teardown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// READ `length` bytes in `io_size` pieces, stopping early at end of file.
pub(crate) async fn read_range(
    client: &SessionClient,
    fh: &NfsFh4,
    stateid: Stateid4,
    offset: u64,
    length: u64,
    io_size: u64,
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(length.min(io_size) as usize);
    while (data.len() as u64) < length {
        let count = (length - data.len() as u64).min(io_size) as u32;
        let (chunk, eof) = client.read(fh, stateid, offset + data.len() as u64, count).await?;
        data.extend_from_slice(&chunk);
        if eof || chunk.is_empty() {
            break;
        }
    }
    Ok(data)
}

/// WRITE `data` in `io_size` pieces, resending whatever a short write left.
pub(crate) async fn write_range(
    client: &SessionClient,
    fh: &NfsFh4,
    stateid: Stateid4,
    offset: u64,
    data: Bytes,
    io_size: u64,
) -> Result<()> {
    let mut done = 0usize;
    while done < data.len() {
        let end = data.len().min(done + io_size as usize);
        let written = client
            .write(fh, stateid, offset + done as u64, data.slice(done..end))
            .await? as usize;
        if written == 0 {
            return Err(Nfs4Error::Transport(format!(
                "server accepted no bytes at offset {}",
                offset + done as u64
            )));
        }
        done += written.min(end - done);
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
