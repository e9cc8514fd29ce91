//! Mount-level client for NFSv4.1 servers.
//!
//! [`Nfs4Client`] owns the metadata server session and, when the server
//! offers file layouts, a [`PnfsManager`] that routes file data to the data
//! servers. Paths are relative to the configured export.

use crate::config::ClientConfig;
use crate::error::{Nfs4Error, Result};
use crate::nfs::attributes::{decode_fs_layout_types, decode_fs_locations, decode_supported_attrs, mode_attr};
use crate::nfs::client::{ClientRole, SessionClient};
use crate::nfs::pnfs::{read_range, write_range, PnfsManager};
use crate::nfs::transport::{Connector, RpcTransport, TcpConnector};
use crate::nfs::{
    attr_bits, AttrBitmap, CompoundBuilder, CreateHow4, DeviceId4, FsLocations4, Layoutiomode4,
    Layouttype4, NfsFh4, NfsOpNum4, NfsStatus, OpResult, OpenFlag4, OpenOwner4, ShareAccess4,
    StandardAttributes, Stateid4, Verifier4, STANDARD_ATTRIBUTES,
};
use crate::observability;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// READDIR `dircount` and `maxcount`.
const READDIR_BUFFER: u32 = 16384;

/// Devices requested per GETDEVICELIST.
const DEVICE_LIST_BATCH: u32 = 256;

const DIRECTORY_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// One READDIR entry with its decoded attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub attrs: StandardAttributes,
    pub is_directory: bool,
}

/// A file opened on the metadata server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    pub path: String,
    pub fh: NfsFh4,
    pub stateid: Stateid4,
}

/// A mounted NFSv4.1 export.
pub struct Nfs4Client {
    config: Arc<ClientConfig>,
    mds: Arc<SessionClient>,
    pnfs: Option<PnfsManager>,
    root: NfsFh4,
    supported: AttrBitmap,
    layout_types: Vec<u32>,
    device_ids: Vec<DeviceId4>,
    open_owner: Vec<u8>,
}

impl Nfs4Client {
    /// Connect over TCP and mount the configured export.
    pub async fn mount(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connector: Arc<dyn Connector> = Arc::new(TcpConnector::from_config(&config.server));
        let transport = connector.connect(config.server.address).await?;
        Self::mount_with(transport, connector, config).await
    }

    /// Mount over an existing transport; `connector` reaches data servers.
    pub async fn mount_with(
        transport: Arc<dyn RpcTransport>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let mds = SessionClient::new(transport, Arc::clone(&config), ClientRole::Metadata);

        match Self::setup(&mds, connector, &config).await {
            Ok(client) => Ok(client),
            Err(e) => {
                warn!(error = %e, "Mount failed");
                if let Err(cleanup) = mds.destroy().await {
                    debug!(error = %cleanup, "Teardown after failed mount");
                }
                Err(e)
            }
        }
    }

    async fn setup(
        mds: &Arc<SessionClient>,
        connector: Arc<dyn Connector>,
        config: &Arc<ClientConfig>,
    ) -> Result<Self> {
        let (client_id, _) = mds.establish().await?;
        mds.create_session().await?;

        let root = root_fh(mds, &config.server.export).await?;
        let supported = supported_attributes(mds, &root).await?;

        let is_mds = mds.server_roles().metadata;
        let (layout_types, device_ids) = if is_mds {
            let types = layout_types(mds, &root).await?;
            let devices = device_list(mds).await?;
            (types, devices)
        } else {
            (Vec::new(), Vec::new())
        };

        reclaim_complete(mds).await?;

        let files_layout = layout_types.contains(&(Layouttype4::NfsV41Files as u32));
        let pnfs = if config.pnfs.enabled && is_mds && files_layout {
            Some(PnfsManager::new(Arc::clone(mds), connector, Arc::clone(config)))
        } else {
            None
        };

        info!(
            server = %config.server.address,
            export = %config.server.export,
            client_id,
            pnfs = pnfs.is_some(),
            devices = device_ids.len(),
            "Export mounted"
        );

        let open_owner = format!("{}-{}", config.identity.owner_prefix, std::process::id()).into_bytes();
        Ok(Self {
            config: Arc::clone(config),
            mds: Arc::clone(mds),
            pnfs,
            root,
            supported,
            layout_types,
            device_ids,
            open_owner,
        })
    }

    pub fn root_fh(&self) -> &NfsFh4 {
        &self.root
    }

    /// SUPPORTED_ATTRS reported for the export root.
    pub fn supported_attributes(&self) -> &AttrBitmap {
        &self.supported
    }

    /// FS_LAYOUT_TYPES of the export; empty unless the server is an MDS.
    pub fn layout_types(&self) -> &[u32] {
        &self.layout_types
    }

    /// Devices listed at mount time.
    pub fn device_ids(&self) -> &[DeviceId4] {
        &self.device_ids
    }

    pub fn pnfs(&self) -> Option<&PnfsManager> {
        self.pnfs.as_ref()
    }

    pub fn session_client(&self) -> &Arc<SessionClient> {
        &self.mds
    }

    /// Resolve `path` to a file handle.
    pub async fn lookup(&self, path: &str) -> Result<NfsFh4> {
        let request = CompoundBuilder::new()
            .with_tag("lookup")
            .with_putfh(&self.root)
            .with_lookup_path(path)
            .with_getfh()
            .build();
        let response = self.mds.dispatch(&request).await?;
        Ok(response.getfh()?.clone())
    }

    pub async fn getattr(&self, path: &str) -> Result<StandardAttributes> {
        let request = CompoundBuilder::new()
            .with_tag("getattr")
            .with_putfh(&self.root)
            .with_lookup_path(path)
            .with_getattr(&self.standard_bits())
            .build();
        let response = self.mds.dispatch(&request).await?;
        StandardAttributes::from_attr4(response.getattr()?)
    }

    /// List a directory, following READDIR cookies to the end.
    pub async fn readdir(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let dir = self.lookup(path).await?;
        let bitmap = AttrBitmap::from_bits(&self.standard_bits());

        let mut listing = Vec::new();
        let mut cookie = 0u64;
        let mut verifier = Verifier4::default();
        loop {
            let request = CompoundBuilder::new()
                .with_tag("readdir")
                .with_putfh(&dir)
                .with_readdir(cookie, verifier, READDIR_BUFFER, READDIR_BUFFER, bitmap.clone())
                .build();
            let response = self.mds.dispatch(&request).await?;
            let (cookieverf, entries, eof) = match response.result_of(NfsOpNum4::Readdir)? {
                OpResult::Readdir {
                    cookieverf,
                    entries,
                    eof,
                } => (*cookieverf, entries, *eof),
                other => return Err(Nfs4Error::xdr(format!("unexpected READDIR result: {:?}", other))),
            };

            for entry in entries {
                let attrs = StandardAttributes::from_attr4(&entry.attrs)?;
                listing.push(DirectoryEntry {
                    name: entry.name.clone(),
                    is_directory: attrs.is_directory(),
                    attrs,
                });
            }

            if eof {
                break;
            }
            let last = entries
                .last()
                .ok_or_else(|| Nfs4Error::xdr(format!("READDIR of '{}' made no progress", path)))?;
            cookie = last.cookie;
            verifier = cookieverf;
        }

        debug!(path, entries = listing.len(), "Directory listed");
        Ok(listing)
    }

    /// Create a directory with mode 0755.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let (parent, name) = split_parent(path)?;
        let request = CompoundBuilder::new()
            .with_tag("mkdir")
            .with_putfh(&self.root)
            .with_lookup_path(parent)
            .with_savefh()
            .with_getattr(&[attr_bits::CHANGE])
            .with_mkdir(name, mode_attr(DIRECTORY_MODE))
            .with_restorefh()
            .with_getattr(&[attr_bits::CHANGE])
            .build();
        self.mds.dispatch(&request).await?;
        info!(path, "Directory created");
        Ok(())
    }

    /// Open an existing file for reading.
    pub async fn open(&self, path: &str) -> Result<OpenFile> {
        self.open_with(path, "open_read", ShareAccess4::READ, OpenFlag4::NoCreate)
            .await
    }

    /// Open `path` for reading and writing, creating it with mode 0644.
    pub async fn create(&self, path: &str) -> Result<OpenFile> {
        let how = OpenFlag4::Create(CreateHow4::Unchecked(mode_attr(FILE_MODE)));
        self.open_with(path, "open_create", ShareAccess4::BOTH, how).await
    }

    async fn open_with(&self, path: &str, tag: &str, share: u32, how: OpenFlag4) -> Result<OpenFile> {
        let (parent, name) = split_parent(path)?;
        let request = CompoundBuilder::new()
            .with_tag(tag)
            .with_putfh(&self.root)
            .with_lookup_path(parent)
            .with_open(share, self.owner()?, how, name)
            .with_getfh()
            .build();
        let response = self.mds.dispatch(&request).await?;
        let open = OpenFile {
            path: path.to_string(),
            fh: response.getfh()?.clone(),
            stateid: response.open()?.stateid,
        };
        debug!(path, seqid = open.stateid.seqid, "File opened");
        Ok(open)
    }

    fn owner(&self) -> Result<OpenOwner4> {
        let identity = self
            .mds
            .identity()
            .ok_or_else(|| Nfs4Error::StateConflict("OPEN without a client id".into()))?;
        Ok(OpenOwner4 {
            clientid: identity.client_id,
            owner: self.open_owner.clone(),
        })
    }

    pub async fn close(&self, file: &OpenFile) -> Result<()> {
        let request = CompoundBuilder::new()
            .with_tag("close")
            .with_putfh(&file.fh)
            .with_close(file.stateid)
            .build();
        self.mds.dispatch(&request).await?;
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        let (parent, name) = split_parent(path)?;
        let request = CompoundBuilder::new()
            .with_tag("remove")
            .with_putfh(&self.root)
            .with_lookup_path(parent)
            .with_remove(name)
            .build();
        self.mds.dispatch(&request).await?;
        info!(path, "Removed");
        Ok(())
    }

    /// FS_LOCATIONS of `path`. Referrals are reported, not followed.
    pub async fn fs_locations(&self, path: &str) -> Result<FsLocations4> {
        let request = CompoundBuilder::new()
            .with_tag("fs_locations")
            .with_putfh(&self.root)
            .with_lookup_path(path)
            .with_getattr(&[attr_bits::FS_LOCATIONS])
            .build();
        let response = self.mds.dispatch(&request).await?;
        decode_fs_locations(response.getattr()?)
    }

    /// Read a whole file, through the data servers when pNFS is available.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.open(path).await?;
        let result = self.read_open_file(&file).await;
        let closed = self.close(&file).await;
        let data = result?;
        closed?;
        Ok(data)
    }

    async fn read_open_file(&self, file: &OpenFile) -> Result<Vec<u8>> {
        let size = self.file_size(&file.fh).await?;
        if size == 0 {
            return Ok(Vec::new());
        }

        if let Some(pnfs) = &self.pnfs {
            match pnfs.get_layout(&file.fh, file.stateid, Layoutiomode4::Read).await {
                Ok(layout) => {
                    let data = pnfs.read(&file.fh, file.stateid, &layout, 0, size).await;
                    let returned = pnfs.return_layout(&file.fh, &layout).await;
                    let data = data?;
                    returned?;
                    return Ok(data);
                }
                Err(e) => {
                    warn!(path = %file.path, error = %e, "No read layout, using the metadata server");
                    observability::record_mds_fallback("layout");
                }
            }
        }

        read_range(&self.mds, &file.fh, file.stateid, 0, size, self.io_size()).await
    }

    /// Create or overwrite `path` with `data`.
    pub async fn write_file(&self, path: &str, data: Bytes) -> Result<()> {
        let file = self.create(path).await?;
        let result = self.write_open_file(&file, data).await;
        let closed = self.close(&file).await;
        result?;
        closed
    }

    async fn write_open_file(&self, file: &OpenFile, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if let Some(pnfs) = &self.pnfs {
            match pnfs.get_layout(&file.fh, file.stateid, Layoutiomode4::Rw).await {
                Ok(layout) => {
                    let end = data.len() as u64;
                    let written = match pnfs.write(&file.fh, file.stateid, &layout, 0, data).await {
                        Ok(true) => pnfs.commit_layout(&file.fh, &layout, end).await,
                        Ok(false) => Ok(()),
                        Err(e) => Err(e),
                    };
                    let returned = pnfs.return_layout(&file.fh, &layout).await;
                    written?;
                    return returned;
                }
                Err(e) => {
                    warn!(path = %file.path, error = %e, "No write layout, using the metadata server");
                    observability::record_mds_fallback("layout");
                }
            }
        }

        write_range(&self.mds, &file.fh, file.stateid, 0, data, self.io_size()).await
    }

    async fn file_size(&self, fh: &NfsFh4) -> Result<u64> {
        let request = CompoundBuilder::new()
            .with_tag("getattr_size")
            .with_putfh(fh)
            .with_getattr(&[attr_bits::SIZE])
            .build();
        let response = self.mds.dispatch(&request).await?;
        Ok(StandardAttributes::from_attr4(response.getattr()?)?.size)
    }

    fn io_size(&self) -> u64 {
        u64::from(self.config.pnfs.io_size)
    }

    /// Standard attributes the server supports.
    fn standard_bits(&self) -> Vec<u32> {
        STANDARD_ATTRIBUTES
            .iter()
            .copied()
            .filter(|&bit| self.supported.is_empty() || self.supported.is_set(bit))
            .collect()
    }

    /// Destroy data server sessions, then the metadata server session.
    pub async fn unmount(self) -> Result<()> {
        let data_servers = match &self.pnfs {
            Some(pnfs) => pnfs.destroy_all().await,
            None => Ok(()),
        };
        let mds = self.mds.destroy().await;
        info!(server = %self.config.server.address, "Export unmounted");
        data_servers?;
        mds
    }
}

impl std::fmt::Debug for Nfs4Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nfs4Client")
            .field("server", &self.config.server.address)
            .field("export", &self.config.server.export)
            .field("pnfs", &self.pnfs.is_some())
            .finish()
    }
}

async fn root_fh(mds: &SessionClient, export: &str) -> Result<NfsFh4> {
    let request = CompoundBuilder::new()
        .with_tag("get_root_fh")
        .with_putrootfh()
        .with_lookup_path(export)
        .with_getfh()
        .build();
    let response = mds.dispatch(&request).await?;
    Ok(response.getfh()?.clone())
}

async fn supported_attributes(mds: &SessionClient, root: &NfsFh4) -> Result<AttrBitmap> {
    let request = CompoundBuilder::new()
        .with_tag("get_supported_attributes")
        .with_putfh(root)
        .with_getattr(&[attr_bits::SUPPORTED_ATTRS])
        .build();
    let response = mds.dispatch(&request).await?;
    decode_supported_attrs(response.getattr()?)
}

async fn layout_types(mds: &SessionClient, root: &NfsFh4) -> Result<Vec<u32>> {
    let request = CompoundBuilder::new()
        .with_tag("get_layout_types")
        .with_putfh(root)
        .with_getattr(&[attr_bits::FS_LAYOUT_TYPES])
        .build();
    let response = mds.dispatch(&request).await?;
    let types = decode_fs_layout_types(response.getattr()?)?;
    debug!(?types, "Layout types");
    Ok(types)
}

/// GETDEVICELIST until end of list. Servers without it yield an empty list.
async fn device_list(mds: &SessionClient) -> Result<Vec<DeviceId4>> {
    let mut devices = Vec::new();
    let mut cookie = 0u64;
    let mut verifier = Verifier4::default();
    loop {
        let request = CompoundBuilder::new()
            .with_tag("get_devicelist")
            .with_getdevicelist(DEVICE_LIST_BATCH, cookie, verifier)
            .build();
        let response = match mds.dispatch(&request).await {
            Ok(response) => response,
            Err(e) if e.status() == Some(NfsStatus::Notsupp) => {
                debug!("GETDEVICELIST not supported");
                return Ok(devices);
            }
            Err(e) => return Err(e),
        };

        match response.result_of(NfsOpNum4::Getdevicelist)? {
            OpResult::Getdevicelist {
                cookie: next,
                cookieverf,
                device_ids,
                eof,
            } => {
                devices.extend_from_slice(device_ids);
                if *eof || device_ids.is_empty() {
                    return Ok(devices);
                }
                cookie = *next;
                verifier = *cookieverf;
            }
            other => return Err(Nfs4Error::xdr(format!("unexpected GETDEVICELIST result: {:?}", other))),
        }
    }
}

async fn reclaim_complete(mds: &SessionClient) -> Result<()> {
    let request = CompoundBuilder::new()
        .with_tag("reclaim_complete")
        .with_reclaim_complete(false)
        .build();
    match mds.dispatch(&request).await {
        Ok(_) => Ok(()),
        Err(e) if e.status() == Some(NfsStatus::CompleteAlready) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Split `a/b/c` into `("a/b", "c")`.
fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    if name.is_empty() {
        return Err(Nfs4Error::InvalidRequest(format!("'{}' has no final component", path)));
    }
    Ok((parent, name))
}
