//! Test fixtures: configurations, layouts and file contents.

use super::mock_server::{MockServer, ServerOptions};
use super::MockConnector;
use nfs41_client::nfs::pnfs::{NFL4_UFLG_COMMIT_THRU_MDS, NFL4_UFLG_DENSE};
use nfs41_client::nfs::{DeviceId4, FileDeviceAddress, FileLayoutSegment, Layoutiomode4, NfsFh4, NFS4_UINT64_MAX};
use nfs41_client::resilience::RetryConfig;
use nfs41_client::{ClientConfig, Nfs4Client};
use std::net::SocketAddr;
use std::sync::Arc;

pub const DEVICE_ID: DeviceId4 = [0x42; 16];

/// Configuration for a mock metadata server, retrying without delay.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::for_server(SocketAddr::from(([127, 0, 0, 1], 2049)));
    config.retry = RetryConfig::immediate();
    config
}

/// Address of the `index`-th data server.
pub fn ds_addr(index: usize) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 10 + index as u8], 2049))
}

/// Handle the data servers use for stripe `index`.
pub fn ds_fh(index: usize) -> NfsFh4 {
    NfsFh4::new(format!("ds-fh-{}", index).into_bytes())
}

/// Deterministic, non-repeating-per-unit file contents.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

/// How a test cluster stripes files.
#[derive(Debug, Clone, Copy)]
pub struct Striping {
    pub data_servers: usize,
    pub unit: u32,
    pub dense: bool,
    pub commit_through_mds: bool,
}

impl Default for Striping {
    fn default() -> Self {
        Self {
            data_servers: 3,
            unit: 4096,
            dense: false,
            commit_through_mds: false,
        }
    }
}

impl Striping {
    pub fn segment(&self) -> FileLayoutSegment {
        let mut flags = 0;
        if self.dense {
            flags |= NFL4_UFLG_DENSE;
        }
        if self.commit_through_mds {
            flags |= NFL4_UFLG_COMMIT_THRU_MDS;
        }
        FileLayoutSegment {
            offset: 0,
            length: NFS4_UINT64_MAX,
            iomode: Layoutiomode4::Rw,
            device_id: DEVICE_ID,
            nfl_util: self.unit | flags,
            first_stripe_index: 0,
            pattern_offset: 0,
            fh_list: (0..self.data_servers).map(ds_fh).collect(),
        }
    }

    pub fn device(&self) -> FileDeviceAddress {
        FileDeviceAddress {
            stripe_indices: (0..self.data_servers as u32).collect(),
            multipath: (0..self.data_servers).map(|i| vec![ds_addr(i)]).collect(),
        }
    }
}

/// A metadata server, its data servers and a connector that reaches them.
pub struct PnfsCluster {
    pub mds: Arc<MockServer>,
    pub data_servers: Vec<Arc<MockServer>>,
    pub connector: Arc<MockConnector>,
    pub striping: Striping,
}

impl PnfsCluster {
    /// Build a cluster; data servers listed in `down` refuse connections.
    pub fn new(striping: Striping, down: &[usize]) -> Self {
        Self::with_connector(striping, down, MockConnector::new())
    }

    pub fn with_connector(striping: Striping, down: &[usize], connector: Arc<MockConnector>) -> Self {
        let mds = MockServer::new(ServerOptions::mds());
        mds.add_device(DEVICE_ID, &striping.device());
        mds.set_layout(&[striping.segment()]);

        let data_servers: Vec<_> = (0..striping.data_servers)
            .map(|i| {
                let ds = MockServer::new(ServerOptions::data_server());
                ds.add_file_with_fh(&ds_fh(i), &[]);
                if !down.contains(&i) {
                    connector.register(ds_addr(i), Arc::clone(&ds));
                }
                ds
            })
            .collect();

        Self {
            mds,
            data_servers,
            connector,
            striping,
        }
    }

    /// Store `data` as `path` on the metadata server and, at the offsets
    /// the layout gives them, on the data servers.
    pub fn seed_file(&self, path: &str, data: &[u8]) {
        self.mds.add_file(path, data);

        let unit = self.striping.unit as usize;
        let count = self.striping.data_servers;
        for (i, ds) in self.data_servers.iter().enumerate() {
            let mut contents = Vec::new();
            for (su, chunk) in data.chunks(unit).enumerate() {
                if su % count != i {
                    continue;
                }
                let at = if self.striping.dense { (su / count) * unit } else { su * unit };
                if contents.len() < at + chunk.len() {
                    contents.resize(at + chunk.len(), 0);
                }
                contents[at..at + chunk.len()].copy_from_slice(chunk);
            }
            ds.add_file_with_fh(&ds_fh(i), &contents);
        }
    }

    pub async fn mount(&self) -> Nfs4Client {
        self.mount_with(test_config()).await
    }

    pub async fn mount_with(&self, config: ClientConfig) -> Nfs4Client {
        Nfs4Client::mount_with(self.mds.clone(), self.connector.clone(), config)
            .await
            .expect("mount succeeds")
    }
}
