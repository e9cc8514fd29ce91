//! Integration tests for pNFS file layouts against mock data servers.

#[allow(dead_code)]
mod common;

use bytes::Bytes;
use common::*;
use nfs41_client::nfs::{DataServerEntry, Layoutiomode4, NfsOpNum4};
use std::sync::Arc;
use std::time::Duration;

/// Contents data server `index` holds for `data` under `striping`.
fn expected_on_ds(data: &[u8], striping: Striping, index: usize) -> Vec<u8> {
    let unit = striping.unit as usize;
    let count = striping.data_servers;
    let mut contents = Vec::new();
    for (su, chunk) in data.chunks(unit).enumerate().filter(|(su, _)| su % count == index) {
        let at = if striping.dense { (su / count) * unit } else { su * unit };
        contents.resize(at, 0);
        contents.extend_from_slice(chunk);
    }
    contents
}

#[tokio::test]
async fn test_mount_enables_pnfs_on_files_layout() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    let client = cluster.mount().await;

    assert!(client.pnfs().is_some());
    assert_eq!(client.device_ids(), &[DEVICE_ID]);
    assert_eq!(
        cluster.mds.tags(),
        [
            "exchange_id",
            "create_session",
            "get_lease_time",
            "get_root_fh",
            "get_supported_attributes",
            "get_layout_types",
            "get_devicelist",
            "reclaim_complete",
        ]
    );
}

#[tokio::test]
async fn test_pnfs_disabled_by_config() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    let data = pattern(10_000);
    cluster.seed_file("plain.bin", &data);

    let mut config = test_config();
    config.pnfs.enabled = false;
    let client = cluster.mount_with(config).await;

    assert!(client.pnfs().is_none());
    assert_eq!(client.read_file("plain.bin").await.unwrap(), data);
    assert!(cluster.mds.layout_iomodes().is_empty());
    assert_eq!(cluster.connector.total_attempts(), 0);
}

#[tokio::test]
async fn test_striped_read_from_data_servers() {
    init_tracing();
    let striping = Striping::default();
    let cluster = PnfsCluster::new(striping, &[]);
    let data = pattern(5 * 4096 + 123);
    cluster.seed_file("striped.bin", &data);
    let client = cluster.mount().await;

    let read = client.read_file("striped.bin").await.unwrap();
    assert_eq!(read, data);

    // File data came from the data servers only.
    assert_eq!(cluster.mds.op_count(NfsOpNum4::Read), 0);
    for ds in &cluster.data_servers {
        assert!(ds.op_count(NfsOpNum4::Read) > 0);
    }
    assert_eq!(cluster.mds.layout_iomodes(), [Layoutiomode4::Read]);
    assert_eq!(cluster.mds.layout_returns(), 1);
}

#[tokio::test]
async fn test_dense_read_from_data_servers() {
    let striping = Striping {
        dense: true,
        ..Striping::default()
    };
    let cluster = PnfsCluster::new(striping, &[]);
    let data = pattern(7 * 4096);
    cluster.seed_file("dense.bin", &data);
    let client = cluster.mount().await;

    assert_eq!(client.read_file("dense.bin").await.unwrap(), data);
    assert_eq!(
        cluster.data_servers[0].data_by_fh(&ds_fh(0)).unwrap().len(),
        3 * 4096
    );
}

#[tokio::test]
async fn test_read_stops_where_data_servers_hit_eof() {
    let striping = Striping::default();
    let cluster = PnfsCluster::new(striping, &[]);
    cluster.mds.add_file("short.bin", &pattern(16 * 4096));
    let stored = pattern(5000);
    for (i, ds) in cluster.data_servers.iter().enumerate() {
        ds.add_file_with_fh(&ds_fh(i), &expected_on_ds(&stored, striping, i));
    }
    let client = cluster.mount().await;

    assert_eq!(client.read_file("short.bin").await.unwrap(), stored);
    assert_eq!(cluster.mds.op_count(NfsOpNum4::Read), 0);
}

#[tokio::test]
async fn test_data_server_session_setup() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    cluster.seed_file("a.bin", &pattern(3 * 4096));
    let client = cluster.mount().await;
    client.read_file("a.bin").await.unwrap();

    for (i, ds) in cluster.data_servers.iter().enumerate() {
        let tags = ds.tags();
        assert_eq!(&tags[..2], ["exchange_id", "create_session"]);
        assert!(!tags.iter().any(|t| t == "get_lease_time"));

        match client.pnfs().unwrap().data_server_for(ds_addr(i)).await {
            DataServerEntry::Connected(session) => {
                assert_eq!(session.lease_time(), Some(Duration::from_secs(90)));
                assert!(session.server_roles().data);
            }
            DataServerEntry::Unreachable(reason) => panic!("unexpected: {}", reason),
        }
    }
}

#[tokio::test]
async fn test_device_resolved_once() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    cluster.seed_file("a.bin", &pattern(9000));
    cluster.seed_file("b.bin", &pattern(9000));
    let client = cluster.mount().await;

    client.read_file("a.bin").await.unwrap();
    client.read_file("b.bin").await.unwrap();
    client.read_file("a.bin").await.unwrap();

    assert_eq!(cluster.mds.getdeviceinfo_calls(), 1);
    assert_eq!(client.pnfs().unwrap().known_devices(), 1);
    for i in 0..3 {
        assert_eq!(cluster.connector.attempts(ds_addr(i)), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_access_connects_once() {
    let striping = Striping::default();
    let connector = MockConnector::with_delay(Duration::from_millis(20));
    let cluster = PnfsCluster::with_connector(striping, &[], connector);
    let data = pattern(12 * 4096);
    cluster.seed_file("wide.bin", &data);
    let client = cluster.mount().await;

    assert_eq!(client.read_file("wide.bin").await.unwrap(), data);

    for (i, ds) in cluster.data_servers.iter().enumerate() {
        assert_eq!(cluster.connector.attempts(ds_addr(i)), 1);
        assert_eq!(ds.session_count(), 1);
    }
    assert_eq!(client.pnfs().unwrap().connected_data_servers().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_lookups_share_one_instance() {
    let connector = MockConnector::with_delay(Duration::from_millis(50));
    let cluster = PnfsCluster::with_connector(Striping::default(), &[], connector);
    let client = cluster.mount().await;
    let pnfs = client.pnfs().unwrap();

    let (first, second) = tokio::join!(pnfs.data_server_for(ds_addr(0)), pnfs.data_server_for(ds_addr(0)));
    match (first, second) {
        (DataServerEntry::Connected(a), DataServerEntry::Connected(b)) => assert!(Arc::ptr_eq(&a, &b)),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(cluster.connector.attempts(ds_addr(0)), 1);
    assert_eq!(cluster.data_servers[0].session_count(), 1);
}

#[tokio::test]
async fn test_unreachable_data_server_falls_back_to_mds() {
    let striping = Striping::default();
    let cluster = PnfsCluster::new(striping, &[1]);
    let data = pattern(6 * 4096);
    cluster.seed_file("partial.bin", &data);
    let client = cluster.mount().await;

    assert_eq!(client.read_file("partial.bin").await.unwrap(), data);
    assert_eq!(client.read_file("partial.bin").await.unwrap(), data);

    // The failure is remembered, not retried per stripe or per read.
    assert_eq!(cluster.connector.attempts(ds_addr(1)), 1);
    assert!(matches!(
        client.pnfs().unwrap().data_server_for(ds_addr(1)).await,
        DataServerEntry::Unreachable(_)
    ));
    assert!(cluster.mds.op_count(NfsOpNum4::Read) > 0);
    assert_eq!(cluster.data_servers[1].session_count(), 0);
}

#[tokio::test]
async fn test_layout_unavailable_falls_back_to_mds() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    cluster.mds.set_layout(&[]);
    let data = pattern(10_000);
    cluster.seed_file("nolayout.bin", &data);
    let client = cluster.mount().await;

    assert_eq!(client.read_file("nolayout.bin").await.unwrap(), data);
    assert_eq!(cluster.mds.layout_iomodes(), [Layoutiomode4::Read]);
    assert_eq!(cluster.connector.total_attempts(), 0);
    assert_eq!(cluster.mds.layout_returns(), 0);
}

#[tokio::test]
async fn test_striped_write_with_layout_commit() {
    let striping = Striping {
        commit_through_mds: true,
        ..Striping::default()
    };
    let cluster = PnfsCluster::new(striping, &[]);
    let client = cluster.mount().await;

    let data = pattern(4 * 4096 + 500);
    client
        .write_file("out.bin", Bytes::from(data.clone()))
        .await
        .unwrap();

    for (i, ds) in cluster.data_servers.iter().enumerate() {
        assert_eq!(ds.data_by_fh(&ds_fh(i)).unwrap(), expected_on_ds(&data, striping, i));
    }
    assert!(cluster.mds.writes().is_empty());

    let commits = cluster.mds.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].offset, 0);
    assert_eq!(commits[0].length, data.len() as u64);
    assert_eq!(commits[0].new_offset, Some(data.len() as u64 - 1));
    assert_eq!(commits[0].stateid.other, [0xAA; 12]);

    assert_eq!(cluster.mds.layout_iomodes(), [Layoutiomode4::Rw]);
    assert_eq!(cluster.mds.layout_returns(), 1);
    assert_eq!(cluster.mds.open_count(), 0);
}

#[tokio::test]
async fn test_data_server_commit_skips_layout_commit() {
    let striping = Striping {
        dense: true,
        ..Striping::default()
    };
    let cluster = PnfsCluster::new(striping, &[]);
    let client = cluster.mount().await;

    let data = pattern(8 * 4096);
    client
        .write_file("dense-out.bin", Bytes::from(data.clone()))
        .await
        .unwrap();

    for (i, ds) in cluster.data_servers.iter().enumerate() {
        assert_eq!(ds.data_by_fh(&ds_fh(i)).unwrap(), expected_on_ds(&data, striping, i));
    }
    assert!(cluster.mds.commits().is_empty());
}

#[tokio::test]
async fn test_write_io_size_splits_requests() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    let mut config = test_config();
    config.pnfs.io_size = 1000;
    let client = cluster.mount_with(config).await;

    let data = pattern(3 * 4096);
    client
        .write_file("small-io.bin", Bytes::from(data.clone()))
        .await
        .unwrap();

    for ds in &cluster.data_servers {
        let writes = ds.writes();
        assert_eq!(writes.len(), 5);
        assert!(writes.iter().all(|w| w.len <= 1000));
    }
}

#[tokio::test]
async fn test_write_to_unreachable_stripe_goes_to_mds() {
    let striping = Striping::default();
    let cluster = PnfsCluster::new(striping, &[2]);
    let client = cluster.mount().await;

    let data = pattern(6 * 4096);
    client
        .write_file("fallback.bin", Bytes::from(data.clone()))
        .await
        .unwrap();

    let mut mds_offsets: Vec<u64> = cluster.mds.writes().iter().map(|w| w.offset).collect();
    mds_offsets.sort_unstable();
    assert_eq!(mds_offsets, [2 * 4096, 5 * 4096]);
    assert!(cluster.data_servers[2].writes().is_empty());
    assert_eq!(
        cluster.data_servers[0].data_by_fh(&ds_fh(0)).unwrap(),
        expected_on_ds(&data, striping, 0)
    );
}

#[tokio::test]
async fn test_unmount_destroys_data_server_sessions() {
    let cluster = PnfsCluster::new(Striping::default(), &[]);
    cluster.seed_file("a.bin", &pattern(3 * 4096));
    let client = cluster.mount().await;
    client.read_file("a.bin").await.unwrap();

    client.unmount().await.unwrap();

    for ds in &cluster.data_servers {
        assert_eq!(ds.destroyed_sessions(), 1);
        assert_eq!(ds.destroyed_clients(), 1);
        assert_eq!(ds.session_count(), 0);
    }
    assert_eq!(cluster.mds.destroyed_sessions(), 1);
    assert!(cluster.mds.is_closed());
}
