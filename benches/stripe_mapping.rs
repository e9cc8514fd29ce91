//! Benchmarks for layout stripe mapping and attribute decoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nfs41_client::nfs::pnfs::NFL4_UFLG_DENSE;
use nfs41_client::nfs::{
    standard_bitmap, FileDeviceAddress, FileLayoutSegment, LayoutMap, Layoutiomode4, NfsFh4,
    NfsFtype4, NfsTime4, StandardAttributes, Stateid4, NFS4_UINT64_MAX,
};
use std::net::SocketAddr;
use std::sync::Arc;

fn layout(data_servers: usize, flags: u32) -> LayoutMap {
    let segment = FileLayoutSegment {
        offset: 0,
        length: NFS4_UINT64_MAX,
        iomode: Layoutiomode4::Read,
        device_id: [1; 16],
        nfl_util: 65536 | flags,
        first_stripe_index: 0,
        pattern_offset: 0,
        fh_list: (0..data_servers).map(|i| NfsFh4::new(vec![i as u8])).collect(),
    };
    let device = FileDeviceAddress {
        stripe_indices: (0..data_servers as u32).collect(),
        multipath: (0..data_servers)
            .map(|i| vec![SocketAddr::from(([10, 0, 0, i as u8], 2049))])
            .collect(),
    };
    let mut map = LayoutMap::new(Stateid4::new(1, [0; 12]), false);
    map.insert(segment, Arc::new(device));
    map
}

fn bench_stripe_for(c: &mut Criterion) {
    let mut group = c.benchmark_group("stripe_for");

    for size in [65536u64, 1048576, 16777216].iter() {
        group.throughput(Throughput::Bytes(*size));
        for (name, flags) in [("sparse", 0), ("dense", NFL4_UFLG_DENSE)] {
            let map = layout(8, flags);
            group.bench_with_input(BenchmarkId::new(name, size), size, |b, &size| {
                b.iter(|| map.stripe_for(black_box(12345), black_box(size)))
            });
        }
    }
    group.finish();
}

fn bench_attribute_decode(c: &mut Criterion) {
    let attrs = StandardAttributes {
        file_type: Some(NfsFtype4::Reg),
        size: 1 << 30,
        fileid: 4242,
        mode: 0o644,
        numlinks: 1,
        owner: "alice@example.net".into(),
        group: "staff@example.net".into(),
        space_used: 1 << 30,
        time_access: NfsTime4::new(1_700_000_000, 0),
        time_create: NfsTime4::new(1_700_000_000, 0),
        time_metadata: NfsTime4::new(1_700_000_000, 0),
        time_modify: NfsTime4::new(1_700_000_000, 0),
    };
    let encoded = attrs.to_attr4(&standard_bitmap()).unwrap();

    c.bench_function("standard_attributes_decode", |b| {
        b.iter(|| StandardAttributes::from_attr4(black_box(&encoded)))
    });
}

criterion_group!(benches, bench_stripe_for, bench_attribute_decode);
criterion_main!(benches);
