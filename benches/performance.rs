use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use puerta_redis::cluster::arena::NodeArena;
use puerta_redis::cluster::parser;
use puerta_redis::cluster::slot::slot_of;
use puerta_redis::cluster::slot_index::SlotIndex;
use puerta_redis::Node;

/// Slot hashing across a range of key shapes, with and without a hash tag.
fn bench_slot_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_hashing");

    group.bench_function("plain_key", |b| {
        b.iter(|| black_box(slot_of(black_box(b"user:1000:session"))));
    });

    group.bench_function("hash_tagged_key", |b| {
        b.iter(|| black_box(slot_of(black_box(b"{user1000}.followers"))));
    });

    group.finish();
}

/// Slot index point lookups as the number of mapped ranges grows.
fn bench_slot_index_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_index");

    for node_count in [3usize, 16, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("node_for_slot", node_count),
            node_count,
            |b, &node_count| {
                let mut arena = NodeArena::new();
                let mut index = SlotIndex::new();
                let span = 16384 / node_count as u16;
                for i in 0..node_count {
                    let handle = arena.insert(Node::new("127.0.0.1".to_string(), 7000 + i as u16));
                    let start = i as u16 * span;
                    let end = if i + 1 == node_count {
                        16383
                    } else {
                        start + span - 1
                    };
                    index.map_range(start, end, handle);
                }

                b.iter(|| black_box(index.node_for_slot(black_box(8192))));
            },
        );
    }

    group.finish();
}

/// Parsing a full "CLUSTER NODES" reply as node count grows.
fn bench_topology_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_parse");

    for node_count in [3usize, 16, 64].iter() {
        let text = synthetic_cluster_nodes_text(*node_count);
        group.bench_with_input(
            BenchmarkId::new("parse_nodes_text", node_count),
            &text,
            |b, text| {
                b.iter(|| black_box(parser::parse_nodes_text(black_box(text)).unwrap()));
            },
        );
    }

    group.finish();
}

fn synthetic_cluster_nodes_text(node_count: usize) -> String {
    let span = 16384 / node_count as u16;
    let mut text = String::new();
    for i in 0..node_count {
        let start = i as u16 * span;
        let end = if i + 1 == node_count {
            16383
        } else {
            start + span - 1
        };
        let flags = if i == 0 { "myself,master" } else { "master" };
        text.push_str(&format!(
            "node{i} 127.0.0.1:{port}@{bus} {flags} - 0 0 {i} connected {start}-{end}\n",
            i = i,
            port = 7000 + i,
            bus = 17000 + i,
            flags = flags,
            start = start,
            end = end,
        ));
    }
    text
}

criterion_group!(
    benches,
    bench_slot_hashing,
    bench_slot_index_lookup,
    bench_topology_parse
);
criterion_main!(benches);
