use core::hint::black_box;
use std::collections::BTreeMap;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use criterion::Throughput;
use hashbrown::HashMap as HashbrownMap;
use hat_trie::TrieConfig;
use hat_trie::TrieMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const SIZES: &[usize] = &[1 << 10, 1 << 15, 1 << 19];

fn keys(count: usize) -> Vec<String> {
    // Path-shaped keys with heavily shared prefixes, the workload a
    // HAT-trie is built for.
    let mut keys: Vec<String> = (0..count)
        .map(|i| format!("/srv/data/shard{:02}/segment{:06}", i % 32, i))
        .collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    keys.shuffle(&mut rng);
    keys
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for &size in SIZES {
        let keys = keys(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("hat_trie/{}", size), |b| {
            b.iter(|| {
                let mut map: TrieMap<u64> =
                    TrieMap::with_config(TrieConfig::new().burst_threshold(1024));
                for (i, key) in keys.iter().enumerate() {
                    map.insert(black_box(key), i as u64).unwrap();
                }
                black_box(map.len())
            });
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                let mut map = HashbrownMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(black_box(key.clone()), i as u64);
                }
                black_box(map.len())
            });
        });

        group.bench_function(format!("btreemap/{}", size), |b| {
            b.iter(|| {
                let mut map = BTreeMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(black_box(key.clone()), i as u64);
                }
                black_box(map.len())
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    for &size in SIZES {
        let keys = keys(size);

        let mut trie: TrieMap<u64> =
            TrieMap::with_config(TrieConfig::new().burst_threshold(1024));
        let mut hashbrown = HashbrownMap::new();
        let mut btree = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            trie.insert(key, i as u64).unwrap();
            hashbrown.insert(key.clone(), i as u64);
            btree.insert(key.clone(), i as u64);
        }

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("hat_trie/{}", size), |b| {
            b.iter(|| {
                let mut found = 0u64;
                for key in &keys {
                    if trie.get(black_box(key)).is_some() {
                        found += 1;
                    }
                }
                black_box(found)
            });
        });

        group.bench_function(format!("hashbrown/{}", size), |b| {
            b.iter(|| {
                let mut found = 0u64;
                for key in &keys {
                    if hashbrown.get(black_box(key)).is_some() {
                        found += 1;
                    }
                }
                black_box(found)
            });
        });

        group.bench_function(format!("btreemap/{}", size), |b| {
            b.iter(|| {
                let mut found = 0u64;
                for key in &keys {
                    if btree.get(black_box(key)).is_some() {
                        found += 1;
                    }
                }
                black_box(found)
            });
        });
    }
    group.finish();
}

fn bench_prefix_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_scan");
    for &size in SIZES {
        let keys = keys(size);

        let mut trie: TrieMap<u64> =
            TrieMap::with_config(TrieConfig::new().burst_threshold(1024));
        let mut btree = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            trie.insert(key, i as u64).unwrap();
            btree.insert(key.clone(), i as u64);
        }

        let prefix = "/srv/data/shard07/";

        group.bench_function(format!("hat_trie/{}", size), |b| {
            b.iter(|| black_box(trie.iter_prefix(black_box(prefix)).count()));
        });

        // BTreeMap expresses a prefix scan as a range query.
        group.bench_function(format!("btreemap/{}", size), |b| {
            b.iter(|| {
                black_box(
                    btree
                        .range(prefix.to_string()..)
                        .take_while(|(k, _)| k.starts_with(prefix))
                        .count(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_prefix_scan);
criterion_main!(benches);
