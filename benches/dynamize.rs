use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use dynamize::{
    DynamicExtension, ExtensionOptions, IsamShard, LayoutPolicy, Pair, RangeParams, RangeQuery,
    SerialScheduler,
};

type Rec = Pair<u64, u64>;
type Ext = DynamicExtension<Rec, IsamShard<Rec>, RangeQuery<Rec, IsamShard<Rec>>, SerialScheduler>;

fn options(layout: LayoutPolicy) -> ExtensionOptions {
    ExtensionOptions {
        buffer_low_watermark: 4 * 1024,
        buffer_high_watermark: 8 * 1024,
        scale_factor: if layout == LayoutPolicy::BentleySaxe {
            2
        } else {
            4
        },
        layout,
        ..Default::default()
    }
}

fn shuffled_keys(n: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<u64> = (0..n).collect();
    keys.shuffle(&mut rng);
    keys
}

fn bench_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for layout in [
        LayoutPolicy::Tiering,
        LayoutPolicy::Leveling,
        LayoutPolicy::BentleySaxe,
    ] {
        group.bench_function(format!("{layout:?}_64k"), |b| {
            let keys = shuffled_keys(64 * 1024);
            b.iter_batched(
                || Ext::new(options(layout)).expect("extension"),
                |ext| {
                    for &key in &keys {
                        while !ext.insert(Pair::new(key, key)) {
                            std::hint::spin_loop();
                        }
                    }
                    ext
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_range_queries(c: &mut Criterion) {
    let ext = Ext::new(options(LayoutPolicy::Tiering)).expect("extension");
    for key in shuffled_keys(256 * 1024) {
        while !ext.insert(Pair::new(key, key)) {
            std::hint::spin_loop();
        }
    }

    let mut group = c.benchmark_group("range_query");
    for width in [100u64, 10_000] {
        group.bench_function(format!("width_{width}"), |b| {
            let mut rng = StdRng::seed_from_u64(11);
            b.iter(|| {
                let lo = rand::Rng::gen_range(&mut rng, 0..256 * 1024 - width);
                ext.query(RangeParams {
                    lower_bound: lo,
                    upper_bound: lo + width,
                })
                .wait()
                .expect("query")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_inserts, bench_range_queries);
criterion_main!(benches);
