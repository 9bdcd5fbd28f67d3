use dynamize::{
    DeletePolicy, DynamicExtension, ExtensionOptions, IsamShard, LayoutPolicy, Pair, RangeParams,
    RangeQuery, SerialScheduler, Shard,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

type Rec = Pair<u64, u32>;
type Ext = DynamicExtension<Rec, IsamShard<Rec>, RangeQuery<Rec, IsamShard<Rec>>, SerialScheduler>;

fn options(layout: LayoutPolicy) -> ExtensionOptions {
    ExtensionOptions {
        buffer_low_watermark: 16,
        buffer_high_watermark: 32,
        scale_factor: 2,
        layout,
        ..Default::default()
    }
}

fn rec(key: u64) -> Rec {
    Pair::new(key, 0)
}

#[test]
fn record_count_never_undercounts() -> anyhow::Result<()> {
    let ext = Ext::new(options(LayoutPolicy::Tiering))?;
    for key in 1..=500 {
        assert!(ext.insert(rec(key)));
        assert!(ext.record_count() >= key as usize);
    }
    Ok(())
}

#[test]
fn static_shard_count_matches_live_count() -> anyhow::Result<()> {
    for layout in [
        LayoutPolicy::Tiering,
        LayoutPolicy::Leveling,
        LayoutPolicy::BentleySaxe,
    ] {
        let ext = Ext::new(options(layout))?;
        for key in 1..=300 {
            assert!(ext.insert(rec(key)));
        }

        let shard = ext.create_static_shard(true)?;
        assert_eq!(shard.record_count(), ext.record_count());
    }
    Ok(())
}

#[test]
fn tombstone_proportion_holds_at_quiescence() -> anyhow::Result<()> {
    let ext = Ext::new(ExtensionOptions {
        delete_policy: DeletePolicy::Tombstone,
        ..options(LayoutPolicy::Leveling)
    })?;
    for key in 1..=200 {
        assert!(ext.insert(rec(key)));
    }
    for key in (1..=200).step_by(3) {
        assert!(ext.erase(rec(key)));
    }

    ext.await_next_epoch();
    assert!(ext.validate_tombstone_proportion());
    Ok(())
}

#[test]
fn randomized_workload_round_trips() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut keys: Vec<u64> = (0..1_000).collect();
    keys.shuffle(&mut rng);

    let ext = Ext::new(options(LayoutPolicy::Tiering))?;
    for &key in &keys {
        assert!(ext.insert(rec(key)));
    }

    let result = ext
        .query(RangeParams {
            lower_bound: 0,
            upper_bound: u64::MAX,
        })
        .wait()?;
    let got: Vec<u64> = result.iter().map(|r| r.key).collect();
    assert_eq!(got, (0..1_000).collect::<Vec<u64>>());

    // Partial ranges agree with the obvious model.
    let result = ext
        .query(RangeParams {
            lower_bound: 250,
            upper_bound: 749,
        })
        .wait()?;
    assert_eq!(result.len(), 500);
    Ok(())
}

#[test]
fn interleaved_inserts_and_deletes_converge() -> anyhow::Result<()> {
    let ext = Ext::new(ExtensionOptions {
        delete_policy: DeletePolicy::Tombstone,
        ..options(LayoutPolicy::Leveling)
    })?;

    for key in 0..400u64 {
        assert!(ext.insert(rec(key)));
        if key % 2 == 1 {
            assert!(ext.erase(rec(key - 1)));
        }
    }

    let result = ext
        .query(RangeParams {
            lower_bound: 0,
            upper_bound: u64::MAX,
        })
        .wait()?;
    let got: Vec<u64> = result.iter().map(|r| r.key).collect();
    let expected: Vec<u64> = (0..400).filter(|k| k % 2 == 1).collect();
    assert_eq!(got, expected);
    Ok(())
}

#[test]
fn metrics_levels_sum_to_structure_counts() -> anyhow::Result<()> {
    let ext = Ext::new(options(LayoutPolicy::Tiering))?;
    for key in 1..=300 {
        assert!(ext.insert(rec(key)));
    }

    let metrics = ext.metrics();
    let level_sum: usize = metrics.levels.iter().map(|l| l.record_count).sum();
    assert_eq!(level_sum + metrics.buffered_records, metrics.record_count);
    assert_eq!(metrics.levels.len(), metrics.height);
    Ok(())
}
