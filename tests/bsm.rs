use dynamize::{
    DynamicExtension, ExtensionOptions, IsamShard, LayoutPolicy, Pair, RangeParams, RangeQuery,
    SerialScheduler,
};

type Rec = Pair<u64, u32>;
type Ext = DynamicExtension<Rec, IsamShard<Rec>, RangeQuery<Rec, IsamShard<Rec>>, SerialScheduler>;

fn bsm_options() -> ExtensionOptions {
    ExtensionOptions {
        buffer_low_watermark: 4,
        buffer_high_watermark: 4,
        scale_factor: 2,
        layout: LayoutPolicy::BentleySaxe,
        ..Default::default()
    }
}

fn rec(key: u64) -> Rec {
    Pair::new(key, 0)
}

#[test]
fn construction_rejects_scale_factor_other_than_two() {
    let options = ExtensionOptions {
        scale_factor: 4,
        layout: LayoutPolicy::BentleySaxe,
        ..Default::default()
    };
    assert!(Ext::new(options).is_err());
}

#[test]
fn doubling_sequence_collapses_prefixes() -> anyhow::Result<()> {
    let ext = Ext::new(bsm_options())?;
    for key in 1..=32 {
        assert!(ext.insert(rec(key)));
    }

    assert_eq!(ext.record_count(), 32);
    assert_eq!(ext.height(), 3);

    let metrics = ext.metrics();
    assert_eq!(metrics.buffered_records, 4);
    // The last overflow collapsed levels 0 and 1 into one 24-record shard
    // at level 2; a later flush refilled level 0.
    assert_eq!(metrics.levels[2].shard_count, 1);
    assert_eq!(metrics.levels[2].record_count, 24);
    assert_eq!(metrics.levels[1].shard_count, 0);
    assert_eq!(metrics.levels[0].shard_count, 1);
    assert_eq!(metrics.levels[0].record_count, 4);

    // Every level holds at most one shard under Bentley-Saxe.
    for level in &metrics.levels {
        assert!(level.shard_count <= 1);
    }
    Ok(())
}

#[test]
fn nothing_is_lost_across_collapses() -> anyhow::Result<()> {
    let ext = Ext::new(bsm_options())?;
    for key in 1..=32 {
        assert!(ext.insert(rec(key)));
    }

    let result = ext
        .query(RangeParams {
            lower_bound: 1,
            upper_bound: 32,
        })
        .wait()?;
    let keys: Vec<u64> = result.iter().map(|r| r.key).collect();
    assert_eq!(keys, (1..=32).collect::<Vec<u64>>());
    Ok(())
}
