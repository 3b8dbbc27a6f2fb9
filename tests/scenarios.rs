use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use stvi::render::RenderAggregator;
use stvi::settings::{CountRange, FeatureFilter, PoolingMode};
use stvi::synthetic::{self, SyntheticParams};
use stvi::{FeatureCatalog, FeatureId, FeatureRecord, GeneView, Region, SelectionEngine, SelectionMode, VisualSettings};

fn abc() -> Vec<FeatureRecord> {
    vec![
        FeatureRecord::new("A", 5, 0.0, 0.0),
        FeatureRecord::new("B", 10, 0.0, 0.0),
        FeatureRecord::new("C", 1, 5.0, 5.0),
    ]
}

fn loaded(records: &[FeatureRecord]) -> FeatureCatalog {
    let mut cat = FeatureCatalog::new();
    cat.load(records).unwrap();
    cat
}

fn select_genes(cat: &FeatureCatalog, names: &[&str]) {
    for n in names {
        cat.gene(n).unwrap().write().selected = true;
    }
}

fn filter(lower: u32, upper: u32, pooling: PoolingMode) -> FeatureFilter {
    FeatureFilter {
        reads: CountRange::new(lower, upper),
        pooling,
        ..FeatureFilter::default()
    }
}

fn ids(v: &[u32]) -> Vec<FeatureId> {
    v.iter().map(|&i| FeatureId(i)).collect()
}

#[test]
fn scenario_a_pooling() {
    for (pooling, expected) in [(PoolingMode::PoolReadsCount, 15.0), (PoolingMode::PoolNumberGenes, 2.0)] {
        let mut cat = loaded(&abc());
        select_genes(&cat, &["A", "B"]);
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        agg.recompute_visual(&mut cat, &filter(0, 100, pooling));

        assert_eq!(agg.len(), 2);
        let origin = agg.slot(cat.slot_of(FeatureId(0)).unwrap()).unwrap();
        assert_eq!(origin.position, [0.0, 0.0]);
        assert_eq!(origin.ref_count, 2);
        assert_eq!(origin.value, expected);
        let other = agg.slot(cat.slot_of(FeatureId(2)).unwrap()).unwrap();
        assert_eq!(other.ref_count, 0);
    }
}

#[test]
fn scenario_b_region_selects_position_mates() {
    let mut cat = loaded(&abc());
    select_genes(&cat, &["A", "B", "C"]);
    let f = filter(0, 100, PoolingMode::PoolReadsCount);
    let mut sel = SelectionEngine::new();
    sel.select_region(&mut cat, &f, &Region::rect(-1.0, -1.0, 2.0, 2.0), SelectionMode::New);
    assert_eq!(sel.selected(), ids(&[0, 1]));
    assert!(!sel.contains(FeatureId(2)));
}

#[test]
fn scenario_b_mates_of_unselected_genes_are_selected() {
    let mut view = GeneView::new(VisualSettings::default());
    view.load(&abc()).unwrap();
    view.set_genes_selected(&["A"], true);
    view.select_region(&Region::rect(-1.0, -1.0, 10.0, 10.0), SelectionMode::New);
    assert_eq!(view.selection().selected(), ids(&[0, 1]));
    assert_eq!(view.aggregator().slot(0).unwrap().selected, 1);
}

#[test]
fn scenario_c_exclude_removes_only_region_members() {
    let mut cat = loaded(&abc());
    select_genes(&cat, &["A", "B", "C"]);
    let f = filter(0, 100, PoolingMode::PoolReadsCount);
    let mut sel = SelectionEngine::new();
    sel.select_region(&mut cat, &f, &Region::rect(-1.0, -1.0, 2.0, 2.0), SelectionMode::New);
    sel.select_region(&mut cat, &f, &Region::rect(4.0, 4.0, 2.0, 2.0), SelectionMode::Include);
    assert_eq!(sel.selected(), ids(&[0, 1, 2]));

    sel.select_region(&mut cat, &f, &Region::rect(4.0, 4.0, 2.0, 2.0), SelectionMode::Exclude);
    assert_eq!(sel.selected(), ids(&[0, 1]));
}

#[test]
fn scenario_d_clear_and_empty_reload() {
    let mut view = GeneView::new(VisualSettings::default());
    view.load(&abc()).unwrap();
    view.clear();
    view.load(&[]).unwrap();
    assert!(view.aggregator().is_empty());
    assert_eq!(view.aggregator().local_range(), (0.0, 0.0));
    assert!(view.display_colors().is_empty());
    view.select_region(&Region::rect(-10.0, -10.0, 20.0, 20.0), SelectionMode::New);
    assert!(view.selection().is_empty());
}

#[test]
fn scenario_e_threshold_is_independent_of_selection() {
    let mut cat = loaded(&abc());
    select_genes(&cat, &["A", "B"]);
    let mut sel = SelectionEngine::new();
    let wide = filter(0, 100, PoolingMode::PoolReadsCount);
    sel.select_region(&mut cat, &wide, &Region::rect(-1.0, -1.0, 2.0, 2.0), SelectionMode::New);

    let narrow = filter(6, 100, PoolingMode::PoolReadsCount);
    let mut agg = RenderAggregator::default();
    agg.generate(&cat);
    agg.recompute_visual(&mut cat, &narrow);

    let origin = agg.slot(0).unwrap();
    assert_eq!(origin.ref_count, 1);
    assert_eq!(origin.value, 10.0);
    assert!(cat.gene("A").unwrap().read().selected);
    assert!(sel.contains(FeatureId(0)));
}

#[test]
fn slot_dedup_and_count_bound() {
    let mut records = abc();
    records.push(FeatureRecord::new("D", 3, 5.0, 5.0));
    records.push(FeatureRecord::new("E", 3, 7.0, 1.0));
    let cat = loaded(&records);
    assert_eq!(cat.slot_of(FeatureId(2)), cat.slot_of(FeatureId(3)));
    assert_eq!(cat.features_for_slot(cat.slot_of(FeatureId(3)).unwrap()).len(), 2);
    assert!(cat.slot_count() < records.len());

    let distinct = loaded(&[FeatureRecord::new("A", 1, 0.0, 0.0), FeatureRecord::new("A", 1, 1.0, 0.0)]);
    assert_eq!(distinct.slot_count(), 2);
}

/// Random catalog with heavy position sharing, used by the property tests.
fn random_catalog(seed: u64) -> (FeatureCatalog, StdRng) {
    let params = SyntheticParams {
        grid_width: 12,
        grid_height: 9,
        genes: 25,
        min_genes_per_spot: 1,
        max_genes_per_spot: 6,
        max_hits: 40,
        ..SyntheticParams::default()
    };
    let payload = synthetic::generate(&params, seed);
    let mut cat = FeatureCatalog::new();
    let chip = payload.chip.unwrap().geometry();
    cat.set_bounds(chip.border, chip.inner).unwrap();
    cat.load(&payload.features).unwrap();
    (cat, StdRng::seed_from_u64(seed ^ 0x5eed))
}

fn randomize_genes(cat: &FeatureCatalog, rng: &mut StdRng) {
    for g in cat.gene_list() {
        g.write().selected = rng.gen_bool(0.6);
    }
}

#[test]
fn ref_count_matches_contributing_features() {
    for seed in 0..4 {
        let (mut cat, mut rng) = random_catalog(seed);
        randomize_genes(&cat, &mut rng);
        let lower = rng.gen_range(0..10);
        let f = filter(lower, lower + rng.gen_range(5..30), PoolingMode::PoolReadsCount);

        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        agg.recompute_visual(&mut cat, &f);

        for handle in 0..cat.slot_count() as u32 {
            let expected = cat
                .features_for_slot(handle)
                .iter()
                .filter(|ft| ft.gene.read().selected && f.reads.contains(ft.hits))
                .count() as u32;
            assert_eq!(agg.slot(handle).unwrap().ref_count, expected, "seed {seed} slot {handle}");
        }
    }
}

#[test]
fn exclude_is_idempotent() {
    let (mut cat, mut rng) = random_catalog(9);
    randomize_genes(&cat, &mut rng);
    let f = FeatureFilter::default();
    let mut sel = SelectionEngine::new();
    sel.select_region(&mut cat, &f, &Region::rect(0.0, 0.0, 13.0, 10.0), SelectionMode::New);
    let region = Region::rect(3.0, 2.0, 4.5, 4.5);
    sel.select_region(&mut cat, &f, &region, SelectionMode::Exclude);
    let once = sel.selected();
    sel.select_region(&mut cat, &f, &region, SelectionMode::Exclude);
    assert_eq!(sel.selected(), once);
    assert!(!once.is_empty());
}

#[test]
fn recompute_is_deterministic() {
    let (mut cat, mut rng) = random_catalog(3);
    randomize_genes(&cat, &mut rng);
    let f = FeatureFilter::default();
    let mut agg = RenderAggregator::default();
    agg.generate(&cat);
    agg.recompute_visual(&mut cat, &f);
    let first = agg.as_bytes().to_vec();
    agg.recompute_visual(&mut cat, &f);
    assert_eq!(agg.as_bytes(), first.as_slice());
}

#[test]
fn incremental_gene_updates_match_full_recompute() {
    let (mut cat, mut rng) = random_catalog(5);
    randomize_genes(&cat, &mut rng);
    let f = filter(2, 35, PoolingMode::PoolTpm);
    let mut incremental = RenderAggregator::default();
    incremental.generate(&cat);
    incremental.recompute_visual(&mut cat, &f);

    let names: Vec<String> = cat.gene_list().iter().map(|g| g.read().name.clone()).collect();
    for _ in 0..15 {
        let name = &names[rng.gen_range(0..names.len())];
        {
            let gene = cat.gene(name).unwrap();
            let mut g = gene.write();
            if rng.gen_bool(0.5) {
                g.selected = !g.selected;
            } else {
                g.color = stvi::color::Rgba::new(rng.gen(), rng.gen(), rng.gen(), 1.0);
            }
        }
        incremental.update_genes(&mut cat, &f, &[name.as_str()]);

        let mut full = RenderAggregator::default();
        full.generate(&cat);
        full.recompute_visual(&mut cat, &f);
        assert_eq!(incremental.slots(), full.slots());
        assert_eq!(incremental.local_range(), full.local_range());
    }
}

#[test]
fn out_of_bounds_feature_grows_index() {
    let mut cat = FeatureCatalog::new();
    cat.set_bounds(
        stvi::Aabb::new(0.0, 0.0, 10.0, 10.0),
        stvi::Aabb::new(1.0, 1.0, 8.0, 8.0),
    )
    .unwrap();
    cat.load(&[FeatureRecord::new("A", 1, 2.0, 2.0), FeatureRecord::new("A", 1, 25.0, -3.0)])
        .unwrap();
    assert_eq!(cat.slot_count(), 2);
    let hits = cat.index().query_region(&Region::rect(20.0, -5.0, 10.0, 5.0));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1, 1);
}

#[test]
fn extreme_coordinates_load_without_runaway_growth() {
    let mut cat = FeatureCatalog::new();
    cat.set_bounds(
        stvi::Aabb::new(0.0, 0.0, 100.0, 100.0),
        stvi::Aabb::new(0.0, 0.0, 100.0, 100.0),
    )
    .unwrap();
    cat.load(&[
        FeatureRecord::new("A", 1, -3.0e38, 10.0),
        FeatureRecord::new("B", 2, f32::MAX, f32::MAX),
        FeatureRecord::new("C", 3, 50.0, 50.0),
    ])
    .unwrap();
    assert_eq!(cat.slot_count(), 3);
    assert!(cat.index().is_saturated());
    assert!(cat.index().bounds().unwrap().is_finite());

    // without chip geometry the feature extent itself overflows
    let mut unbounded = FeatureCatalog::new();
    assert!(unbounded
        .load(&[FeatureRecord::new("A", 1, -f32::MAX, 0.0), FeatureRecord::new("A", 1, f32::MAX, 0.0)])
        .is_err());
    assert!(unbounded.is_empty());
}

#[test]
fn view_end_to_end_with_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mock.json");
    let params = SyntheticParams::with_spots(40);
    let spots = (params.grid_width * params.grid_height) as usize;
    let payload = synthetic::generate(&params, 2);
    stvi::data::write_dataset_file(&path, &payload).unwrap();

    let loaded = stvi::data::load_dataset_file(&path).unwrap();
    let mut view = GeneView::new(VisualSettings::default());
    view.set_chip(loaded.chip.unwrap().geometry()).unwrap();
    view.load(&loaded.features).unwrap();
    view.set_all_genes_selected(true);
    let summary = view.summary();
    assert_eq!(summary.slots, spots);
    assert_eq!(summary.visible_slots, spots);
    assert!(summary.local_range.0 <= summary.local_range.1);
    assert_eq!(view.legend(8).len(), 8);
}
