use bytemuck::{Pod, Zeroable};
use std::time::Instant;

use crate::catalog::FeatureCatalog;
use crate::color::{lerp, normalize_value, visual_color, Rgba, DEFAULT_GENE_COLOR};
use crate::model::{Feature, FeatureId};
use crate::quadtree::SlotHandle;
use crate::settings::{ColorComputingMode, FeatureFilter, PoolingMode, VisualMode, VisualSettings};

/// Per-slot record laid out for direct upload into a storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderSlot {
    pub position: [f32; 2],
    pub color: Rgba,
    pub size: f32,
    pub value: f32,
    pub ref_count: u32,
    pub selected: u32,
}

impl RenderSlot {
    fn new(position: [f32; 2], size: f32) -> Self {
        Self {
            position,
            color: DEFAULT_GENE_COLOR,
            size,
            value: 0.0,
            ref_count: 0,
            selected: 0,
        }
    }

    fn reset(&mut self) {
        self.color = DEFAULT_GENE_COLOR;
        self.value = 0.0;
        self.ref_count = 0;
        self.selected = 0;
    }

    pub fn is_visible(&self) -> bool {
        self.ref_count > 0
    }
}

/// Uniform block for the draw step.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawParams {
    pub local_min: f32,
    pub local_max: f32,
    pub intensity: f32,
    pub size: f32,
    pub visual_mode: u32,
    pub color_mode: u32,
    pub pooling_mode: u32,
    pub shape: u32,
}

impl DrawParams {
    pub fn new(settings: &VisualSettings, local_range: (f32, f32)) -> Self {
        Self {
            local_min: local_range.0,
            local_max: local_range.1,
            intensity: settings.intensity,
            size: settings.size,
            visual_mode: match settings.visual_mode {
                VisualMode::Normal => 0,
                VisualMode::DynamicRange => 1,
                VisualMode::HeatMap => 2,
                VisualMode::ColorRange => 3,
            },
            color_mode: match settings.color_mode {
                ColorComputingMode::Linear => 0,
                ColorComputingMode::Log => 1,
                ColorComputingMode::Exp => 2,
            },
            pooling_mode: match settings.pooling {
                PoolingMode::PoolReadsCount => 0,
                PoolingMode::PoolNumberGenes => 1,
                PoolingMode::PoolTpm => 2,
            },
            shape: settings.shape.as_u32(),
        }
    }
}

/// Turns the catalog plus the active filter into one record per slot.
///
/// `generation` changes whenever the slot records change, so a consumer can
/// skip re-uploading an unchanged buffer.
#[derive(Clone, Debug)]
pub struct RenderAggregator {
    slots: Vec<RenderSlot>,
    reads: Vec<u64>,
    size: f32,
    local_range: (f32, f32),
    generation: u64,
}

impl Default for RenderAggregator {
    fn default() -> Self {
        Self::new(VisualSettings::default().size)
    }
}

impl RenderAggregator {
    pub fn new(size: f32) -> Self {
        Self {
            slots: Vec::new(),
            reads: Vec::new(),
            size,
            local_range: (0.0, 0.0),
            generation: 0,
        }
    }

    pub fn slots(&self) -> &[RenderSlot] {
        &self.slots
    }

    pub fn slot(&self, handle: SlotHandle) -> Option<&RenderSlot> {
        self.slots.get(handle as usize)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.slots)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn visible_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_visible()).count()
    }

    /// `(min, max)` of the value over visible slots; `(0, 0)` when none is visible.
    pub fn local_range(&self) -> (f32, f32) {
        self.local_range
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Rebuild the buffer shape: one zeroed slot per distinct position, in
    /// handle order. No filtering happens here.
    pub fn generate(&mut self, catalog: &FeatureCatalog) {
        self.slots.clear();
        self.reads.clear();
        for f in catalog.feature_list() {
            let Some(slot) = catalog.slot_of(f.id) else {
                continue;
            };
            while self.slots.len() <= slot as usize {
                let handle = self.slots.len() as SlotHandle;
                let position = catalog.slot_position(handle).unwrap_or(f.position);
                self.slots.push(RenderSlot::new(position.as_array(), self.size));
                self.reads.push(0);
            }
        }
        self.local_range = (0.0, 0.0);
        self.touch();
    }

    /// Full pass over every feature: reset all slots, then fold each
    /// contributing feature into its slot in ingestion order.
    pub fn recompute_visual(&mut self, catalog: &mut FeatureCatalog, filter: &FeatureFilter) -> (f32, f32) {
        let started = Instant::now();
        if self.slots.len() != catalog.slot_count() {
            self.generate(catalog);
        }
        propagate_gene_colors(catalog.features_mut());

        for s in &mut self.slots {
            s.reset();
        }
        self.reads.iter_mut().for_each(|r| *r = 0);

        let catalog: &FeatureCatalog = catalog;
        for f in catalog.feature_list() {
            if !catalog.contributes(f.id, filter) {
                continue;
            }
            if let Some(slot) = catalog.slot_of(f.id) {
                self.fold(slot, f, filter.pooling);
            }
        }
        for handle in 0..self.slots.len() {
            self.finish_slot(catalog, handle as SlotHandle, filter.pooling);
        }

        self.publish_local_range();
        self.touch();
        log::debug!(
            "recomputed {} slots ({} visible) in {:.1?}",
            self.slots.len(),
            self.visible_count(),
            started.elapsed()
        );
        self.local_range
    }

    /// Recompute only the slots holding a feature of one of `genes`. The
    /// result matches a full `recompute_visual` with the same inputs.
    pub fn update_genes(&mut self, catalog: &mut FeatureCatalog, filter: &FeatureFilter, genes: &[&str]) -> (f32, f32) {
        if self.slots.len() != catalog.slot_count() {
            return self.recompute_visual(catalog, filter);
        }

        let mut affected: Vec<SlotHandle> = Vec::new();
        let mut touched: Vec<FeatureId> = Vec::new();
        for name in genes {
            for &id in catalog.gene_feature_ids(name) {
                touched.push(id);
                if let Some(slot) = catalog.slot_of(id) {
                    affected.push(slot);
                }
            }
        }
        affected.sort_unstable();
        affected.dedup();

        let features = catalog.features_mut();
        for id in touched {
            if let Some(f) = features.get_mut(id.index()) {
                let gene_color = f.gene.read().color;
                f.color = gene_color;
            }
        }

        let catalog: &FeatureCatalog = catalog;
        for &slot in &affected {
            let s = &mut self.slots[slot as usize];
            s.reset();
            self.reads[slot as usize] = 0;
            for &id in catalog.slot_feature_ids(slot) {
                if !catalog.contributes(id, filter) {
                    continue;
                }
                if let Some(f) = catalog.feature(id) {
                    self.fold(slot, f, filter.pooling);
                }
            }
            self.finish_slot(catalog, slot, filter.pooling);
        }

        self.publish_local_range();
        self.touch();
        log::debug!("updated {} slots for {} genes", affected.len(), genes.len());
        self.local_range
    }

    fn fold(&mut self, slot: SlotHandle, f: &Feature, pooling: PoolingMode) {
        let idx = slot as usize;
        let s = &mut self.slots[idx];
        s.ref_count += 1;
        self.reads[idx] += f.hits as u64;
        s.value = match pooling {
            PoolingMode::PoolNumberGenes => s.ref_count as f32,
            PoolingMode::PoolReadsCount | PoolingMode::PoolTpm => self.reads[idx] as f32,
        };
        s.color = lerp(1.0 / s.ref_count as f32, s.color, f.color);
        if f.selected {
            s.selected = 1;
        }
    }

    fn finish_slot(&mut self, catalog: &FeatureCatalog, slot: SlotHandle, pooling: PoolingMode) {
        if pooling != PoolingMode::PoolTpm {
            return;
        }
        let idx = slot as usize;
        let total = catalog.slot_total_reads(slot);
        if self.slots[idx].ref_count > 0 && total > 0 {
            self.slots[idx].value = (self.reads[idx] as f64 * 1_000_000.0 / total as f64) as f32;
        }
    }

    fn publish_local_range(&mut self) {
        let mut visible = self.slots.iter().filter(|s| s.is_visible()).map(|s| s.value);
        self.local_range = match visible.next() {
            None => (0.0, 0.0),
            Some(first) => visible.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))),
        };
    }

    /// Re-derive slot selected flags from the feature flags.
    pub fn refresh_selection(&mut self, catalog: &FeatureCatalog, filter: &FeatureFilter) {
        for (handle, s) in self.slots.iter_mut().enumerate() {
            let ids = catalog.slot_feature_ids(handle as SlotHandle);
            let any = ids
                .iter()
                .any(|&id| catalog.feature(id).is_some_and(|f| f.selected) && catalog.selectable(id, filter));
            s.selected = any as u32;
        }
        self.touch();
    }

    pub fn update_slot_size(&mut self, size: f32) {
        self.size = size;
        for s in &mut self.slots {
            s.size = size;
        }
        self.touch();
    }

    pub fn draw_params(&self, settings: &VisualSettings) -> DrawParams {
        DrawParams::new(settings, self.local_range)
    }

    /// CPU rendition of the draw step: one packed RGBA8 per slot, hidden
    /// slots fully transparent.
    pub fn display_colors(&self, settings: &VisualSettings) -> Vec<u32> {
        let (lo, hi) = self.local_range;
        self.slots
            .iter()
            .map(|s| {
                if !s.is_visible() {
                    return Rgba::TRANSPARENT.to_packed();
                }
                let t = normalize_value(s.value, lo, hi, settings.color_mode);
                let c = visual_color(settings.visual_mode, s.color, t);
                c.with_alpha(c.a * settings.intensity).to_packed()
            })
            .collect()
    }
}

fn propagate_gene_colors(features: &mut [Feature]) {
    for f in features {
        let gene_color = f.gene.read().color;
        if f.color != gene_color {
            f.color = gene_color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureRecord;

    fn catalog() -> FeatureCatalog {
        let mut cat = FeatureCatalog::new();
        cat.load(&[
            FeatureRecord::new("A", 5, 0.0, 0.0),
            FeatureRecord::new("B", 10, 0.0, 0.0),
            FeatureRecord::new("C", 1, 5.0, 5.0),
        ])
        .unwrap();
        cat
    }

    fn select(cat: &FeatureCatalog, names: &[&str]) {
        for n in names {
            cat.gene(n).unwrap().write().selected = true;
        }
    }

    #[test]
    fn slot_record_has_no_padding() {
        assert_eq!(std::mem::size_of::<RenderSlot>(), 40);
        assert_eq!(std::mem::size_of::<DrawParams>(), 32);
    }

    #[test]
    fn generate_makes_one_slot_per_position() {
        let cat = catalog();
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        assert_eq!(agg.len(), 2);
        assert!(agg.slots().iter().all(|s| s.ref_count == 0 && s.size == 0.5));
        assert_eq!(agg.slot(1).unwrap().position, [5.0, 5.0]);
        assert_eq!(agg.as_bytes().len(), 80);
    }

    #[test]
    fn blend_weights_later_features_less() {
        let mut cat = catalog();
        select(&cat, &["A", "B"]);
        cat.gene("A").unwrap().write().color = Rgba::new(1.0, 0.0, 0.0, 1.0);
        cat.gene("B").unwrap().write().color = Rgba::new(0.0, 0.0, 1.0, 1.0);
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        agg.recompute_visual(&mut cat, &FeatureFilter::default());
        let c = agg.slot(0).unwrap().color;
        assert_eq!(c, Rgba::new(0.5, 0.0, 0.5, 1.0));
        assert_eq!(cat.feature(FeatureId(0)).unwrap().color, Rgba::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn tpm_pools_against_spot_total() {
        let mut cat = catalog();
        select(&cat, &["B"]);
        let filter = FeatureFilter {
            pooling: PoolingMode::PoolTpm,
            ..FeatureFilter::default()
        };
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        let (lo, hi) = agg.recompute_visual(&mut cat, &filter);
        let expected = 10.0 * 1_000_000.0 / 15.0;
        assert!((agg.slot(0).unwrap().value - expected as f32).abs() < 1.0);
        assert_eq!(lo, hi);
    }

    #[test]
    fn nothing_visible_gives_zero_range() {
        let mut cat = catalog();
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        assert_eq!(agg.recompute_visual(&mut cat, &FeatureFilter::default()), (0.0, 0.0));
        assert_eq!(agg.visible_count(), 0);
        assert!(agg.display_colors(&VisualSettings::default()).iter().all(|&c| c == 0));
    }

    #[test]
    fn size_and_generation_track_changes() {
        let cat = catalog();
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        let before = agg.generation();
        agg.update_slot_size(2.0);
        assert!(agg.slots().iter().all(|s| s.size == 2.0));
        assert_ne!(agg.generation(), before);
    }

    #[test]
    fn display_colors_follow_visual_mode() {
        let mut cat = catalog();
        select(&cat, &["A", "B", "C"]);
        let mut agg = RenderAggregator::default();
        agg.generate(&cat);
        agg.recompute_visual(&mut cat, &FeatureFilter::default());

        let mut settings = VisualSettings {
            visual_mode: VisualMode::DynamicRange,
            ..VisualSettings::default()
        };
        let colors = agg.display_colors(&settings);
        // slot 0 holds the max value, slot 1 the min
        assert_eq!(colors[0] >> 24, 255);
        assert_eq!(colors[1] >> 24, 0);

        settings.visual_mode = VisualMode::Normal;
        settings.intensity = 0.5;
        let colors = agg.display_colors(&settings);
        assert_eq!(colors[1] >> 24, 128);
    }
}
