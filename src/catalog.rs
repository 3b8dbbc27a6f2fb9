use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::color::DEFAULT_GENE_COLOR;
use crate::cutoff::estimate_read_cutoff;
use crate::error::{CatalogError, SpatialIndexError};
use crate::geometry::{Aabb, Point};
use crate::model::{Feature, FeatureId, FeatureRecord, Gene, GeneRef};
use crate::quadtree::{SlotHandle, SpatialIndex};
use crate::settings::{CountRange, FeatureFilter};

/// Chip outline delivered with a dataset: the border frames the whole
/// array and sizes the spatial index, the inner rectangle frames the spots.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChipGeometry {
    pub border: Aabb,
    pub inner: Aabb,
}

/// Observed ranges after a load, for seeding threshold controls. All zero
/// for an empty catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitStatistics {
    pub reads: CountRange,
    pub genes_per_spot: CountRange,
    pub total_reads_per_spot: CountRange,
}

impl Default for HitStatistics {
    fn default() -> Self {
        let zero = CountRange::new(0, 0);
        Self {
            reads: zero,
            genes_per_spot: zero,
            total_reads_per_spot: zero,
        }
    }
}

#[derive(Debug, Default)]
pub struct FeatureCatalog {
    index: SpatialIndex,
    chip: Option<ChipGeometry>,
    require_non_empty: bool,

    features: Vec<Feature>,
    genes: Vec<GeneRef>,
    gene_lookup: HashMap<String, usize>,
    gene_features: Vec<Vec<FeatureId>>,

    feature_slot: Vec<SlotHandle>,
    slot_features: Vec<Vec<FeatureId>>,
    slot_positions: Vec<Point>,
    slot_total_reads: Vec<u64>,

    stats: HitStatistics,
}

/// Everything `load` derives from the records, built aside and swapped in
/// only once every record has been accepted.
struct Loaded {
    index: SpatialIndex,
    features: Vec<Feature>,
    genes: Vec<GeneRef>,
    gene_lookup: HashMap<String, usize>,
    gene_features: Vec<Vec<FeatureId>>,
    feature_slot: Vec<SlotHandle>,
    slot_features: Vec<Vec<FeatureId>>,
    slot_positions: Vec<Point>,
}

fn validate_bounds(b: &Aabb) -> Result<(), SpatialIndexError> {
    if !b.is_finite() {
        return Err(SpatialIndexError::InvalidBounds(format!("non-finite {b:?}")));
    }
    if b.is_empty() {
        return Err(SpatialIndexError::InvalidBounds(format!("empty {b:?}")));
    }
    Ok(())
}

/// Bounds for a dataset without chip geometry: the feature extent, padded so
/// a single point or a line of points still spans an area.
fn derived_bounds(records: &[FeatureRecord]) -> Aabb {
    let points: Vec<Point> = records.iter().map(|r| Point::new(r.x, r.y)).collect();
    let Some(b) = Aabb::enclosing(points.iter()) else {
        return Aabb::new(0.0, 0.0, 1.0, 1.0);
    };
    let w = b.width.max(1.0);
    let h = b.height.max(1.0);
    Aabb::new(b.x - 0.5 * (w - b.width), b.y - 0.5 * (h - b.height), w, h)
}

impl FeatureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `load` reject an empty record list with `EmptyDataset`.
    pub fn with_require_non_empty(mut self, require: bool) -> Self {
        self.require_non_empty = require;
        self
    }

    /// Configure the covered area. When features are already loaded the
    /// spatial index is rebuilt over the new border.
    pub fn set_bounds(&mut self, border: Aabb, inner: Aabb) -> Result<(), CatalogError> {
        validate_bounds(&border)?;
        if !inner.is_finite() {
            return Err(SpatialIndexError::InvalidBounds(format!("non-finite inner {inner:?}")).into());
        }
        let mut index = SpatialIndex::with_bounds(border)?;
        for (handle, p) in self.slot_positions.iter().enumerate() {
            index.insert(*p, handle as SlotHandle)?;
        }
        self.index = index;
        self.chip = Some(ChipGeometry { border, inner });
        Ok(())
    }

    pub fn chip(&self) -> Option<&ChipGeometry> {
        self.chip.as_ref()
    }

    /// Replace the catalog contents with `records`. Either every record is
    /// ingested or the catalog is left exactly as it was.
    pub fn load(&mut self, records: &[FeatureRecord]) -> Result<(), CatalogError> {
        let started = Instant::now();
        if records.is_empty() && self.require_non_empty {
            return Err(CatalogError::EmptyDataset);
        }
        for (index, r) in records.iter().enumerate() {
            r.validate()
                .map_err(|reason| CatalogError::MalformedFeature { index, reason })?;
        }

        let bounds = match &self.chip {
            Some(chip) => chip.border,
            None => derived_bounds(records),
        };
        let loaded = Self::ingest(records, bounds)?;

        self.index = loaded.index;
        self.features = loaded.features;
        self.genes = loaded.genes;
        self.gene_lookup = loaded.gene_lookup;
        self.gene_features = loaded.gene_features;
        self.feature_slot = loaded.feature_slot;
        self.slot_features = loaded.slot_features;
        self.slot_positions = loaded.slot_positions;
        self.compute_statistics();
        self.compute_gene_cutoffs();

        log::info!(
            "loaded {} features, {} genes, {} slots in {:.1?}",
            self.features.len(),
            self.genes.len(),
            self.slot_positions.len(),
            started.elapsed()
        );
        Ok(())
    }

    fn ingest(records: &[FeatureRecord], bounds: Aabb) -> Result<Loaded, CatalogError> {
        let mut out = Loaded {
            index: SpatialIndex::with_bounds(bounds)?,
            features: Vec::with_capacity(records.len()),
            genes: Vec::new(),
            gene_lookup: HashMap::new(),
            gene_features: Vec::new(),
            feature_slot: Vec::with_capacity(records.len()),
            slot_features: Vec::new(),
            slot_positions: Vec::new(),
        };

        for (i, r) in records.iter().enumerate() {
            let id = FeatureId(i as u32);
            let position = Point::new(r.x, r.y);

            let slot = match out.index.find_exact(position) {
                Some(slot) => slot,
                None => {
                    let slot = out.slot_positions.len() as SlotHandle;
                    out.index.insert(position, slot)?;
                    out.slot_positions.push(position);
                    out.slot_features.push(Vec::new());
                    slot
                }
            };
            out.slot_features[slot as usize].push(id);
            out.feature_slot.push(slot);

            let gene_idx = match out.gene_lookup.get(&r.gene) {
                Some(&g) => g,
                None => {
                    let g = out.genes.len();
                    out.genes.push(Arc::new(RwLock::new(Gene::new(r.gene.clone()))));
                    out.gene_features.push(Vec::new());
                    out.gene_lookup.insert(r.gene.clone(), g);
                    g
                }
            };
            out.gene_features[gene_idx].push(id);

            out.features.push(Feature {
                id,
                gene: out.genes[gene_idx].clone(),
                position,
                hits: r.hits as u32,
                color: DEFAULT_GENE_COLOR,
                selected: false,
            });
        }
        Ok(out)
    }

    fn compute_statistics(&mut self) {
        self.slot_total_reads = self
            .slot_features
            .iter()
            .map(|ids| ids.iter().map(|id| self.features[id.index()].hits as u64).sum())
            .collect();

        fn span(values: impl Iterator<Item = u32>) -> CountRange {
            values.fold(None, |acc: Option<CountRange>, v| match acc {
                None => Some(CountRange::new(v, v)),
                Some(r) => Some(CountRange::new(r.lower.min(v), r.upper.max(v))),
            })
            .unwrap_or(CountRange::new(0, 0))
        }

        self.stats = HitStatistics {
            reads: span(self.features.iter().map(|f| f.hits)),
            genes_per_spot: span(self.slot_features.iter().map(|ids| ids.len() as u32)),
            total_reads_per_spot: span(self.slot_total_reads.iter().map(|&t| t.min(u32::MAX as u64) as u32)),
        };
    }

    fn compute_gene_cutoffs(&mut self) {
        for (g, ids) in self.gene_features.iter().enumerate() {
            let mut counts = Vec::new();
            let mut seen_slots = HashSet::new();
            for id in ids {
                let slot = self.feature_slot[id.index()];
                if !seen_slots.insert(slot) {
                    continue;
                }
                counts.extend(self.slot_features[slot as usize].iter().map(|f| self.features[f.index()].hits));
            }
            self.genes[g].write().cut_off = estimate_read_cutoff(&counts);
        }
    }

    /// Drop every feature, gene and slot and empty the spatial index. Chip
    /// geometry is kept.
    pub fn clear(&mut self) {
        self.index.clear();
        self.features.clear();
        self.genes.clear();
        self.gene_lookup.clear();
        self.gene_features.clear();
        self.feature_slot.clear();
        self.slot_features.clear();
        self.slot_positions.clear();
        self.slot_total_reads.clear();
        self.stats = HitStatistics::default();
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn stats(&self) -> HitStatistics {
        self.stats
    }

    pub fn gene_list(&self) -> &[GeneRef] {
        &self.genes
    }

    pub fn feature_list(&self) -> &[Feature] {
        &self.features
    }

    pub(crate) fn features_mut(&mut self) -> &mut [Feature] {
        &mut self.features
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(id.index())
    }

    pub fn gene(&self, name: &str) -> Option<&GeneRef> {
        self.gene_lookup.get(name).map(|&g| &self.genes[g])
    }

    pub fn gene_feature_ids(&self, name: &str) -> &[FeatureId] {
        match self.gene_lookup.get(name) {
            Some(&g) => &self.gene_features[g],
            None => &[],
        }
    }

    pub fn features_for_gene(&self, name: &str) -> Vec<&Feature> {
        self.gene_feature_ids(name)
            .iter()
            .map(|id| &self.features[id.index()])
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.slot_positions.len()
    }

    pub fn slot_of(&self, id: FeatureId) -> Option<SlotHandle> {
        self.feature_slot.get(id.index()).copied()
    }

    pub fn slot_position(&self, slot: SlotHandle) -> Option<Point> {
        self.slot_positions.get(slot as usize).copied()
    }

    /// Feature ids at `slot` in ingestion order.
    pub fn slot_feature_ids(&self, slot: SlotHandle) -> &[FeatureId] {
        self.slot_features.get(slot as usize).map_or(&[], |v| v.as_slice())
    }

    pub fn features_for_slot(&self, slot: SlotHandle) -> Vec<&Feature> {
        self.slot_feature_ids(slot)
            .iter()
            .map(|id| &self.features[id.index()])
            .collect()
    }

    pub fn slot_total_reads(&self, slot: SlotHandle) -> u64 {
        self.slot_total_reads.get(slot as usize).copied().unwrap_or(0)
    }

    /// Whether the spot passes the per-spot thresholds of `filter`.
    pub fn slot_passes(&self, slot: SlotHandle, filter: &FeatureFilter) -> bool {
        let genes = self.slot_feature_ids(slot).len() as u32;
        let total = self.slot_total_reads(slot).min(u32::MAX as u64) as u32;
        filter.genes_per_spot.contains(genes) && filter.total_reads_per_spot.contains(total)
    }

    /// A feature contributes to its slot when its gene is selected, its hits
    /// are inside the read range, its spot passes the per-spot thresholds
    /// and, if enabled, its hits reach the gene cut-off.
    pub fn contributes(&self, id: FeatureId, filter: &FeatureFilter) -> bool {
        let Some(f) = self.features.get(id.index()) else {
            return false;
        };
        f.gene.read().selected && self.within_thresholds(f, filter)
    }

    /// A slot is visible when at least one of its features contributes.
    pub fn slot_visible(&self, slot: SlotHandle, filter: &FeatureFilter) -> bool {
        self.slot_feature_ids(slot)
            .iter()
            .any(|&id| self.contributes(id, filter))
    }

    /// A feature can be selected when its slot is visible and the feature
    /// itself is inside the thresholds. Whether its own gene is selected does
    /// not matter, so every in-range gene at a visible spot is picked.
    pub fn selectable(&self, id: FeatureId, filter: &FeatureFilter) -> bool {
        let Some(f) = self.features.get(id.index()) else {
            return false;
        };
        self.within_thresholds(f, filter) && self.slot_visible(self.feature_slot[id.index()], filter)
    }

    fn within_thresholds(&self, f: &Feature, filter: &FeatureFilter) -> bool {
        let cut_off = f.gene.read().cut_off;
        filter.reads.contains(f.hits)
            && (!filter.use_gene_cutoff || f.hits >= cut_off)
            && self.slot_passes(self.feature_slot[f.id.index()], filter)
    }
}
