use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::catalog::FeatureCatalog;
use crate::geometry::Region;
use crate::model::{Feature, FeatureId};
use crate::settings::FeatureFilter;

/// How a region selection combines with the current set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Replace the set.
    #[default]
    New,
    /// Add to the set.
    Include,
    /// Remove from the set.
    Exclude,
    /// Keep only members also picked by the region.
    Intersect,
}

/// Currently selected features, kept in the order they were added.
///
/// Every mutation also writes the `selected` flag of the affected features so
/// catalog readers see the same membership.
#[derive(Clone, Debug, Default)]
pub struct SelectionEngine {
    order: BTreeMap<u64, FeatureId>,
    members: HashMap<FeatureId, u64>,
    next_seq: u64,
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.members.contains_key(&id)
    }

    /// Members in insertion order, each once.
    pub fn selected(&self) -> Vec<FeatureId> {
        self.order.values().copied().collect()
    }

    pub fn selected_features<'a>(&self, catalog: &'a FeatureCatalog) -> Vec<&'a Feature> {
        self.order.values().filter_map(|&id| catalog.feature(id)).collect()
    }

    fn add(&mut self, catalog: &mut FeatureCatalog, id: FeatureId) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id);
        self.members.insert(id, seq);
        if let Some(f) = catalog.features_mut().get_mut(id.index()) {
            f.selected = true;
        }
        true
    }

    /// No-op for ids that are not members.
    fn remove(&mut self, catalog: &mut FeatureCatalog, id: FeatureId) -> bool {
        let Some(seq) = self.members.remove(&id) else {
            return false;
        };
        self.order.remove(&seq);
        if let Some(f) = catalog.features_mut().get_mut(id.index()) {
            f.selected = false;
        }
        true
    }

    /// Empty the set. Returns whether anything was selected.
    pub fn clear(&mut self, catalog: &mut FeatureCatalog) -> bool {
        if self.members.is_empty() {
            return false;
        }
        let features = catalog.features_mut();
        for id in self.members.keys() {
            if let Some(f) = features.get_mut(id.index()) {
                f.selected = false;
            }
        }
        self.order.clear();
        self.members.clear();
        true
    }

    /// Forget every member without touching feature flags, for when the
    /// catalog has been replaced underneath.
    pub fn reset(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    /// Selectable features at the slots whose position lies inside `region`,
    /// in slot order then ingestion order.
    fn eligible_in_region(catalog: &FeatureCatalog, filter: &FeatureFilter, region: &Region) -> Vec<FeatureId> {
        let mut out = Vec::new();
        for (_, slot) in catalog.index().query_region(region) {
            out.extend(
                catalog
                    .slot_feature_ids(slot)
                    .iter()
                    .copied()
                    .filter(|&id| catalog.selectable(id, filter)),
            );
        }
        out
    }

    /// Apply `mode` with the selectable features found inside `region`.
    /// Returns whether the set changed.
    pub fn select_region(
        &mut self,
        catalog: &mut FeatureCatalog,
        filter: &FeatureFilter,
        region: &Region,
        mode: SelectionMode,
    ) -> bool {
        let picked = Self::eligible_in_region(catalog, filter, region);
        log::debug!("region picked {} features ({mode:?})", picked.len());
        self.apply(catalog, picked, mode)
    }

    fn apply(&mut self, catalog: &mut FeatureCatalog, picked: Vec<FeatureId>, mode: SelectionMode) -> bool {
        match mode {
            SelectionMode::New => {
                let before = self.selected();
                self.clear(catalog);
                for id in picked {
                    self.add(catalog, id);
                }
                before != self.selected()
            }
            SelectionMode::Include => picked.into_iter().fold(false, |changed, id| self.add(catalog, id) | changed),
            SelectionMode::Exclude => picked.into_iter().fold(false, |changed, id| self.remove(catalog, id) | changed),
            SelectionMode::Intersect => {
                let keep: HashSet<FeatureId> = picked.into_iter().collect();
                let drop: Vec<FeatureId> = self.order.values().copied().filter(|id| !keep.contains(id)).collect();
                drop.into_iter().fold(false, |changed, id| self.remove(catalog, id) | changed)
            }
        }
    }

    /// Replace the set with the selectable features sharing a slot with
    /// any feature of the given genes. Genes that are not selected are ignored,
    /// their position-mates are not.
    pub fn select_by_genes(&mut self, catalog: &mut FeatureCatalog, filter: &FeatureFilter, genes: &[&str]) -> bool {
        let mut picked = Vec::new();
        let mut seen_slots = HashSet::new();
        let mut seen = HashSet::new();
        for name in genes {
            let Some(gene) = catalog.gene(name) else {
                continue;
            };
            if !gene.read().selected {
                continue;
            }
            for &id in catalog.gene_feature_ids(name) {
                let Some(slot) = catalog.slot_of(id) else {
                    continue;
                };
                if !seen_slots.insert(slot) {
                    continue;
                }
                for &mate in catalog.slot_feature_ids(slot) {
                    if catalog.selectable(mate, filter) && seen.insert(mate) {
                        picked.push(mate);
                    }
                }
            }
        }
        self.apply(catalog, picked, SelectionMode::New)
    }

    /// Replace the set with the selectable features among `ids`.
    pub fn select_features(&mut self, catalog: &mut FeatureCatalog, filter: &FeatureFilter, ids: &[FeatureId]) -> bool {
        let picked = ids.iter().copied().filter(|&id| catalog.selectable(id, filter)).collect();
        self.apply(catalog, picked, SelectionMode::New)
    }

    /// Flip membership of one feature. A feature that is not selectable can
    /// be removed but not added. Returns the new membership.
    pub fn toggle_feature(&mut self, catalog: &mut FeatureCatalog, filter: &FeatureFilter, id: FeatureId) -> bool {
        if self.remove(catalog, id) {
            return false;
        }
        if catalog.selectable(id, filter) {
            self.add(catalog, id)
        } else {
            false
        }
    }
}
