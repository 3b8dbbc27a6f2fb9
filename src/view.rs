use crate::catalog::{ChipGeometry, FeatureCatalog};
use crate::color::{legend_colors, Rgba};
use crate::error::CatalogError;
use crate::events::{EventBus, ViewEvent};
use crate::geometry::Region;
use crate::model::{Feature, FeatureId, FeatureRecord};
use crate::render::{DrawParams, RenderAggregator};
use crate::selection::{SelectionEngine, SelectionMode};
use crate::settings::{
    ColorComputingMode, CountRange, FeatureFilter, PointShape, PoolingMode, VisualMode, VisualSettings,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewSummary {
    pub features: usize,
    pub genes: usize,
    pub slots: usize,
    pub visible_slots: usize,
    pub local_range: (f32, f32),
    pub selected: usize,
}

/// One gene plot: catalog, render buffer, selection and settings kept in
/// step, with change notifications published through `events`.
#[derive(Debug, Default)]
pub struct GeneView {
    catalog: FeatureCatalog,
    aggregator: RenderAggregator,
    selection: SelectionEngine,
    settings: VisualSettings,
    events: EventBus,
}

impl GeneView {
    pub fn new(settings: VisualSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            aggregator: RenderAggregator::new(settings.size),
            settings,
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn aggregator(&self) -> &RenderAggregator {
        &self.aggregator
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn settings(&self) -> &VisualSettings {
        &self.settings
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    fn filter(&self) -> FeatureFilter {
        self.settings.filter()
    }

    pub fn set_chip(&mut self, chip: ChipGeometry) -> Result<(), CatalogError> {
        self.catalog.set_bounds(chip.border, chip.inner)
    }

    /// Replace the dataset. On error the previous dataset stays active.
    pub fn load(&mut self, records: &[FeatureRecord]) -> Result<(), CatalogError> {
        self.catalog.load(records)?;
        let had_selection = !self.selection.is_empty();
        self.selection.reset();
        self.aggregator.generate(&self.catalog);
        self.recompute();
        if had_selection {
            self.events.emit(ViewEvent::SelectionChanged(Vec::new()));
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        let had_selection = !self.selection.is_empty();
        self.catalog.clear();
        self.selection.reset();
        self.aggregator.generate(&self.catalog);
        self.recompute();
        if had_selection {
            self.events.emit(ViewEvent::SelectionChanged(Vec::new()));
        }
    }

    fn recompute(&mut self) {
        let filter = self.filter();
        let (min, max) = self.aggregator.recompute_visual(&mut self.catalog, &filter);
        self.publish(min, max);
    }

    fn publish(&mut self, min: f32, max: f32) {
        self.events.emit(ViewEvent::LocalRangeChanged { min, max });
        self.events.emit(ViewEvent::BufferUpdated {
            generation: self.aggregator.generation(),
        });
    }

    fn update_genes(&mut self, names: &[&str]) {
        let filter = self.filter();
        let (min, max) = self.aggregator.update_genes(&mut self.catalog, &filter, names);
        self.publish(min, max);
    }

    /// Apply a whole settings block, recomputing only what changed.
    pub fn apply_settings(&mut self, settings: VisualSettings) {
        let settings = settings.sanitized();
        let refilter = settings.filter() != self.filter();
        let resize = settings.size != self.settings.size;
        let restyle = settings != self.settings;
        self.settings = settings;
        if resize {
            self.aggregator.update_slot_size(self.settings.size);
        }
        if refilter {
            self.recompute();
        } else if restyle {
            self.events.emit(ViewEvent::BufferUpdated {
                generation: self.aggregator.generation(),
            });
        }
    }

    pub fn set_reads_range(&mut self, lower: u32, upper: u32) {
        let mut s = self.settings.clone();
        s.reads = CountRange::new(lower, upper);
        self.apply_settings(s);
    }

    pub fn set_genes_per_spot(&mut self, range: CountRange) {
        let mut s = self.settings.clone();
        s.genes_per_spot = range;
        self.apply_settings(s);
    }

    pub fn set_total_reads_per_spot(&mut self, range: CountRange) {
        let mut s = self.settings.clone();
        s.total_reads_per_spot = range;
        self.apply_settings(s);
    }

    pub fn set_gene_cutoff(&mut self, enabled: bool) {
        let mut s = self.settings.clone();
        s.use_gene_cutoff = enabled;
        self.apply_settings(s);
    }

    pub fn set_pooling(&mut self, pooling: PoolingMode) {
        let mut s = self.settings.clone();
        s.pooling = pooling;
        self.apply_settings(s);
    }

    pub fn set_color_mode(&mut self, mode: ColorComputingMode) {
        let mut s = self.settings.clone();
        s.color_mode = mode;
        self.apply_settings(s);
    }

    pub fn set_visual_mode(&mut self, mode: VisualMode) {
        let mut s = self.settings.clone();
        s.visual_mode = mode;
        self.apply_settings(s);
    }

    pub fn set_size(&mut self, size: f32) {
        let mut s = self.settings.clone();
        s.size = size;
        self.apply_settings(s);
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        let mut s = self.settings.clone();
        s.intensity = intensity;
        self.apply_settings(s);
    }

    pub fn set_shape(&mut self, shape: PointShape) {
        let mut s = self.settings.clone();
        s.shape = shape;
        self.apply_settings(s);
    }

    /// Toggle display of the named genes. Unknown names are ignored.
    pub fn set_genes_selected(&mut self, names: &[&str], selected: bool) {
        let mut changed = Vec::new();
        for &name in names {
            let Some(gene) = self.catalog.gene(name) else {
                continue;
            };
            let mut gene = gene.write();
            if gene.selected != selected {
                gene.selected = selected;
                changed.push(name);
            }
        }
        if !changed.is_empty() {
            self.update_genes(&changed);
        }
    }

    pub fn set_all_genes_selected(&mut self, selected: bool) {
        for gene in self.catalog.gene_list() {
            gene.write().selected = selected;
        }
        self.recompute();
    }

    pub fn set_gene_color(&mut self, name: &str, color: Rgba) {
        let Some(gene) = self.catalog.gene(name) else {
            return;
        };
        {
            let mut gene = gene.write();
            if gene.color == color {
                return;
            }
            gene.color = color;
        }
        self.update_genes(&[name]);
    }

    fn selection_changed(&mut self, changed: bool) {
        if !changed {
            return;
        }
        let filter = self.filter();
        self.aggregator.refresh_selection(&self.catalog, &filter);
        self.events.emit(ViewEvent::SelectionChanged(self.selection.selected()));
        self.events.emit(ViewEvent::BufferUpdated {
            generation: self.aggregator.generation(),
        });
    }

    pub fn select_region(&mut self, region: &Region, mode: SelectionMode) {
        let filter = self.filter();
        let changed = self.selection.select_region(&mut self.catalog, &filter, region, mode);
        self.selection_changed(changed);
    }

    pub fn select_genes(&mut self, names: &[&str]) {
        let filter = self.filter();
        let changed = self.selection.select_by_genes(&mut self.catalog, &filter, names);
        self.selection_changed(changed);
    }

    pub fn select_features(&mut self, ids: &[FeatureId]) {
        let filter = self.filter();
        let changed = self.selection.select_features(&mut self.catalog, &filter, ids);
        self.selection_changed(changed);
    }

    pub fn toggle_feature(&mut self, id: FeatureId) -> bool {
        let filter = self.filter();
        let was = self.selection.contains(id);
        let now = self.selection.toggle_feature(&mut self.catalog, &filter, id);
        self.selection_changed(was != now);
        now
    }

    pub fn clear_selection(&mut self) {
        let changed = self.selection.clear(&mut self.catalog);
        self.selection_changed(changed);
    }

    pub fn selected_features(&self) -> Vec<&Feature> {
        self.selection.selected_features(&self.catalog)
    }

    pub fn display_colors(&self) -> Vec<u32> {
        self.aggregator.display_colors(&self.settings)
    }

    pub fn draw_params(&self) -> DrawParams {
        self.aggregator.draw_params(&self.settings)
    }

    pub fn legend(&self, height: usize) -> Vec<u32> {
        let (min, max) = self.aggregator.local_range();
        legend_colors(height, min, max, self.settings.visual_mode, self.settings.color_mode)
    }

    pub fn summary(&self) -> ViewSummary {
        ViewSummary {
            features: self.catalog.feature_list().len(),
            genes: self.catalog.gene_list().len(),
            slots: self.aggregator.len(),
            visible_slots: self.aggregator.visible_count(),
            local_range: self.aggregator.local_range(),
            selected: self.selection.len(),
        }
    }
}
