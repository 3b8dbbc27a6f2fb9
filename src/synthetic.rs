use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::{ChipDto, DatasetPayload};
use crate::model::FeatureRecord;

/// Shape of a generated dataset: a regular grid of spots, each expressing a
/// random subset of the gene panel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticParams {
    pub grid_width: u32,
    pub grid_height: u32,
    pub spacing: f32,
    pub genes: usize,
    pub min_genes_per_spot: usize,
    pub max_genes_per_spot: usize,
    pub max_hits: u32,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            grid_width: 33,
            grid_height: 35,
            spacing: 1.0,
            genes: 200,
            min_genes_per_spot: 1,
            max_genes_per_spot: 12,
            max_hits: 60,
        }
    }
}

impl SyntheticParams {
    /// Square-ish grid with roughly `spots` spots.
    pub fn with_spots(spots: u32) -> Self {
        let side = (spots.max(1) as f64).sqrt().ceil() as u32;
        Self {
            grid_width: side,
            grid_height: spots.max(1).div_ceil(side),
            ..Self::default()
        }
    }
}

pub fn gene_name(i: usize) -> String {
    format!("Gene{i:04}")
}

/// Deterministic for a given `(params, seed)`.
pub fn generate(params: &SyntheticParams, seed: u64) -> DatasetPayload {
    let mut rng = StdRng::seed_from_u64(seed);
    let panel: Vec<String> = (0..params.genes.max(1)).map(gene_name).collect();
    let lo = params.min_genes_per_spot.clamp(1, panel.len());
    let hi = params.max_genes_per_spot.clamp(lo, panel.len());
    let max_hits = params.max_hits.max(1);

    let mut features = Vec::new();
    for gy in 0..params.grid_height {
        for gx in 0..params.grid_width {
            let x = (gx + 1) as f32 * params.spacing;
            let y = (gy + 1) as f32 * params.spacing;
            let k = rng.gen_range(lo..=hi);
            for gene in panel.choose_multiple(&mut rng, k) {
                // skewed towards low counts, like real read depth
                let u: f32 = rng.gen();
                let hits = 1 + (u * u * u * (max_hits - 1) as f32) as i64;
                features.push(FeatureRecord::new(gene.clone(), hits, x, y));
            }
        }
    }

    let s = params.spacing;
    let chip = ChipDto {
        id: format!("synthetic-{seed}"),
        name: "synthetic".to_string(),
        barcodes: params.grid_width * params.grid_height,
        x1: s,
        y1: s,
        x2: params.grid_width as f32 * s,
        y2: params.grid_height as f32 * s,
        x1_border: 0.0,
        y1_border: 0.0,
        x2_border: (params.grid_width + 1) as f32 * s,
        y2_border: (params.grid_height + 1) as f32 * s,
    };

    DatasetPayload {
        chip: Some(chip),
        features,
    }
}
