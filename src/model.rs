use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::color::{Rgba, DEFAULT_GENE_COLOR};
use crate::geometry::Point;

/// Position of a feature in ingestion order. Stable for the lifetime of a
/// loaded dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(pub u32);

impl FeatureId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Gene {
    pub name: String,
    pub selected: bool,
    pub color: Rgba,
    /// Minimum reads a feature of this gene needs when the cut-off filter is on.
    pub cut_off: u32,
}

impl Gene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selected: false,
            color: DEFAULT_GENE_COLOR,
            cut_off: 0,
        }
    }
}

/// Genes are shared by every feature naming them, so a color or selection
/// change is visible everywhere at once.
pub type GeneRef = Arc<RwLock<Gene>>;

#[derive(Clone, Debug)]
pub struct Feature {
    pub id: FeatureId,
    pub gene: GeneRef,
    pub position: Point,
    pub hits: u32,
    pub color: Rgba,
    pub selected: bool,
}

impl Feature {
    pub fn gene_name(&self) -> String {
        self.gene.read().name.clone()
    }
}

/// One raw dataset row, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub gene: String,
    pub hits: i64,
    pub x: f32,
    pub y: f32,
}

impl FeatureRecord {
    pub fn new(gene: impl Into<String>, hits: i64, x: f32, y: f32) -> Self {
        Self {
            gene: gene.into(),
            hits,
            x,
            y,
        }
    }

    /// Reason the record cannot be ingested, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.gene.is_empty() {
            return Err("empty gene name".to_string());
        }
        if self.hits < 0 {
            return Err(format!("negative hit count {}", self.hits));
        }
        if self.hits > u32::MAX as i64 {
            return Err(format!("hit count {} out of range", self.hits));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(format!("non-finite position ({}, {})", self.x, self.y));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_reasons() {
        assert!(FeatureRecord::new("A", 3, 1.0, 2.0).validate().is_ok());
        assert!(FeatureRecord::new("", 3, 1.0, 2.0).validate().unwrap_err().contains("gene"));
        assert!(FeatureRecord::new("A", -1, 1.0, 2.0).validate().unwrap_err().contains("negative"));
        assert!(FeatureRecord::new("A", 1, f32::NAN, 2.0).validate().unwrap_err().contains("non-finite"));
    }

    #[test]
    fn shared_gene_mutation_is_visible() {
        let gene: GeneRef = Arc::new(RwLock::new(Gene::new("Actb")));
        let f = Feature {
            id: FeatureId(0),
            gene: gene.clone(),
            position: Point::new(0.0, 0.0),
            hits: 1,
            color: DEFAULT_GENE_COLOR,
            selected: false,
        };
        gene.write().selected = true;
        assert!(f.gene.read().selected);
        assert_eq!(f.gene_name(), "Actb");
    }
}
