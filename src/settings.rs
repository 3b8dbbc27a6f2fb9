use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the features sharing a spot are folded into one value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolingMode {
    /// Sum of the reads of the contributing features.
    #[default]
    PoolReadsCount,
    /// Number of contributing genes.
    PoolNumberGenes,
    /// Contributing reads per million reads of the spot.
    PoolTpm,
}

/// Transfer function applied to the normalized value before color mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorComputingMode {
    #[default]
    Linear,
    Log,
    Exp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualMode {
    /// Blended gene colors.
    #[default]
    Normal,
    /// Gene colors with alpha following the pooled value.
    DynamicRange,
    /// Wavelength spectrum of the pooled value.
    HeatMap,
    /// Two-tone gradient of the pooled value.
    ColorRange,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointShape {
    #[default]
    Circle,
    Cross,
    Square,
}

impl PointShape {
    pub fn as_u32(self) -> u32 {
        match self {
            PointShape::Circle => 0,
            PointShape::Cross => 1,
            PointShape::Square => 2,
        }
    }
}

/// Inclusive `[lower, upper]` band of integer counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub lower: u32,
    pub upper: u32,
}

impl CountRange {
    pub const UNBOUNDED: CountRange = CountRange {
        lower: 0,
        upper: u32::MAX,
    };

    pub fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn outside(&self, value: u32) -> bool {
        !self.contains(value)
    }
}

impl Default for CountRange {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Everything the aggregator and the selection engine need to decide whether
/// a feature contributes to its spot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureFilter {
    pub reads: CountRange,
    pub genes_per_spot: CountRange,
    pub total_reads_per_spot: CountRange,
    pub use_gene_cutoff: bool,
    pub pooling: PoolingMode,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        Self {
            reads: CountRange::UNBOUNDED,
            genes_per_spot: CountRange::UNBOUNDED,
            total_reads_per_spot: CountRange::UNBOUNDED,
            use_gene_cutoff: false,
            pooling: PoolingMode::PoolReadsCount,
        }
    }
}

/// Visualization parameters of the active view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualSettings {
    pub reads: CountRange,
    pub genes_per_spot: CountRange,
    pub total_reads_per_spot: CountRange,
    pub use_gene_cutoff: bool,
    pub pooling: PoolingMode,
    pub color_mode: ColorComputingMode,
    pub visual_mode: VisualMode,
    pub size: f32,
    pub intensity: f32,
    pub shape: PointShape,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            reads: CountRange::UNBOUNDED,
            genes_per_spot: CountRange::UNBOUNDED,
            total_reads_per_spot: CountRange::UNBOUNDED,
            use_gene_cutoff: false,
            pooling: PoolingMode::PoolReadsCount,
            color_mode: ColorComputingMode::Linear,
            visual_mode: VisualMode::Normal,
            size: 0.5,
            intensity: 1.0,
            shape: PointShape::Circle,
        }
    }
}

impl VisualSettings {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_slice(&bytes).context("parse settings json")?;
        Ok(settings.sanitized())
    }

    /// Clamp values the UI could hand over out of range.
    pub fn sanitized(mut self) -> Self {
        if !self.size.is_finite() || self.size <= 0.0 {
            self.size = Self::default().size;
        }
        self.intensity = if self.intensity.is_finite() {
            self.intensity.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self
    }

    pub fn filter(&self) -> FeatureFilter {
        FeatureFilter {
            reads: self.reads,
            genes_per_spot: self.genes_per_spot,
            total_reads_per_spot: self.total_reads_per_spot,
            use_gene_cutoff: self.use_gene_cutoff,
            pooling: self.pooling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "reads": {{ "lower": 2, "upper": 40 }}, "pooling": "PoolNumberGenes", "intensity": 3.0 }}"#
        )
        .unwrap();
        let s = VisualSettings::from_json_file(file.path()).unwrap();
        assert_eq!(s.reads, CountRange::new(2, 40));
        assert_eq!(s.pooling, PoolingMode::PoolNumberGenes);
        assert_eq!(s.intensity, 1.0);
        assert_eq!(s.visual_mode, VisualMode::Normal);
        assert_eq!(s.size, 0.5);
        assert_eq!(s.filter().reads, CountRange::new(2, 40));
    }

    #[test]
    fn count_range_is_inclusive() {
        let r = CountRange::new(3, 5);
        assert!(r.contains(3) && r.contains(5));
        assert!(r.outside(2) && r.outside(6));
    }

    #[test]
    fn bad_settings_file_reports_context() {
        let err = VisualSettings::from_json_file(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(format!("{err:#}").contains("read settings"));
    }
}
