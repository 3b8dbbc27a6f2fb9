pub mod catalog;
pub mod color;
pub mod cutoff;
pub mod data;
pub mod error;
pub mod events;
pub mod geometry;
pub mod model;
pub mod quadtree;
pub mod render;
pub mod selection;
pub mod settings;
pub mod synthetic;
pub mod view;

pub use catalog::{ChipGeometry, FeatureCatalog};
pub use error::{CatalogError, SpatialIndexError};
pub use geometry::{Aabb, Point, Region};
pub use model::{Feature, FeatureId, FeatureRecord, Gene, GeneRef};
pub use quadtree::{SlotHandle, SpatialIndex};
pub use render::{RenderAggregator, RenderSlot};
pub use selection::{SelectionEngine, SelectionMode};
pub use settings::VisualSettings;
pub use view::GeneView;
