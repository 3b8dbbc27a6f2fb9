use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpatialIndexError {
    #[error("invalid index bounds: {0}")]
    InvalidBounds(String),
    #[error("spatial index used before build()")]
    NotBuilt,
    #[error("non-finite point ({x}, {y})")]
    NonFinitePoint { x: f32, y: f32 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("dataset contains no features")]
    EmptyDataset,
    #[error("malformed feature #{index}: {reason}")]
    MalformedFeature { index: usize, reason: String },
    #[error(transparent)]
    Index(#[from] SpatialIndexError),
}
