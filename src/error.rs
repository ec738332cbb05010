//! Error types for building and querying a forest.

use thiserror::Error;

/// Usage errors rejected at the API boundary.
///
/// Degenerate data (zero-variance nodes, an unusable mean split, duplicate
/// points) is handled during the build and never reported here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KdForestError {
    #[error("Dimension must be at least 1")]
    ZeroDimension,

    #[error("A forest needs at least one tree")]
    ZeroTrees,

    #[error("Cannot build a forest over an empty dataset")]
    EmptyData,

    #[error("Data length {len} is not a multiple of the dimension {dimension}")]
    RaggedData { len: usize, dimension: usize },

    #[error("Data point {index} has a non-finite component")]
    NonFiniteData { index: usize },

    #[error("The forest has not been built. Call build() first")]
    NotBuilt,

    #[error("Query component {component} is NaN or infinite")]
    NonFiniteQuery { component: usize },

    #[error("Query has {actual} components but the forest dimension is {expected}")]
    QueryDimensionMismatch { expected: usize, actual: usize },

    #[error("The number of neighbors must be at least 1")]
    ZeroNeighbors,

    #[error("Output buffer holds {actual} neighbors, expected {expected}")]
    OutputSizeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, KdForestError>;
