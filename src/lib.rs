//! Randomized KD-tree forests for nearest-neighbor search over fixed
//! vector datasets, such as matching visual descriptors.
//!
//! ```
//! use kdforest::{Distance, KdForest, ThresholdingMethod};
//!
//! // Four 2-D points, row-major.
//! let data = [0.0f32, 0.0, 1.0, 0.0, 0.0, 1.0, 5.0, 5.0];
//! let mut forest: KdForest<f32, &[f32]> = KdForest::new(2, 1, Distance::L2)?
//!     .with_thresholding_method(ThresholdingMethod::Median)
//!     .with_seed(0);
//! forest.build(&data)?;
//!
//! let neighbors = forest.query(&[0.9, 0.1], 2)?;
//! assert_eq!(neighbors[0].index, Some(1));
//! assert_eq!(neighbors[1].index, Some(0));
//! # Ok::<(), kdforest::KdForestError>(())
//! ```

pub mod common_types;
pub mod error;
pub mod kdforest;
#[cfg(feature = "python")]
mod python;

pub use common_types::{DataType, Neighbor, Scalar, ThresholdingMethod};
pub use error::{KdForestError, Result};
pub use kdforest::{Distance, KdForest, KdTree, SPLIT_HEAP_SIZE, SearchStats, Searcher};
