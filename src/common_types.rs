//! This module contains the value types shared by the tree, the forest and the searcher.

use std::cmp::Ordering;
use std::fmt::Debug;

use num_traits::{AsPrimitive, Float};
use ordered_float::OrderedFloat;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Element type of an indexed dataset.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float32,
    Float64,
}

/// A scalar component of the indexed vectors.
///
/// Implemented for `f32` and `f64`. Thresholds, bounds and distances are all
/// kept in the same type as the data, so a forest over `f32` descriptors never
/// widens anything.
pub trait Scalar: Float + AsPrimitive<f64> + Debug + Send + Sync + 'static {
    /// The [`DataType`] reported by a forest over this scalar.
    const DATA_TYPE: DataType;

    /// Converts a point count into the scalar type.
    fn from_count(count: usize) -> Self;

    /// Total order used for sorting (NaN sorts last).
    fn total_order(&self, other: &Self) -> Ordering;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    fn from_count(count: usize) -> Self {
        count as f32
    }

    fn total_order(&self, other: &Self) -> Ordering {
        OrderedFloat(*self).cmp(&OrderedFloat(*other))
    }
}

impl Scalar for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    fn from_count(count: usize) -> Self {
        count as f64
    }

    fn total_order(&self, other: &Self) -> Ordering {
        OrderedFloat(*self).cmp(&OrderedFloat(*other))
    }
}

/// Rule used to pick the splitting value at a node.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdingMethod {
    /// Split at the median point of the node along the split dimension.
    #[default]
    Median,
    /// Split at the sample mean, falling back to the median when the mean
    /// leaves one side empty.
    Mean,
}

/// A neighbor of a query point: the dataset index and its distance to the query.
///
/// Slots that could not be filled (fewer reachable points than requested)
/// carry `index: None` and a NaN distance.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<T> {
    pub index: Option<usize>,
    pub distance: T,
}

impl<T: Scalar> Neighbor<T> {
    pub fn new(index: usize, distance: T) -> Self {
        Neighbor {
            index: Some(index),
            distance,
        }
    }

    /// An unfilled result slot.
    pub fn invalid() -> Self {
        Neighbor {
            index: None,
            distance: T::nan(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.index.is_some()
    }
}

impl<T: Scalar> Default for Neighbor<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_of_scalars() {
        assert_eq!(<f32 as Scalar>::DATA_TYPE, DataType::Float32);
        assert_eq!(<f64 as Scalar>::DATA_TYPE, DataType::Float64);
    }

    #[test]
    fn test_invalid_neighbor() {
        let n = Neighbor::<f32>::invalid();
        assert!(!n.is_valid());
        assert!(n.distance.is_nan());
        let v = Neighbor::new(3, 0.5f64);
        assert_eq!(v.index, Some(3));
        assert!(v.is_valid());
    }

    #[test]
    fn test_total_order_puts_nan_last() {
        let mut values = vec![2.0f32, f32::NAN, -1.0, 0.5];
        values.sort_by(Scalar::total_order);
        assert_eq!(&values[..3], &[-1.0, 0.5, 2.0]);
        assert!(values[3].is_nan());
    }
}
