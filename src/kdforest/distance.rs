//! Vector dissimilarities used by the forest.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::common_types::Scalar;

/// Dissimilarity between two vectors of the forest's dimension.
///
/// Both metrics are sums of independent per-axis terms. The search relies on
/// this to maintain a lower bound on the distance to a tree cell by swapping a
/// single axis term at a time (see [`Distance::axis_term`]).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distance {
    /// Squared Euclidean distance. No square root is taken.
    #[default]
    L2,
    /// Sum of absolute differences.
    L1,
}

impl Distance {
    /// Distance between `a` and `b`. Both slices must have the same length.
    #[inline]
    pub fn compute<T: Scalar>(self, a: &[T], b: &[T]) -> T {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Distance::L2 => squared_euclidean(a, b),
            Distance::L1 => manhattan(a, b),
        }
    }

    /// Contribution of a single axis offset `delta` to the distance.
    #[inline]
    pub fn axis_term<T: Scalar>(self, delta: T) -> T {
        match self {
            Distance::L2 => delta * delta,
            Distance::L1 => delta.abs(),
        }
    }
}

// Unrolled by four with independent accumulators.
fn squared_euclidean<T: Scalar>(a: &[T], b: &[T]) -> T {
    let mut acc = [T::zero(); 4];
    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        for lane in 0..4 {
            let d = ca[lane] - cb[lane];
            acc[lane] = acc[lane] + d * d;
        }
    }
    let mut sum = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    for (&x, &y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        let d = x - y;
        sum = sum + d * d;
    }
    sum
}

fn manhattan<T: Scalar>(a: &[T], b: &[T]) -> T {
    a.iter()
        .zip(b.iter())
        .fold(T::zero(), |acc, (&x, &y)| acc + (x - y).abs())
}

#[cfg(test)]
mod tests {
    use super::Distance;

    #[test]
    fn test_l2_is_squared() {
        let a = [0.0f64, 0.0];
        let b = [3.0f64, 4.0];
        assert_eq!(Distance::L2.compute(&a, &b), 25.0);
    }

    #[test]
    fn test_l2_unrolled_matches_naive() {
        let a: Vec<f32> = (0..11).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..11).map(|i| (i as f32).sin()).collect();
        let naive: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();
        let fast = Distance::L2.compute(&a, &b);
        assert!((naive - fast).abs() <= 1e-4 * naive.max(1.0));
    }

    #[test]
    fn test_l1() {
        let a = [1.0f32, -2.0, 3.0];
        let b = [0.0f32, 2.0, 3.5];
        assert_eq!(Distance::L1.compute(&a, &b), 5.5);
    }

    #[test]
    fn test_axis_terms() {
        assert_eq!(Distance::L2.axis_term(-3.0f64), 9.0);
        assert_eq!(Distance::L1.axis_term(-3.0f64), 3.0);
    }

    #[test]
    fn test_identical_vectors_have_zero_distance() {
        let a = [0.25f32; 9];
        assert_eq!(Distance::L2.compute(&a, &a), 0.0);
        assert_eq!(Distance::L1.compute(&a, &a), 0.0);
    }
}
