//! This module contains the KD-tree node model and the randomized build procedure.
//!
//! A tree never stores points. It owns a permutation of the dataset indices
//! (`data_index`) and a flat arena of nodes; leaves refer to a contiguous
//! range of that permutation and internal nodes to the arena slots of their
//! two children.

use log::debug;
use rand::Rng;

use super::heap_utils::{Heap, HeapOrder};
use crate::common_types::{Scalar, ThresholdingMethod};

/// Children of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Arena indices of the lower (`<= threshold`) and upper (`>= threshold`) children.
    Internal { lower: usize, upper: usize },
    /// Range `[begin, end)` of the tree's data index.
    Leaf { begin: usize, end: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KdTreeNode<T> {
    /// `None` for the root.
    pub parent: Option<usize>,
    pub kind: NodeKind,
    pub split_dimension: usize,
    pub split_threshold: T,
    /// Feasible range of `split_dimension` values for points reachable through
    /// this node, inherited from the thresholds of its ancestors.
    pub lower_bound: T,
    pub upper_bound: T,
}

impl<T: Scalar> KdTreeNode<T> {
    fn new(parent: Option<usize>) -> Self {
        KdTreeNode {
            parent,
            kind: NodeKind::Leaf { begin: 0, end: 0 },
            split_dimension: 0,
            split_threshold: T::zero(),
            lower_bound: T::neg_infinity(),
            upper_bound: T::infinity(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// A dataset index paired with its coordinate along the split dimension
/// being sorted on. The value is scratch: it is only meaningful while the
/// node that wrote it is being split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataIndexEntry<T> {
    pub index: usize,
    pub value: T,
}

/// One randomized KD-tree over a shared dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct KdTree<T> {
    nodes: Vec<KdTreeNode<T>>,
    data_index: Vec<DataIndexEntry<T>>,
    depth: usize,
}

/// Parameters of a single tree build.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildParams {
    pub dimension: usize,
    pub thresholding_method: ThresholdingMethod,
    /// Number of top-variance dimensions the split is drawn from.
    pub split_heap_size: usize,
}

/// Per-dimension statistics of the points under a node.
#[derive(Debug, Clone, Copy)]
struct SplitDimension<T> {
    dimension: usize,
    mean: T,
    variance: T,
}

/// Keeps the least varying candidate at the root so it is the one evicted.
#[derive(Debug, Clone, Copy)]
struct LeastVarianceFirst;

impl<T: Scalar> HeapOrder<SplitDimension<T>> for LeastVarianceFirst {
    fn precedes(&self, a: &SplitDimension<T>, b: &SplitDimension<T>) -> bool {
        a.variance < b.variance
    }
}

impl<T: Scalar> KdTree<T> {
    /// Builds a tree over the `data.len() / dimension` row-major points of `data`.
    ///
    /// `data` must hold at least one point.
    pub(crate) fn build<R: Rng + ?Sized>(params: BuildParams, data: &[T], rng: &mut R) -> Self {
        let num_data = data.len() / params.dimension;
        let mut tree = KdTree {
            // A full binary tree with `num_data` leaves.
            nodes: Vec::with_capacity(2 * num_data - 1),
            data_index: (0..num_data)
                .map(|index| DataIndexEntry {
                    index,
                    value: T::zero(),
                })
                .collect(),
            depth: 0,
        };

        let mut builder = TreeBuilder {
            data,
            params,
            split_heap: Heap::with_capacity(params.split_heap_size, LeastVarianceFirst),
            rng,
        };
        let root = tree.new_node(None);
        builder.build_recursively(&mut tree, root, 0, num_data, 0);

        let mut bounds = vec![(T::neg_infinity(), T::infinity()); params.dimension];
        tree.compute_bounds_recursively(root, &mut bounds);

        debug!(
            "Built KD-tree over {} points: {} nodes, depth {}",
            num_data,
            tree.nodes.len(),
            tree.depth
        );
        tree
    }

    pub fn nodes(&self) -> &[KdTreeNode<T>] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &KdTreeNode<T> {
        &self.nodes[index]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Depth of the deepest leaf; a single-leaf tree has depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn data_index(&self) -> &[DataIndexEntry<T>] {
        &self.data_index
    }

    /// Dataset indices of the points in `[begin, end)` of the permutation.
    pub fn leaf_points(&self, begin: usize, end: usize) -> impl Iterator<Item = usize> + '_ {
        self.data_index[begin..end].iter().map(|entry| entry.index)
    }

    fn new_node(&mut self, parent: Option<usize>) -> usize {
        self.nodes.push(KdTreeNode::new(parent));
        self.nodes.len() - 1
    }

    fn make_leaf(&mut self, node_index: usize, begin: usize, end: usize, depth: usize) {
        self.depth = self.depth.max(depth);
        self.nodes[node_index].kind = NodeKind::Leaf { begin, end };
    }

    /// Records on every node the feasible interval of its split dimension.
    /// `bounds[d]` is the interval of dimension `d` for the current cell.
    fn compute_bounds_recursively(&mut self, node_index: usize, bounds: &mut [(T, T)]) {
        let node = &mut self.nodes[node_index];
        let dim = node.split_dimension;
        let threshold = node.split_threshold;
        let (lower_bound, upper_bound) = bounds[dim];
        node.lower_bound = lower_bound;
        node.upper_bound = upper_bound;

        if let NodeKind::Internal { lower, upper } = node.kind {
            bounds[dim].1 = threshold;
            self.compute_bounds_recursively(lower, bounds);
            bounds[dim].1 = upper_bound;

            bounds[dim].0 = threshold;
            self.compute_bounds_recursively(upper, bounds);
            bounds[dim].0 = lower_bound;
        }
    }
}

struct TreeBuilder<'a, T, R: ?Sized> {
    data: &'a [T],
    params: BuildParams,
    split_heap: Heap<SplitDimension<T>, LeastVarianceFirst>,
    rng: &'a mut R,
}

impl<T: Scalar, R: Rng + ?Sized> TreeBuilder<'_, T, R> {
    #[inline]
    fn coordinate(&self, point: usize, dimension: usize) -> T {
        self.data[point * self.params.dimension + dimension]
    }

    fn build_recursively(
        &mut self,
        tree: &mut KdTree<T>,
        node_index: usize,
        begin: usize,
        end: usize,
        depth: usize,
    ) {
        if end - begin <= 1 {
            tree.make_leaf(node_index, begin, end, depth);
            return;
        }

        // No dimension varies: the points coincide.
        let Some(split) = self.choose_split_dimension(tree, begin, end) else {
            tree.make_leaf(node_index, begin, end, depth);
            return;
        };

        for entry in &mut tree.data_index[begin..end] {
            entry.value = self.data[entry.index * self.params.dimension + split.dimension];
        }
        tree.data_index[begin..end].sort_by(|a, b| a.value.total_order(&b.value));

        let (split_index, split_threshold) =
            choose_threshold(&tree.data_index[begin..end], &split, self.params.thresholding_method);
        let split_index = begin + split_index;

        {
            let node = &mut tree.nodes[node_index];
            node.split_dimension = split.dimension;
            node.split_threshold = split_threshold;
        }

        let lower = tree.new_node(Some(node_index));
        self.build_recursively(tree, lower, begin, split_index + 1, depth + 1);
        let upper = tree.new_node(Some(node_index));
        self.build_recursively(tree, upper, split_index + 1, end, depth + 1);

        tree.nodes[node_index].kind = NodeKind::Internal { lower, upper };
    }

    /// Ranks the dimensions by sample variance over `[begin, end)`, keeps the
    /// `split_heap_size` most varying ones and draws one of them uniformly.
    ///
    /// Dimensions along which every point has the same value never enter the
    /// candidate heap, so a draw can only land on a dimension that splits.
    /// Returns `None`, making the node a leaf, when no dimension varies.
    fn choose_split_dimension(
        &mut self,
        tree: &KdTree<T>,
        begin: usize,
        end: usize,
    ) -> Option<SplitDimension<T>> {
        let count = T::from_count(end - begin);
        self.split_heap.clear();

        for dimension in 0..self.params.dimension {
            let mut sum = T::zero();
            let mut second_moment = T::zero();
            let mut min = T::infinity();
            let mut max = T::neg_infinity();
            for entry in &tree.data_index[begin..end] {
                let datum = self.coordinate(entry.index, dimension);
                sum = sum + datum;
                second_moment = second_moment + datum * datum;
                min = min.min(datum);
                max = max.max(datum);
            }

            // Constant along this dimension, whatever the rounding of the moments says.
            if max <= min {
                continue;
            }
            let mean = sum / count;
            let variance = (second_moment / count - mean * mean).max(T::min_positive_value());

            let candidate = SplitDimension {
                dimension,
                mean,
                variance,
            };
            if self.split_heap.len() < self.params.split_heap_size {
                self.split_heap.push(candidate);
            } else if self
                .split_heap
                .peek()
                .is_some_and(|least| least.variance < variance)
            {
                self.split_heap.replace(0, candidate);
            }
        }

        if self.split_heap.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..self.split_heap.len());
        self.split_heap.get(pick).copied()
    }
}

/// Picks the last position of the lower side within `sorted` and the threshold.
///
/// The lower side is `sorted[..=split_index]`, the upper side the rest; both
/// are non-empty for `sorted.len() >= 2`.
fn choose_threshold<T: Scalar>(
    sorted: &[DataIndexEntry<T>],
    split: &SplitDimension<T>,
    method: ThresholdingMethod,
) -> (usize, T) {
    if method == ThresholdingMethod::Mean {
        let below = sorted.partition_point(|entry| entry.value <= split.mean);
        if below >= 1 && below < sorted.len() {
            return (below - 1, split.mean);
        }
        // The mean does not separate the points, fall back to the median.
    }
    let median = (sorted.len() - 1) / 2;
    (median, sorted[median].value)
}
