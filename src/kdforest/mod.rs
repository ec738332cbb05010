//! Randomized forest of KD-trees for approximate and exact nearest-neighbor search.
//!
//! With one tree the forest is a classic best-bin-first KD-tree: every node
//! splits on the dimension of largest variance. With several trees each node
//! draws its split uniformly among the [`SPLIT_HEAP_SIZE`] most varying
//! dimensions, so the trees partition space differently, and a query explores
//! all of them through a single priority queue.

pub mod distance;
pub mod heap_utils;
pub mod kd_tree;
pub mod search;

pub use distance::Distance;
pub use kd_tree::{DataIndexEntry, KdTree, KdTreeNode, NodeKind};
pub use search::{SearchStats, Searcher};

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common_types::{DataType, Neighbor, Scalar, ThresholdingMethod};
use crate::error::{KdForestError, Result};
use kd_tree::BuildParams;

/// Number of top-variance dimensions a split is drawn from when the forest
/// has more than one tree.
pub const SPLIT_HEAP_SIZE: usize = 5;

/// A forest of KD-trees over a read-only, row-major dataset.
///
/// `D` is the dataset storage: usually a borrowed `&[T]` that outlives the
/// forest, or an owned `Vec<T>`. The forest reads it by index and never
/// copies or mutates it.
#[derive(Debug, Clone)]
pub struct KdForest<T, D> {
    dimension: usize,
    num_trees: usize,
    distance: Distance,
    thresholding_method: ThresholdingMethod,
    max_num_comparisons: usize,
    split_heap_size: usize,
    seed: Option<u64>,

    data: Option<D>,
    num_data: usize,
    trees: Vec<KdTree<T>>,
}

impl<T: Scalar, D: AsRef<[T]>> KdForest<T, D> {
    /// Creates an empty forest of `num_trees` trees over `dimension`-dimensional
    /// points. Call [`KdForest::build`] before querying.
    ///
    /// # Errors
    /// [`KdForestError::ZeroDimension`] or [`KdForestError::ZeroTrees`].
    pub fn new(dimension: usize, num_trees: usize, distance: Distance) -> Result<Self> {
        if dimension == 0 {
            return Err(KdForestError::ZeroDimension);
        }
        if num_trees == 0 {
            return Err(KdForestError::ZeroTrees);
        }
        Ok(KdForest {
            dimension,
            num_trees,
            distance,
            thresholding_method: ThresholdingMethod::default(),
            max_num_comparisons: 0,
            split_heap_size: if num_trees == 1 { 1 } else { SPLIT_HEAP_SIZE },
            seed: None,
            data: None,
            num_data: 0,
            trees: Vec::new(),
        })
    }

    pub fn with_thresholding_method(mut self, method: ThresholdingMethod) -> Self {
        self.thresholding_method = method;
        self
    }

    pub fn with_max_num_comparisons(mut self, max_num_comparisons: usize) -> Self {
        self.max_num_comparisons = max_num_comparisons;
        self
    }

    /// Fixes the seed of the split-dimension draws made by [`KdForest::build`].
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Takes effect on the next build.
    pub fn set_thresholding_method(&mut self, method: ThresholdingMethod) {
        self.thresholding_method = method;
    }

    pub fn thresholding_method(&self) -> ThresholdingMethod {
        self.thresholding_method
    }

    /// Caps the number of distance evaluations per query. `0` means unbounded,
    /// i.e. exact search.
    pub fn set_max_num_comparisons(&mut self, max_num_comparisons: usize) {
        self.max_num_comparisons = max_num_comparisons;
    }

    pub fn max_num_comparisons(&self) -> usize {
        self.max_num_comparisons
    }

    /// `None` draws a fresh seed from the OS on every build.
    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Indexes `data`, replacing any previous trees and dataset.
    ///
    /// The split-dimension draws come from a [`StdRng`] seeded with
    /// [`KdForest::seed`], or from OS entropy when no seed is set.
    pub fn build(&mut self, data: D) -> Result<()> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.build_with_rng(data, &mut rng)
    }

    /// Same as [`KdForest::build`] with an explicit random source.
    ///
    /// # Errors
    /// - [`KdForestError::EmptyData`] if `data` holds no point.
    /// - [`KdForestError::RaggedData`] if its length is not a multiple of the dimension.
    /// - [`KdForestError::NonFiniteData`] if a component is NaN or infinite.
    pub fn build_with_rng<R: Rng + ?Sized>(&mut self, data: D, rng: &mut R) -> Result<()> {
        let points = data.as_ref();
        if points.is_empty() {
            return Err(KdForestError::EmptyData);
        }
        if points.len() % self.dimension != 0 {
            return Err(KdForestError::RaggedData {
                len: points.len(),
                dimension: self.dimension,
            });
        }
        if let Some(position) = points.iter().position(|v| !v.is_finite()) {
            return Err(KdForestError::NonFiniteData {
                index: position / self.dimension,
            });
        }

        let num_data = points.len() / self.dimension;
        let params = BuildParams {
            dimension: self.dimension,
            thresholding_method: self.thresholding_method,
            split_heap_size: self.split_heap_size,
        };
        let trees: Vec<KdTree<T>> = (0..self.num_trees)
            .map(|_| KdTree::build(params, points, &mut *rng))
            .collect();

        info!(
            "Built KD-forest: {} trees over {} points of dimension {} ({:?} thresholding)",
            self.num_trees, num_data, self.dimension, self.thresholding_method
        );

        self.trees = trees;
        self.num_data = num_data;
        self.data = Some(data);
        Ok(())
    }

    /// Creates a query context over this forest.
    pub fn searcher(&self) -> Result<Searcher<'_, T, D>> {
        Searcher::new(self)
    }

    /// Finds the `num_neighbors` nearest points to `query` with a one-off
    /// [`Searcher`]. Keep a searcher around to run many queries.
    pub fn query(&self, query: &[T], num_neighbors: usize) -> Result<Vec<Neighbor<T>>> {
        self.searcher()?.query(query, num_neighbors)
    }

    /// The indexed dataset.
    pub fn points(&self) -> Result<&[T]> {
        self.data
            .as_ref()
            .map(|data| data.as_ref())
            .ok_or(KdForestError::NotBuilt)
    }

    pub fn is_built(&self) -> bool {
        self.data.is_some()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn data_type(&self) -> DataType {
        T::DATA_TYPE
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn num_data(&self) -> usize {
        self.num_data
    }

    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Built trees; empty before [`KdForest::build`].
    pub fn trees(&self) -> &[KdTree<T>] {
        &self.trees
    }

    pub fn tree(&self, index: usize) -> Option<&KdTree<T>> {
        self.trees.get(index)
    }

    pub fn tree_depth(&self, index: usize) -> Option<usize> {
        self.tree(index).map(KdTree::depth)
    }

    pub fn tree_num_nodes(&self, index: usize) -> Option<usize> {
        self.tree(index).map(KdTree::num_nodes)
    }
}
