//! Best-bin-first search over all the trees of a forest at once.
//!
//! A [`Searcher`] owns every piece of mutable query state: the global queue of
//! pending subtrees, the bounded set of best neighbors and the per-point
//! "visited in this query" book. The forest itself stays immutable, so any
//! number of searchers can query one forest concurrently.

use log::trace;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::heap_utils::{Heap, HeapOrder};
use super::kd_tree::{KdTree, NodeKind};
use super::KdForest;
use crate::common_types::{Neighbor, Scalar};
use crate::error::{KdForestError, Result};

/// Work counters of the last query.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchStats {
    /// True distance evaluations.
    pub num_comparisons: usize,
    /// Tree nodes descended through.
    pub num_recursions: usize,
    /// Searches cut short because no pending subtree could improve the result.
    pub num_simplifications: usize,
}

/// A pending subtree: the node to explore in a tree and a lower bound on the
/// distance from the query to any point below it.
#[derive(Debug, Clone, Copy)]
struct SearchState<T> {
    tree: usize,
    node: usize,
    lower_bound: T,
}

#[derive(Debug, Clone, Copy)]
struct SmallestBoundFirst;

impl<T: Scalar> HeapOrder<SearchState<T>> for SmallestBoundFirst {
    fn precedes(&self, a: &SearchState<T>, b: &SearchState<T>) -> bool {
        a.lower_bound < b.lower_bound
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate<T> {
    index: usize,
    distance: T,
}

/// Puts the worst kept neighbor at the root, where it is replaced.
#[derive(Debug, Clone, Copy)]
struct FarthestFirst;

impl<T: Scalar> HeapOrder<Candidate<T>> for FarthestFirst {
    fn precedes(&self, a: &Candidate<T>, b: &Candidate<T>) -> bool {
        a.distance > b.distance
    }
}

/// Per-query scratch state bound to one built forest.
pub struct Searcher<'f, T: Scalar, D> {
    forest: &'f KdForest<T, D>,
    points: &'f [T],
    search_queue: Heap<SearchState<T>, SmallestBoundFirst>,
    neighbors: Heap<Candidate<T>, FarthestFirst>,
    /// `visited[i] == generation` iff point `i` was scored by the current query.
    visited: Vec<u32>,
    generation: u32,
    stats: SearchStats,
}

impl<'f, T: Scalar, D: AsRef<[T]>> Searcher<'f, T, D> {
    /// Creates a searcher for `forest`.
    ///
    /// # Errors
    /// [`KdForestError::NotBuilt`] if the forest has not been built.
    pub fn new(forest: &'f KdForest<T, D>) -> Result<Self> {
        let points = forest.points()?;
        let queue_capacity = forest.trees().iter().map(KdTree::num_nodes).sum();
        Ok(Searcher {
            forest,
            points,
            search_queue: Heap::with_capacity(queue_capacity, SmallestBoundFirst),
            neighbors: Heap::new(FarthestFirst),
            visited: vec![0; forest.num_data()],
            generation: 0,
            stats: SearchStats::default(),
        })
    }

    /// Counters of the last query.
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Finds the `num_neighbors` nearest points to `query`, sorted by
    /// increasing distance. Unfilled slots are [`Neighbor::invalid`].
    pub fn query(&mut self, query: &[T], num_neighbors: usize) -> Result<Vec<Neighbor<T>>> {
        let mut neighbors = vec![Neighbor::invalid(); num_neighbors];
        self.query_into(query, &mut neighbors)?;
        Ok(neighbors)
    }

    /// Fills `neighbors` with the `neighbors.len()` nearest points to `query`.
    ///
    /// With a comparison budget set on the forest the result is approximate.
    /// Returns the number of distance evaluations performed.
    ///
    /// # Errors
    /// - [`KdForestError::ZeroNeighbors`] if `neighbors` is empty.
    /// - [`KdForestError::QueryDimensionMismatch`] if `query` does not have
    ///   the forest's dimension.
    /// - [`KdForestError::NonFiniteQuery`] if a component is NaN or infinite.
    pub fn query_into(&mut self, query: &[T], neighbors: &mut [Neighbor<T>]) -> Result<usize> {
        if neighbors.is_empty() {
            return Err(KdForestError::ZeroNeighbors);
        }
        let dimension = self.forest.dimension();
        if query.len() != dimension {
            return Err(KdForestError::QueryDimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if let Some(component) = query.iter().position(|v| !v.is_finite()) {
            return Err(KdForestError::NonFiniteQuery { component });
        }

        self.search(query, neighbors.len());
        self.drain_neighbors(neighbors);
        Ok(self.stats.num_comparisons)
    }

    /// Runs one query per row of the row-major `queries` block, writing
    /// `num_neighbors` results per query into `neighbors`.
    /// Returns the total number of distance evaluations.
    pub fn query_batch(
        &mut self,
        queries: &[T],
        num_neighbors: usize,
        neighbors: &mut [Neighbor<T>],
    ) -> Result<usize> {
        if num_neighbors == 0 {
            return Err(KdForestError::ZeroNeighbors);
        }
        let dimension = self.forest.dimension();
        if queries.len() % dimension != 0 {
            return Err(KdForestError::RaggedData {
                len: queries.len(),
                dimension,
            });
        }
        let num_queries = queries.len() / dimension;
        if neighbors.len() != num_queries * num_neighbors {
            return Err(KdForestError::OutputSizeMismatch {
                expected: num_queries * num_neighbors,
                actual: neighbors.len(),
            });
        }

        let mut total = 0;
        for (query, out) in queries
            .chunks_exact(dimension)
            .zip(neighbors.chunks_exact_mut(num_neighbors))
        {
            total += self.query_into(query, out)?;
        }
        Ok(total)
    }

    /// Starts a new query generation, invalidating every visited mark in O(1).
    fn next_generation(&mut self) {
        if self.generation == u32::MAX {
            self.visited.fill(0);
            self.generation = 0;
        }
        self.generation += 1;
    }

    /// Branch and bound: expands pending subtrees in order of increasing lower
    /// bound until the queue empties, the budget runs out, or no pending
    /// subtree can beat the worst kept neighbor.
    fn search(&mut self, query: &[T], num_neighbors: usize) {
        self.next_generation();
        self.stats = SearchStats::default();
        self.search_queue.clear();
        self.neighbors.clear();

        for tree in 0..self.forest.num_trees() {
            self.search_queue.push(SearchState {
                tree,
                node: 0,
                lower_bound: T::zero(),
            });
        }

        while !self.budget_exhausted() {
            let Some(state) = self.search_queue.pop() else {
                break;
            };
            if self.neighbors.len() == num_neighbors
                && self
                    .neighbors
                    .peek()
                    .is_some_and(|worst| worst.distance <= state.lower_bound)
            {
                self.stats.num_simplifications += 1;
                break;
            }
            self.descend(state, query, num_neighbors);
        }

        trace!(
            "Query finished: {} comparisons, {} recursions, {} pending, worst kept distance {:?}",
            self.stats.num_comparisons,
            self.stats.num_recursions,
            self.search_queue.len(),
            self.neighbors.peek().map(|worst| worst.distance.as_())
        );
    }

    #[inline]
    fn budget_exhausted(&self) -> bool {
        let max = self.forest.max_num_comparisons();
        max != 0 && self.stats.num_comparisons >= max
    }

    /// Walks from `state.node` down to a leaf, always taking the child on the
    /// query's side and queueing the other one when it may still hold a
    /// better neighbor.
    fn descend(&mut self, state: SearchState<T>, query: &[T], num_neighbors: usize) {
        let forest = self.forest;
        let tree = &forest.trees()[state.tree];
        let distance = forest.distance();
        let mut node_index = state.node;
        // Lower bound of the current cell, a sum of one term per axis.
        let bound = state.lower_bound;

        loop {
            self.stats.num_recursions += 1;
            let node = tree.node(node_index);
            let (lower, upper) = match node.kind {
                NodeKind::Leaf { begin, end } => {
                    self.score_leaf(tree, begin, end, query, num_neighbors);
                    return;
                }
                NodeKind::Internal { lower, upper } => (lower, upper),
            };

            //   x1   x2   x3
            //   (----|----]
            // The far cell's term on this axis is the offset from x to x2; it
            // replaces the cell's current term, non-zero only when x lies
            // outside [x1, x3].
            let x = query[node.split_dimension];
            let x1 = node.lower_bound;
            let x2 = node.split_threshold;
            let x3 = node.upper_bound;

            let mut far_bound = bound + distance.axis_term(x - x2);
            let (near, far) = if x <= x2 {
                if x < x1 {
                    far_bound = far_bound - distance.axis_term(x - x1);
                }
                (lower, upper)
            } else {
                if x > x3 {
                    far_bound = far_bound - distance.axis_term(x - x3);
                }
                (upper, lower)
            };

            let competitive = self.neighbors.len() < num_neighbors
                || self
                    .neighbors
                    .peek()
                    .is_some_and(|worst| far_bound < worst.distance);
            if competitive {
                self.search_queue.push(SearchState {
                    tree: state.tree,
                    node: far,
                    lower_bound: far_bound,
                });
            }
            node_index = near;
        }
    }

    fn score_leaf(
        &mut self,
        tree: &KdTree<T>,
        begin: usize,
        end: usize,
        query: &[T],
        num_neighbors: usize,
    ) {
        let dimension = self.forest.dimension();
        let distance = self.forest.distance();

        for index in tree.leaf_points(begin, end) {
            if self.budget_exhausted() {
                break;
            }
            // Trees share the points: each one is scored once per query.
            if self.visited[index] == self.generation {
                continue;
            }
            self.visited[index] = self.generation;

            let point = &self.points[index * dimension..(index + 1) * dimension];
            let d = distance.compute(query, point);
            self.stats.num_comparisons += 1;

            let candidate = Candidate { index, distance: d };
            if self.neighbors.len() < num_neighbors {
                self.neighbors.push(candidate);
            } else if self.neighbors.peek().is_some_and(|worst| d < worst.distance) {
                self.neighbors.replace(0, candidate);
            }
        }
    }

    /// Moves the kept neighbors into `out` by increasing distance and marks
    /// the remaining slots invalid.
    fn drain_neighbors(&mut self, out: &mut [Neighbor<T>]) {
        let found = self.neighbors.len();
        for slot in out[found..].iter_mut() {
            *slot = Neighbor::invalid();
        }
        // Popping yields the farthest first.
        for slot in out[..found].iter_mut().rev() {
            if let Some(candidate) = self.neighbors.pop() {
                *slot = Neighbor::new(candidate.index, candidate.distance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_types::ThresholdingMethod;
    use crate::kdforest::Distance;
    use ordered_float::OrderedFloat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_data(num_data: usize, dimension: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..num_data * dimension)
            .map(|_| rng.gen_range(0.0f32..1.0))
            .collect()
    }

    // Exhaustive linear scan, the reference answer.
    fn brute_force(
        data: &[f32],
        dimension: usize,
        query: &[f32],
        k: usize,
        distance: Distance,
    ) -> Vec<(usize, f32)> {
        let mut all: Vec<(usize, f32)> = data
            .chunks_exact(dimension)
            .enumerate()
            .map(|(i, p)| (i, distance.compute(query, p)))
            .collect();
        all.sort_by_key(|&(i, d)| (OrderedFloat(d), i));
        all.truncate(k);
        all
    }

    fn build_forest(
        data: &[f32],
        dimension: usize,
        num_trees: usize,
        distance: Distance,
        method: ThresholdingMethod,
        seed: u64,
    ) -> KdForest<f32, &[f32]> {
        let mut forest = KdForest::new(dimension, num_trees, distance)
            .expect("Valid forest parameters")
            .with_thresholding_method(method)
            .with_seed(seed);
        forest.build(data).expect("Build should succeed");
        forest
    }

    fn recall(found: &[Neighbor<f32>], truth: &[(usize, f32)]) -> usize {
        truth
            .iter()
            .filter(|(i, _)| found.iter().any(|n| n.index == Some(*i)))
            .count()
    }

    #[test]
    fn test_exact_mode_matches_brute_force() {
        for (dimension, seed) in [(2, 1), (8, 2), (16, 3), (64, 4)] {
            for distance in [Distance::L2, Distance::L1] {
                for method in [ThresholdingMethod::Median, ThresholdingMethod::Mean] {
                    let data = random_data(400, dimension, seed);
                    let forest = build_forest(&data, dimension, 1, distance, method, seed);
                    let mut searcher = forest.searcher().unwrap();
                    let queries = random_data(20, dimension, seed + 100);
                    for query in queries.chunks_exact(dimension) {
                        let found = searcher.query(query, 5).unwrap();
                        let truth = brute_force(&data, dimension, query, 5, distance);
                        let found_pairs: Vec<(usize, f32)> =
                            found.iter().map(|n| (n.index.unwrap(), n.distance)).collect();
                        assert_eq!(found_pairs, truth, "dimension {} {:?} {:?}", dimension, distance, method);
                    }
                }
            }
        }
    }

    #[test]
    fn test_exact_mode_many_trees_matches_brute_force() {
        let dimension = 12;
        for seed in 0..10 {
            let data = random_data(300, dimension, seed);
            let forest = build_forest(&data, dimension, 4, Distance::L2, ThresholdingMethod::Median, seed);
            let mut searcher = forest.searcher().unwrap();
            let query = random_data(1, dimension, seed + 1000);
            let found = searcher.query(&query, 7).unwrap();
            let truth = brute_force(&data, dimension, &query, 7, Distance::L2);
            let found_pairs: Vec<(usize, f32)> =
                found.iter().map(|n| (n.index.unwrap(), n.distance)).collect();
            assert_eq!(found_pairs, truth);
            // Each point is scored at most once despite four trees.
            assert!(searcher.stats().num_comparisons <= 300);
        }
    }

    #[test]
    fn test_query_self_returns_self() {
        let dimension = 8;
        let data = random_data(1000, dimension, 42);
        let forest = build_forest(&data, dimension, 1, Distance::L2, ThresholdingMethod::Median, 42);
        let mut searcher = forest.searcher().unwrap();
        let found = searcher.query(&data[..dimension], 1).unwrap();
        assert_eq!(found[0].index, Some(0));
        assert_eq!(found[0].distance, 0.0);
    }

    #[test]
    fn test_budgeted_search_is_never_better_than_exact() {
        let dimension = 8;
        let data = random_data(1000, dimension, 8);
        let mut forest = build_forest(&data, dimension, 8, Distance::L2, ThresholdingMethod::Median, 8);
        let queries = random_data(25, dimension, 808);

        forest.set_max_num_comparisons(50);
        let mut searcher = forest.searcher().unwrap();
        for query in queries.chunks_exact(dimension) {
            let found = searcher.query(query, 1).unwrap();
            assert!(searcher.stats().num_comparisons <= 50);
            let exact = brute_force(&data, dimension, query, 1, Distance::L2);
            assert!(found[0].is_valid());
            assert!(found[0].distance >= exact[0].1);
        }
    }

    #[test]
    fn test_recall_is_monotone_in_budget() {
        let dimension = 16;
        let data = random_data(800, dimension, 5);
        let mut forest = build_forest(&data, dimension, 4, Distance::L2, ThresholdingMethod::Mean, 5);
        let queries = random_data(10, dimension, 505);

        for query in queries.chunks_exact(dimension) {
            let truth = brute_force(&data, dimension, query, 10, Distance::L2);
            let mut previous = 0;
            for budget in [10, 25, 50, 100, 200, 400, 0] {
                forest.set_max_num_comparisons(budget);
                let found = forest.query(query, 10).unwrap();
                let hits = recall(&found, &truth);
                assert!(hits >= previous, "Recall dropped from {} to {} at budget {}", previous, hits, budget);
                previous = hits;
            }
            assert_eq!(previous, 10, "Exact search finds every true neighbor");
        }
    }

    #[test]
    fn test_unfilled_slots_are_invalid() {
        let data = [0.0f32, 0.0, 1.0, 1.0, 2.0, 2.0];
        let forest = build_forest(&data, 2, 2, Distance::L2, ThresholdingMethod::Median, 0);
        let mut searcher = forest.searcher().unwrap();
        let found = searcher.query(&[0.9, 0.9], 5).unwrap();
        assert_eq!(found.len(), 5);
        assert_eq!(found[0].index, Some(1));
        assert_eq!(found[1].index, Some(0));
        assert_eq!(found[2].index, Some(2));
        for slot in &found[3..] {
            assert_eq!(slot.index, None);
            assert!(slot.distance.is_nan());
        }
    }

    #[test]
    fn test_identical_points() {
        let data = vec![0.3f32; 4 * 3];
        let forest = build_forest(&data, 3, 3, Distance::L2, ThresholdingMethod::Mean, 0);
        for tree in 0..3 {
            assert_eq!(forest.tree_num_nodes(tree), Some(1));
        }
        let found = forest.query(&[0.3, 0.3, 0.3], 6).unwrap();
        let mut indices: Vec<usize> = found[..4].iter().map(|n| n.index.unwrap()).collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(found[..4].iter().all(|n| n.distance == 0.0));
        assert!(found[4..].iter().all(|n| !n.is_valid()));
    }

    #[test]
    fn test_query_errors() {
        let data = random_data(10, 3, 0);
        let forest = build_forest(&data, 3, 1, Distance::L2, ThresholdingMethod::Median, 0);
        let mut searcher = forest.searcher().unwrap();
        assert_eq!(searcher.query(&[0.0, 0.0, 0.0], 0), Err(KdForestError::ZeroNeighbors));
        assert_eq!(
            searcher.query(&[0.0, 0.0], 1),
            Err(KdForestError::QueryDimensionMismatch { expected: 3, actual: 2 })
        );
        assert_eq!(
            searcher.query(&[0.5, f32::NAN, 0.5], 3),
            Err(KdForestError::NonFiniteQuery { component: 1 })
        );
        assert_eq!(
            forest.query(&[f32::INFINITY, 0.5, 0.5], 3),
            Err(KdForestError::NonFiniteQuery { component: 0 })
        );
        let mut batch = vec![Neighbor::invalid(); 2];
        assert_eq!(
            searcher.query_batch(&[0.1, 0.2, 0.3, 0.4, f32::NEG_INFINITY, 0.6], 1, &mut batch),
            Err(KdForestError::NonFiniteQuery { component: 1 })
        );
    }

    #[test]
    fn test_batch_matches_single_queries() {
        let dimension = 5;
        let data = random_data(200, dimension, 13);
        let forest = build_forest(&data, dimension, 2, Distance::L1, ThresholdingMethod::Median, 13);
        let queries = random_data(6, dimension, 1313);
        let k = 3;

        let mut searcher = forest.searcher().unwrap();
        let mut batch = vec![Neighbor::invalid(); 6 * k];
        let total = searcher.query_batch(&queries, k, &mut batch).unwrap();

        let mut expected_total = 0;
        for (query, chunk) in queries.chunks_exact(dimension).zip(batch.chunks_exact(k)) {
            let single = searcher.query(query, k).unwrap();
            expected_total += searcher.stats().num_comparisons;
            assert_eq!(single.as_slice(), chunk);
        }
        assert_eq!(total, expected_total);

        let mut wrong = vec![Neighbor::invalid(); 5];
        assert_eq!(
            searcher.query_batch(&queries, k, &mut wrong),
            Err(KdForestError::OutputSizeMismatch { expected: 18, actual: 5 })
        );
        assert_eq!(
            searcher.query_batch(&queries[..7], k, &mut batch),
            Err(KdForestError::RaggedData { len: 7, dimension: 5 })
        );
    }

    #[test]
    fn test_generation_wrap_resets_visited_book() {
        let data = random_data(50, 2, 3);
        let forest = build_forest(&data, 2, 3, Distance::L2, ThresholdingMethod::Median, 3);
        let mut searcher = forest.searcher().unwrap();
        let before = searcher.query(&[0.5, 0.5], 4).unwrap();

        searcher.generation = u32::MAX - 1;
        for _ in 0..3 {
            let again = searcher.query(&[0.5, 0.5], 4).unwrap();
            assert_eq!(again, before);
        }
        assert!(searcher.generation < 3);
    }

    #[test]
    fn test_exact_search_terminates_early_on_easy_queries() {
        let dimension = 2;
        let data = random_data(2000, dimension, 17);
        let forest = build_forest(&data, dimension, 1, Distance::L2, ThresholdingMethod::Median, 17);
        let mut searcher = forest.searcher().unwrap();
        searcher.query(&[0.5, 0.5], 1).unwrap();
        let stats = searcher.stats();
        assert!(stats.num_comparisons < 200, "Pruning should skip most points, scored {}", stats.num_comparisons);
        assert!(stats.num_recursions > 0);
        assert_eq!(stats.num_simplifications, 1);
    }
}
