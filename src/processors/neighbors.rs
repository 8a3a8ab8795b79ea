//! Nearest-neighbour queries over particle positions.
//!
//! [`KdTreeIndex`] wraps a `kiddo` immutable KD-tree. The density estimator
//! only depends on the [`NeighborSearch`] trait, so any index that returns
//! neighbours closest-first can be plugged in.

use std::num::NonZeroUsize;

use kiddo::{ImmutableKdTree, SquaredEuclidean};

/// One neighbour returned by a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbour in the indexed point list
    pub index: usize,
    /// Euclidean distance to the query point
    pub distance: f64,
}

/// k-nearest-neighbour lookup by 3D position.
pub trait NeighborSearch {
    /// Up to `k` neighbours of `point`, closest first.
    ///
    /// A point that is itself part of the index is returned as its own
    /// neighbour at distance 0.
    fn nearest(&self, point: &[f64; 3], k: usize) -> Vec<Neighbor>;

    /// Number of indexed points.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// KD-tree over a fixed set of positions.
pub struct KdTreeIndex {
    tree: Option<ImmutableKdTree<f64, 3>>,
    len: usize,
}

impl KdTreeIndex {
    /// Build the tree. O(n log n).
    pub fn new(points: &[[f64; 3]]) -> Self {
        let tree = if points.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(points))
        };
        Self {
            tree,
            len: points.len(),
        }
    }
}

impl NeighborSearch for KdTreeIndex {
    fn nearest(&self, point: &[f64; 3], k: usize) -> Vec<Neighbor> {
        let (Some(tree), Some(qty)) = (self.tree.as_ref(), NonZeroUsize::new(k)) else {
            return Vec::new();
        };

        tree.nearest_n::<SquaredEuclidean>(point, qty)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Exhaustive search used to cross-check the KD-tree.
    pub(crate) struct BruteForce(pub Vec<[f64; 3]>);

    impl NeighborSearch for BruteForce {
        fn nearest(&self, point: &[f64; 3], k: usize) -> Vec<Neighbor> {
            let mut all: Vec<Neighbor> = self
                .0
                .iter()
                .enumerate()
                .map(|(index, p)| {
                    let d2: f64 = (0..3).map(|a| (p[a] - point[a]).powi(2)).sum();
                    Neighbor {
                        index,
                        distance: d2.sqrt(),
                    }
                })
                .collect();
            all.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            all.truncate(k);
            all
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    fn grid() -> Vec<[f64; 3]> {
        let mut points = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..3 {
                    points.push([i as f64 * 1.1, j as f64 * 0.7, k as f64 * 1.9]);
                }
            }
        }
        points
    }

    #[test]
    fn test_kdtree_includes_self_first() {
        let points = grid();
        let index = KdTreeIndex::new(&points);
        assert_eq!(index.len(), points.len());

        let result = index.nearest(&points[5], 6);
        assert_eq!(result.len(), 6);
        assert_eq!(result[0].index, 5);
        assert_eq!(result[0].distance, 0.0);
        assert!(result.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_kdtree_matches_brute_force_distances() {
        let points = grid();
        let index = KdTreeIndex::new(&points);
        let brute = BruteForce(points.clone());

        for p in points.iter().step_by(7) {
            let fast = index.nearest(p, 6);
            let slow = brute.nearest(p, 6);
            assert_eq!(fast.len(), slow.len());
            for (a, b) in fast.iter().zip(slow.iter()) {
                assert!((a.distance - b.distance).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_kdtree_fewer_points_than_k() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let index = KdTreeIndex::new(&points);
        let result = index.nearest(&points[0], 6);
        assert_eq!(result.len(), 2);
        assert!((result[1].distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_index() {
        let index = KdTreeIndex::new(&[]);
        assert!(index.is_empty());
        assert!(index.nearest(&[0.0, 0.0, 0.0], 6).is_empty());
    }
}
