//! Agglomerative hierarchical clustering over a condensed distance matrix.
//!
//! Clusters are merged greedily by smallest distance, and distances to the
//! merged cluster follow the Lance-Williams update rule of the selected
//! [`LinkageMethod`]. Leaves of the resulting [`Dendrogram`] are arranged in
//! optimal leaf order (see [`crate::ordering`]).

use crate::distance::CondensedDistanceMatrix;
use crate::ordering::optimal_leaf_order;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkageError {
    /// Linkage needs at least two observations.
    #[error("linkage requires at least 2 counters, but {found} were given")]
    InsufficientData { found: usize },

    /// A distance is negative or not finite.
    #[error("distance between observations {i} and {j} is invalid: {value}")]
    InvalidDistance { i: usize, j: usize, value: f64 },

    /// The cut threshold is negative or not finite.
    #[error("cut threshold must be a finite, non-negative distance, got {0}")]
    InvalidThreshold(f64),

    #[error("unknown linkage method '{0}'")]
    UnknownMethod(String),
}

/// Rule for the distance between a merged cluster and the remaining ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkageMethod {
    Single,
    Average,
    Weighted,
    Centroid,
    Median,
    Ward,
}

impl LinkageMethod {
    pub const ALL: [LinkageMethod; 6] = [
        LinkageMethod::Single,
        LinkageMethod::Average,
        LinkageMethod::Weighted,
        LinkageMethod::Centroid,
        LinkageMethod::Median,
        LinkageMethod::Ward,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LinkageMethod::Single => "single",
            LinkageMethod::Average => "average",
            LinkageMethod::Weighted => "weighted",
            LinkageMethod::Centroid => "centroid",
            LinkageMethod::Median => "median",
            LinkageMethod::Ward => "ward",
        }
    }

    /// Distance from the union of clusters `x` and `y` to cluster `i`.
    fn update(&self, d_xi: f64, d_yi: f64, d_xy: f64, n_x: f64, n_y: f64, n_i: f64) -> f64 {
        match self {
            LinkageMethod::Single => d_xi.min(d_yi),
            LinkageMethod::Average => (n_x * d_xi + n_y * d_yi) / (n_x + n_y),
            LinkageMethod::Weighted => 0.5 * (d_xi + d_yi),
            LinkageMethod::Centroid => {
                let n = n_x + n_y;
                (((n_x * d_xi * d_xi + n_y * d_yi * d_yi) - n_x * n_y * d_xy * d_xy / n) / n)
                    .max(0.0)
                    .sqrt()
            }
            LinkageMethod::Median => (0.5 * (d_xi * d_xi + d_yi * d_yi) - 0.25 * d_xy * d_xy)
                .max(0.0)
                .sqrt(),
            LinkageMethod::Ward => {
                let t = 1.0 / (n_x + n_y + n_i);
                ((n_i + n_x) * t * d_xi * d_xi + (n_i + n_y) * t * d_yi * d_yi
                    - n_i * t * d_xy * d_xy)
                    .max(0.0)
                    .sqrt()
            }
        }
    }
}

impl fmt::Display for LinkageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LinkageMethod {
    type Err = LinkageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LinkageMethod::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| LinkageError::UnknownMethod(s.to_string()))
    }
}

/// One agglomeration step. Node ids below the leaf count are leaves, the
/// merge at step `k` creates node `leaf_count + k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    /// Number of leaves below the new node.
    pub size: usize,
}

/// A binary merge tree together with its optimal leaf order and threshold cut.
///
/// Only [`build_dendrogram`] creates one, so it always holds at least two
/// leaves.
#[derive(Debug, Clone, Serialize)]
pub struct Dendrogram {
    method: LinkageMethod,
    threshold: f64,
    leaf_count: usize,
    merges: Vec<Merge>,
    leaf_order: Vec<usize>,
}

impl Dendrogram {
    pub fn method(&self) -> LinkageMethod {
        self.method
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Leaves (input indices) in optimal order.
    pub fn leaf_order(&self) -> &[usize] {
        &self.leaf_order
    }

    /// Id of the root node.
    pub fn root(&self) -> usize {
        2 * self.leaf_count - 2
    }

    /// Children of `node`, or `None` for leaves and unknown ids.
    pub fn children(&self, node: usize) -> Option<(usize, usize)> {
        node.checked_sub(self.leaf_count)
            .and_then(|k| self.merges.get(k))
            .map(|m| (m.left, m.right))
    }

    /// Flat cluster label per leaf at the dendrogram's own threshold.
    pub fn flat_clusters(&self) -> Vec<usize> {
        self.cut(self.threshold)
    }

    /// Flat cluster label per leaf (indexed by input position) when cutting at
    /// `threshold`.
    ///
    /// Two leaves share a cluster iff the largest merge distance inside their
    /// smallest common subtree is `<= threshold`. Labels are numbered by first
    /// appearance in the optimal leaf order.
    pub fn cut(&self, threshold: f64) -> Vec<usize> {
        let n = self.leaf_count;
        // largest merge distance anywhere below each internal node
        let mut max_dist = vec![0.0f64; self.merges.len()];
        for (k, merge) in self.merges.iter().enumerate() {
            let child_max = |id: usize| if id < n { 0.0 } else { max_dist[id - n] };
            let value = merge
                .distance
                .max(child_max(merge.left))
                .max(child_max(merge.right));
            max_dist[k] = value;
        }

        let mut group_of_leaf = vec![usize::MAX; n];
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            if node < n {
                group_of_leaf[node] = node;
                continue;
            }
            if max_dist[node - n] <= threshold {
                let mut below = vec![node];
                while let Some(inner) = below.pop() {
                    match self.children(inner) {
                        Some((l, r)) => below.extend([l, r]),
                        None => group_of_leaf[inner] = node,
                    }
                }
            } else if let Some((l, r)) = self.children(node) {
                stack.extend([l, r]);
            }
        }

        let mut label_of_group = std::collections::HashMap::new();
        let mut labels = vec![0; n];
        for &leaf in &self.leaf_order {
            let next = label_of_group.len();
            labels[leaf] = *label_of_group.entry(group_of_leaf[leaf]).or_insert(next);
        }
        labels
    }
}

fn validate(distances: &CondensedDistanceMatrix) -> Result<(), LinkageError> {
    let n = distances.size();
    if n < 2 {
        return Err(LinkageError::InsufficientData { found: n });
    }
    for i in 0..n {
        for j in i + 1..n {
            let value = distances.get(i, j);
            if !value.is_finite() || value < 0.0 {
                return Err(LinkageError::InvalidDistance { i, j, value });
            }
        }
    }
    Ok(())
}

/// Runs the generic agglomeration loop and returns the merges in order.
fn agglomerate(distances: &CondensedDistanceMatrix, method: LinkageMethod) -> Vec<Merge> {
    let n = distances.size();
    let mut dist = distances.to_square();
    let mut node_id: Vec<usize> = (0..n).collect();
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut merges = Vec::with_capacity(n - 1);

    for step in 0..n - 1 {
        // (distance, smaller node id, larger node id, slot a, slot b)
        let mut best: Option<(f64, usize, usize, usize, usize)> = None;
        for a in (0..n).filter(|&a| active[a]) {
            for b in (a + 1..n).filter(|&b| active[b]) {
                let (lo, hi) = if node_id[a] < node_id[b] {
                    (node_id[a], node_id[b])
                } else {
                    (node_id[b], node_id[a])
                };
                let better = match best {
                    None => true,
                    Some((d, blo, bhi, _, _)) => {
                        dist[a][b] < d || (dist[a][b] == d && (lo, hi) < (blo, bhi))
                    }
                };
                if better {
                    best = Some((dist[a][b], lo, hi, a, b));
                }
            }
        }
        let Some((d_xy, left, right, a, b)) = best else {
            break;
        };

        let (n_x, n_y) = (size[a] as f64, size[b] as f64);
        for i in (0..n).filter(|&i| active[i] && i != a && i != b) {
            let updated = method.update(dist[a][i], dist[b][i], d_xy, n_x, n_y, size[i] as f64);
            dist[a][i] = updated;
            dist[i][a] = updated;
        }
        active[b] = false;
        size[a] += size[b];
        node_id[a] = n + step;
        merges.push(Merge {
            left,
            right,
            distance: d_xy,
            size: size[a],
        });
    }
    merges
}

/// Builds the dendrogram for `method`, orders its leaves optimally and keeps
/// `threshold` for the flat cut.
///
/// Returns the dendrogram and its leaf order (input indices). Consumers must use
/// that order rather than input position when presenting leaves.
pub fn build_dendrogram(
    distances: &CondensedDistanceMatrix,
    method: LinkageMethod,
    threshold: f64,
) -> Result<(Dendrogram, Vec<usize>), LinkageError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(LinkageError::InvalidThreshold(threshold));
    }
    validate(distances)?;

    let merges = agglomerate(distances, method);
    let leaf_order = optimal_leaf_order(&merges, distances);
    debug!(
        "Built {} dendrogram over {} leaves, root height {:.3}",
        method,
        distances.size(),
        merges.last().map_or(0.0, |m| m.distance)
    );

    let dendrogram = Dendrogram {
        method,
        threshold,
        leaf_count: distances.size(),
        merges,
        leaf_order: leaf_order.clone(),
    };
    Ok((dendrogram, leaf_order))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(values: &[f64]) -> CondensedDistanceMatrix {
        CondensedDistanceMatrix::from_condensed(values.to_vec()).unwrap()
    }

    // 0 -- 1 close, 2 -- 3 close, the pairs far apart
    fn two_pairs() -> CondensedDistanceMatrix {
        matrix(&[1.0, 10.0, 11.0, 9.0, 10.0, 2.0])
    }

    #[test]
    fn every_method_yields_n_leaves_and_n_minus_one_merges() {
        let m = matrix(&[3.0, 7.0, 2.0, 8.0, 4.0, 6.0, 1.0, 5.0, 9.0, 3.5]);
        for method in LinkageMethod::ALL {
            let (d, order) = build_dendrogram(&m, method, 3.0).unwrap();
            assert_eq!(d.leaf_count(), 5, "{method}");
            assert_eq!(d.merges().len(), 4, "{method}");
            assert_eq!(d.merges().last().unwrap().size, 5, "{method}");
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, vec![0, 1, 2, 3, 4], "{method}");
            assert_eq!(d.leaf_order(), order.as_slice());
        }
    }

    #[test]
    fn single_linkage_merges_closest_pairs_first() {
        let (d, _) = build_dendrogram(&two_pairs(), LinkageMethod::Single, 5.0).unwrap();
        let merges = d.merges();
        assert_eq!((merges[0].left, merges[0].right, merges[0].distance), (0, 1, 1.0));
        assert_eq!((merges[1].left, merges[1].right, merges[1].distance), (2, 3, 2.0));
        assert_eq!((merges[2].left, merges[2].right, merges[2].distance), (4, 5, 9.0));
        assert_eq!(d.children(6), Some((4, 5)));
        assert_eq!(d.children(0), None);
    }

    #[test]
    fn average_and_weighted_updates() {
        let (avg, _) = build_dendrogram(&two_pairs(), LinkageMethod::Average, 0.0).unwrap();
        // mean of 10, 11, 9, 10
        assert_eq!(avg.merges()[2].distance, 10.0);
        let (weighted, _) = build_dendrogram(&two_pairs(), LinkageMethod::Weighted, 0.0).unwrap();
        assert_eq!(weighted.merges()[2].distance, 10.0);
    }

    #[test]
    fn ward_on_collinear_points() {
        // points on a line at 0, 1 and 5
        let (d, _) = build_dendrogram(&matrix(&[1.0, 5.0, 4.0]), LinkageMethod::Ward, 0.0).unwrap();
        assert_eq!(d.merges()[0].distance, 1.0);
        // sqrt((2*25 + 2*16 - 1) / 3)
        let expected = (81.0f64 / 3.0).sqrt();
        assert!((d.merges()[1].distance - expected).abs() < 1e-12);
    }

    #[test]
    fn centroid_and_median_inversions_cut_on_subtree_maximum() {
        let triangle = matrix(&[1.0, 1.0, 1.0]);
        for method in [LinkageMethod::Centroid, LinkageMethod::Median] {
            let (d, _) = build_dendrogram(&triangle, method, 0.0).unwrap();
            assert_eq!(d.merges()[0].distance, 1.0, "{method}");
            // root sits below its child
            let root_height = d.merges()[1].distance;
            assert!((root_height - 0.75f64.sqrt()).abs() < 1e-12, "{method}: {root_height}");

            let mut labels = d.cut(0.9);
            labels.sort();
            assert_eq!(labels, vec![0, 1, 2], "{method}");
            assert!(d.cut(1.0).iter().all(|&l| l == 0), "{method}");
        }
    }

    #[test]
    fn cut_separates_groups_below_threshold() {
        let (d, order) = build_dendrogram(&two_pairs(), LinkageMethod::Single, 5.0).unwrap();
        let labels = d.flat_clusters();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        assert_eq!(labels[order[0]], 0);

        let all_together = d.cut(9.0);
        assert!(all_together.iter().all(|&l| l == 0));
        let singletons = d.cut(0.5);
        let mut unique = singletons.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn ties_break_on_smallest_node_ids() {
        let (d, _) = build_dendrogram(&matrix(&[1.0, 1.0, 1.0]), LinkageMethod::Single, 0.0).unwrap();
        assert_eq!((d.merges()[0].left, d.merges()[0].right), (0, 1));
        assert_eq!((d.merges()[1].left, d.merges()[1].right), (2, 3));
    }

    #[test]
    fn fewer_than_two_counters_is_insufficient() {
        let err = build_dendrogram(&matrix(&[]), LinkageMethod::Single, 1.0).unwrap_err();
        assert_eq!(err, LinkageError::InsufficientData { found: 1 });
    }

    #[test]
    fn invalid_threshold_and_distance_are_rejected() {
        assert_eq!(
            build_dendrogram(&two_pairs(), LinkageMethod::Ward, -1.0).unwrap_err(),
            LinkageError::InvalidThreshold(-1.0)
        );
        assert!(matches!(
            build_dendrogram(&matrix(&[1.0, f64::NAN, 2.0]), LinkageMethod::Ward, 1.0),
            Err(LinkageError::InvalidDistance { i: 0, j: 2, .. })
        ));
    }

    #[test]
    fn method_names_round_trip_through_from_str() {
        for method in LinkageMethod::ALL {
            assert_eq!(method.name().parse::<LinkageMethod>().unwrap(), method);
        }
        assert_eq!("WARD".parse::<LinkageMethod>().unwrap(), LinkageMethod::Ward);
        assert!(matches!(
            "complete".parse::<LinkageMethod>(),
            Err(LinkageError::UnknownMethod(_))
        ));
    }
}
