//! Adaptive search for a bicluster grid over a binary feature-presence matrix.
//!
//! Rows are entities (fuzz cases), columns are features (differing keys). The
//! search grows the row and column cluster counts one axis at a time for as
//! long as the fitter keeps converging, then refits at the final grid.

use crate::matrix::ResolverPair;
use crate::spectral::SpectralBiclustering;
use log::{debug, info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BiclusterError {
    #[error("Need at least {needed} rows and columns, found {rows}x{cols}")]
    InsufficientData {
        needed: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Matrix of {rows}x{cols} cannot hold {found} cells")]
    DimensionMismatch {
        rows: usize,
        cols: usize,
        found: usize,
    },
    #[error("Search start {start} must be between 1 and the cap {cap}")]
    InvalidBounds { start: usize, cap: usize },
    #[error("Biclustering failed: {0}")]
    BiclusteringFailure(String),
}

/// Dense binary matrix of which entity has which feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturePresenceMatrix {
    rows: Vec<String>,
    columns: Vec<String>,
    cells: Vec<bool>,
}

impl FeaturePresenceMatrix {
    pub fn new(
        rows: Vec<String>,
        columns: Vec<String>,
        cells: Vec<bool>,
    ) -> Result<Self, BiclusterError> {
        if cells.len() != rows.len() * columns.len() {
            return Err(BiclusterError::DimensionMismatch {
                rows: rows.len(),
                cols: columns.len(),
                found: cells.len(),
            });
        }
        Ok(Self {
            rows,
            columns,
            cells,
        })
    }

    /// Builds the matrix from `(entity, features)` records. Columns are the
    /// sorted union of all features; rows keep record order.
    pub fn from_records(
        records: impl IntoIterator<Item = (String, BTreeSet<String>)>,
    ) -> Result<Self, BiclusterError> {
        let records: Vec<_> = records.into_iter().collect();
        let columns: BTreeSet<&String> = records.iter().flat_map(|(_, keys)| keys).collect();
        if records.is_empty() || columns.is_empty() {
            return Err(BiclusterError::InsufficientData {
                needed: 1,
                rows: records.len(),
                cols: columns.len(),
            });
        }
        let columns: Vec<String> = columns.into_iter().cloned().collect();
        let cells = records
            .iter()
            .flat_map(|(_, keys)| columns.iter().map(move |c| keys.contains(c)))
            .collect();
        let rows = records.into_iter().map(|(label, _)| label).collect();
        Self::new(rows, columns, cells)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn row_labels(&self) -> &[String] {
        &self.rows
    }

    pub fn column_labels(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.cells[row * self.columns.len() + col]
    }

    pub fn row(&self, row: usize) -> &[bool] {
        let n = self.columns.len();
        &self.cells[row * n..(row + 1) * n]
    }

    /// The matrix as 0.0 / 1.0 values.
    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.n_rows(), self.n_cols(), |r, c| {
            if self.get(r, c) { 1.0 } else { 0.0 }
        })
    }

    /// A copy with rows and columns taken in the given orders.
    pub fn permuted(&self, row_order: &[usize], column_order: &[usize]) -> Self {
        let cells = row_order
            .iter()
            .flat_map(|&r| column_order.iter().map(move |&c| self.get(r, c)))
            .collect();
        Self {
            rows: row_order.iter().map(|&r| self.rows[r].clone()).collect(),
            columns: column_order.iter().map(|&c| self.columns[c].clone()).collect(),
            cells,
        }
    }
}

/// Cluster label per row and per column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BiclusterAssignment {
    pub row_labels: Vec<usize>,
    pub column_labels: Vec<usize>,
}

/// Result of one fit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitOutcome {
    Converged(BiclusterAssignment),
    /// The fitter could not produce the requested grid. `partial` holds
    /// whatever labels it did produce.
    NotConverged {
        partial: Option<BiclusterAssignment>,
        reason: String,
    },
}

/// Fits a bicluster model with a given `(row clusters, column clusters)` grid.
pub trait Biclusterer {
    fn fit(
        &self,
        matrix: &FeaturePresenceMatrix,
        n_clusters: (usize, usize),
    ) -> Result<FitOutcome, BiclusterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub start: usize,
    pub cap: usize,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self { start: 4, cap: 30 }
    }
}

/// Sorts by cluster id first, then by label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterSortKey<'a> {
    pub cluster: usize,
    pub label: &'a str,
}

/// One row cluster, named after its first entity in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowClusterSummary {
    pub cluster: usize,
    pub representative: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BiclusterResult {
    pub matrix: FeaturePresenceMatrix,
    pub assignment: BiclusterAssignment,
    pub row_clusters: usize,
    pub column_clusters: usize,
}

fn sorted_order(labels: &[usize], names: &[String]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by_key(|&i| ClusterSortKey {
        cluster: labels[i],
        label: names[i].as_str(),
    });
    order
}

impl BiclusterResult {
    /// Row permutation that makes every row cluster contiguous.
    pub fn row_order(&self) -> Vec<usize> {
        sorted_order(&self.assignment.row_labels, self.matrix.row_labels())
    }

    pub fn column_order(&self) -> Vec<usize> {
        sorted_order(&self.assignment.column_labels, self.matrix.column_labels())
    }

    pub fn row_cluster_representatives(&self) -> Vec<RowClusterSummary> {
        let mut summaries: Vec<RowClusterSummary> = Vec::new();
        for row in self.row_order() {
            let cluster = self.assignment.row_labels[row];
            match summaries.last_mut() {
                Some(last) if last.cluster == cluster => last.size += 1,
                _ => summaries.push(RowClusterSummary {
                    cluster,
                    representative: self.matrix.row_labels()[row].clone(),
                    size: 1,
                }),
            }
        }
        summaries
    }

    /// The matrix with both axes sorted by cluster.
    pub fn reordered(&self) -> FeaturePresenceMatrix {
        self.matrix.permuted(&self.row_order(), &self.column_order())
    }
}

/// Searches with the default spectral fitter and bounds.
pub fn adaptive_bicluster(
    matrix: &FeaturePresenceMatrix,
) -> Result<BiclusterResult, BiclusterError> {
    adaptive_bicluster_with(
        matrix,
        &SpectralBiclustering::default(),
        &SearchBounds::default(),
    )
}

pub fn adaptive_bicluster_with<B: Biclusterer + ?Sized>(
    matrix: &FeaturePresenceMatrix,
    fitter: &B,
    bounds: &SearchBounds,
) -> Result<BiclusterResult, BiclusterError> {
    if bounds.start == 0 || bounds.start > bounds.cap {
        return Err(BiclusterError::InvalidBounds {
            start: bounds.start,
            cap: bounds.cap,
        });
    }
    if matrix.n_rows() < bounds.start || matrix.n_cols() < bounds.start {
        return Err(BiclusterError::InsufficientData {
            needed: bounds.start,
            rows: matrix.n_rows(),
            cols: matrix.n_cols(),
        });
    }

    let (mut x, mut y) = (bounds.start, bounds.start);
    let mut grow_x = x < bounds.cap;
    let mut grow_y = y < bounds.cap;
    while grow_x || grow_y {
        if grow_x {
            if converges(fitter, matrix, (x + 1, y))? {
                x += 1;
            } else {
                grow_x = false;
            }
            if x >= bounds.cap {
                grow_x = false;
            }
        }
        if grow_y {
            if converges(fitter, matrix, (x, y + 1))? {
                y += 1;
            } else {
                grow_y = false;
            }
            if y >= bounds.cap {
                grow_y = false;
            }
        }
    }
    info!("Converged with ({x}, {y})");

    let assignment = match fitter.fit(matrix, (x, y))? {
        FitOutcome::Converged(assignment) => assignment,
        FitOutcome::NotConverged {
            partial: Some(assignment),
            reason,
        } => {
            warn!("Final fit with ({x}, {y}) did not converge: {reason}");
            assignment
        }
        FitOutcome::NotConverged {
            partial: None,
            reason,
        } => {
            return Err(BiclusterError::BiclusteringFailure(format!(
                "no labels for ({x}, {y}): {reason}"
            )));
        }
    };
    if assignment.row_labels.len() != matrix.n_rows()
        || assignment.column_labels.len() != matrix.n_cols()
    {
        return Err(BiclusterError::BiclusteringFailure(format!(
            "fitter labeled {}x{} entries of a {}x{} matrix",
            assignment.row_labels.len(),
            assignment.column_labels.len(),
            matrix.n_rows(),
            matrix.n_cols()
        )));
    }

    Ok(BiclusterResult {
        matrix: matrix.clone(),
        assignment,
        row_clusters: x,
        column_clusters: y,
    })
}

fn converges<B: Biclusterer + ?Sized>(
    fitter: &B,
    matrix: &FeaturePresenceMatrix,
    grid: (usize, usize),
) -> Result<bool, BiclusterError> {
    debug!("Try converging of {grid:?}");
    match fitter.fit(matrix, grid)? {
        FitOutcome::Converged(_) => Ok(true),
        FitOutcome::NotConverged { reason, .. } => {
            debug!("{grid:?} did not converge: {reason}");
            Ok(false)
        }
    }
}

/// Runs the search for every resolver pair in parallel.
pub fn bicluster_pairs<B: Biclusterer + Sync + ?Sized>(
    pairs: BTreeMap<ResolverPair, FeaturePresenceMatrix>,
    fitter: &B,
    bounds: &SearchBounds,
) -> Vec<(ResolverPair, Result<BiclusterResult, BiclusterError>)> {
    pairs
        .into_par_iter()
        .map(|(pair, matrix)| {
            let result = adaptive_bicluster_with(&matrix, fitter, bounds);
            if let Err(e) = &result {
                warn!("{pair}: {e}");
            }
            (pair, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn record(label: &str, keys: &[&str]) -> (String, BTreeSet<String>) {
        (
            label.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        )
    }

    fn grid_matrix(rows: usize, cols: usize) -> FeaturePresenceMatrix {
        let cells = (0..rows * cols).map(|i| (i * 7 + i / cols) % 3 == 0).collect();
        FeaturePresenceMatrix::new(
            (0..rows).map(|r| format!("case-{r:02}")).collect(),
            (0..cols).map(|c| format!(".key{c:02}")).collect(),
            cells,
        )
        .unwrap()
    }

    /// Converges for grids within `limit`, recording every attempt. Over the
    /// limit it still labels the matrix when `partial_over_limit` is set.
    struct LimitFitter {
        limit: (usize, usize),
        partial_over_limit: bool,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl LimitFitter {
        fn new(limit: (usize, usize)) -> Self {
            Self {
                limit,
                partial_over_limit: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_partial_labels(limit: (usize, usize)) -> Self {
            Self {
                partial_over_limit: true,
                ..Self::new(limit)
            }
        }
    }

    fn modulo_labels(
        matrix: &FeaturePresenceMatrix,
        (x, y): (usize, usize),
    ) -> BiclusterAssignment {
        BiclusterAssignment {
            row_labels: (0..matrix.n_rows()).map(|r| r % x).collect(),
            column_labels: (0..matrix.n_cols()).map(|c| c % y).collect(),
        }
    }

    impl Biclusterer for LimitFitter {
        fn fit(
            &self,
            matrix: &FeaturePresenceMatrix,
            (x, y): (usize, usize),
        ) -> Result<FitOutcome, BiclusterError> {
            self.calls.lock().unwrap().push((x, y));
            if x > self.limit.0 || y > self.limit.1 {
                return Ok(FitOutcome::NotConverged {
                    partial: self
                        .partial_over_limit
                        .then(|| modulo_labels(matrix, (x, y))),
                    reason: "over limit".to_string(),
                });
            }
            Ok(FitOutcome::Converged(modulo_labels(matrix, (x, y))))
        }
    }

    struct FailingFitter;

    impl Biclusterer for FailingFitter {
        fn fit(
            &self,
            _: &FeaturePresenceMatrix,
            _: (usize, usize),
        ) -> Result<FitOutcome, BiclusterError> {
            Err(BiclusterError::BiclusteringFailure("svd".to_string()))
        }
    }

    #[test]
    fn records_build_sorted_columns() {
        let m = FeaturePresenceMatrix::from_records(vec![
            record("b", &[".z", ".a"]),
            record("a", &[".m"]),
        ])
        .unwrap();
        assert_eq!(m.row_labels(), &["b", "a"]);
        assert_eq!(m.column_labels(), &[".a", ".m", ".z"]);
        assert_eq!(m.row(0), &[true, false, true]);
        assert_eq!(m.row(1), &[false, true, false]);
        assert_eq!(m.to_dmatrix()[(1, 1)], 1.0);
    }

    #[test]
    fn empty_records_are_insufficient() {
        assert!(matches!(
            FeaturePresenceMatrix::from_records(Vec::new()),
            Err(BiclusterError::InsufficientData { .. })
        ));
        assert!(matches!(
            FeaturePresenceMatrix::from_records(vec![record("a", &[])]),
            Err(BiclusterError::InsufficientData { .. })
        ));
        assert!(matches!(
            FeaturePresenceMatrix::new(vec!["a".into()], vec!["k".into()], vec![]),
            Err(BiclusterError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn search_grows_each_axis_until_it_stops_converging() {
        let fitter = LimitFitter::new((7, 9));
        let result = adaptive_bicluster_with(&grid_matrix(20, 20), &fitter, &SearchBounds::default())
            .unwrap();
        assert_eq!((result.row_clusters, result.column_clusters), (7, 9));
        assert_eq!(
            fitter.calls.into_inner().unwrap(),
            vec![
                (5, 4),
                (5, 5),
                (6, 5),
                (6, 6),
                (7, 6),
                (7, 7),
                (8, 7),
                (7, 8),
                (7, 9),
                (7, 10),
                (7, 9),
            ]
        );
    }

    #[test]
    fn search_stops_at_the_cap() {
        let fitter = LimitFitter::new((100, 100));
        let result = adaptive_bicluster_with(&grid_matrix(40, 40), &fitter, &SearchBounds::default())
            .unwrap();
        assert_eq!((result.row_clusters, result.column_clusters), (30, 30));
        assert!(fitter.calls.lock().unwrap().iter().all(|&(x, y)| x <= 30 && y <= 30));
    }

    #[test]
    fn search_keeps_the_start_when_nothing_grows() {
        let fitter = LimitFitter::new((4, 4));
        let result = adaptive_bicluster_with(&grid_matrix(10, 10), &fitter, &SearchBounds::default())
            .unwrap();
        assert_eq!((result.row_clusters, result.column_clusters), (4, 4));
        assert_eq!(fitter.calls.into_inner().unwrap(), vec![(5, 4), (4, 5), (4, 4)]);
    }

    #[test]
    fn final_fit_without_convergence_keeps_partial_labels() {
        let fitter = LimitFitter::with_partial_labels((3, 3));
        let matrix = grid_matrix(10, 10);
        let result = adaptive_bicluster_with(&matrix, &fitter, &SearchBounds::default()).unwrap();
        assert_eq!((result.row_clusters, result.column_clusters), (4, 4));
        assert_eq!(result.assignment, modulo_labels(&matrix, (4, 4)));
        assert_eq!(fitter.calls.into_inner().unwrap(), vec![(5, 4), (4, 5), (4, 4)]);
    }

    #[test]
    fn final_fit_without_labels_fails() {
        let fitter = LimitFitter::new((3, 3));
        let err = adaptive_bicluster_with(&grid_matrix(10, 10), &fitter, &SearchBounds::default())
            .unwrap_err();
        assert!(
            matches!(&err, BiclusterError::BiclusteringFailure(reason) if reason.contains("(4, 4)")),
            "{err}"
        );
        assert_eq!(fitter.calls.into_inner().unwrap(), vec![(5, 4), (4, 5), (4, 4)]);
    }

    #[test]
    fn fitter_failures_propagate() {
        let err = adaptive_bicluster_with(&grid_matrix(10, 10), &FailingFitter, &SearchBounds::default())
            .unwrap_err();
        assert_eq!(err, BiclusterError::BiclusteringFailure("svd".to_string()));
    }

    #[test]
    fn bounds_and_matrix_size_are_checked() {
        let fitter = LimitFitter::new((10, 10));
        assert_eq!(
            adaptive_bicluster_with(&grid_matrix(10, 10), &fitter, &SearchBounds { start: 5, cap: 4 })
                .unwrap_err(),
            BiclusterError::InvalidBounds { start: 5, cap: 4 }
        );
        assert!(matches!(
            adaptive_bicluster_with(&grid_matrix(3, 10), &fitter, &SearchBounds::default()),
            Err(BiclusterError::InsufficientData { needed: 4, rows: 3, .. })
        ));
    }

    #[test]
    fn sort_key_orders_by_cluster_then_label() {
        let a = ClusterSortKey { cluster: 0, label: "z" };
        let b = ClusterSortKey { cluster: 1, label: "a" };
        let c = ClusterSortKey { cluster: 1, label: "b" };
        assert!(a < b && b < c);
    }

    #[test]
    fn orders_make_clusters_contiguous() {
        let matrix = FeaturePresenceMatrix::from_records(vec![
            record("d", &[".a", ".b"]),
            record("a", &[".c"]),
            record("c", &[".a"]),
            record("b", &[".c", ".b"]),
        ])
        .unwrap();
        let result = BiclusterResult {
            matrix,
            assignment: BiclusterAssignment {
                row_labels: vec![1, 0, 1, 0],
                column_labels: vec![1, 0, 0],
            },
            row_clusters: 2,
            column_clusters: 2,
        };
        assert_eq!(result.row_order(), vec![1, 3, 2, 0]);
        assert_eq!(result.column_order(), vec![1, 2, 0]);
        assert_eq!(
            result.row_cluster_representatives(),
            vec![
                RowClusterSummary {
                    cluster: 0,
                    representative: "a".to_string(),
                    size: 2
                },
                RowClusterSummary {
                    cluster: 1,
                    representative: "c".to_string(),
                    size: 2
                },
            ]
        );
        let reordered = result.reordered();
        assert_eq!(reordered.row_labels(), &["a", "b", "c", "d"]);
        assert_eq!(reordered.column_labels(), &[".b", ".c", ".a"]);
        assert_eq!(reordered.row(3), &[true, false, true]);
    }

    #[test]
    fn spectral_search_stays_within_bounds() {
        let matrix = grid_matrix(12, 10);
        let result = adaptive_bicluster(&matrix).unwrap();
        assert!((4..=30).contains(&result.row_clusters));
        assert!((4..=30).contains(&result.column_clusters));
        assert_eq!(result.assignment.row_labels.len(), 12);
        assert_eq!(result.assignment.column_labels.len(), 10);
        assert!(result.assignment.row_labels.iter().all(|&l| l < result.row_clusters));
        assert_eq!(adaptive_bicluster(&matrix).unwrap(), result);
    }

    #[test]
    fn pairs_are_searched_independently() {
        let mut pairs = BTreeMap::new();
        pairs.insert(ResolverPair::new("bind9", "unbound"), grid_matrix(10, 10));
        pairs.insert(ResolverPair::new("bind9", "maradns"), grid_matrix(2, 10));
        let results = bicluster_pairs(pairs, &LimitFitter::new((6, 5)), &SearchBounds::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ResolverPair::new("bind9", "maradns"));
        assert!(results[0].1.is_err());
        let ok = results[1].1.as_ref().unwrap();
        assert_eq!((ok.row_clusters, ok.column_clusters), (6, 5));
    }
}
