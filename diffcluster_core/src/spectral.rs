//! Spectral biclustering with log normalization.
//!
//! The presence matrix is log-normalized and decomposed with an SVD. The
//! singular vectors closest to piecewise-constant are kept, and rows and
//! columns are clustered by k-means on the data projected onto them.

use crate::bicluster::{
    BiclusterAssignment, BiclusterError, Biclusterer, FeaturePresenceMatrix, FitOutcome,
};
use crate::kmeans::{KMeans, KMeansError, KMeansFit};
use nalgebra::DMatrix;

const SVD_MAX_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectralBiclustering {
    /// Singular vectors computed, clamped to the matrix shape.
    pub n_components: usize,
    /// Singular vectors kept for the projection.
    pub n_best: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for SpectralBiclustering {
    fn default() -> Self {
        Self {
            n_components: 6,
            n_best: 3,
            n_init: 10,
            max_iter: 300,
            seed: 0,
        }
    }
}

enum Clustering {
    Done(KMeansFit),
    TooFewSamples(String),
}

impl SpectralBiclustering {
    fn kmeans(&self, data: &[Vec<f64>], k: usize) -> Result<Clustering, BiclusterError> {
        let fit = KMeans::new(k, self.seed)
            .with_n_init(self.n_init)
            .with_max_iter(self.max_iter)
            .fit(data);
        match fit {
            Ok(fit) => Ok(Clustering::Done(fit)),
            Err(e @ KMeansError::TooFewSamples { .. }) => Ok(Clustering::TooFewSamples(e.to_string())),
            Err(e) => Err(BiclusterError::BiclusteringFailure(e.to_string())),
        }
    }

    /// The left and right singular vectors, strongest first.
    fn singular_vectors(
        &self,
        normalized: DMatrix<f64>,
    ) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>), BiclusterError> {
        let n_sv = self
            .n_components
            .min(normalized.nrows())
            .min(normalized.ncols());
        let svd = normalized
            .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
            .ok_or_else(|| {
                BiclusterError::BiclusteringFailure("SVD did not converge".to_string())
            })?;
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => {
                return Err(BiclusterError::BiclusteringFailure(
                    "SVD returned no singular vectors".to_string(),
                ));
            }
        };

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
        order.truncate(n_sv);
        let left = order
            .iter()
            .map(|&i| u.column(i).iter().copied().collect())
            .collect();
        let right = order
            .iter()
            .map(|&i| v_t.row(i).iter().copied().collect())
            .collect();
        Ok((left, right))
    }

    /// Keeps the `n_best` vectors best approximated by `k` constant pieces.
    /// The inner error carries the reason when a vector is too short for `k`
    /// pieces.
    fn best_piecewise(
        &self,
        vectors: Vec<Vec<f64>>,
        k: usize,
        degenerate: &mut Option<String>,
    ) -> Result<Result<Vec<Vec<f64>>, String>, BiclusterError> {
        let mut scored = Vec::with_capacity(vectors.len());
        for vector in vectors {
            let points: Vec<Vec<f64>> = vector.iter().map(|&v| vec![v]).collect();
            let fit = match self.kmeans(&points, k)? {
                Clustering::Done(fit) => fit,
                Clustering::TooFewSamples(reason) => return Ok(Err(reason)),
            };
            note_degenerate(&fit, k, degenerate);
            let residual = vector
                .iter()
                .zip(fit.piecewise())
                .map(|(v, p)| (v - p[0]).powi(2))
                .sum::<f64>()
                .sqrt();
            scored.push((residual, vector));
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Ok(scored
            .into_iter()
            .take(self.n_best.max(1))
            .map(|(_, v)| v)
            .collect()))
    }
}

fn note_degenerate(fit: &KMeansFit, k: usize, degenerate: &mut Option<String>) {
    if fit.distinct_clusters < k && degenerate.is_none() {
        *degenerate = Some(format!(
            "found {} distinct clusters, fewer than {k}",
            fit.distinct_clusters
        ));
    }
}

/// Shifts to a minimum of 1, takes logs and removes row and column means.
pub(crate) fn log_normalize(data: &DMatrix<f64>) -> DMatrix<f64> {
    let min = data.min();
    let shifted = if min < 1.0 {
        data.add_scalar(1.0 - min)
    } else {
        data.clone()
    };
    let logged = shifted.map(f64::ln);
    let row_means = logged.column_mean();
    let col_means = logged.row_mean();
    let mean = logged.mean();
    DMatrix::from_fn(logged.nrows(), logged.ncols(), |r, c| {
        logged[(r, c)] - row_means[r] - col_means[c] + mean
    })
}

/// Rows of `data * basis^T`, where `basis` holds one vector per row.
fn project(data: &DMatrix<f64>, basis: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let basis = DMatrix::from_fn(data.ncols(), basis.len(), |i, b| basis[b][i]);
    let projected = data * basis;
    projected
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

impl Biclusterer for SpectralBiclustering {
    fn fit(
        &self,
        matrix: &FeaturePresenceMatrix,
        (n_rows, n_cols): (usize, usize),
    ) -> Result<FitOutcome, BiclusterError> {
        let not_converged = |reason: String| FitOutcome::NotConverged {
            partial: None,
            reason,
        };
        let data = matrix.to_dmatrix();
        let (left, right) = self.singular_vectors(log_normalize(&data))?;

        let mut degenerate = None;
        let best_left = match self.best_piecewise(left, n_rows, &mut degenerate)? {
            Ok(v) => v,
            Err(reason) => return Ok(not_converged(reason)),
        };
        let best_right = match self.best_piecewise(right, n_cols, &mut degenerate)? {
            Ok(v) => v,
            Err(reason) => return Ok(not_converged(reason)),
        };

        let rows = match self.kmeans(&project(&data, &best_right), n_rows)? {
            Clustering::Done(fit) => fit,
            Clustering::TooFewSamples(reason) => return Ok(not_converged(reason)),
        };
        note_degenerate(&rows, n_rows, &mut degenerate);
        let cols = match self.kmeans(&project(&data.transpose(), &best_left), n_cols)? {
            Clustering::Done(fit) => fit,
            Clustering::TooFewSamples(reason) => return Ok(not_converged(reason)),
        };
        note_degenerate(&cols, n_cols, &mut degenerate);

        let assignment = BiclusterAssignment {
            row_labels: rows.labels,
            column_labels: cols.labels,
        };
        Ok(match degenerate {
            None => FitOutcome::Converged(assignment),
            Some(reason) => FitOutcome::NotConverged {
                partial: Some(assignment),
                reason,
            },
        })
    }
}
