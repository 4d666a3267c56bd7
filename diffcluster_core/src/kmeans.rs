//! Seeded k-means (k-means++ initialization, Lloyd iterations).

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KMeansError {
    #[error("cannot form {clusters} clusters from {samples} samples")]
    TooFewSamples { samples: usize, clusters: usize },
    #[error("sample {index} has {found} features, expected {expected}")]
    RaggedData {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("sample {index} contains a non-finite value")]
    NonFinite { index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    /// Number of clusters that ended up with at least one sample.
    pub distinct_clusters: usize,
    /// Whether the best run stopped before hitting the iteration limit.
    pub converged: bool,
}

impl KMeansFit {
    /// Each sample replaced by its centroid.
    pub fn piecewise(&self) -> Vec<Vec<f64>> {
        self.labels
            .iter()
            .map(|&l| self.centroids[l].clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct KMeans {
    pub n_clusters: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

impl KMeans {
    pub fn new(n_clusters: usize, seed: u64) -> Self {
        Self {
            n_clusters,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed,
        }
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Clusters `data`, one row per sample. Returns the run with the lowest inertia.
    pub fn fit(&self, data: &[Vec<f64>]) -> Result<KMeansFit, KMeansError> {
        let k = self.n_clusters;
        if k == 0 || data.len() < k {
            return Err(KMeansError::TooFewSamples {
                samples: data.len(),
                clusters: k,
            });
        }
        let dims = data[0].len();
        for (index, row) in data.iter().enumerate() {
            if row.len() != dims {
                return Err(KMeansError::RaggedData {
                    index,
                    expected: dims,
                    found: row.len(),
                });
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(KMeansError::NonFinite { index });
            }
        }

        let tol = self.tol * mean_variance(data);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut best = self.lloyd(data, plus_plus_init(data, k, &mut rng), tol);
        for _ in 1..self.n_init {
            let fit = self.lloyd(data, plus_plus_init(data, k, &mut rng), tol);
            if fit.inertia < best.inertia {
                best = fit;
            }
        }
        Ok(best)
    }

    fn lloyd(&self, data: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, tol: f64) -> KMeansFit {
        let dims = data[0].len();
        let mut labels = vec![0usize; data.len()];
        let mut converged = false;

        for _ in 0..self.max_iter {
            for (label, point) in labels.iter_mut().zip(data) {
                *label = nearest(point, &centroids).0;
            }

            let mut sums = vec![vec![0.0; dims]; centroids.len()];
            let mut counts = vec![0usize; centroids.len()];
            for (&label, point) in labels.iter().zip(data) {
                counts[label] += 1;
                for (s, v) in sums[label].iter_mut().zip(point) {
                    *s += v;
                }
            }
            let mut shift = 0.0;
            for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // an empty cluster keeps its previous centroid
                if count == 0 {
                    continue;
                }
                let updated: Vec<f64> = sum.into_iter().map(|s| s / count as f64).collect();
                shift += squared_distance(&updated, &centroids[c]);
                centroids[c] = updated;
            }
            if shift <= tol {
                converged = true;
                break;
            }
        }

        let mut inertia = 0.0;
        for (label, point) in labels.iter_mut().zip(data) {
            let (l, d) = nearest(point, &centroids);
            *label = l;
            inertia += d;
        }
        let mut used = vec![false; centroids.len()];
        labels.iter().for_each(|&l| used[l] = true);
        KMeansFit {
            distinct_clusters: used.iter().filter(|&&u| u).count(),
            labels,
            centroids,
            inertia,
            converged,
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index and squared distance of the closest centroid; ties go to the lower index.
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn mean_variance(data: &[Vec<f64>]) -> f64 {
    let n = data.len() as f64;
    let dims = data[0].len();
    if dims == 0 {
        return 0.0;
    }
    let total: f64 = (0..dims)
        .map(|d| {
            let mean = data.iter().map(|row| row[d]).sum::<f64>() / n;
            data.iter().map(|row| (row[d] - mean).powi(2)).sum::<f64>() / n
        })
        .sum();
    total / dims as f64
}

/// k-means++ seeding: each further centroid is drawn with probability
/// proportional to its squared distance from the closest chosen one.
fn plus_plus_init(data: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let mut centroids = vec![data[rng.random_range(0..data.len())].clone()];
    let mut closest: Vec<f64> = data
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let index = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            closest
                .iter()
                .position(|&d| {
                    acc += d;
                    acc >= target && d > 0.0
                })
                .unwrap_or(closest.len() - 1)
        } else {
            // every sample coincides with a chosen centroid
            rng.random_range(0..data.len())
        };
        let chosen = data[index].clone();
        for (c, p) in closest.iter_mut().zip(data) {
            *c = c.min(squared_distance(p, &chosen));
        }
        centroids.push(chosen);
    }
    centroids
}
