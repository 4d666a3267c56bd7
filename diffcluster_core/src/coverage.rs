//! Coverage-counter clustering: normalize, measure, and build one dendrogram
//! per configured linkage method.

use crate::case::FuzzCaseId;
use crate::corpus::CounterCorpus;
use crate::counters::{CounterError, normalize_counters};
use crate::distance::{CondensedDistanceMatrix, pairwise_distances};
use crate::linkage::{Dendrogram, LinkageError, LinkageMethod, build_dendrogram};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoverageError {
    #[error("Counter normalization failed: {0}")]
    Counter(#[from] CounterError),
    #[error("Hierarchical clustering failed: {0}")]
    Linkage(#[from] LinkageError),
}

/// A linkage method and the distance at which its dendrogram is cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MethodThreshold {
    pub method: LinkageMethod,
    pub threshold: f64,
}

impl MethodThreshold {
    pub fn new(method: LinkageMethod, threshold: f64) -> Self {
        Self { method, threshold }
    }
}

/// One dendrogram leaf, i.e. one distinct counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledLeaf {
    /// Position of the counter in the corpus.
    pub entry: usize,
    pub hash: String,
    pub input_count: usize,
    /// Flat cluster at the configured threshold.
    pub cluster: usize,
}

impl LabeledLeaf {
    pub fn label(&self) -> String {
        format!("{} - {}", self.input_count, self.hash)
    }
}

/// Counters and fuzz cases grouped under one flat cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageCluster {
    pub id: usize,
    pub hashes: Vec<String>,
    pub inputs: Vec<FuzzCaseId>,
}

/// Result of clustering a corpus with one `(method, threshold)` pair.
#[derive(Debug, Clone)]
pub struct CoverageClustering {
    pub config: MethodThreshold,
    pub dendrogram: Dendrogram,
    /// Leaves in optimal order.
    pub leaves: Vec<LabeledLeaf>,
}

impl CoverageClustering {
    /// Flat clusters in order of first appearance along the leaf order.
    pub fn clusters(&self, corpus: &CounterCorpus) -> Vec<CoverageCluster> {
        let mut clusters: Vec<CoverageCluster> = Vec::new();
        for leaf in &self.leaves {
            if clusters.len() <= leaf.cluster {
                clusters.resize_with(leaf.cluster + 1, || CoverageCluster {
                    id: 0,
                    hashes: Vec::new(),
                    inputs: Vec::new(),
                });
            }
            let cluster = &mut clusters[leaf.cluster];
            cluster.id = leaf.cluster;
            cluster.hashes.push(leaf.hash.clone());
            if let Ok(entry) = corpus.get(leaf.entry) {
                cluster.inputs.extend(entry.inputs.iter().cloned());
            }
        }
        clusters
    }
}

/// Normalizes the corpus once and returns its condensed distance matrix.
pub fn corpus_distances(corpus: &CounterCorpus) -> Result<CondensedDistanceMatrix, CoverageError> {
    let batch = normalize_counters(&corpus.counters())?;
    Ok(pairwise_distances(&batch.normalized)?)
}

/// Clusters `corpus` once per configuration.
///
/// Each configuration is independent; none of them is preferred over another.
pub fn cluster_coverage(
    corpus: &CounterCorpus,
    configs: &[MethodThreshold],
) -> Result<Vec<CoverageClustering>, CoverageError> {
    let distances = corpus_distances(corpus)?;

    configs
        .iter()
        .map(|&config| {
            let (dendrogram, order) =
                build_dendrogram(&distances, config.method, config.threshold)?;
            let labels = dendrogram.flat_clusters();
            let leaves = order
                .iter()
                .map(|&entry| {
                    let e = &corpus.entries()[entry];
                    LabeledLeaf {
                        entry,
                        hash: e.counter.hash().to_string(),
                        input_count: e.input_count(),
                        cluster: labels[entry],
                    }
                })
                .collect::<Vec<_>>();
            let cluster_count = leaves.iter().map(|l| l.cluster + 1).max().unwrap_or(0);
            info!(
                "Finished {} (threshold {}): {} counters in {} clusters",
                config.method,
                config.threshold,
                leaves.len(),
                cluster_count
            );
            Ok(CoverageClustering {
                config,
                dendrogram,
                leaves,
            })
        })
        .collect()
}
