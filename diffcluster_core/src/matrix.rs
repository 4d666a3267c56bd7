//! Per resolver-pair health metrics and their symmetric matrices.

use crate::case::FuzzCaseId;
use crate::dedupe::{FingerprintCluster, dedupe_by_fingerprint};
use crate::fingerprint::Fingerprint;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Resolver names containing a hyphen of their own.
pub const DEFAULT_KEEP_HYPHEN: [&str; 3] = ["pdns-recursor", "knot-resolver", "trust-dns"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairError {
    #[error("configuration '{name}' does not name exactly two resolvers (found {found:?})")]
    InvalidResolverPair { name: String, found: Vec<String> },
}

/// Two resolvers compared against each other, in the order the configuration
/// names them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResolverPair {
    pub left: String,
    pub right: String,
}

impl ResolverPair {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Splits a configuration name such as `bind9-pdns-recursor` at the hyphen
    /// separating the two resolvers, leaving the hyphens of `keep_hyphen`
    /// names intact.
    pub fn from_configuration(name: &str, keep_hyphen: &[String]) -> Result<Self, PairError> {
        let mut parts: Vec<String> = Vec::new();
        let mut rest = name;
        while !rest.is_empty() {
            let whole = keep_hyphen
                .iter()
                .filter(|k| {
                    rest.starts_with(k.as_str())
                        && (rest.len() == k.len() || rest[k.len()..].starts_with('-'))
                })
                .max_by_key(|k| k.len());
            let end = match whole {
                Some(k) => k.len(),
                None => rest.find('-').unwrap_or(rest.len()),
            };
            parts.push(rest[..end].to_string());
            rest = rest[end..].strip_prefix('-').unwrap_or(&rest[end..]);
        }
        match <[String; 2]>::try_from(parts) {
            Ok([left, right]) if !left.is_empty() && !right.is_empty() => {
                Ok(Self::new(left, right))
            }
            Ok(parts) => Err(PairError::InvalidResolverPair {
                name: name.to_string(),
                found: parts.to_vec(),
            }),
            Err(found) => Err(PairError::InvalidResolverPair {
                name: name.to_string(),
                found,
            }),
        }
    }

    /// Command-line form of the pair, `left right`.
    pub fn args(&self) -> String {
        format!("{} {}", self.left, self.right)
    }
}

impl fmt::Display for ResolverPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.left, self.right)
    }
}

/// Two scalar summaries of a pair's fingerprint clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairMetrics {
    /// Number of distinct fingerprints.
    pub cluster_count: usize,
    /// Size of the largest cluster, 0 without any cases.
    pub largest_cluster: usize,
}

impl PairMetrics {
    pub fn from_clusters(clusters: &[FingerprintCluster]) -> Self {
        Self {
            cluster_count: clusters.len(),
            largest_cluster: clusters.first().map_or(0, |c| c.size()),
        }
    }
}

/// The deduplicated clusters of one resolver pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairAnalysis {
    pub pair: ResolverPair,
    pub clusters: Vec<FingerprintCluster>,
    pub metrics: PairMetrics,
}

/// A square matrix over resolver names filled from pairs computed only once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairMatrix {
    resolvers: Vec<String>,
    values: BTreeMap<(String, String), usize>,
}

impl PairMatrix {
    /// Collects one value per unordered pair. When a pair appears again,
    /// in either orientation, the first value is kept and the later one is
    /// dropped with a warning.
    pub fn new(entries: impl IntoIterator<Item = (ResolverPair, usize)>) -> Self {
        let mut names = BTreeSet::new();
        let mut values = BTreeMap::new();
        for (pair, value) in entries {
            let mirrored = (pair.right.clone(), pair.left.clone());
            let key = (pair.left, pair.right);
            if let Some(kept) = values.get(&key).or_else(|| values.get(&mirrored)) {
                warn!(
                    "Ignoring duplicate value {value} for {}-{}, keeping {kept}",
                    key.0, key.1
                );
                continue;
            }
            names.insert(key.0.clone());
            names.insert(key.1.clone());
            values.insert(key, value);
        }
        Self {
            resolvers: names.into_iter().collect(),
            values,
        }
    }

    /// Sorted resolver names labeling both axes.
    pub fn resolvers(&self) -> &[String] {
        &self.resolvers
    }

    /// Value for `(left, right)`, mirrored from `(right, left)` when only that
    /// half was computed, 0 when neither was.
    pub fn get(&self, left: &str, right: &str) -> usize {
        let key = |a: &str, b: &str| (a.to_string(), b.to_string());
        self.values
            .get(&key(left, right))
            .or_else(|| self.values.get(&key(right, left)))
            .copied()
            .unwrap_or(0)
    }

    /// Dense rows in `resolvers()` order.
    pub fn rows(&self) -> Vec<Vec<usize>> {
        self.resolvers
            .iter()
            .map(|l| self.resolvers.iter().map(|r| self.get(l, r)).collect())
            .collect()
    }
}

/// Deduplicates every pair independently and collects both health matrices.
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintReport {
    pub pairs: Vec<PairAnalysis>,
    pub cluster_counts: PairMatrix,
    pub largest_clusters: PairMatrix,
}

/// Runs [`dedupe_by_fingerprint`] for each pair, in parallel, and returns
/// the results ordered by pair.
pub fn analyze_pairs(
    pairs: BTreeMap<ResolverPair, Vec<(FuzzCaseId, Fingerprint)>>,
) -> FingerprintReport {
    let analyses: Vec<PairAnalysis> = pairs
        .into_par_iter()
        .map(|(pair, cases)| {
            let clusters = dedupe_by_fingerprint(cases);
            let metrics = PairMetrics::from_clusters(&clusters);
            info!(
                "{pair}: {} clusters, largest has {} cases",
                metrics.cluster_count, metrics.largest_cluster
            );
            PairAnalysis {
                pair,
                clusters,
                metrics,
            }
        })
        .collect();

    let cluster_counts = PairMatrix::new(
        analyses
            .iter()
            .map(|a| (a.pair.clone(), a.metrics.cluster_count)),
    );
    let largest_clusters = PairMatrix::new(
        analyses
            .iter()
            .map(|a| (a.pair.clone(), a.metrics.largest_cluster)),
    );
    FingerprintReport {
        pairs: analyses,
        cluster_counts,
        largest_clusters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::tests::fields;

    fn keep() -> Vec<String> {
        DEFAULT_KEEP_HYPHEN.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn configuration_names_split_into_two_resolvers() {
        let cases = [
            ("bind9-unbound", ("bind9", "unbound")),
            ("bind9-pdns-recursor", ("bind9", "pdns-recursor")),
            ("pdns-recursor-knot-resolver", ("pdns-recursor", "knot-resolver")),
            ("trust-dns-maradns", ("trust-dns", "maradns")),
        ];
        for (name, (left, right)) in cases {
            let pair = ResolverPair::from_configuration(name, &keep()).unwrap();
            assert_eq!(pair, ResolverPair::new(left, right), "{name}");
            assert_eq!(pair.to_string(), name);
        }
        assert_eq!(
            ResolverPair::from_configuration("bind9-pdns-recursor", &keep())
                .unwrap()
                .args(),
            "bind9 pdns-recursor"
        );
    }

    #[test]
    fn names_without_two_resolvers_are_rejected() {
        for name in ["bind9", "a-b-c", "", "bind9-"] {
            assert!(
                matches!(
                    ResolverPair::from_configuration(name, &keep()),
                    Err(PairError::InvalidResolverPair { .. })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn matrix_mirrors_missing_half() {
        let m = PairMatrix::new(vec![
            (ResolverPair::new("bind9", "unbound"), 7),
            (ResolverPair::new("knot-resolver", "bind9"), 3),
        ]);
        assert_eq!(m.resolvers(), &["bind9", "knot-resolver", "unbound"]);
        assert_eq!(m.get("bind9", "unbound"), 7);
        assert_eq!(m.get("unbound", "bind9"), 7);
        assert_eq!(m.get("bind9", "knot-resolver"), 3);
        assert_eq!(m.get("unbound", "knot-resolver"), 0);
        let rows = m.rows();
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                assert_eq!(*value, rows[j][i]);
            }
        }
    }

    #[test]
    fn matrix_keeps_first_value_of_a_repeated_pair() {
        let m = PairMatrix::new(vec![
            (ResolverPair::new("bind9", "unbound"), 7),
            (ResolverPair::new("unbound", "bind9"), 2),
            (ResolverPair::new("bind9", "unbound"), 5),
        ]);
        assert_eq!(m.get("bind9", "unbound"), 7);
        assert_eq!(m.get("unbound", "bind9"), 7);
        assert_eq!(m.rows(), vec![vec![0, 7], vec![7, 0]]);
    }

    #[test]
    fn report_collects_metrics_per_pair() {
        let fp = |key: &str| {
            Fingerprint::new(vec![key.to_string()], fields("NoError", 0), fields("NoError", 1))
        };
        let mut pairs = BTreeMap::new();
        pairs.insert(
            ResolverPair::new("bind9", "unbound"),
            vec![
                (FuzzCaseId::from("1"), fp("a")),
                (FuzzCaseId::from("2"), fp("a")),
                (FuzzCaseId::from("3"), fp("b")),
            ],
        );
        pairs.insert(
            ResolverPair::new("bind9", "maradns"),
            vec![(FuzzCaseId::from("4"), fp("c"))],
        );
        let report = analyze_pairs(pairs);
        assert_eq!(report.pairs.len(), 2);
        assert_eq!(report.pairs[0].pair, ResolverPair::new("bind9", "maradns"));
        assert_eq!(
            report.pairs[1].metrics,
            PairMetrics {
                cluster_count: 2,
                largest_cluster: 2
            }
        );
        assert_eq!(report.cluster_counts.get("unbound", "bind9"), 2);
        assert_eq!(report.largest_clusters.get("maradns", "bind9"), 1);
    }
}
