pub mod bicluster;
pub mod case;
pub mod config;
pub mod corpus;
pub mod counters;
pub mod coverage;
pub mod dedupe;
pub mod distance;
pub mod fingerprint;
pub mod kmeans;
pub mod linkage;
pub mod matrix;
mod ordering;
pub mod spectral;

pub use bicluster::{
    BiclusterAssignment, BiclusterError, BiclusterResult, Biclusterer, ClusterSortKey,
    FeaturePresenceMatrix, FitOutcome, RowClusterSummary, SearchBounds, adaptive_bicluster,
    adaptive_bicluster_with, bicluster_pairs,
};
pub use case::FuzzCaseId;
pub use config::DiffclusterConfig;
pub use corpus::{CorpusEntry, CorpusError, CounterCorpus};
pub use counters::{
    CounterError, ExecutionCounter, FeatureMask, NormalizedBatch, NormalizedCounter,
    normalize_counters,
};
pub use coverage::{CoverageClustering, CoverageError, MethodThreshold, cluster_coverage};
pub use dedupe::{FingerprintCluster, dedupe_by_fingerprint};
pub use distance::{CondensedDistanceMatrix, pairwise_distances};
pub use fingerprint::{FieldValue, Fingerprint, FingerprintError, SpecialFields};
pub use linkage::{Dendrogram, LinkageError, LinkageMethod, Merge, build_dendrogram};
pub use matrix::{
    FingerprintReport, PairAnalysis, PairError, PairMatrix, PairMetrics, ResolverPair,
    analyze_pairs,
};
pub use spectral::SpectralBiclustering;
