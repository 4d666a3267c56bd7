use crate::bicluster::SearchBounds;
use crate::coverage::MethodThreshold;
use crate::linkage::LinkageMethod;
use crate::matrix::DEFAULT_KEEP_HYPHEN;
use crate::spectral::SpectralBiclustering;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverageSettings {
    #[serde(default = "default_methods")]
    pub methods: Vec<MethodThreshold>,
    /// Counters analyzed, in input order. 0 analyzes all of them.
    #[serde(default = "default_max_counters")]
    pub max_counters: usize,
}

pub fn default_methods() -> Vec<MethodThreshold> {
    vec![
        MethodThreshold::new(LinkageMethod::Single, 2.0),
        MethodThreshold::new(LinkageMethod::Average, 4.0),
        MethodThreshold::new(LinkageMethod::Weighted, 5.0),
        MethodThreshold::new(LinkageMethod::Centroid, 4.0),
        MethodThreshold::new(LinkageMethod::Median, 5.0),
        MethodThreshold::new(LinkageMethod::Ward, 50.0),
    ]
}

pub fn default_max_counters() -> usize {
    100
}

impl CoverageSettings {
    pub fn counter_limit(&self) -> Option<usize> {
        (self.max_counters > 0).then_some(self.max_counters)
    }
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            max_counters: default_max_counters(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FingerprintSettings {
    #[serde(default = "default_top_clusters")]
    pub top_clusters: usize,
    #[serde(default = "default_keep_hyphen")]
    pub keep_hyphen: Vec<String>,
}

pub fn default_top_clusters() -> usize {
    4
}

pub fn default_keep_hyphen() -> Vec<String> {
    DEFAULT_KEEP_HYPHEN.iter().map(|s| s.to_string()).collect()
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            top_clusters: default_top_clusters(),
            keep_hyphen: default_keep_hyphen(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BiclusterSettings {
    #[serde(default = "default_start")]
    pub start: usize,
    #[serde(default = "default_cap")]
    pub cap: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_n_components")]
    pub n_components: usize,
    #[serde(default = "default_n_best")]
    pub n_best: usize,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
}

fn default_start() -> usize {
    SearchBounds::default().start
}
fn default_cap() -> usize {
    SearchBounds::default().cap
}
fn default_n_components() -> usize {
    SpectralBiclustering::default().n_components
}
fn default_n_best() -> usize {
    SpectralBiclustering::default().n_best
}
fn default_n_init() -> usize {
    SpectralBiclustering::default().n_init
}
fn default_max_iter() -> usize {
    SpectralBiclustering::default().max_iter
}

impl BiclusterSettings {
    pub fn bounds(&self) -> SearchBounds {
        SearchBounds {
            start: self.start,
            cap: self.cap,
        }
    }

    pub fn fitter(&self) -> SpectralBiclustering {
        SpectralBiclustering {
            n_components: self.n_components,
            n_best: self.n_best,
            n_init: self.n_init,
            max_iter: self.max_iter,
            seed: self.seed,
        }
    }
}

impl Default for BiclusterSettings {
    fn default() -> Self {
        Self {
            start: default_start(),
            cap: default_cap(),
            seed: 0,
            n_components: default_n_components(),
            n_best: default_n_best(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct AnalysisSettings {
    /// Worker threads for per-pair analysis. 0 leaves the choice to rayon.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

pub fn default_threads() -> usize {
    0
}

impl AnalysisSettings {
    /// Sizes the global rayon pool. Only the first call in a process has effect.
    pub fn configure_thread_pool(&self) -> Result<(), anyhow::Error> {
        if self.threads == 0 {
            return Ok(());
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("Failed to start {} worker threads: {}", self.threads, e))
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DiffclusterConfig {
    #[serde(default)]
    pub coverage: CoverageSettings,
    #[serde(default)]
    pub fingerprint: FingerprintSettings,
    #[serde(default)]
    pub bicluster: BiclusterSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl DiffclusterConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: DiffclusterConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_the_reference_analysis() {
        let config = DiffclusterConfig::default();
        let methods: Vec<(LinkageMethod, f64)> = config
            .coverage
            .methods
            .iter()
            .map(|m| (m.method, m.threshold))
            .collect();
        assert_eq!(
            methods,
            vec![
                (LinkageMethod::Single, 2.0),
                (LinkageMethod::Average, 4.0),
                (LinkageMethod::Weighted, 5.0),
                (LinkageMethod::Centroid, 4.0),
                (LinkageMethod::Median, 5.0),
                (LinkageMethod::Ward, 50.0),
            ]
        );
        assert_eq!(config.coverage.counter_limit(), Some(100));
        assert_eq!(config.fingerprint.top_clusters, 4);
        assert_eq!(config.bicluster.bounds(), SearchBounds { start: 4, cap: 30 });
        assert_eq!(config.bicluster.fitter(), SpectralBiclustering::default());
    }

    #[test]
    fn load_partial_file() {
        let file = write_config(
            r#"
[coverage]
max-counters = 0

[[coverage.methods]]
method = "ward"
threshold = 20.0

[fingerprint]
keep-hyphen = ["knot-resolver"]

[bicluster]
cap = 12
seed = 3

[analysis]
threads = 2
"#,
        );
        let config = DiffclusterConfig::load_from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(
            config.coverage.methods,
            vec![MethodThreshold::new(LinkageMethod::Ward, 20.0)]
        );
        assert_eq!(config.coverage.counter_limit(), None);
        assert_eq!(config.fingerprint.keep_hyphen, vec!["knot-resolver"]);
        assert_eq!(config.fingerprint.top_clusters, 4);
        assert_eq!(config.bicluster.bounds(), SearchBounds { start: 4, cap: 12 });
        assert_eq!(config.bicluster.fitter().seed, 3);
        assert_eq!(config.analysis.threads, 2);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let file = write_config("");
        let config = DiffclusterConfig::load_from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config, DiffclusterConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_config("[bicluster]\nstrat = 5\n");
        let err = DiffclusterConfig::load_from_file(&file.path().to_path_buf()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"));

        let file = write_config("[[coverage.methods]]\nmethod = \"complete\"\nthreshold = 1.0\n");
        assert!(DiffclusterConfig::load_from_file(&file.path().to_path_buf()).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = DiffclusterConfig::load_from_file(&PathBuf::from("/nonexistent/diffcluster.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
