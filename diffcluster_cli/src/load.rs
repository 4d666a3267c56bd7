//! Readers for the JSON files produced by the fuzzer and the difference
//! analysis.

use diffcluster_core::bicluster::FeaturePresenceMatrix;
use diffcluster_core::case::FuzzCaseId;
use diffcluster_core::corpus::CounterCorpus;
use diffcluster_core::counters::ExecutionCounter;
use diffcluster_core::fingerprint::Fingerprint;
use diffcluster_core::matrix::ResolverPair;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Deserialize, Debug)]
enum FuzzerOutput {
    Version2(CounterDump),
}

#[derive(Deserialize, Debug)]
struct CounterDump {
    counters: Vec<(String, (CounterRecord, Vec<String>))>,
}

#[derive(Deserialize, Debug)]
struct CounterRecord {
    counter: Vec<u32>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read input file at {:?}: {}", path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse JSON from input file {:?}: {}", path, e))
}

/// Loads `{"Version2": {"counters": [[hash, [{"counter": [...]}, [inputs]]], ...]}}`,
/// keeping at most `limit` counters.
pub fn load_counter_corpus(
    path: &Path,
    limit: Option<usize>,
) -> Result<CounterCorpus, anyhow::Error> {
    let FuzzerOutput::Version2(dump) = read_json(path)?;
    let mut corpus = CounterCorpus::new();
    for (hash, (record, inputs)) in dump.counters {
        corpus.add(
            ExecutionCounter::new(hash, record.counter),
            inputs.into_iter().map(FuzzCaseId::from),
        )?;
    }
    if let Some(limit) = limit {
        corpus.truncate(limit);
    }
    Ok(corpus)
}

fn resolver_pair(configuration: &str, keep_hyphen: &[String]) -> Result<ResolverPair, anyhow::Error> {
    Ok(ResolverPair::from_configuration(configuration, keep_hyphen)?)
}

/// Loads `{"<configuration>": {"<fuzz id>": <fingerprint>, ...}, ...}`.
pub fn load_fingerprints(
    path: &Path,
    keep_hyphen: &[String],
) -> Result<BTreeMap<ResolverPair, Vec<(FuzzCaseId, Fingerprint)>>, anyhow::Error> {
    let raw: BTreeMap<String, BTreeMap<String, serde_json::Value>> = read_json(path)?;
    let mut pairs = BTreeMap::new();
    for (configuration, cases) in raw {
        let pair = resolver_pair(&configuration, keep_hyphen)?;
        let mut fingerprints = Vec::with_capacity(cases.len());
        for (id, value) in cases {
            let id = FuzzCaseId::from(id);
            let fingerprint = Fingerprint::from_value(&id, value)?;
            fingerprints.push((id, fingerprint));
        }
        pairs.insert(pair, fingerprints);
    }
    Ok(pairs)
}

/// Loads `{"<configuration>": {"<fuzz id>": ["key", ...], ...}, ...}` into one
/// presence matrix per configuration.
pub fn load_key_differences(
    path: &Path,
    keep_hyphen: &[String],
) -> Result<BTreeMap<ResolverPair, FeaturePresenceMatrix>, anyhow::Error> {
    let raw: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = read_json(path)?;
    let mut pairs = BTreeMap::new();
    for (configuration, cases) in raw {
        let pair = resolver_pair(&configuration, keep_hyphen)?;
        let matrix = FeaturePresenceMatrix::from_records(cases).map_err(|e| {
            anyhow::anyhow!("Configuration {} has no usable key differences: {}", configuration, e)
        })?;
        pairs.insert(pair, matrix);
    }
    Ok(pairs)
}
