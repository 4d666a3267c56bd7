//! Exact-fingerprint deduplication of fuzz cases.

use crate::case::FuzzCaseId;
use crate::fingerprint::Fingerprint;
use serde::Serialize;
use std::collections::BTreeMap;

/// Fuzz cases sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintCluster {
    pub fingerprint: Fingerprint,
    members: Vec<FuzzCaseId>,
}

impl FingerprintCluster {
    /// Members in ascending order, never empty.
    pub fn members(&self) -> &[FuzzCaseId] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The lexicographically smallest member.
    pub fn representative(&self) -> &FuzzCaseId {
        &self.members[0]
    }
}

/// Groups cases by structural fingerprint equality.
///
/// Clusters are ordered by descending size, then by descending canonical
/// fingerprint text, so equal inputs in any order give the same result.
pub fn dedupe_by_fingerprint(
    cases: impl IntoIterator<Item = (FuzzCaseId, Fingerprint)>,
) -> Vec<FingerprintCluster> {
    let mut groups: BTreeMap<Fingerprint, Vec<FuzzCaseId>> = BTreeMap::new();
    for (id, fingerprint) in cases {
        groups.entry(fingerprint).or_default().push(id);
    }

    let mut clusters: Vec<(String, FingerprintCluster)> = groups
        .into_iter()
        .map(|(fingerprint, mut members)| {
            members.sort();
            (
                fingerprint.canonical_json(),
                FingerprintCluster {
                    fingerprint,
                    members,
                },
            )
        })
        .collect();
    clusters.sort_by(|(a_key, a), (b_key, b)| {
        b.size().cmp(&a.size()).then_with(|| b_key.cmp(a_key))
    });
    clusters.into_iter().map(|(_, cluster)| cluster).collect()
}
