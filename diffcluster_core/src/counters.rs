//! Per-edge execution counters and their normalization.
//!
//! A fuzzing run records one [`ExecutionCounter`] per distinct coverage
//! pattern. Before counters can be compared, indices that are zero in every
//! counter are masked out and the remaining values are rescaled into
//! `0..=255` relative to the batch-wide per-index maximum, so that clustering
//! reacts to the *shape* of the coverage rather than its raw magnitude.

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper end of the normalized value range.
pub const NORMALIZED_MAX: u64 = 255;

/// Errors raised while normalizing counters or comparing them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// A counter in the batch does not share the batch length.
    #[error(
        "counter #{index} ({hash}) has length {found}, but the batch uses length {expected}"
    )]
    DimensionMismatch {
        index: usize,
        hash: String,
        expected: usize,
        found: usize,
    },

    /// The reference maximum is zero at a kept index. The mask is built from the
    /// same batch, so this is a normalizer bug rather than a data problem.
    #[error("reference maximum is zero at reduced index {index} although the mask kept it")]
    InvariantViolation { index: usize },

    /// Not enough counters for the requested operation.
    #[error("at least {needed} counters are required, but only {found} were given")]
    InsufficientData { needed: usize, found: usize },
}

/// An immutable, content-addressed vector of per-edge hit counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionCounter {
    hash: String,
    counts: Vec<u32>,
}

impl ExecutionCounter {
    /// Creates a counter identified by an externally supplied hash
    /// (the fuzzer output keys counters by their own content hash).
    pub fn new(hash: impl Into<String>, counts: Vec<u32>) -> Self {
        Self {
            hash: hash.into(),
            counts,
        }
    }

    /// Creates a counter and derives its hash from the little-endian counts.
    pub fn from_counts(counts: Vec<u32>) -> Self {
        let bytes: Vec<u8> = counts.iter().flat_map(|c| c.to_le_bytes()).collect();
        let hash = format!("{:x}", md5::compute(bytes));
        Self { hash, counts }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Keeps only the entries where `mask` is set.
    ///
    /// The caller guarantees equal lengths; [`normalize_counters`] checks the
    /// whole batch before shrinking anything.
    fn shrink_by_mask(&self, mask: &FeatureMask) -> Vec<u32> {
        self.counts
            .iter()
            .zip(mask.bits.iter())
            .filter(|(_, keep)| **keep)
            .map(|(count, _)| *count)
            .collect()
    }
}

/// Marks which counter indices are ever non-zero across a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMask {
    bits: Vec<bool>,
}

impl FeatureMask {
    /// Element-wise OR of `count != 0` across `counters`.
    ///
    /// All counters must have the same length as the first one.
    pub fn from_counters(counters: &[ExecutionCounter]) -> Result<Self, CounterError> {
        let first = counters.first().ok_or(CounterError::InsufficientData {
            needed: 1,
            found: 0,
        })?;
        let expected = first.len();
        let mut bits = vec![false; expected];
        for (index, counter) in counters.iter().enumerate() {
            if counter.len() != expected {
                return Err(CounterError::DimensionMismatch {
                    index,
                    hash: counter.hash.clone(),
                    expected,
                    found: counter.len(),
                });
            }
            for (bit, &count) in bits.iter_mut().zip(counter.counts.iter()) {
                *bit |= count != 0;
            }
        }
        Ok(Self { bits })
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// Length of the unreduced index space.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of kept indices, i.e. the length of every reduced counter.
    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }
}

/// A reduced counter rescaled into `0..=255`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedCounter {
    hash: String,
    values: Vec<u8>,
}

impl NormalizedCounter {
    pub fn new(hash: impl Into<String>, values: Vec<u8>) -> Self {
        Self {
            hash: hash.into(),
            values,
        }
    }

    /// Hash of the counter this value was derived from.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean absolute difference, guarded by the longer length.
    ///
    /// Missing trailing entries of the shorter counter count as zero.
    pub fn distance(&self, other: &Self) -> f64 {
        let len = self.len().max(other.len());
        if len == 0 {
            return 0.0;
        }
        let padded = |v: &[u8], i: usize| i64::from(v.get(i).copied().unwrap_or(0));
        let sum: i64 = (0..len)
            .map(|i| (padded(&self.values, i) - padded(&other.values, i)).abs())
            .sum();
        sum as f64 / len as f64
    }
}

/// Everything derived from one batch of counters.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub mask: FeatureMask,
    /// Element-wise maximum after masking, before self-normalization.
    pub reference_max: Vec<u32>,
    /// Masked but not rescaled counters, in input order.
    pub reduced: Vec<Vec<u32>>,
    /// Masked and rescaled counters, in input order.
    pub normalized: Vec<NormalizedCounter>,
}

impl NormalizedBatch {
    /// The reference maximum normalized against itself.
    ///
    /// Every kept index has a non-zero maximum, so the result is all 255.
    pub fn normalized_reference(&self) -> Result<Vec<u8>, CounterError> {
        rescale(&self.reference_max, &self.reference_max)
    }
}

/// Rescales `values` into `0..=255` relative to `reference`, truncating.
fn rescale(values: &[u32], reference: &[u32]) -> Result<Vec<u8>, CounterError> {
    values
        .iter()
        .zip(reference.iter())
        .enumerate()
        .map(|(index, (&value, &max))| {
            if max == 0 {
                return Err(CounterError::InvariantViolation { index });
            }
            let scaled = u64::from(value) * NORMALIZED_MAX / u64::from(max);
            // value <= max holds for every batch member, clamp guards foreign references
            Ok(scaled.min(NORMALIZED_MAX) as u8)
        })
        .collect()
}

/// Masks out always-zero indices and rescales every counter of the batch.
pub fn normalize_counters(counters: &[ExecutionCounter]) -> Result<NormalizedBatch, CounterError> {
    let mask = FeatureMask::from_counters(counters)?;

    let mut reference_max = vec![0u32; mask.count_set()];
    let reduced: Vec<Vec<u32>> = counters.iter().map(|c| c.shrink_by_mask(&mask)).collect();
    for counter in &reduced {
        for (max, &value) in reference_max.iter_mut().zip(counter.iter()) {
            *max = (*max).max(value);
        }
    }

    let normalized = counters
        .iter()
        .zip(reduced.iter())
        .map(|(counter, values)| {
            Ok(NormalizedCounter::new(
                counter.hash.clone(),
                rescale(values, &reference_max)?,
            ))
        })
        .collect::<Result<Vec<_>, CounterError>>()?;

    debug!(
        "Normalized {} counters: {} of {} indices kept",
        counters.len(),
        mask.count_set(),
        mask.len()
    );

    Ok(NormalizedBatch {
        mask,
        reference_max,
        reduced,
        normalized,
    })
}
