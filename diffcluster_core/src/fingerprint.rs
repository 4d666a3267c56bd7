//! Structural fingerprints of a difference between two resolver responses.
//!
//! A fingerprint captures every key whose value differs between the two
//! responses (and is not otherwise explained), plus the values of the
//! response-header fields of both sides. The two sides are an unordered pair:
//! swapping left and right yields the same fingerprint.

use crate::case::FuzzCaseId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Number of response-header fields recorded per side.
pub const SPECIAL_FIELD_COUNT: usize = 13;

/// Display names of the special fields, in recording order.
pub const SPECIAL_FIELD_NAMES: [&str; SPECIAL_FIELD_COUNT] = [
    "#Additionals",
    "#Answers",
    "Authentic Data (AD)",
    "Authoritative (AA)",
    "Checking Disabled (CD)",
    "Messsage Type",
    "#Authority",
    "OP Code",
    "#Queries",
    "Recursion Available (RA)",
    "Recursion Desired (RD)",
    "Response Code",
    "Truncated (TC)",
];

/// Keys below this prefix depend on random cache state and never match.
const CACHE_STATE_PREFIX: &str = ".fuzz_result.cache_state";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// The record does not have the expected fingerprint shape.
    #[error("fingerprint of case {case_id} is malformed: {reason}")]
    MalformedFingerprint { case_id: FuzzCaseId, reason: String },
}

/// Value of one response-header field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Missing,
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Missing => Ok(()),
            FieldValue::Boolean(true) => f.write_str("T"),
            FieldValue::Boolean(false) => f.write_str("F"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// The special fields of one response side.
pub type SpecialFields = [FieldValue; SPECIAL_FIELD_COUNT];

/// Two values whose order does not matter for equality or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnorderedPair<T>(pub T, pub T);

impl<T: Ord> UnorderedPair<T> {
    /// Both values, smaller one first.
    pub fn as_ordered(&self) -> (&T, &T) {
        if self.0 > self.1 {
            (&self.1, &self.0)
        } else {
            (&self.0, &self.1)
        }
    }
}

impl<T: Ord> PartialEq for UnorderedPair<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_ordered() == other.as_ordered()
    }
}

impl<T: Ord> Eq for UnorderedPair<T> {}

impl<T: Ord> PartialOrd for UnorderedPair<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for UnorderedPair<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_ordered().cmp(&other.as_ordered())
    }
}

impl<T: Ord + std::hash::Hash> std::hash::Hash for UnorderedPair<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_ordered().hash(state);
    }
}

/// Structural summary of how two resolver responses differ.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Fingerprint {
    key_diffs: BTreeSet<String>,
    special_fields: UnorderedPair<SpecialFields>,
}

/// Raw record shape, before validation.
#[derive(Deserialize)]
struct RawFingerprint {
    key_diffs: Option<Vec<String>>,
    special_fields: Option<(Vec<FieldValue>, Vec<FieldValue>)>,
}

impl Fingerprint {
    /// Builds a fingerprint, dropping key differences caused by cache state.
    pub fn new(
        key_diffs: impl IntoIterator<Item = String>,
        left: SpecialFields,
        right: SpecialFields,
    ) -> Self {
        let key_diffs = key_diffs
            .into_iter()
            .filter(|k| !k.starts_with(CACHE_STATE_PREFIX))
            .collect();
        Self {
            key_diffs,
            special_fields: UnorderedPair(left, right),
        }
    }

    /// Decodes a fingerprint record of the form
    /// `{"key_diffs": [...], "special_fields": [[13 values], [13 values]]}`.
    pub fn from_json(case_id: &FuzzCaseId, json: &str) -> Result<Self, FingerprintError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| malformed(case_id, e.to_string()))?;
        Self::from_value(case_id, value)
    }

    /// Like [`Fingerprint::from_json`], for an already parsed JSON value.
    pub fn from_value(
        case_id: &FuzzCaseId,
        value: serde_json::Value,
    ) -> Result<Self, FingerprintError> {
        let raw: RawFingerprint =
            serde_json::from_value(value).map_err(|e| malformed(case_id, e.to_string()))?;
        let key_diffs = raw
            .key_diffs
            .ok_or_else(|| malformed(case_id, "missing `key_diffs`".to_string()))?;
        let (left, right) = raw
            .special_fields
            .ok_or_else(|| malformed(case_id, "missing `special_fields`".to_string()))?;
        let side = |fields: Vec<FieldValue>, name: &str| -> Result<SpecialFields, FingerprintError> {
            let found = fields.len();
            fields.try_into().map_err(|_| {
                malformed(
                    case_id,
                    format!(
                        "{name} special fields have {found} entries, expected {SPECIAL_FIELD_COUNT}"
                    ),
                )
            })
        };
        Ok(Self::new(
            key_diffs,
            side(left, "left")?,
            side(right, "right")?,
        ))
    }

    pub fn key_diffs(&self) -> &BTreeSet<String> {
        &self.key_diffs
    }

    /// Both sides' special fields, in canonical (sorted) order.
    pub fn special_fields(&self) -> (&SpecialFields, &SpecialFields) {
        self.special_fields.as_ordered()
    }

    /// Canonical JSON text. Equal fingerprints serialize identically.
    pub fn canonical_json(&self) -> String {
        let (left, right) = self.special_fields();
        serde_json::json!({
            "key_diffs": self.key_diffs,
            "special_fields": [left, right],
        })
        .to_string()
    }
}

fn malformed(case_id: &FuzzCaseId, reason: String) -> FingerprintError {
    FingerprintError::MalformedFingerprint {
        case_id: case_id.clone(),
        reason,
    }
}
