//! Condensed pairwise distance matrices over normalized counters.

use crate::counters::{CounterError, NormalizedCounter};
use serde::{Deserialize, Serialize};

/// Upper triangle of a symmetric distance matrix, stored row by row without
/// the diagonal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedDistanceMatrix {
    size: usize,
    values: Vec<f64>,
}

impl CondensedDistanceMatrix {
    /// Wraps an already condensed vector.
    ///
    /// Returns `None` if `values.len()` is not `n * (n - 1) / 2` for any `n >= 1`.
    pub fn from_condensed(values: Vec<f64>) -> Option<Self> {
        let size = size_from_condensed_len(values.len())?;
        Some(Self { size, values })
    }

    /// Number of observations (rows of the square matrix).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Distance between observations `i` and `j` in either order.
    ///
    /// # Panics
    ///
    /// Panics if `i` or `j` is out of range.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(
            i < self.size && j < self.size,
            "index ({i}, {j}) out of range for {} observations",
            self.size
        );
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.values[condensed_index(self.size, i, j)],
            std::cmp::Ordering::Greater => self.values[condensed_index(self.size, j, i)],
        }
    }

    /// Expands into a full symmetric matrix with a zero diagonal.
    pub fn to_square(&self) -> Vec<Vec<f64>> {
        (0..self.size)
            .map(|i| (0..self.size).map(|j| self.get(i, j)).collect())
            .collect()
    }
}

/// Position of pair `(i, j)`, `i < j`, in a condensed vector over `n` observations.
pub(crate) fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    n * i - i * (i + 1) / 2 + (j - i - 1)
}

fn size_from_condensed_len(len: usize) -> Option<usize> {
    // n * (n - 1) / 2 == len
    let n = ((1.0 + (1.0 + 8.0 * len as f64).sqrt()) / 2.0).round() as usize;
    (n >= 1 && n * (n - 1) / 2 == len).then_some(n)
}

/// Computes the condensed distance matrix between all pairs of `counters`.
///
/// Every counter must have the length of the first one.
pub fn pairwise_distances(
    counters: &[NormalizedCounter],
) -> Result<CondensedDistanceMatrix, CounterError> {
    if let Some(first) = counters.first() {
        let expected = first.len();
        if let Some((index, counter)) = counters
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != expected)
        {
            return Err(CounterError::DimensionMismatch {
                index,
                hash: counter.hash().to_string(),
                expected,
                found: counter.len(),
            });
        }
    }

    let size = counters.len();
    let mut values = Vec::with_capacity(size * size.saturating_sub(1) / 2);
    for (i, a) in counters.iter().enumerate() {
        for b in &counters[i + 1..] {
            values.push(a.distance(b));
        }
    }
    Ok(CondensedDistanceMatrix { size, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{ExecutionCounter, normalize_counters};

    fn nc(values: &[u8]) -> NormalizedCounter {
        NormalizedCounter::new(format!("{values:?}"), values.to_vec())
    }

    #[test]
    fn condensed_layout_matches_square_matrix() {
        let counters = vec![nc(&[0, 0]), nc(&[3, 0]), nc(&[0, 4]), nc(&[3, 4])];
        let m = pairwise_distances(&counters).unwrap();
        assert_eq!(m.size(), 4);
        assert_eq!(m.as_slice().len(), 6);
        assert_eq!(m.as_slice(), &[1.5, 2.0, 3.5, 3.5, 2.0, 1.5]);
        let square = m.to_square();
        for i in 0..4 {
            assert_eq!(square[i][i], 0.0);
            for j in 0..4 {
                assert_eq!(square[i][j], square[j][i]);
                assert_eq!(square[i][j], counters[i].distance(&counters[j]));
            }
        }
    }

    #[test]
    fn distance_obeys_metric_laws() {
        let counters = vec![
            nc(&[0, 10, 200, 255]),
            nc(&[255, 0, 17, 3]),
            nc(&[12, 12, 12, 12]),
            nc(&[0, 0, 0, 0]),
        ];
        for a in &counters {
            assert_eq!(a.distance(a), 0.0);
            for b in &counters {
                assert_eq!(a.distance(b), b.distance(a));
                for c in &counters {
                    assert!(a.distance(b) <= a.distance(c) + c.distance(b) + 1e-9);
                }
            }
        }
    }

    #[test]
    fn unequal_lengths_are_rejected() {
        let err = pairwise_distances(&[nc(&[1, 2]), nc(&[1, 2]), nc(&[1])]).unwrap_err();
        assert!(matches!(
            err,
            CounterError::DimensionMismatch {
                index: 2,
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn metric_guards_against_unequal_lengths() {
        assert_eq!(nc(&[4, 4]).distance(&nc(&[4])), 2.0);
    }

    #[test]
    fn end_to_end_example_separates_groups() {
        let batch = normalize_counters(&[
            ExecutionCounter::new("a", vec![0, 1, 0, 2, 0, 0]),
            ExecutionCounter::new("b", vec![0, 3, 0, 1, 0, 0]),
            ExecutionCounter::new("c", vec![0, 0, 0, 0, 5, 0]),
            ExecutionCounter::new("d", vec![0, 0, 0, 0, 4, 0]),
        ])
        .unwrap();
        let m = pairwise_distances(&batch.normalized).unwrap();
        assert_eq!(m.get(2, 3), 17.0);
        assert!(m.get(0, 2) > 150.0);
        assert!(m.get(1, 3) > 150.0);
        assert!(m.get(2, 3) < m.get(0, 1));
    }

    #[test]
    fn from_condensed_checks_length() {
        assert!(CondensedDistanceMatrix::from_condensed(vec![1.0, 2.0, 3.0]).is_some());
        assert!(CondensedDistanceMatrix::from_condensed(vec![1.0, 2.0]).is_none());
        assert_eq!(
            CondensedDistanceMatrix::from_condensed(vec![]).map(|m| m.size()),
            Some(1)
        );
    }
}
