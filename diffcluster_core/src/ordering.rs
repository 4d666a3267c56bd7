//! Optimal leaf ordering for binary merge trees.
//!
//! Every internal node can present its two children in either order, so a
//! tree over `n` leaves admits `2^(n-1)` leaf orderings. The ordering chosen
//! here minimizes the sum of distances between adjacent leaves. For each
//! internal node `v` with children `L` and `R`, and every pair of leaves
//! `u` in `L`, `w` in `R`, the dynamic program records the cheapest ordering of
//! `v` that starts at `u` and ends at `w`:
//!
//! ```text
//! cost(u, w) = min over m, k of  cost(u, m) + d(m, k) + cost(k, w)
//! ```
//!
//! where `m` is the inner end of the `L` ordering and `k` the inner end of the
//! `R` ordering. Every leaf pair has exactly one lowest common ancestor, so a
//! single `n x n` table holds the costs of all nodes at once.

use crate::distance::CondensedDistanceMatrix;
use crate::linkage::Merge;

struct Table<T> {
    n: usize,
    cells: Vec<T>,
}

impl<T: Copy> Table<T> {
    fn new(n: usize, init: T) -> Self {
        Self {
            n,
            cells: vec![init; n * n],
        }
    }

    fn get(&self, a: usize, b: usize) -> T {
        self.cells[a * self.n + b]
    }

    fn set(&mut self, a: usize, b: usize, value: T) {
        self.cells[a * self.n + b] = value;
    }
}

/// Leaves of `node` that may end an ordering of `node` opposite to `leaf`.
fn opposite_ends<'a>(
    leaves_of: &'a [Vec<usize>],
    children: &[Option<(usize, usize)>],
    node: usize,
    leaf: usize,
) -> &'a [usize] {
    match children[node] {
        None => &leaves_of[node],
        Some((first, second)) => {
            if leaves_of[first].contains(&leaf) {
                &leaves_of[second]
            } else {
                &leaves_of[first]
            }
        }
    }
}

/// Returns the leaves of the tree described by `merges` in optimal order.
///
/// Ties are resolved towards the first minimum in leaf-list order, so the
/// result only depends on the inputs.
pub(crate) fn optimal_leaf_order(merges: &[Merge], distances: &CondensedDistanceMatrix) -> Vec<usize> {
    let n = distances.size();
    if n == 0 {
        return Vec::new();
    }
    let nodes = n + merges.len();
    let mut leaves_of: Vec<Vec<usize>> = (0..n).map(|leaf| vec![leaf]).collect();
    let mut children: Vec<Option<(usize, usize)>> = vec![None; nodes];
    for (k, merge) in merges.iter().enumerate() {
        let mut leaves = leaves_of[merge.left].clone();
        leaves.extend_from_slice(&leaves_of[merge.right]);
        leaves_of.push(leaves);
        children[n + k] = Some((merge.left, merge.right));
    }

    let d = distances.to_square();
    let mut cost = Table::new(n, 0.0f64);
    let mut inner_ends = Table::new(n, (0usize, 0usize));

    for (k, merge) in merges.iter().enumerate() {
        let (left, right) = (merge.left, merge.right);
        let (l_leaves, r_leaves) = (&leaves_of[left], &leaves_of[right]);

        // via[u][k]: cheapest ordering of `left` from `u` to an inner end, plus the step to `k`
        let mut via = vec![(f64::INFINITY, 0usize); l_leaves.len() * r_leaves.len()];
        for (ui, &u) in l_leaves.iter().enumerate() {
            for &m in opposite_ends(&leaves_of, &children, left, u) {
                let prefix = cost.get(u, m);
                for (ki, &kk) in r_leaves.iter().enumerate() {
                    let candidate = prefix + d[m][kk];
                    let slot = &mut via[ui * r_leaves.len() + ki];
                    if candidate < slot.0 {
                        *slot = (candidate, m);
                    }
                }
            }
        }

        for (ui, &u) in l_leaves.iter().enumerate() {
            for &w in r_leaves {
                let mut best = (f64::INFINITY, 0usize, 0usize);
                for &kk in opposite_ends(&leaves_of, &children, right, w) {
                    let ki = r_leaves
                        .iter()
                        .position(|&x| x == kk)
                        .unwrap_or_default();
                    let (prefix, m) = via[ui * r_leaves.len() + ki];
                    let candidate = prefix + cost.get(kk, w);
                    if candidate < best.0 {
                        best = (candidate, m, kk);
                    }
                }
                let (total, m, kk) = best;
                cost.set(u, w, total);
                cost.set(w, u, total);
                inner_ends.set(u, w, (m, kk));
                inner_ends.set(w, u, (kk, m));
            }
        }
        debug_assert_eq!(leaves_of[n + k].len(), merge.size);
    }

    let root = nodes - 1;
    let (start, end) = match children[root] {
        None => return vec![0],
        Some((left, right)) => {
            let mut best = (f64::INFINITY, leaves_of[left][0], leaves_of[right][0]);
            for &u in &leaves_of[left] {
                for &w in &leaves_of[right] {
                    if cost.get(u, w) < best.0 {
                        best = (cost.get(u, w), u, w);
                    }
                }
            }
            (best.1, best.2)
        }
    };

    let mut order = Vec::with_capacity(n);
    let mut pending = vec![(root, start, end)];
    while let Some((node, u, w)) = pending.pop() {
        match children[node] {
            None => order.push(u),
            Some((first, second)) => {
                let (m, kk) = inner_ends.get(u, w);
                let (u_side, w_side) = if leaves_of[first].contains(&u) {
                    (first, second)
                } else {
                    (second, first)
                };
                pending.push((w_side, kk, w));
                pending.push((u_side, u, m));
            }
        }
    }
    order
}
