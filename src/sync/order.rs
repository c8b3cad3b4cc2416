//! Order-change detection.
//!
//! Remembered and current layer identities are each sorted by order and
//! diffed with a longest-common-subsequence opcode diff. An identity that
//! is both removed from one position and inserted at another has moved,
//! which means the relative order changed.

use std::collections::HashSet;

/// Edit operation over index ranges of the old (`a`) and new (`b`) lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Equal { a: (usize, usize), b: (usize, usize) },
    Delete { a: (usize, usize), b: (usize, usize) },
    Insert { a: (usize, usize), b: (usize, usize) },
    Replace { a: (usize, usize), b: (usize, usize) },
}

/// Opcodes turning `a` into `b`, derived from a longest common subsequence.
#[must_use]
pub fn opcodes<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Opcode> {
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    // Matched index pairs, in order.
    let mut matches = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            matches.push((i, j));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches.push((n, m));

    let mut out = Vec::new();
    let (mut ai, mut bj) = (0, 0);
    let mut k = 0;
    while k < matches.len() {
        let (mi, mj) = matches[k];
        let gap = (ai, mi, bj, mj);
        match (gap.0 < gap.1, gap.2 < gap.3) {
            (true, true) => out.push(Opcode::Replace { a: (ai, mi), b: (bj, mj) }),
            (true, false) => out.push(Opcode::Delete { a: (ai, mi), b: (bj, bj) }),
            (false, true) => out.push(Opcode::Insert { a: (ai, ai), b: (bj, mj) }),
            (false, false) => {}
        }

        // Extend a run of consecutive matches into one Equal block.
        let (start_a, start_b) = (mi, mj);
        let mut end = k;
        while end + 1 < matches.len()
            && matches[end + 1].0 == matches[end].0 + 1
            && matches[end + 1].1 == matches[end].1 + 1
            && matches[end + 1].0 < n
        {
            end += 1;
        }
        if mi < n && mj < m {
            let len = end - k + 1;
            out.push(Opcode::Equal {
                a: (start_a, start_a + len),
                b: (start_b, start_b + len),
            });
            ai = start_a + len;
            bj = start_b + len;
        } else {
            ai = mi;
            bj = mj;
        }
        k = end + 1;
    }
    out
}

/// Whether any identity present in both lists moved relative to the others.
#[must_use]
pub fn order_changed<T: PartialEq + Eq + std::hash::Hash>(old: &[T], new: &[T]) -> bool {
    let mut removed = HashSet::new();
    let mut inserted = HashSet::new();

    for op in opcodes(old, new) {
        match op {
            Opcode::Delete { a, .. } => removed.extend(&old[a.0..a.1]),
            Opcode::Insert { b, .. } => inserted.extend(&new[b.0..b.1]),
            Opcode::Replace { a, b } => {
                removed.extend(&old[a.0..a.1]);
                inserted.extend(&new[b.0..b.1]);
            }
            Opcode::Equal { .. } => {}
        }
    }
    removed.intersection(&inserted).next().is_some()
}

/// Identities sorted by ascending order; ties keep their input sequence.
pub fn sorted_ids<'a, I>(items: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = (&'a str, i64)>,
{
    let mut items: Vec<(&str, i64)> = items.into_iter().collect();
    items.sort_by_key(|(_, order)| *order);
    items.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_is_order_change() {
        assert!(order_changed(&["A", "B", "C"], &["B", "A", "C"]));
    }

    #[test]
    fn test_same_sequence_is_not_order_change() {
        assert!(!order_changed(&["A", "B", "C"], &["A", "B", "C"]));
    }

    #[test]
    fn test_additions_and_removals_alone_are_not_order_change() {
        assert!(!order_changed(&["A", "B", "C"], &["A", "C"]));
        assert!(!order_changed(&["A", "C"], &["A", "B", "C", "D"]));
        assert!(!order_changed(&["A", "B"], &["X", "Y"]));
        assert!(!order_changed::<&str>(&[], &["A"]));
    }

    #[test]
    fn test_move_to_end_is_order_change() {
        assert!(order_changed(&["A", "B", "C", "D"], &["B", "C", "D", "A"]));
    }

    #[test]
    fn test_opcodes_shape() {
        let ops = opcodes(&["a", "b", "c"], &["a", "x", "c"]);
        assert_eq!(
            ops,
            vec![
                Opcode::Equal { a: (0, 1), b: (0, 1) },
                Opcode::Replace { a: (1, 2), b: (1, 2) },
                Opcode::Equal { a: (2, 3), b: (2, 3) },
            ]
        );

        let ops = opcodes(&["a"], &["a", "b"]);
        assert_eq!(
            ops,
            vec![
                Opcode::Equal { a: (0, 1), b: (0, 1) },
                Opcode::Insert { a: (1, 1), b: (1, 2) },
            ]
        );
    }

    #[test]
    fn test_sorted_ids_by_order() {
        // Strictly increasing orders in the same relative sequence.
        let old = sorted_ids([("A", 1), ("B", 2), ("C", 3)]);
        let new = sorted_ids([("C", 30), ("A", 10), ("B", 20)]);
        assert_eq!(new, vec!["A", "B", "C"]);
        assert!(!order_changed(&old, &new));
    }
}
