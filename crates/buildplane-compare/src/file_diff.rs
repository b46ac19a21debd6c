//! Line diff with identity-key folding.
//!
//! Lines are diffed with the linear-space form of Myers' O(ND) algorithm.
//! Deleted and inserted lines that share their leading tab-separated column
//! are then paired up and reported as changed rows, so an edited or moved
//! component shows up once instead of as a delete plus an insert.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use crate::report::ChangedRow;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineDiff {
    pub inserted: Vec<String>,
    pub deleted: Vec<String>,
    pub changed: Vec<ChangedRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal,
    Delete(usize),
    Insert(usize),
}

/// Diff `left` against `right` line by line.
pub fn diff_lines(left: &str, right: &str) -> LineDiff {
    let a: Vec<&str> = left.lines().collect();
    let b: Vec<&str> = right.lines().collect();

    let mut deleted: Vec<&str> = Vec::new();
    let mut inserted: Vec<&str> = Vec::new();
    for edit in myers(&a, &b) {
        match edit {
            Edit::Equal => {}
            Edit::Delete(i) => deleted.push(a[i]),
            Edit::Insert(j) => inserted.push(b[j]),
        }
    }
    fold_by_key(&deleted, &inserted)
}

/// Leading tab-separated column of a row.
fn row_key(row: &str) -> &str {
    row.split('\t').next().unwrap_or(row)
}

fn fold_by_key(deleted: &[&str], inserted: &[&str]) -> LineDiff {
    let mut by_key: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (idx, row) in inserted.iter().enumerate() {
        by_key.entry(row_key(row)).or_default().push_back(idx);
    }

    let mut paired = vec![false; inserted.len()];
    let mut diff = LineDiff::default();
    for row in deleted {
        match by_key.get_mut(row_key(row)).and_then(VecDeque::pop_front) {
            Some(idx) => {
                paired[idx] = true;
                diff.changed.push(ChangedRow {
                    left: row.to_string(),
                    right: inserted[idx].to_string(),
                });
            }
            None => diff.deleted.push(row.to_string()),
        }
    }
    diff.inserted = inserted
        .iter()
        .zip(&paired)
        .filter(|(_, paired)| !**paired)
        .map(|(row, _)| row.to_string())
        .collect();
    diff
}

/// Shortest edit script from `a` to `b`.
///
/// Linear-space variant: each step bisects the problem at the middle snake,
/// so memory stays proportional to `a.len() + b.len()` whatever the edit
/// distance.
fn myers(a: &[&str], b: &[&str]) -> Vec<Edit> {
    let max_d = (a.len() + b.len() + 1) / 2 + 1;
    let mut vf = Frontier::new(max_d);
    let mut vb = Frontier::new(max_d);
    let mut edits = Vec::with_capacity(a.len().max(b.len()));
    conquer(a, 0..a.len(), b, 0..b.len(), &mut vf, &mut vb, &mut edits);
    edits
}

/// Furthest-reaching x per diagonal, indexed by signed diagonal `k`.
struct Frontier {
    offset: isize,
    v: Vec<usize>,
}

impl Frontier {
    fn new(max_d: usize) -> Self {
        Self {
            offset: max_d as isize,
            v: vec![0; 2 * max_d + 1],
        }
    }
}

impl std::ops::Index<isize> for Frontier {
    type Output = usize;

    fn index(&self, k: isize) -> &usize {
        &self.v[(k + self.offset) as usize]
    }
}

impl std::ops::IndexMut<isize> for Frontier {
    fn index_mut(&mut self, k: isize) -> &mut usize {
        &mut self.v[(k + self.offset) as usize]
    }
}

fn conquer(
    a: &[&str],
    mut a_range: Range<usize>,
    b: &[&str],
    mut b_range: Range<usize>,
    vf: &mut Frontier,
    vb: &mut Frontier,
    edits: &mut Vec<Edit>,
) {
    let prefix = common_prefix(a, a_range.clone(), b, b_range.clone());
    edits.extend(std::iter::repeat_n(Edit::Equal, prefix));
    a_range.start += prefix;
    b_range.start += prefix;

    let suffix = common_suffix(a, a_range.clone(), b, b_range.clone());
    a_range.end -= suffix;
    b_range.end -= suffix;

    if a_range.is_empty() {
        edits.extend(b_range.map(Edit::Insert));
    } else if b_range.is_empty() {
        edits.extend(a_range.map(Edit::Delete));
    } else if let Some((x, y)) = middle_snake(a, a_range.clone(), b, b_range.clone(), vf, vb) {
        conquer(a, a_range.start..x, b, b_range.start..y, vf, vb, edits);
        conquer(a, x..a_range.end, b, y..b_range.end, vf, vb, edits);
    } else {
        edits.extend(a_range.map(Edit::Delete));
        edits.extend(b_range.map(Edit::Insert));
    }

    edits.extend(std::iter::repeat_n(Edit::Equal, suffix));
}

fn common_prefix(a: &[&str], a_range: Range<usize>, b: &[&str], b_range: Range<usize>) -> usize {
    a[a_range]
        .iter()
        .zip(&b[b_range])
        .take_while(|(x, y)| x == y)
        .count()
}

fn common_suffix(a: &[&str], a_range: Range<usize>, b: &[&str], b_range: Range<usize>) -> usize {
    a[a_range]
        .iter()
        .rev()
        .zip(b[b_range].iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Split point (absolute indices) where a forward and a reverse search
/// for the shortest edit path first overlap.
fn middle_snake(
    a: &[&str],
    a_range: Range<usize>,
    b: &[&str],
    b_range: Range<usize>,
    vf: &mut Frontier,
    vb: &mut Frontier,
) -> Option<(usize, usize)> {
    let n = a_range.len();
    let m = b_range.len();
    let delta = n as isize - m as isize;
    let odd = delta & 1 == 1;
    vf[1] = 0;
    vb[1] = 0;

    let d_max = (n + m + 1) / 2 + 1;
    for d in 0..d_max as isize {
        let mut k = d;
        while k >= -d {
            let mut x = if k == -d || (k != d && vf[k - 1] < vf[k + 1]) {
                vf[k + 1]
            } else {
                vf[k - 1] + 1
            };
            let y = (x as isize - k) as usize;
            let (x0, y0) = (x, y);
            if x < n && y < m {
                x += common_prefix(
                    a,
                    a_range.start + x..a_range.end,
                    b,
                    b_range.start + y..b_range.end,
                );
            }
            vf[k] = x;
            if odd && (k - delta).abs() <= d - 1 && vf[k] + vb[delta - k] >= n {
                return Some((a_range.start + x0, b_range.start + y0));
            }
            k -= 2;
        }

        let mut k = d;
        while k >= -d {
            let mut x = if k == -d || (k != d && vb[k - 1] < vb[k + 1]) {
                vb[k + 1]
            } else {
                vb[k - 1] + 1
            };
            let mut y = (x as isize - k) as usize;
            if x < n && y < m {
                let advance = common_suffix(
                    a,
                    a_range.start..a_range.start + n - x,
                    b,
                    b_range.start..b_range.start + m - y,
                );
                x += advance;
                y += advance;
            }
            vb[k] = x;
            if !odd && (k - delta).abs() <= d && vb[k] + vf[delta - k] >= n {
                return Some((a_range.start + n - x, b_range.start + m - y));
            }
            k -= 2;
        }
    }
    None
}
