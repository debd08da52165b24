// Interval inversion tables.
//
// A palette declares one "root inversion": the interval sequence (in
// semitones, bottom to top) used to stack a chord of maximal density. The
// table built here holds every inversion a slot can select by index. Each row
// is a permutation of the root intervals.
//
// Rows are generated by sweeping a probe along the interval positions. For a
// root of n-1 intervals (density n) there are 2*(n-2) probes at
// 0.25, 0.75, 1.25, ... and each probe yields the intervals ordered by their
// distance from it. Intervals near the probe end up at the bottom of the
// chord, so successive rows move the narrow/wide spacing up through the chord.
//
// The table is built once per palette (slot group) and never mutated. Used by
// chord.rs and pipeline.rs.

use crate::error::ResolveError;

/// All inversions derived from a root interval sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InversionTable {
    rows: Vec<Vec<u8>>,
}

impl InversionTable {
    /// Build the table for a root interval sequence.
    ///
    /// Density is `root.len() + 1`: an empty root gives an empty table, a
    /// single interval gives a one-row table identical to the root, and
    /// longer roots give `2 * (density - 2)` rows.
    pub fn new(root: &[u8]) -> Self {
        let density = root.len() + 1;
        let rows = match density {
            0 | 1 => Vec::new(),
            2 => vec![root.to_vec()],
            _ => {
                let probes = 2 * (density - 2);
                (0..probes).map(|k| probe_row(root, k)).collect()
            }
        };
        InversionTable { rows }
    }

    /// Number of inversion rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Select an inversion row by index.
    pub fn row(&self, index: usize) -> Result<&[u8], ResolveError> {
        self.rows
            .get(index)
            .map(Vec::as_slice)
            .ok_or(ResolveError::InversionOutOfRange {
                index,
                rows: self.rows.len(),
            })
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.rows.iter().map(Vec::as_slice)
    }
}

/// One row: the root intervals ordered by distance from probe `k`.
///
/// Positions and probes are measured in quarter units (probe `0.25 + 0.5k`
/// becomes `1 + 2k`, position `p` becomes `4p`) so the comparison stays in
/// integers. `sort_by_key` is stable, which keeps the
/// original order for equal distances.
fn probe_row(root: &[u8], k: usize) -> Vec<u8> {
    let probe = 1 + 2 * k as i64;
    let mut order: Vec<usize> = (0..root.len()).collect();
    order.sort_by_key(|&p| (4 * p as i64 - probe).abs());
    order.into_iter().map(|p| root[p]).collect()
}
