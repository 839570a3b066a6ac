//! Routing of drive samples into the Critical and Retrapping buffers.
//!
//! Rows of both buffers are ordered by ascending drive value: row `r` holds the sample taken at
//! `-down[r]`. Samples taken while |drive| grows belong to the Critical branch (switching out of
//! the superconducting state), samples taken while |drive| shrinks to the Retrapping branch.
//!
//! ```text
//! segment  index            branch      row
//! Up       j                Critical    j + N/2
//! Down     j <  N/2         Retrapping  N - j - 1
//! Down     j >= N/2         Critical    N - j - 1
//! Back     j                Retrapping  j
//! ```
//!
//! The zero-drive row of the Critical buffer is visited twice per sweep (first `Up` sample and
//! the zero crossing of `Down`); the later write wins.

use serde::{Deserialize, Serialize};

/// One of the three legs of the triangular drive waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// 0 to +max
    Up,
    /// +max to -max
    Down,
    /// -max to 0
    Back,
}

impl Segment {
    /// All segments in sweep order
    pub const ALL: [Segment; 3] = [Segment::Up, Segment::Down, Segment::Back];
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Up => write!(f, "up"),
            Segment::Down => write!(f, "down"),
            Segment::Back => write!(f, "back"),
        }
    }
}

/// Accumulation buffer a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// |drive| increasing
    Critical,
    /// |drive| decreasing
    Retrapping,
}

/// Buffer coordinates of one sample within the current gate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowTarget {
    /// Destination buffer
    pub branch: Branch,
    /// Row within that buffer
    pub row: usize,
}

/// Map sample `j` of `segment` to its buffer row, for a down-sweep of `n_down` points.
pub fn classify(segment: Segment, j: usize, n_down: usize) -> RowTarget {
    let half = n_down / 2;
    match segment {
        Segment::Up => RowTarget {
            branch: Branch::Critical,
            row: j + half,
        },
        Segment::Down => {
            debug_assert!(j < n_down, "down index {j} out of range {n_down}");
            let branch = if j < half {
                Branch::Retrapping
            } else {
                Branch::Critical
            };
            RowTarget {
                branch,
                row: n_down - j - 1,
            }
        }
        Segment::Back => RowTarget {
            branch: Branch::Retrapping,
            row: j,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::waveform::build_drive_axis;

    #[test]
    fn routing_table() {
        // h = 5, N = 11
        assert_eq!(
            classify(Segment::Up, 0, 11),
            RowTarget {
                branch: Branch::Critical,
                row: 5
            }
        );
        assert_eq!(classify(Segment::Up, 5, 11).row, 10);
        assert_eq!(
            classify(Segment::Down, 0, 11),
            RowTarget {
                branch: Branch::Retrapping,
                row: 10
            }
        );
        assert_eq!(
            classify(Segment::Down, 5, 11),
            RowTarget {
                branch: Branch::Critical,
                row: 5
            }
        );
        assert_eq!(classify(Segment::Down, 10, 11).row, 0);
        assert_eq!(
            classify(Segment::Back, 5, 11),
            RowTarget {
                branch: Branch::Retrapping,
                row: 5
            }
        );
    }

    #[test]
    fn full_sweep_covers_every_row_of_both_buffers() {
        let axis = build_drive_axis(1.0, 0.1).unwrap();
        let n = axis.n_down();
        let mut critical = vec![0u32; n];
        let mut retrapping = vec![0u32; n];

        for segment in Segment::ALL {
            for j in 0..axis.segment(segment).len() {
                let target = classify(segment, j, n);
                match target.branch {
                    Branch::Critical => critical[target.row] += 1,
                    Branch::Retrapping => retrapping[target.row] += 1,
                }
            }
        }

        assert!(retrapping.iter().all(|&c| c == 1));
        assert!(critical.iter().all(|&c| c >= 1));
        // only the zero-drive row is visited twice
        assert_eq!(critical.iter().filter(|&&c| c == 2).count(), 1);
        assert_eq!(critical[axis.half()], 2);
    }

    #[test]
    fn rows_follow_ascending_drive() {
        let axis = build_drive_axis(1.0, 0.25).unwrap();
        let rows = axis.row_axis();
        for segment in Segment::ALL {
            for (j, &value) in axis.segment(segment).iter().enumerate() {
                let target = classify(segment, j, axis.n_down());
                assert!((rows[target.row] - value).abs() < 1e-12);
            }
        }
    }
}
