//! Run-scoped accumulation buffers.
//!
//! Everything the controller fills during a run lives in one `RunContext`, owned exclusively by
//! the controller. The plot surface receives copies; the exporter reads the context after the run.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sweep::classifier::Branch;
use crate::sweep::critical::CriticalCurrents;
use crate::sweep::resistance::ResistanceTracker;

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// `rows x cols` zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Row count
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column count
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// Store a value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// Copy of one column
    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    /// Overwrite one column
    pub fn set_column(&mut self, col: usize, values: &[f64]) {
        for (r, value) in values.iter().enumerate().take(self.rows) {
            self.set(r, col, *value);
        }
    }

    /// One row
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Rows as nested vectors, each element multiplied by `factor`
    pub fn to_rows(&self, factor: f64) -> Vec<Vec<f64>> {
        (0..self.rows)
            .map(|r| self.row(r).iter().map(|v| v * factor).collect())
            .collect()
    }
}

/// Measured response of one branch plus a write counter per cell.
#[derive(Debug, Clone)]
pub struct BranchBuffer {
    values: Matrix,
    writes: Vec<u32>,
}

impl BranchBuffer {
    /// Empty buffer of `rows` drive values by `cols` gate values
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            values: Matrix::zeros(rows, cols),
            writes: vec![0; rows * cols],
        }
    }

    /// Store a sample; a later write to the same cell replaces the earlier one.
    pub fn write(&mut self, row: usize, col: usize, value: f64) {
        self.values.set(row, col, value);
        self.writes[row * self.values.cols() + col] += 1;
    }

    /// How often a cell has been written
    pub fn write_count(&self, row: usize, col: usize) -> u32 {
        self.writes[row * self.values.cols() + col]
    }

    /// Whether every row of `col` has been written at least once
    pub fn column_complete(&self, col: usize) -> bool {
        (0..self.values.rows()).all(|r| self.write_count(r, col) > 0)
    }

    /// Whether every cell has been written at least once
    pub fn fully_written(&self) -> bool {
        self.writes.iter().all(|&w| w > 0)
    }

    /// Measured values
    pub fn values(&self) -> &Matrix {
        &self.values
    }
}

/// Every visited point of the run, in acquisition order.
#[derive(Debug, Clone, Default)]
pub struct RunningAccumulators {
    /// Drive current, display units
    pub current: Vec<f64>,
    /// Measured voltage, display units
    pub voltage: Vec<f64>,
    /// Gate value the point was taken at
    pub gate: Vec<f64>,
}

impl RunningAccumulators {
    /// Append one point
    pub fn push(&mut self, current: f64, voltage: f64, gate: f64) {
        self.current.push(current);
        self.voltage.push(voltage);
        self.gate.push(gate);
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Whether nothing was acquired
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// State of one run, owned by the controller.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Critical-branch voltages, display units
    pub critical: BranchBuffer,
    /// Retrapping-branch voltages, display units
    pub retrapping: BranchBuffer,
    /// Gradient of the Critical branch, ohms
    pub critical_resistance: Matrix,
    /// Gradient of the Retrapping branch, ohms
    pub retrapping_resistance: Matrix,
    /// Switching currents per completed gate step, display current units
    pub critical_currents: Vec<CriticalCurrents>,
    /// Windowed resistance per completed gate step, ohms
    pub resistance_summary: Vec<f64>,
    /// Every visited point
    pub accumulators: RunningAccumulators,
    /// Hold-last state of the windowed fit
    pub tracker: ResistanceTracker,
}

impl RunContext {
    /// Fresh context for `rows` drive values by `cols` gate values
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            critical: BranchBuffer::new(rows, cols),
            retrapping: BranchBuffer::new(rows, cols),
            critical_resistance: Matrix::zeros(rows, cols),
            retrapping_resistance: Matrix::zeros(rows, cols),
            critical_currents: Vec::with_capacity(cols),
            resistance_summary: Vec::with_capacity(cols),
            accumulators: RunningAccumulators::default(),
            tracker: ResistanceTracker::new(),
        }
    }

    /// Buffer of a branch
    pub fn branch(&self, branch: Branch) -> &BranchBuffer {
        match branch {
            Branch::Critical => &self.critical,
            Branch::Retrapping => &self.retrapping,
        }
    }

    /// Mutable buffer of a branch
    pub fn branch_mut(&mut self, branch: Branch) -> &mut BranchBuffer {
        match branch {
            Branch::Critical => &mut self.critical,
            Branch::Retrapping => &mut self.retrapping,
        }
    }

    /// Number of gate steps analyzed so far
    pub fn completed_steps(&self) -> usize {
        self.resistance_summary.len()
    }

    /// The critical-current table as two rows (positive, negative) over completed steps
    pub fn critical_current_table(&self) -> [Vec<f64>; 2] {
        [
            self.critical_currents.iter().map(|c| c.positive).collect(),
            self.critical_currents.iter().map(|c| c.negative).collect(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_columns() {
        let mut m = Matrix::zeros(3, 2);
        m.set_column(1, &[1.0, 2.0, 3.0]);
        assert_eq!(m.column(1), vec![1.0, 2.0, 3.0]);
        assert_eq!(m.column(0), vec![0.0; 3]);
        assert_eq!(m.row(2), &[0.0, 3.0]);
        assert_eq!(m.to_rows(2.0)[1], vec![0.0, 4.0]);
    }

    #[test]
    fn branch_buffer_counts_writes() {
        let mut buffer = BranchBuffer::new(2, 1);
        buffer.write(0, 0, 1.0);
        assert!(!buffer.column_complete(0));
        buffer.write(1, 0, 2.0);
        buffer.write(1, 0, 3.0);
        assert!(buffer.column_complete(0));
        assert!(buffer.fully_written());
        assert_eq!(buffer.write_count(1, 0), 2);
        assert_eq!(buffer.values().get(1, 0), 3.0);
    }

    #[test]
    fn context_routes_branches() {
        let mut ctx = RunContext::new(3, 2);
        ctx.branch_mut(Branch::Retrapping).write(2, 1, 5.0);
        assert_eq!(ctx.retrapping.values().get(2, 1), 5.0);
        assert_eq!(ctx.branch(Branch::Critical).write_count(2, 1), 0);

        ctx.critical_currents.push(CriticalCurrents {
            positive: 1.0,
            negative: -2.0,
        });
        let [pos, neg] = ctx.critical_current_table();
        assert_eq!(pos, vec![1.0]);
        assert_eq!(neg, vec![-2.0]);
    }
}
