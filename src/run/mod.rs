// ==================================================
// FILE: cellsim-rust/src/run/mod.rs
// ==================================================

pub mod driver;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod state;
pub mod summary;

pub use driver::{Command, NullObserver, RunDriver, StepObserver};
pub use state::{CellTrace, RunReport, RunState, StepEvent};
pub use summary::{
    chemistry_distribution, column_maxima, mean_duration_by_task, overview, power_series,
    timing_rows, total_duration_secs, CellOverview, ColumnMax, PowerPoint, TimingRow,
};
