// ==================================================
// FILE: cellsim-rust/src/run/parallel.rs
// ==================================================

//! 电芯级并行演算
//!
//! 电芯之间没有共享可变状态：每个 rayon 任务独占一个电芯的轨迹与随机源。

use std::time::Instant;

use chrono::Local;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::state::{CellTrace, RunReport};
use crate::cell::{apply_task, cell_label, create_cell};
use crate::config::RunConfig;

/// 对每个电芯独立跑完整个任务序列
///
/// 每个配置的电芯从 `rng` 取一个种子，保证报告中轨迹数与电芯数一致。
pub(crate) fn execute_cells<R: Rng + ?Sized>(config: &RunConfig, rng: &mut R) -> RunReport {
    let seeds: Vec<u64> = config.cells.iter().map(|_| rng.gen()).collect();
    let started = Instant::now();
    let started_at = Local::now().naive_local();

    let traces: Vec<CellTrace> = config
        .cells
        .par_iter()
        .zip(seeds.par_iter())
        .enumerate()
        .map(|(idx, (cfg, &seed))| {
            let mut rng = StdRng::seed_from_u64(seed);
            let initial =
                create_cell(cfg.chemistry, cfg.initial.voltage, cfg.initial.current, &mut rng);
            let mut trace =
                CellTrace::new(cell_label(idx, cfg.chemistry), initial, config.tasks.len());

            for (task_index, task) in config.tasks.iter().enumerate() {
                let outcome =
                    apply_task(task, trace.current(), cfg.setpoint_for(task_index), &mut rng);
                let elapsed = started.elapsed().as_secs_f64();
                trace.push(task.clone(), outcome.cell, outcome.duration.as_secs_f64(), elapsed);
            }
            trace
        })
        .collect();

    let report = RunReport::from_traces(traces, started_at, started.elapsed().as_secs_f64());
    log::info!(
        "parallel run completed: {} cells, {} steps in {:.3}s",
        report.traces.len(),
        report.steps_completed,
        report.elapsed_secs
    );
    report
}
