// ==================================================
// FILE: cellsim-rust/src/run/summary.rs
// ==================================================

//! Run Summary Aggregation
//!
//! 运行结束后展示层所需的全部汇总：电芯总览表、化学体系分布、各列最大值、
//! 逐任务耗时表与单电芯功率曲线。

use std::collections::BTreeMap;

use serde::Serialize;

use super::state::RunReport;
use crate::models::{Chemistry, Task};

/// 电芯总览表的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellOverview {
    pub id: String,
    pub chemistry: Chemistry,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub temperature: f64,
    pub capacity: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
}

/// 某一数值列的最大值及其所在电芯
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMax {
    pub column: &'static str,
    pub cell_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRow {
    pub cell_id: String,
    pub task: Task,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerPoint<'a> {
    pub elapsed_secs: f64,
    pub power: f64,
    pub task: &'a Task,
}

pub fn overview(report: &RunReport) -> Vec<CellOverview> {
    report
        .final_cells()
        .map(|(id, cell)| CellOverview {
            id: id.to_string(),
            chemistry: cell.chemistry(),
            voltage: cell.voltage,
            current: cell.current,
            power: cell.power(),
            temperature: cell.temperature,
            capacity: cell.capacity,
            min_voltage: cell.min_voltage(),
            max_voltage: cell.max_voltage(),
        })
        .collect()
}

pub fn chemistry_distribution(report: &RunReport) -> BTreeMap<Chemistry, usize> {
    let mut counts = BTreeMap::new();
    for trace in &report.traces {
        *counts.entry(trace.chemistry()).or_insert(0) += 1;
    }
    counts
}

const OVERVIEW_COLUMNS: [(&str, fn(&CellOverview) -> f64); 7] = [
    ("Voltage", |r| r.voltage),
    ("Current", |r| r.current),
    ("Power", |r| r.power),
    ("Temperature", |r| r.temperature),
    ("Capacity", |r| r.capacity),
    ("Min Voltage", |r| r.min_voltage),
    ("Max Voltage", |r| r.max_voltage),
];

/// 各数值列的最大值。并列时取靠前的电芯。
pub fn column_maxima(rows: &[CellOverview]) -> Vec<ColumnMax> {
    OVERVIEW_COLUMNS
        .iter()
        .filter_map(|&(column, get)| {
            let mut best: Option<&CellOverview> = None;
            for row in rows {
                match best {
                    Some(b) if get(row) <= get(b) => {}
                    _ => best = Some(row),
                }
            }
            best.map(|row| ColumnMax { column, cell_id: row.id.clone(), value: get(row) })
        })
        .collect()
}

pub fn timing_rows(report: &RunReport) -> Vec<TimingRow> {
    report
        .records()
        .flat_map(|(id, records)| {
            records.iter().map(move |r| TimingRow {
                cell_id: id.to_string(),
                task: r.task.clone(),
                duration_secs: r.duration_secs,
            })
        })
        .collect()
}

pub fn power_series<'a>(report: &'a RunReport, cell_id: &str) -> Option<Vec<PowerPoint<'a>>> {
    let trace = report.trace(cell_id)?;
    Some(
        trace
            .history
            .iter()
            .map(|s| PowerPoint { elapsed_secs: s.elapsed_secs, power: s.power, task: &s.task })
            .collect(),
    )
}

pub fn total_duration_secs(report: &RunReport) -> f64 {
    report.records().flat_map(|(_, r)| r.iter()).map(|r| r.duration_secs).sum()
}

/// 按任务首次出现的顺序给出平均演算耗时
pub fn mean_duration_by_task(report: &RunReport) -> Vec<(Task, f64)> {
    let mut acc: Vec<(Task, f64, usize)> = Vec::new();
    for record in report.records().flat_map(|(_, r)| r.iter()) {
        match acc.iter_mut().find(|(task, _, _)| *task == record.task) {
            Some((_, sum, n)) => {
                *sum += record.duration_secs;
                *n += 1;
            }
            None => acc.push((record.task.clone(), record.duration_secs, 1)),
        }
    }
    acc.into_iter().map(|(task, sum, n)| (task, sum / n as f64)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CellConfig, RunConfig};
    use crate::models::Setpoint;
    use crate::run::{NullObserver, RunDriver};

    fn report() -> RunReport {
        let config = RunConfig {
            cells: vec![
                CellConfig::new(Chemistry::Lfp, Setpoint::new(3.3, 1.0)),
                CellConfig::new(Chemistry::Nmc, Setpoint::new(3.8, 2.0)),
                CellConfig::new(Chemistry::Lfp, Setpoint::new(3.0, 0.5)),
            ],
            tasks: vec![Task::Charge, Task::Idle, Task::Charge],
            seed: Some(19),
            ..Default::default()
        };
        RunDriver::from_config(config).unwrap().execute(&mut NullObserver)
    }

    #[test]
    fn test_overview_rows_follow_final_state() {
        let report = report();
        let rows = overview(&report);
        assert_eq!(rows.len(), 3);
        let nmc = &rows[1];
        assert_eq!(nmc.id, "Cell_2_NMC");
        // NMC: min(4.0, 3.8 + 0.2) = 4.0, 电流 2.0
        assert_eq!(nmc.voltage, 4.0);
        assert_eq!(nmc.power, 8.0);
        assert_eq!((nmc.min_voltage, nmc.max_voltage), (3.2, 4.0));
    }

    #[test]
    fn test_distribution_and_maxima() {
        let report = report();
        let dist = chemistry_distribution(&report);
        assert_eq!(dist[&Chemistry::Lfp], 2);
        assert_eq!(dist[&Chemistry::Nmc], 1);

        let maxima = column_maxima(&overview(&report));
        let power = maxima.iter().find(|m| m.column == "Power").unwrap();
        assert_eq!(power.cell_id, "Cell_2_NMC");
        let max_v = maxima.iter().find(|m| m.column == "Max Voltage").unwrap();
        assert_eq!(max_v.value, 4.0);
        assert!(column_maxima(&[]).is_empty());
    }

    #[test]
    fn test_timing_and_power_series() {
        let report = report();
        let timings = timing_rows(&report);
        assert_eq!(timings.len(), 9);
        assert_eq!(timings[0].cell_id, "Cell_1_LFP");
        assert_eq!(timings[3].cell_id, "Cell_2_NMC");
        assert!(total_duration_secs(&report) >= 0.0);

        let means = mean_duration_by_task(&report);
        let tasks: Vec<_> = means.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(tasks, vec![Task::Charge, Task::Idle]);

        let series = power_series(&report, "Cell_1_LFP").unwrap();
        assert_eq!(series.len(), 3);
        // 静置时电流为 0，功率为 0
        assert_eq!(series[1].power, 0.0);
        assert_eq!(*series[1].task, Task::Idle);
        assert!(power_series(&report, "Cell_9_LFP").is_none());
    }
}
