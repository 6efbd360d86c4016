// ==================================================
// FILE: cellsim-rust/src/run/state.rs
// ==================================================

//! 单次运行的显式状态。Start 时新建，Stop 或完成时消费为 `RunReport`。

use std::time::Instant;

use chrono::{Local, NaiveDateTime, TimeDelta};
use rand::Rng;
use serde::Serialize;

use crate::cell::{apply_task, cell_label, create_cell};
use crate::config::{CellConfig, RunConfig};
use crate::models::{Cell, Chemistry, HistorySample, Task, TaskRecord};

/// 单个电芯在一次运行中的完整轨迹
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellTrace {
    pub id: String,
    pub initial: Cell,
    /// 每步之后的电芯状态，按本电芯的任务顺序排列
    pub states: Vec<Cell>,
    pub records: Vec<TaskRecord>,
    pub history: Vec<HistorySample>,
}

impl CellTrace {
    pub(crate) fn new(id: String, initial: Cell, capacity_hint: usize) -> Self {
        Self {
            id,
            initial,
            states: Vec::with_capacity(capacity_hint),
            records: Vec::with_capacity(capacity_hint),
            history: Vec::with_capacity(capacity_hint),
        }
    }

    pub fn chemistry(&self) -> Chemistry {
        self.initial.chemistry()
    }

    /// 当前 (或最终) 状态
    pub fn current(&self) -> &Cell {
        self.states.last().unwrap_or(&self.initial)
    }

    pub(crate) fn push(&mut self, task: Task, cell: Cell, duration_secs: f64, elapsed_secs: f64) {
        self.history.push(HistorySample::capture(task.clone(), elapsed_secs, &cell));
        self.records.push(TaskRecord { task, duration_secs });
        self.states.push(cell);
    }
}

/// 单步产物，逐步推送给展示层
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    /// 全局步序号，等于 `task_index * n_cells + cell_index`
    pub step_index: usize,
    pub task_index: usize,
    pub cell_index: usize,
    pub cell_id: String,
    pub cell: Cell,
    pub record: TaskRecord,
    pub sample: HistorySample,
    /// 本地墙钟时间
    pub timestamp: NaiveDateTime,
}

/// 运行中的状态
#[derive(Debug)]
pub struct RunState {
    traces: Vec<CellTrace>,
    cell_configs: Vec<CellConfig>,
    tasks: Vec<Task>,
    cursor: usize,
    started: Instant,
    started_at: NaiveDateTime,
}

impl RunState {
    /// 按配置创建一组新电芯
    pub fn new<R: Rng + ?Sized>(config: &RunConfig, rng: &mut R) -> Self {
        let per_cell = config.tasks.len();
        let traces = config
            .cells
            .iter()
            .enumerate()
            .map(|(idx, cfg)| {
                let cell =
                    create_cell(cfg.chemistry, cfg.initial.voltage, cfg.initial.current, &mut *rng);
                CellTrace::new(cell_label(idx, cfg.chemistry), cell, per_cell)
            })
            .collect();

        Self {
            traces,
            cell_configs: config.cells.clone(),
            tasks: config.tasks.clone(),
            cursor: 0,
            started: Instant::now(),
            started_at: Local::now().naive_local(),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.tasks.len() * self.traces.len()
    }

    pub fn steps_completed(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total_steps()
    }

    pub fn traces(&self) -> &[CellTrace] {
        &self.traces
    }

    /// 下一个 (task, cell) 坐标，任务为主序、电芯为次序
    pub fn next_position(&self) -> Option<(usize, usize)> {
        if self.is_complete() {
            return None;
        }
        let n_cells = self.traces.len();
        Some((self.cursor / n_cells, self.cursor % n_cells))
    }

    /// 推进一步；运行已完成时返回 `None`
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<StepEvent> {
        let (task_index, cell_index) = self.next_position()?;
        let task = self.tasks[task_index].clone();
        let setpoint = self.cell_configs[cell_index].setpoint_for(task_index);

        let trace = &mut self.traces[cell_index];
        let outcome = apply_task(&task, trace.current(), setpoint, rng);
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let duration_secs = outcome.duration.as_secs_f64();

        trace.push(task.clone(), outcome.cell.clone(), duration_secs, elapsed_secs);
        let sample = trace.history.last().cloned()?;

        let event = StepEvent {
            step_index: self.cursor,
            task_index,
            cell_index,
            cell_id: trace.id.clone(),
            cell: outcome.cell,
            record: TaskRecord { task, duration_secs },
            sample,
            timestamp: Local::now().naive_local(),
        };
        self.cursor += 1;
        Some(event)
    }

    pub fn into_report(self, stopped: bool) -> RunReport {
        RunReport {
            total_steps: self.total_steps(),
            steps_completed: self.cursor,
            stopped,
            started_at: self.started_at,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            traces: self.traces,
        }
    }
}

/// 运行结束后的汇总产物，足以重建所有图表与表格
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub traces: Vec<CellTrace>,
    pub total_steps: usize,
    pub steps_completed: usize,
    /// 被 Stop 提前终止
    pub stopped: bool,
    pub started_at: NaiveDateTime,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub(crate) fn from_traces(
        traces: Vec<CellTrace>,
        started_at: NaiveDateTime,
        elapsed_secs: f64,
    ) -> Self {
        let steps: usize = traces.iter().map(|t| t.records.len()).sum();
        Self {
            traces,
            total_steps: steps,
            steps_completed: steps,
            stopped: false,
            started_at,
            elapsed_secs,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps_completed == self.total_steps
    }

    pub fn trace(&self, cell_id: &str) -> Option<&CellTrace> {
        self.traces.iter().find(|t| t.id == cell_id)
    }

    /// 每个电芯的最终状态
    pub fn final_cells(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.traces.iter().map(|t| (t.id.as_str(), t.current()))
    }

    /// 每个电芯的任务记录
    pub fn records(&self) -> impl Iterator<Item = (&str, &[TaskRecord])> {
        self.traces.iter().map(|t| (t.id.as_str(), t.records.as_slice()))
    }

    /// 每个电芯的历史采样
    pub fn history(&self) -> impl Iterator<Item = (&str, &[HistorySample])> {
        self.traces.iter().map(|t| (t.id.as_str(), t.history.as_slice()))
    }

    /// 历史采样对应的墙钟时间
    pub fn wall_time_of(&self, sample: &HistorySample) -> NaiveDateTime {
        let millis = (sample.elapsed_secs * 1000.0) as i64;
        self.started_at + TimeDelta::milliseconds(millis)
    }
}
