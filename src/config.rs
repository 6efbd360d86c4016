// ==================================================
// FILE: cellsim-rust/src/config.rs
// ==================================================

//! Run Configuration (v0.3.0)
//!
//! 展示层提供的配置面：电芯数量、每个电芯的化学体系、有序任务序列、
//! 以及每个任务每个电芯的电压/电流设定值。
//!
//! 设定值超出输入控件范围时不会被拒绝，演算层按转移规则限幅或原样透传。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::models::{Chemistry, Setpoint, Task};

// ==================== 配置面边界常量 ====================

pub const MIN_CELLS: usize = 1;
pub const MAX_CELLS: usize = 10;

/// 输入控件的电压范围 (V)
pub const VOLTAGE_INPUT_RANGE: (f64, f64) = (2.5, 4.4);
/// 输入控件的电流范围 (A)
pub const CURRENT_INPUT_RANGE: (f64, f64) = (-5.0, 5.0);

/// 默认 CSV 日志文件名
pub const DEFAULT_LOG_FILE: &str = "cell_readings.csv";

// ==================== 电芯配置 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    pub chemistry: Chemistry,
    /// 创建电芯时使用的初始设定值
    #[serde(default = "default_setpoint")]
    pub initial: Setpoint,
    /// 按任务下标排列的设定值；缺失的下标回落到 `initial`
    #[serde(default)]
    pub setpoints: Vec<Setpoint>,
}

fn default_setpoint() -> Setpoint {
    Setpoint::new(3.3, 1.0)
}

impl Default for CellConfig {
    fn default() -> Self {
        Self { chemistry: Chemistry::Lfp, initial: default_setpoint(), setpoints: Vec::new() }
    }
}

impl CellConfig {
    pub fn new(chemistry: Chemistry, initial: Setpoint) -> Self {
        Self { chemistry, initial, setpoints: Vec::new() }
    }

    pub fn with_setpoints(mut self, setpoints: Vec<Setpoint>) -> Self {
        self.setpoints = setpoints;
        self
    }

    pub fn setpoint_for(&self, task_index: usize) -> Setpoint {
        self.setpoints.get(task_index).copied().unwrap_or(self.initial)
    }
}

// ==================== 运行配置 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub cells: Vec<CellConfig>,
    /// 有序任务序列，允许重复与空序列
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// 随机源种子；为空时从系统熵播种
    #[serde(default)]
    pub seed: Option<u64>,
    /// 每步之后的节拍延迟 (毫秒)，仅用于实时展示
    #[serde(default)]
    pub step_delay_ms: u64,
    /// CSV 日志路径；为空时不落盘
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cells: vec![
                CellConfig::new(Chemistry::Lfp, default_setpoint()),
                CellConfig::new(Chemistry::Nmc, Setpoint::new(3.6, -1.0)),
            ],
            tasks: Task::KNOWN.to_vec(),
            seed: None,
            step_delay_ms: 0,
            log_path: None,
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: RunConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// 唯一的硬约束是电芯数量
    pub fn validate(&self) -> Result<()> {
        let n = self.cells.len();
        if !(MIN_CELLS..=MAX_CELLS).contains(&n) {
            return Err(SimError::InvalidConfig(format!(
                "cell count {n} outside {MIN_CELLS}..={MAX_CELLS}"
            )));
        }
        Ok(())
    }

    pub fn total_steps(&self) -> usize {
        self.tasks.len() * self.cells.len()
    }

    /// 模拟输入控件的限幅行为。演算核心不调用此方法。
    pub fn clamp_to_input_ranges(&mut self) {
        let clamp = |sp: &mut Setpoint| {
            sp.voltage = sp.voltage.clamp(VOLTAGE_INPUT_RANGE.0, VOLTAGE_INPUT_RANGE.1);
            sp.current = sp.current.clamp(CURRENT_INPUT_RANGE.0, CURRENT_INPUT_RANGE.1);
        };
        for cell in &mut self.cells {
            clamp(&mut cell.initial);
            cell.setpoints.iter_mut().for_each(clamp);
        }
    }
}
