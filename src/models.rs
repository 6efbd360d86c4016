// ==================================================
// FILE: cellsim-rust/src/models.rs
// ==================================================

//! Cell Simulation - Integrated Data Models (v0.3.0)
//!
//! # 核心准则
//! 1. **Cell** 的化学体系与电压上下限在创建后不可变，只能通过注册表构造。
//! 2. **Task** 是封闭枚举加一个"未识别"载体，未识别任务在演算层为空操作。
//! 3. **CellFrame** 是 C 侧可见的扁平布局，偏移量由底部的布局测试锁定。

use std::fmt;
use std::str::FromStr;

use libc::{c_double, c_int};
use serde::{Deserialize, Serialize};

use crate::error::SimError;

// ==================== 1. 化学体系 (Chemistry) ====================

/// 电芯化学体系，决定电压上下限
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Chemistry {
    #[serde(rename = "LFP", alias = "lfp")]
    Lfp,
    #[serde(rename = "NMC", alias = "nmc")]
    Nmc,
}

impl Chemistry {
    pub const ALL: [Chemistry; 2] = [Chemistry::Lfp, Chemistry::Nmc];

    /// 固定电压表 (min, max)，单位 V
    pub const fn voltage_bounds(self) -> (f64, f64) {
        match self {
            Chemistry::Lfp => (2.8, 3.6),
            Chemistry::Nmc => (3.2, 4.0),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Chemistry::Lfp => "LFP",
            Chemistry::Nmc => "NMC",
        }
    }

    pub const fn code(self) -> c_int {
        match self {
            Chemistry::Lfp => 0,
            Chemistry::Nmc => 1,
        }
    }

    pub fn from_code(code: c_int) -> Option<Self> {
        match code {
            0 => Some(Chemistry::Lfp),
            1 => Some(Chemistry::Nmc),
            _ => None,
        }
    }
}

impl fmt::Display for Chemistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Chemistry {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LFP" => Ok(Chemistry::Lfp),
            "NMC" => Ok(Chemistry::Nmc),
            _ => Err(SimError::UnknownChemistry(s.to_string())),
        }
    }
}

// ==================== 2. 任务 (Task) ====================

/// 工况任务。`Unrecognized` 保留原始标签，演算时为空操作。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Task {
    Charge,
    Discharge,
    Idle,
    Optimizing,
    Unrecognized(String),
}

impl Task {
    pub const KNOWN: [Task; 4] = [Task::Charge, Task::Discharge, Task::Idle, Task::Optimizing];

    pub fn label(&self) -> &str {
        match self {
            Task::Charge => "Charge",
            Task::Discharge => "Discharge",
            Task::Idle => "Idle",
            Task::Optimizing => "Optimizing",
            Task::Unrecognized(label) => label,
        }
    }

    /// C 侧任务码：0=Charge, 1=Discharge, 2=Idle, 3=Optimizing，其余为未识别
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => Task::Charge,
            1 => Task::Discharge,
            2 => Task::Idle,
            3 => Task::Optimizing,
            other => Task::Unrecognized(format!("code:{other}")),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Task::Unrecognized(_))
    }
}

impl From<&str> for Task {
    fn from(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "charge" => Task::Charge,
            "discharge" => Task::Discharge,
            "idle" => Task::Idle,
            "optimizing" => Task::Optimizing,
            _ => Task::Unrecognized(label.to_string()),
        }
    }
}

impl From<String> for Task {
    fn from(label: String) -> Self {
        Task::from(label.as_str())
    }
}

impl From<Task> for String {
    fn from(task: Task) -> Self {
        task.label().to_string()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ==================== 3. 设定值与电芯状态 (State) ====================

/// 单个任务的电压/电流设定值
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Setpoint {
    pub voltage: f64,
    pub current: f64,
}

impl Setpoint {
    pub const fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }
}

/// 单体电芯状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    chemistry: Chemistry,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    pub capacity: f64,
    min_voltage: f64,
    max_voltage: f64,
}

impl Cell {
    /// 仅供注册表与 FFI 帧转换使用，上下限始终取自化学体系表
    pub(crate) fn from_parts(
        chemistry: Chemistry,
        voltage: f64,
        current: f64,
        temperature: f64,
        capacity: f64,
    ) -> Self {
        let (min_voltage, max_voltage) = chemistry.voltage_bounds();
        Self { chemistry, voltage, current, temperature, capacity, min_voltage, max_voltage }
    }

    pub fn chemistry(&self) -> Chemistry {
        self.chemistry
    }

    pub fn min_voltage(&self) -> f64 {
        self.min_voltage
    }

    pub fn max_voltage(&self) -> f64 {
        self.max_voltage
    }

    /// 有符号功率，放电时为负
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

// ==================== 4. 运行记录 (Records) ====================

/// 单次任务施加记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task: Task,
    /// 演算耗时 (秒)，仅用于观测
    pub duration_secs: f64,
}

/// 每次任务施加后追加到电芯时间序列的采样点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySample {
    pub task: Task,
    /// 自运行开始起的秒数
    pub elapsed_secs: f64,
    pub power: f64,
    #[cfg(feature = "rich-history")]
    pub voltage: f64,
    #[cfg(feature = "rich-history")]
    pub current: f64,
}

impl HistorySample {
    pub fn capture(task: Task, elapsed_secs: f64, cell: &Cell) -> Self {
        Self {
            task,
            elapsed_secs,
            power: cell.power(),
            #[cfg(feature = "rich-history")]
            voltage: cell.voltage,
            #[cfg(feature = "rich-history")]
            current: cell.current,
        }
    }
}

// ==================== 5. C ABI 帧 (Frames) ====================

/// 电芯状态的 C 侧扁平布局 (56 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CellFrame {
    pub chemistry: c_int,        // Offset 0: 0=LFP, 1=NMC
    pub _padding: c_int,         // Offset 4
    pub voltage: c_double,       // Offset 8
    pub current: c_double,       // Offset 16
    pub temperature: c_double,   // Offset 24
    pub capacity: c_double,      // Offset 32
    pub min_voltage: c_double,   // Offset 40
    pub max_voltage: c_double,   // Offset 48
}

impl From<&Cell> for CellFrame {
    fn from(cell: &Cell) -> Self {
        Self {
            chemistry: cell.chemistry.code(),
            _padding: 0,
            voltage: cell.voltage,
            current: cell.current,
            temperature: cell.temperature,
            capacity: cell.capacity,
            min_voltage: cell.min_voltage,
            max_voltage: cell.max_voltage,
        }
    }
}

impl TryFrom<&CellFrame> for Cell {
    type Error = SimError;

    fn try_from(frame: &CellFrame) -> Result<Self, Self::Error> {
        let chemistry = Chemistry::from_code(frame.chemistry)
            .ok_or_else(|| SimError::UnknownChemistry(format!("code:{}", frame.chemistry)))?;
        Ok(Cell::from_parts(
            chemistry,
            frame.voltage,
            frame.current,
            frame.temperature,
            frame.capacity,
        ))
    }
}

// ==================== 6. 静态布局一致性测试 ====================
