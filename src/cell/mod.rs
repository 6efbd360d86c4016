// ==================================================
// FILE: cellsim-rust/src/cell/mod.rs
// ==================================================

pub mod registry;
pub mod transition;

// 重新导出数据模型
pub use crate::models::{Cell, Chemistry, Setpoint, Task};

// 重新导出核心演算函数
pub use registry::{cell_label, create_cell};

pub use transition::{apply_task, TransitionOutcome};

// -----------------------------------------------------------------------------
// 演算常量
// -----------------------------------------------------------------------------

/// 初始温度均匀分布区间 (°C)
pub const INITIAL_TEMP_RANGE: (f64, f64) = (25.0, 40.0);

/// 充电电压相对设定值的抬升量 (V)
pub const CHARGE_VOLTAGE_OFFSET: f64 = 0.2;
/// 放电电压相对设定值的下压量 (V)
pub const DISCHARGE_VOLTAGE_OFFSET: f64 = 0.1;

/// 各任务的温度扰动区间 (°C)
pub const CHARGE_TEMP_RISE: (f64, f64) = (0.3, 0.9);
pub const DISCHARGE_TEMP_RISE: (f64, f64) = (0.4, 1.1);
pub const IDLE_TEMP_DROP: (f64, f64) = (0.1, 0.3);
pub const OPTIMIZING_TEMP_JITTER: (f64, f64) = (-0.5, 0.5);

/// 静置降温的硬底线 (°C)，无对应上限
pub const IDLE_TEMP_FLOOR: f64 = 20.0;

/// 四舍五入到 `dp` 位小数
#[inline]
pub fn round_dp(value: f64, dp: i32) -> f64 {
    let scale = 10f64.powi(dp);
    (value * scale).round() / scale
}

#[inline]
pub(crate) fn round2(value: f64) -> f64 {
    round_dp(value, 2)
}
