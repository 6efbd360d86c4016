// ==================================================
// FILE: cellsim-rust/src/cell/registry.rs
// ==================================================

//! Cell Registry
//!
//! 根据化学体系与初始设定值构造电芯。不做任何输入校验：
//! 展示层的输入控件负责限幅，注册表对任意实数都成功返回。

use rand::Rng;

use super::{round2, INITIAL_TEMP_RANGE};
use crate::models::{Cell, Chemistry};

/// 构造一个新电芯
///
/// 温度从 `INITIAL_TEMP_RANGE` 均匀采样，容量为 `round(v * |i|, 2)`。
pub fn create_cell<R: Rng + ?Sized>(
    chemistry: Chemistry,
    initial_voltage: f64,
    initial_current: f64,
    rng: &mut R,
) -> Cell {
    let (lo, hi) = INITIAL_TEMP_RANGE;
    let temperature = rng.gen_range(lo..=hi);
    let capacity = round2(initial_voltage * initial_current.abs());

    Cell::from_parts(chemistry, initial_voltage, initial_current, temperature, capacity)
}

/// 展示层使用的电芯标识，例如 `Cell_1_LFP`
pub fn cell_label(index: usize, chemistry: Chemistry) -> String {
    format!("Cell_{}_{}", index + 1, chemistry.label())
}
