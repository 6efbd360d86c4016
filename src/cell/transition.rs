// ==================================================
// FILE: cellsim-rust/src/cell/transition.rs
// ==================================================

//! Task Transition Engine
//!
//! 单次任务施加的状态转移。每次调用都是一次性转移，除电芯自身字段外不携带任何记忆。
//!
//! | 任务 | 电流 | 电压 | 容量 | 温度 |
//! |---|---|---|---|---|
//! | Charge | `+|sp_i|` | `min(max_v, sp_v + 0.2)` | `round(v * i, 2)` | `t + U(0.3, 0.9)` |
//! | Discharge | `-|sp_i|` | `max(min_v, sp_v - 0.1)` | `round(v * |i|, 2)` | `t + U(0.4, 1.1)` |
//! | Idle | `0.0` | 不变 | 不变 | `max(20.0, t - U(0.1, 0.3))` |
//! | Optimizing | `sp_i` 原样 | `sp_v` 原样 | `round(v * |i|, 2)` | `t + U(-0.5, 0.5)` |
//!
//! 未识别任务为空操作，但仍计时。

use std::time::{Duration, Instant};

use rand::Rng;

use super::{
    round2, CHARGE_TEMP_RISE, CHARGE_VOLTAGE_OFFSET, DISCHARGE_TEMP_RISE,
    DISCHARGE_VOLTAGE_OFFSET, IDLE_TEMP_DROP, IDLE_TEMP_FLOOR, OPTIMIZING_TEMP_JITTER,
};
use crate::models::{Cell, Setpoint, Task};

/// 一次转移的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub cell: Cell,
    /// 演算耗时，单调时钟测得
    pub duration: Duration,
}

#[inline]
fn draw<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (f64, f64)) -> f64 {
    rng.gen_range(lo..=hi)
}

/// 对单个电芯施加一个任务
pub fn apply_task<R: Rng + ?Sized>(
    task: &Task,
    cell: &Cell,
    setpoint: Setpoint,
    rng: &mut R,
) -> TransitionOutcome {
    let started = Instant::now();
    let mut next = cell.clone();

    match task {
        Task::Charge => {
            next.current = round2(setpoint.current.abs());
            next.voltage = round2(cell.max_voltage().min(setpoint.voltage + CHARGE_VOLTAGE_OFFSET));
            next.capacity = round2(next.voltage * next.current);
            next.temperature = cell.temperature + draw(rng, CHARGE_TEMP_RISE);
        }
        Task::Discharge => {
            next.current = -round2(setpoint.current.abs());
            next.voltage =
                round2(cell.min_voltage().max(setpoint.voltage - DISCHARGE_VOLTAGE_OFFSET));
            next.capacity = round2(next.voltage * next.current.abs());
            next.temperature = cell.temperature + draw(rng, DISCHARGE_TEMP_RISE);
        }
        Task::Idle => {
            // 容量保持上一次的值
            next.current = 0.0;
            next.temperature =
                IDLE_TEMP_FLOOR.max(round2(cell.temperature - draw(rng, IDLE_TEMP_DROP)));
        }
        Task::Optimizing => {
            // 不限幅，不强制符号
            next.current = setpoint.current;
            next.voltage = setpoint.voltage;
            next.capacity = round2(next.voltage * next.current.abs());
            next.temperature = round2(cell.temperature + draw(rng, OPTIMIZING_TEMP_JITTER));
        }
        Task::Unrecognized(label) => {
            log::debug!("unrecognized task `{}` left cell unchanged", label);
        }
    }

    TransitionOutcome { cell: next, duration: started.elapsed() }
}

// ==================== 单元测试 ====================
