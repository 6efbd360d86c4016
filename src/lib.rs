// ==================================================
// FILE: cellsim-rust/src/lib.rs
// ==================================================

use libc::{c_char, c_double, c_int, c_longlong};
use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;

// -----------------------------------------------------------------------------
// 模块声明
// -----------------------------------------------------------------------------
pub mod cell;
pub mod config;
pub mod error;
pub mod models;
pub mod run;
pub mod storage;

pub use crate::config::{CellConfig, RunConfig};
pub use crate::error::{Result, SimError};
pub use crate::models::*;
pub use crate::run::{Command, RunDriver, RunReport, StepEvent, StepObserver};

// -----------------------------------------------------------------------------
// 0. 状态码协议
// -----------------------------------------------------------------------------

#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimStatus {
    Ok = 0,
    NullPointer = 1,
    InvalidValue = 3,
    IoError = 20,
    WriterClosed = 21,
    InternalError = 100,
    Panic = 101,
}

impl From<&SimError> for SimStatus {
    fn from(err: &SimError) -> Self {
        match err {
            SimError::UnknownChemistry(_)
            | SimError::InvalidConfig(_)
            | SimError::MalformedRow { .. } => SimStatus::InvalidValue,
            SimError::WriterClosed => SimStatus::WriterClosed,
            SimError::Io(_) => SimStatus::IoError,
            SimError::Json(_) => SimStatus::InternalError,
        }
    }
}

// -----------------------------------------------------------------------------
// 全局状态
// -----------------------------------------------------------------------------

/// C 侧调用共享的随机源；未播种时从系统熵初始化
static FFI_RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn ffi_rng() -> MutexGuard<'static, StdRng> {
    FFI_RNG
        .get_or_init(|| Mutex::new(StdRng::from_entropy()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// -----------------------------------------------------------------------------
// FFI 安全屏障
// -----------------------------------------------------------------------------

macro_rules! ffi_guard {
    ($body:expr) => {{
        let result = panic::catch_unwind(AssertUnwindSafe($body));
        match result {
            Ok(status) => status as c_int,
            Err(e) => {
                let msg = if let Some(s) = e.downcast_ref::<&str>() {
                    *s
                } else if let Some(s) = e.downcast_ref::<String>() {
                    s.as_str()
                } else {
                    "Unknown panic"
                };
                log::error!("[cellsim-native] panic intercepted: {}", msg);
                SimStatus::Panic as c_int
            }
        }
    }};
}

fn report_error(context: &str, err: &SimError) -> SimStatus {
    log::error!("{}: {}", context, err);
    SimStatus::from(err)
}

/// `ts_secs <= 0` 表示使用当前本地时间
fn local_timestamp(ts_secs: c_longlong) -> Option<chrono::NaiveDateTime> {
    if ts_secs <= 0 {
        return Some(Local::now().naive_local());
    }
    DateTime::from_timestamp(ts_secs, 0).map(|utc| utc.with_timezone(&Local).naive_local())
}

// -----------------------------------------------------------------------------
// 1. 系统基础与并发控制
// -----------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn cellsim_abi_version() -> c_int {
    0x0003_0000
}

#[no_mangle]
pub extern "C" fn cellsim_version() -> *const c_char {
    static VERSION: &[u8] = b"CellSim Native Core v0.3.0\0";
    VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn cellsim_init_threading(num_threads: c_int) -> c_int {
    if num_threads < 0 {
        return SimStatus::InvalidValue as c_int;
    }
    let config = rayon::ThreadPoolBuilder::new().num_threads(num_threads as usize);
    match config.build_global() {
        Ok(_) => SimStatus::Ok as c_int,
        Err(e) => {
            log::warn!("rayon global pool already initialised: {}", e);
            SimStatus::InternalError as c_int
        }
    }
}

#[no_mangle]
pub extern "C" fn cellsim_seed_rng(seed: u64) -> c_int {
    ffi_guard!(|| {
        *ffi_rng() = StdRng::seed_from_u64(seed);
        SimStatus::Ok
    })
}

// -----------------------------------------------------------------------------
// 2. 电芯注册与任务演算
// -----------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn cellsim_create_cell(
    chemistry: c_int,
    voltage: c_double,
    current: c_double,
    out_cell: *mut CellFrame,
) -> c_int {
    ffi_guard!(|| {
        if out_cell.is_null() {
            return SimStatus::NullPointer;
        }
        let Some(chem) = Chemistry::from_code(chemistry) else {
            return SimStatus::InvalidValue;
        };
        let created = cell::create_cell(chem, voltage, current, &mut *ffi_rng());
        ptr::write(out_cell, CellFrame::from(&created));
        SimStatus::Ok
    })
}

/// 对 `cell_in` 施加一次任务，结果写入 `out_cell` (可与输入为同一地址)
#[no_mangle]
pub unsafe extern "C" fn cellsim_apply_task(
    cell_in: *const CellFrame,
    task_code: c_int,
    setpoint_voltage: c_double,
    setpoint_current: c_double,
    out_cell: *mut CellFrame,
    out_duration_secs: *mut c_double,
) -> c_int {
    ffi_guard!(|| {
        if cell_in.is_null() || out_cell.is_null() || out_duration_secs.is_null() {
            return SimStatus::NullPointer;
        }
        let input = match Cell::try_from(&*cell_in) {
            Ok(c) => c,
            Err(e) => return report_error("cellsim_apply_task", &e),
        };
        let task = Task::from_code(task_code);
        let setpoint = Setpoint::new(setpoint_voltage, setpoint_current);
        let outcome = cell::apply_task(&task, &input, setpoint, &mut *ffi_rng());

        ptr::write(out_cell, CellFrame::from(&outcome.cell));
        *out_duration_secs = outcome.duration.as_secs_f64();
        SimStatus::Ok
    })
}

// -----------------------------------------------------------------------------
// 3. CSV 日志
// -----------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn cellsim_open_log(path_ptr: *const c_char) -> c_int {
    ffi_guard!(|| {
        if path_ptr.is_null() {
            return SimStatus::NullPointer;
        }
        let path = match CStr::from_ptr(path_ptr).to_str() {
            Ok(p) => p,
            Err(_) => return SimStatus::InvalidValue,
        };
        match storage::open_global_log(path) {
            Ok(()) => {
                log::info!("csv log opened at {}", path);
                SimStatus::Ok
            }
            Err(e) => report_error("cellsim_open_log", &e),
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn cellsim_log_step(
    ts_secs: c_longlong,
    cell_label_ptr: *const c_char,
    task_code: c_int,
    frame_ptr: *const CellFrame,
) -> c_int {
    ffi_guard!(|| {
        if cell_label_ptr.is_null() || frame_ptr.is_null() {
            return SimStatus::NullPointer;
        }
        let Some(timestamp) = local_timestamp(ts_secs) else {
            return SimStatus::InvalidValue;
        };
        let frame = &*frame_ptr;
        let row = storage::LogRow {
            timestamp,
            cell: CStr::from_ptr(cell_label_ptr).to_string_lossy().into_owned(),
            task: Task::from_code(task_code).label().to_string(),
            voltage: frame.voltage,
            current: frame.current,
            power: frame.voltage * frame.current,
            temperature: frame.temperature,
            capacity: frame.capacity,
        };
        match storage::log_global_row(row) {
            Ok(()) => SimStatus::Ok,
            Err(e) => SimStatus::from(&e),
        }
    })
}

#[no_mangle]
pub extern "C" fn cellsim_shutdown_log() -> c_int {
    ffi_guard!(|| match storage::shutdown_global_log() {
        Ok(stats) => {
            log::info!("csv log closed: {} rows, {} dropped", stats.total, stats.dropped);
            SimStatus::Ok
        }
        Err(e) => SimStatus::from(&e),
    })
}

#[no_mangle]
pub unsafe extern "C" fn cellsim_get_log_stats(
    out_total: *mut u64,
    out_dropped: *mut u64,
) -> c_int {
    ffi_guard!(|| {
        if out_total.is_null() || out_dropped.is_null() {
            return SimStatus::NullPointer;
        }
        let stats = storage::global_log_stats();
        *out_total = stats.total;
        *out_dropped = stats.dropped;
        SimStatus::Ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use tempfile::TempDir;

    fn ok() -> c_int {
        SimStatus::Ok as c_int
    }

    #[test]
    fn test_version_string_is_nul_terminated() {
        let v = unsafe { CStr::from_ptr(cellsim_version()) };
        assert!(v.to_str().unwrap().starts_with("CellSim"));
        assert_eq!(cellsim_abi_version() >> 16, 3);
    }

    #[test]
    fn test_create_then_charge_through_abi() {
        let mut frame = CellFrame::default();
        unsafe {
            assert_eq!(cellsim_create_cell(0, 3.3, 1.0, &mut frame), ok());
        }
        assert_eq!(frame.chemistry, Chemistry::Lfp.code());
        assert_eq!((frame.min_voltage, frame.max_voltage), (2.8, 3.6));
        assert!((25.0..=40.0).contains(&frame.temperature));
        assert_eq!(frame.capacity, 3.3);

        let input = frame;
        let mut duration = -1.0;
        unsafe {
            assert_eq!(cellsim_apply_task(&input, 0, 3.3, 1.0, &mut frame, &mut duration), ok());
        }
        assert_eq!(frame.voltage, 3.5);
        assert_eq!(frame.current, 1.0);
        assert_eq!(frame.capacity, 3.5);
        assert!(frame.temperature > input.temperature);
        assert!(duration >= 0.0);
    }

    #[test]
    fn test_unrecognized_task_code_is_a_noop() {
        let mut frame = CellFrame::default();
        let mut out = CellFrame::default();
        let mut duration = 0.0;
        unsafe {
            cellsim_create_cell(1, 3.6, -1.0, &mut frame);
            assert_eq!(cellsim_apply_task(&frame, 42, 4.0, 2.0, &mut out, &mut duration), ok());
        }
        assert_eq!(out.voltage, frame.voltage);
        assert_eq!(out.current, frame.current);
        assert_eq!(out.temperature, frame.temperature);
    }

    #[test]
    fn test_invalid_arguments_map_to_status_codes() {
        let mut frame = CellFrame::default();
        unsafe {
            assert_eq!(
                cellsim_create_cell(7, 3.3, 1.0, &mut frame),
                SimStatus::InvalidValue as c_int
            );
            assert_eq!(
                cellsim_create_cell(0, 3.3, 1.0, ptr::null_mut()),
                SimStatus::NullPointer as c_int
            );
            let bogus = CellFrame { chemistry: 9, ..CellFrame::default() };
            let mut d = 0.0;
            assert_eq!(
                cellsim_apply_task(&bogus, 0, 3.3, 1.0, &mut frame, &mut d),
                SimStatus::InvalidValue as c_int
            );
            assert_eq!(cellsim_open_log(ptr::null()), SimStatus::NullPointer as c_int);
        }
        assert_eq!(cellsim_init_threading(-1), SimStatus::InvalidValue as c_int);
    }

    #[test]
    fn test_global_log_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ffi.csv");
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        let label = CString::new("Cell_1_NMC").unwrap();

        let mut frame = CellFrame::default();
        unsafe {
            assert_eq!(cellsim_open_log(c_path.as_ptr()), ok());
            cellsim_create_cell(1, 3.6, -1.0, &mut frame);
            assert_eq!(cellsim_log_step(0, label.as_ptr(), 1, &frame), ok());
            assert_eq!(cellsim_log_step(1_700_000_000, label.as_ptr(), 2, &frame), ok());

            let (mut total, mut dropped) = (0u64, 0u64);
            assert_eq!(cellsim_get_log_stats(&mut total, &mut dropped), ok());
            assert_eq!((total, dropped), (2, 0));
        }
        assert_eq!(cellsim_shutdown_log(), ok());
        assert_eq!(cellsim_shutdown_log(), SimStatus::WriterClosed as c_int);

        let rows = storage::CsvLog::new(&path).read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task, "Discharge");
        assert_eq!(rows[1].task, "Idle");
        assert_eq!(rows[0].cell, "Cell_1_NMC");
    }
}
