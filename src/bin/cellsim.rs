// ==================================================
// FILE: cellsim-rust/src/bin/cellsim.rs
// ==================================================

//! Headless Runner
//!
//! ```text
//! cellsim [CONFIG.json] [--parallel] [--clamp-inputs] [--log PATH | --no-log]
//! ```
//!
//! 未给出配置文件时使用默认的双电芯运行。读数默认追加到 `cell_readings.csv`，
//! 配置中的 `log_path` 或 `--log` 可改写路径。日志级别由 `RUST_LOG` 控制。

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info, warn};
use rand::rngs::StdRng;

use cellsim_rust::config::{RunConfig, DEFAULT_LOG_FILE};
use cellsim_rust::run::{self, NullObserver, RunDriver};
use cellsim_rust::storage::{CsvLog, CsvWriter};
use cellsim_rust::{Result, RunReport};

const USAGE: &str =
    "usage: cellsim [CONFIG.json] [--parallel] [--clamp-inputs] [--log PATH | --no-log]";
const RECENT_ROWS: usize = 5;

// -----------------------------------------------------------------------------
// 命令行参数
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    parallel: bool,
    clamp_inputs: bool,
    log_path: Option<PathBuf>,
    no_log: bool,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--parallel" => args.parallel = true,
            "--clamp-inputs" => args.clamp_inputs = true,
            "--no-log" => args.no_log = true,
            "--log" => {
                let path = it.next().ok_or("--log expects a path")?;
                args.log_path = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path => args.config = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

/// 日志路径优先级：`--no-log` > `--log` > 配置文件 > 默认文件名
fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("loading run configuration from {}", path.display());
            RunConfig::from_json_file(path)?
        }
        None => {
            info!("no configuration given; using the default two-cell run");
            RunConfig::default()
        }
    };
    if args.clamp_inputs {
        config.clamp_to_input_ranges();
    }
    if args.no_log {
        config.log_path = None;
    } else if let Some(path) = &args.log_path {
        config.log_path = Some(path.clone());
    } else if config.log_path.is_none() {
        config.log_path = Some(PathBuf::from(DEFAULT_LOG_FILE));
    }
    Ok(config)
}

// -----------------------------------------------------------------------------
// 执行
// -----------------------------------------------------------------------------

// 并行模式不推送逐步事件，结束后一次性由报告还原数据行
#[cfg(feature = "parallel")]
fn execute_parallel(
    driver: &mut RunDriver<StdRng>,
    log_path: Option<&Path>,
) -> Result<RunReport> {
    let report = driver.execute_parallel();
    if let Some(path) = log_path {
        let n = CsvLog::new(path).append_report(&report)?;
        info!("appended {} rows to {}", n, path.display());
    }
    Ok(report)
}

#[cfg(not(feature = "parallel"))]
fn execute_parallel(
    driver: &mut RunDriver<StdRng>,
    log_path: Option<&Path>,
) -> Result<RunReport> {
    warn!("built without the `parallel` feature; running sequentially");
    execute_sequential(driver, log_path)
}

fn execute_sequential(
    driver: &mut RunDriver<StdRng>,
    log_path: Option<&Path>,
) -> Result<RunReport> {
    let Some(path) = log_path else {
        return Ok(driver.execute(&mut NullObserver));
    };
    let mut writer = CsvWriter::spawn(path)?;
    let report = driver.execute(&mut writer);
    let stats = writer.shutdown()?;
    if stats.dropped > 0 {
        warn!("{} of {} rows were not written to {}", stats.dropped, stats.total, path.display());
    } else {
        info!("appended {} rows to {}", stats.total, path.display());
    }
    Ok(report)
}

// -----------------------------------------------------------------------------
// 汇总输出
// -----------------------------------------------------------------------------

fn print_summary(report: &RunReport) {
    info!(
        "run finished: {}/{} steps in {:.3}s",
        report.steps_completed, report.total_steps, report.elapsed_secs
    );

    let overview = run::overview(report);
    for row in &overview {
        info!(
            "{:<12} {}  V={:.2} I={:.2} P={:.3} T={:.2} C={:.2} [{:.1}..{:.1}]",
            row.id,
            row.chemistry,
            row.voltage,
            row.current,
            row.power,
            row.temperature,
            row.capacity,
            row.min_voltage,
            row.max_voltage
        );
    }
    for max in run::column_maxima(&overview) {
        info!("max {:<12} {:.3} ({})", max.column, max.value, max.cell_id);
    }
    for (chem, count) in run::chemistry_distribution(report) {
        info!("chemistry {}: {} cells", chem, count);
    }
    for (task, mean) in run::mean_duration_by_task(report) {
        info!("task {:<10} mean {:.6}s", task.label(), mean);
    }
    info!("total task time {:.6}s", run::total_duration_secs(report));
}

fn print_recent(path: &Path) {
    match CsvLog::new(path).tail(RECENT_ROWS) {
        Ok(rows) => {
            for row in rows {
                info!("recent: {}", row.to_csv_row());
            }
        }
        Err(e) => warn!("could not read {}: {}", path.display(), e),
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            error!("{msg}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let log_path = config.log_path.clone();

    let result = RunDriver::from_config(config).and_then(|mut driver| {
        if args.parallel {
            execute_parallel(&mut driver, log_path.as_deref())
        } else {
            execute_sequential(&mut driver, log_path.as_deref())
        }
    });

    match result {
        Ok(report) => {
            print_summary(&report);
            if let Some(path) = &log_path {
                print_recent(path);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
