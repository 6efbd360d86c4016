// ==================================================
// FILE: cellsim-rust/src/storage.rs
// ==================================================

//! CSV Reading Log
//!
//! 追加式 CSV 日志，是唯一跨运行持久化的产物。
//! - 首次写入时创建文件并写表头，之后只追加数据行。
//! - 读取时文件缺失视为"无历史"；无表头的续写文件同样可读。
//! - 后台写入线程通过有界通道批量落盘，通道满时丢弃并计数。

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::NaiveDateTime;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::cell::round_dp;
use crate::error::{Result, SimError};
use crate::run::{RunReport, StepEvent, StepObserver};

pub const CSV_HEADER: &str = "Timestamp,Cell,Task,Voltage,Current,Power,Temperature,Capacity";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const WRITER_QUEUE_CAPACITY: usize = 4_096;
const WRITER_BATCH_SIZE: usize = 256;

// -----------------------------------------------------------------------------
// 数据行
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: NaiveDateTime,
    pub cell: String,
    pub task: String,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub temperature: f64,
    pub capacity: f64,
}

/// 逗号会破坏列对齐
fn sanitize(field: &str) -> String {
    field.replace(',', ";")
}

impl LogRow {
    pub fn from_step(event: &StepEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            cell: event.cell_id.clone(),
            task: event.record.task.label().to_string(),
            voltage: event.cell.voltage,
            current: event.cell.current,
            power: event.cell.power(),
            temperature: event.cell.temperature,
            capacity: event.cell.capacity,
        }
    }

    /// 格式化后的精度：电压/温度/容量 2 位，电流/功率 3 位
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{:.2},{:.3},{:.3},{:.2},{:.2}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            sanitize(&self.cell),
            sanitize(&self.task),
            self.voltage,
            self.current,
            self.power,
            self.temperature,
            self.capacity,
        )
    }

    /// 按 CSV 精度取整后的副本，用于写入/读回比较
    pub fn quantized(&self) -> Self {
        Self {
            voltage: round_dp(self.voltage, 2),
            current: round_dp(self.current, 3),
            power: round_dp(self.power, 3),
            temperature: round_dp(self.temperature, 2),
            capacity: round_dp(self.capacity, 2),
            ..self.clone()
        }
    }

    pub fn parse(line: &str, line_no: usize) -> Result<Self> {
        let malformed = |reason: String| SimError::MalformedRow { line: line_no, reason };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 8 {
            return Err(malformed(format!("expected 8 fields, found {}", fields.len())));
        }
        let number = |idx: usize, name: &str| -> Result<f64> {
            fields[idx]
                .parse::<f64>()
                .map_err(|e| malformed(format!("{name} `{}`: {e}", fields[idx])))
        };

        let timestamp = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|e| malformed(format!("timestamp `{}`: {e}", fields[0])))?;

        Ok(Self {
            timestamp,
            cell: fields[1].to_string(),
            task: fields[2].to_string(),
            voltage: number(3, "voltage")?,
            current: number(4, "current")?,
            power: number(5, "power")?,
            temperature: number(6, "temperature")?,
            capacity: number(7, "capacity")?,
        })
    }
}

/// 由运行报告还原全部数据行，时间戳取运行开始时刻加采样的相对时间
pub fn rows_from_report(report: &RunReport) -> Vec<LogRow> {
    let max_tasks = report.traces.iter().map(|t| t.history.len()).max().unwrap_or(0);
    let mut timed: Vec<(f64, LogRow)> = Vec::with_capacity(report.steps_completed);

    // 先按任务为主序、电芯为次序排列，再按相对时间稳定排序
    for task_index in 0..max_tasks {
        for trace in &report.traces {
            let (Some(sample), Some(cell)) =
                (trace.history.get(task_index), trace.states.get(task_index))
            else {
                continue;
            };
            timed.push((
                sample.elapsed_secs,
                LogRow {
                    timestamp: report.wall_time_of(sample),
                    cell: trace.id.clone(),
                    task: sample.task.label().to_string(),
                    voltage: cell.voltage,
                    current: cell.current,
                    power: sample.power,
                    temperature: cell.temperature,
                    capacity: cell.capacity,
                },
            ));
        }
    }
    timed.sort_by(|a, b| a.0.total_cmp(&b.0));
    timed.into_iter().map(|(_, row)| row).collect()
}

// -----------------------------------------------------------------------------
// 同步读写
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加数据行；文件不存在或为空时先写表头
    pub fn append(&self, rows: &[LogRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut out = BufWriter::new(file);
        if needs_header {
            writeln!(out, "{CSV_HEADER}")?;
        }
        for row in rows {
            writeln!(out, "{}", row.to_csv_row())?;
        }
        out.flush()?;
        Ok(rows.len())
    }

    pub fn append_report(&self, report: &RunReport) -> Result<usize> {
        self.append(&rows_from_report(report))
    }

    /// 读取全部数据行。文件缺失返回空集，格式错误的行跳过并记录日志。
    pub fn read_all(&self) -> Result<Vec<LogRow>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("{} not found; no prior readings", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("Timestamp,") {
                continue;
            }
            match LogRow::parse(trimmed, idx + 1) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    skipped += 1;
                    log::warn!("{}: {}", self.path.display(), e);
                }
            }
        }
        if skipped > 0 {
            log::warn!("{}: skipped {} malformed rows", self.path.display(), skipped);
        }
        Ok(rows)
    }

    /// 最近的 `n` 行
    pub fn tail(&self, n: usize) -> Result<Vec<LogRow>> {
        let mut rows = self.read_all()?;
        let start = rows.len().saturating_sub(n);
        Ok(rows.split_off(start))
    }
}

// -----------------------------------------------------------------------------
// 后台写入线程
// -----------------------------------------------------------------------------

enum WriterMsg {
    Row(LogRow),
    Shutdown,
}

#[derive(Debug, Default)]
struct WriterCounters {
    total: AtomicU64,
    dropped: AtomicU64,
}

/// 写入统计 (累计行数, 丢弃行数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterStats {
    pub total: u64,
    pub dropped: u64,
}

pub struct CsvWriter {
    sender: Sender<WriterMsg>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<WriterCounters>,
}

impl CsvWriter {
    pub fn spawn(path: impl Into<PathBuf>) -> Result<Self> {
        let log = CsvLog::new(path);
        let counters = Arc::new(WriterCounters::default());
        let (tx, rx) = bounded(WRITER_QUEUE_CAPACITY);

        let thread_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name("cellsim-csv-writer".into())
            .spawn(move || writer_loop(log, rx, thread_counters))?;

        Ok(Self { sender: tx, handle: Some(handle), counters })
    }

    /// 非阻塞入队；队列满或线程已退出时计入丢弃
    pub fn log_row(&self, row: LogRow) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(WriterMsg::Row(row)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            total: self.counters.total.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// 发送关机信号并等待队列排空
    pub fn shutdown(mut self) -> Result<WriterStats> {
        self.stop_thread()?;
        Ok(self.stats())
    }

    fn stop_thread(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.sender.send(WriterMsg::Shutdown).map_err(|_| SimError::WriterClosed)?;
        handle.join().map_err(|_| SimError::WriterClosed)
    }
}

impl Drop for CsvWriter {
    fn drop(&mut self) {
        if let Err(e) = self.stop_thread() {
            log::error!("csv writer did not shut down cleanly: {e}");
        }
    }
}

impl StepObserver for CsvWriter {
    fn on_step(&mut self, event: &StepEvent) {
        self.log_row(LogRow::from_step(event));
    }
}

fn writer_loop(log: CsvLog, rx: Receiver<WriterMsg>, counters: Arc<WriterCounters>) {
    let mut buffer: Vec<LogRow> = Vec::with_capacity(WRITER_BATCH_SIZE);
    let mut shutting_down = false;

    while !shutting_down {
        match rx.recv() {
            Ok(WriterMsg::Row(row)) => buffer.push(row),
            Ok(WriterMsg::Shutdown) | Err(_) => shutting_down = true,
        }
        while !shutting_down && buffer.len() < WRITER_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterMsg::Row(row)) => buffer.push(row),
                Ok(WriterMsg::Shutdown) => shutting_down = true,
                Err(_) => break,
            }
        }
        flush_buffer(&log, &mut buffer, &counters);
    }

    // 关机信号之后仍在队列中的行
    buffer.extend(rx.try_iter().filter_map(|msg| match msg {
        WriterMsg::Row(row) => Some(row),
        WriterMsg::Shutdown => None,
    }));
    flush_buffer(&log, &mut buffer, &counters);
    log::debug!("csv writer for {} exited", log.path().display());
}

fn flush_buffer(log: &CsvLog, buffer: &mut Vec<LogRow>, counters: &WriterCounters) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = log.append(buffer) {
        log::error!("failed to append {} rows to {}: {}", buffer.len(), log.path().display(), e);
        counters.dropped.fetch_add(buffer.len() as u64, Ordering::Relaxed);
    }
    buffer.clear();
}

// -----------------------------------------------------------------------------
// 进程级写入器 (供 C ABI 使用)
// -----------------------------------------------------------------------------

static GLOBAL_WRITER: Mutex<Option<CsvWriter>> = Mutex::new(None);

/// 打开进程级日志；已打开时保持原写入器不变
pub fn open_global_log(path: impl Into<PathBuf>) -> Result<()> {
    let mut slot = GLOBAL_WRITER.lock().unwrap_or_else(|p| p.into_inner());
    if slot.is_none() {
        *slot = Some(CsvWriter::spawn(path)?);
    }
    Ok(())
}

pub fn log_global_row(row: LogRow) -> Result<()> {
    let slot = GLOBAL_WRITER.lock().unwrap_or_else(|p| p.into_inner());
    match slot.as_ref() {
        Some(writer) => {
            writer.log_row(row);
            Ok(())
        }
        None => Err(SimError::WriterClosed),
    }
}

pub fn shutdown_global_log() -> Result<WriterStats> {
    let writer = GLOBAL_WRITER.lock().unwrap_or_else(|p| p.into_inner()).take();
    match writer {
        Some(w) => w.shutdown(),
        None => Err(SimError::WriterClosed),
    }
}

pub fn global_log_stats() -> WriterStats {
    GLOBAL_WRITER
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .as_ref()
        .map(CsvWriter::stats)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CellConfig, RunConfig};
    use crate::models::{Chemistry, Setpoint, Task};
    use crate::run::{NullObserver, RunDriver};
    use chrono::Timelike;
    use std::fs;
    use tempfile::TempDir;

    fn report(tasks: Vec<Task>) -> RunReport {
        let config = RunConfig {
            cells: vec![
                CellConfig::new(Chemistry::Lfp, Setpoint::new(3.3, 1.0)),
                CellConfig::new(Chemistry::Nmc, Setpoint::new(3.6, -1.234)),
            ],
            tasks,
            seed: Some(4),
            ..Default::default()
        };
        RunDriver::from_config(config).unwrap().execute(&mut NullObserver)
    }

    #[test]
    fn test_missing_file_means_no_history() {
        let dir = TempDir::new().unwrap();
        let log = CsvLog::new(dir.path().join("cell_readings.csv"));
        assert!(log.read_all().unwrap().is_empty());
        assert!(log.tail(100).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_within_documented_precision() {
        let dir = TempDir::new().unwrap();
        let log = CsvLog::new(dir.path().join("cell_readings.csv"));
        let rows = rows_from_report(&report(vec![Task::Charge, Task::Discharge, Task::Optimizing]));
        assert_eq!(rows.len(), 6);

        assert_eq!(log.append(&rows).unwrap(), 6);
        let back = log.read_all().unwrap();
        assert_eq!(back.len(), rows.len());
        for (written, read) in rows.iter().zip(&back) {
            let expected = written.quantized();
            assert_eq!(read.cell, expected.cell);
            assert_eq!(read.task, expected.task);
            assert_eq!(read.timestamp, expected.timestamp.with_nanosecond(0).unwrap());
            assert!((read.voltage - expected.voltage).abs() < 1e-9);
            assert!((read.current - expected.current).abs() < 1e-9);
            assert!((read.power - expected.power).abs() < 1e-9);
            assert!((read.temperature - expected.temperature).abs() < 1e-9);
            assert!((read.capacity - expected.capacity).abs() < 1e-9);
        }
    }

    #[test]
    fn test_header_written_once_across_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cell_readings.csv");
        let log = CsvLog::new(&path);

        log.append_report(&report(vec![Task::Charge])).unwrap();
        log.append_report(&report(vec![Task::Idle, Task::Idle])).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.matches("Timestamp,").count(), 1);
        assert!(raw.starts_with(CSV_HEADER));
        assert_eq!(log.read_all().unwrap().len(), 6);
        assert_eq!(log.tail(4).unwrap()[0].task, "Idle");
    }

    #[test]
    fn test_headerless_continuation_and_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("continued.csv");
        fs::write(
            &path,
            "2026-01-02 03:04:05,Cell_1_LFP,Charge,3.50,1.000,3.500,31.20,3.50\n\
             not,a,row\n\
             2026-01-02 03:04:06,Cell_2_NMC,Discharge,3.50,-1.000,-3.500,30.00,3.50\n",
        )
        .unwrap();

        let rows = CsvLog::new(&path).read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].current, -1.0);
        assert_eq!(rows[1].power, -3.5);
    }

    #[test]
    fn test_parse_reports_line_numbers() {
        let err = LogRow::parse("2026-01-02 03:04:05,C,Idle,x,0,0,0,0", 7).unwrap_err();
        assert!(matches!(err, SimError::MalformedRow { line: 7, .. }));
    }

    #[test]
    fn test_background_writer_drains_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("async.csv");

        let mut writer = CsvWriter::spawn(&path).unwrap();
        let config = RunConfig { seed: Some(9), ..Default::default() };
        let report = RunDriver::from_config(config).unwrap().execute(&mut writer);
        let stats = writer.shutdown().unwrap();

        assert_eq!(stats.total, report.steps_completed as u64);
        assert_eq!(stats.dropped, 0);
        let rows = CsvLog::new(&path).read_all().unwrap();
        assert_eq!(rows.len(), report.steps_completed);
        assert_eq!(rows[0].cell, "Cell_1_LFP");
    }

    #[test]
    fn test_unrecognized_task_label_is_sanitized() {
        let row = LogRow {
            timestamp: NaiveDateTime::parse_from_str("2026-01-01 00:00:00", TIMESTAMP_FORMAT)
                .unwrap(),
            cell: "Cell_1_LFP".into(),
            task: "Hold, then rest".into(),
            voltage: 3.3,
            current: 0.0,
            power: 0.0,
            temperature: 25.0,
            capacity: 3.3,
        };
        let parsed = LogRow::parse(&row.to_csv_row(), 1).unwrap();
        assert_eq!(parsed.task, "Hold; then rest");
    }
}
