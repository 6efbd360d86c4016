// ==================================================
// FILE: cellsim-rust/src/run/driver.rs
// ==================================================

//! Run Driver (v0.3.0)
//!
//! 由显式 `Command` 驱动的控制循环，不依赖任何 UI 框架。
//!
//! # 控制语义
//! 1. **Start**: 丢弃当前运行，新建电芯，自动推进直到完成；每步之间检查 Stop。
//! 2. **Step**: 只推进一步 (无运行时先新建)，并切换为手动模式。
//! 3. **Stop**: 只在步与步之间生效，已施加的状态不回滚。

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::state::{RunReport, RunState, StepEvent};
use crate::config::RunConfig;
use crate::error::Result;

/// 控制指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Step,
    Stop,
}

// -----------------------------------------------------------------------------
// 观察者接口 (展示层挂载点)
// -----------------------------------------------------------------------------

pub trait StepObserver {
    fn on_step(&mut self, event: &StepEvent);

    fn on_finish(&mut self, _report: &RunReport) {}
}

impl<F> StepObserver for F
where
    F: FnMut(&StepEvent),
{
    fn on_step(&mut self, event: &StepEvent) {
        self(event)
    }
}

/// 将每步事件推送到另一线程 (例如实时图表)
impl StepObserver for Sender<StepEvent> {
    fn on_step(&mut self, event: &StepEvent) {
        if self.send(event.clone()).is_err() {
            log::debug!("step stream receiver dropped; event {} discarded", event.step_index);
        }
    }
}

/// 不关心逐步事件的调用方使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl StepObserver for NullObserver {
    fn on_step(&mut self, _event: &StepEvent) {}
}

// -----------------------------------------------------------------------------
// 驱动器
// -----------------------------------------------------------------------------

pub struct RunDriver<R> {
    config: RunConfig,
    rng: R,
    state: Option<RunState>,
    step_delay: Duration,
}

impl RunDriver<StdRng> {
    /// 按配置中的种子构造；无种子时从系统熵播种
    pub fn from_config(config: RunConfig) -> Result<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, rng)
    }
}

impl<R: Rng> RunDriver<R> {
    pub fn new(config: RunConfig, rng: R) -> Result<Self> {
        config.validate()?;
        for task in config.tasks.iter().filter(|t| !t.is_recognized()) {
            log::warn!("task `{}` is not recognized; it will leave cells unchanged", task);
        }
        let step_delay = Duration::from_millis(config.step_delay_ms);
        Ok(Self { config, rng, state: None, step_delay })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// 覆盖配置中的节拍延迟；测试与无界面场景通常置零
    pub fn set_step_delay(&mut self, delay: Duration) {
        self.step_delay = delay;
    }

    /// 新建一次运行，丢弃尚未结束的旧运行
    pub fn start(&mut self) {
        if let Some(old) = self.state.take() {
            log::warn!(
                "discarding unfinished run at step {}/{}",
                old.steps_completed(),
                old.total_steps()
            );
        }
        let state = RunState::new(&self.config, &mut self.rng);
        log::info!(
            "run started: {} cells x {} tasks = {} steps",
            self.config.cells.len(),
            self.config.tasks.len(),
            self.config.total_steps()
        );
        self.state = Some(state);
    }

    /// 推进一步并通知观察者；无运行或已完成时返回 `None`
    pub fn step(&mut self, observer: &mut dyn StepObserver) -> Option<StepEvent> {
        let state = self.state.as_mut()?;
        let event = state.advance(&mut self.rng)?;
        log::debug!(
            "step {} task={} cell={} V={:.2} I={:.2} T={:.2}",
            event.step_index,
            event.record.task,
            event.cell_id,
            event.cell.voltage,
            event.cell.current,
            event.cell.temperature
        );
        observer.on_step(&event);
        Some(event)
    }

    /// 在步与步之间终止，已施加的状态保留在报告中
    pub fn stop(&mut self, observer: &mut dyn StepObserver) -> Option<RunReport> {
        let state = self.state.take()?;
        let report = state.into_report(true);
        log::info!("run stopped at step {}/{}", report.steps_completed, report.total_steps);
        observer.on_finish(&report);
        Some(report)
    }

    fn finish_if_complete(&mut self, observer: &mut dyn StepObserver) -> Option<RunReport> {
        if !self.state.as_ref()?.is_complete() {
            return None;
        }
        let report = self.state.take()?.into_report(false);
        log::info!(
            "run completed: {} steps in {:.3}s",
            report.steps_completed,
            report.elapsed_secs
        );
        observer.on_finish(&report);
        Some(report)
    }

    fn pace(&self) {
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
    }

    /// 非交互式完整运行
    pub fn execute(&mut self, observer: &mut dyn StepObserver) -> RunReport {
        self.start();
        while self.step(observer).is_some() {
            self.pace();
        }
        match self.finish_if_complete(observer) {
            Some(report) => report,
            // 只有在没有可推进的步时才会到这里，此时运行必然已完成
            None => RunReport::from_traces(Vec::new(), chrono::Local::now().naive_local(), 0.0),
        }
    }

    /// 处理单条指令；运行结束 (完成或被终止) 时返回报告
    pub fn handle(
        &mut self,
        command: Command,
        observer: &mut dyn StepObserver,
    ) -> Option<RunReport> {
        match command {
            Command::Start => {
                self.start();
                self.finish_if_complete(observer)
            }
            Command::Step => {
                if !self.is_running() {
                    self.start();
                }
                self.step(observer);
                self.finish_if_complete(observer)
            }
            Command::Stop => self.stop(observer),
        }
    }

    /// 指令驱动的控制循环，直到指令通道关闭且没有自动推进中的运行
    ///
    /// 返回期间结束的所有运行报告，按结束顺序排列。
    pub fn run(
        &mut self,
        control: &Receiver<Command>,
        observer: &mut dyn StepObserver,
    ) -> Vec<RunReport> {
        let mut reports = Vec::new();
        let mut auto = false;

        loop {
            let command = if auto && self.is_running() {
                match control.try_recv() {
                    Ok(cmd) => Some(cmd),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
                }
            } else {
                match control.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                }
            };

            match command {
                Some(Command::Start) => {
                    auto = true;
                    reports.extend(self.handle(Command::Start, observer));
                }
                Some(Command::Step) => {
                    auto = false;
                    reports.extend(self.handle(Command::Step, observer));
                }
                Some(Command::Stop) => {
                    auto = false;
                    reports.extend(self.handle(Command::Stop, observer));
                }
                None => {
                    self.step(observer);
                    if let Some(report) = self.finish_if_complete(observer) {
                        auto = false;
                        reports.push(report);
                    } else {
                        self.pace();
                    }
                }
            }
        }

        reports
    }
}

// -----------------------------------------------------------------------------
// 并行演算 (电芯相互独立)
// -----------------------------------------------------------------------------

#[cfg(feature = "parallel")]
impl<R: Rng> RunDriver<R> {
    /// 每个电芯在独立的 rayon 任务上跑完整个任务序列
    ///
    /// 每个电芯拥有由驱动器随机源派生的独立随机源，单电芯内的历史仍按任务顺序排列；
    /// 跨电芯的执行交错不作保证。不发送逐步事件。
    pub fn execute_parallel(&mut self) -> RunReport {
        if let Some(old) = self.state.take() {
            log::warn!("discarding unfinished run at step {}", old.steps_completed());
        }
        super::parallel::execute_cells(&self.config, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellConfig;
    use crate::models::{Chemistry, Setpoint, Task};
    use crossbeam_channel::unbounded;

    fn driver(tasks: Vec<Task>) -> RunDriver<StdRng> {
        let config = RunConfig {
            cells: vec![
                CellConfig::new(Chemistry::Lfp, Setpoint::new(3.3, 1.0)),
                CellConfig::new(Chemistry::Nmc, Setpoint::new(3.6, -1.0)),
            ],
            tasks,
            seed: Some(77),
            ..Default::default()
        };
        RunDriver::from_config(config).unwrap()
    }

    #[test]
    fn test_execute_streams_every_step_in_order() {
        let mut d = driver(vec![Task::Charge, Task::Discharge, Task::Idle]);
        let mut seen = Vec::new();
        let mut observer = |ev: &StepEvent| seen.push((ev.task_index, ev.cell_id.clone()));
        let report = d.execute(&mut observer);

        assert!(report.is_complete());
        assert!(!report.stopped);
        assert_eq!(report.steps_completed, 6);
        assert_eq!(seen[0], (0, "Cell_1_LFP".to_string()));
        assert_eq!(seen[1], (0, "Cell_2_NMC".to_string()));
        assert_eq!(seen[5], (2, "Cell_2_NMC".to_string()));
        assert!(!d.is_running());
    }

    #[test]
    fn test_same_seed_reproduces_run() {
        let a = driver(vec![Task::Charge, Task::Optimizing]).execute(&mut NullObserver);
        let b = driver(vec![Task::Charge, Task::Optimizing]).execute(&mut NullObserver);
        let cells_a: Vec<_> = a.final_cells().map(|(_, c)| c.clone()).collect();
        let cells_b: Vec<_> = b.final_cells().map(|(_, c)| c.clone()).collect();
        assert_eq!(cells_a, cells_b);
    }

    #[test]
    fn test_manual_stepping_then_stop_keeps_applied_state() {
        let mut d = driver(vec![Task::Charge, Task::Discharge]);
        assert!(d.handle(Command::Step, &mut NullObserver).is_none());
        assert!(d.handle(Command::Step, &mut NullObserver).is_none());
        assert!(d.handle(Command::Step, &mut NullObserver).is_none());

        let report = d.handle(Command::Stop, &mut NullObserver).unwrap();
        assert!(report.stopped);
        assert_eq!(report.steps_completed, 3);
        assert_eq!(report.total_steps, 4);
        // 第一个电芯已充电后放电，第二个只充过电
        assert_eq!(report.traces[0].records.len(), 2);
        assert_eq!(report.traces[1].records.len(), 1);
        assert_eq!(report.traces[1].current().current, 1.0);
    }

    #[test]
    fn test_stop_without_run_is_ignored() {
        let mut d = driver(vec![Task::Idle]);
        assert!(d.handle(Command::Stop, &mut NullObserver).is_none());
        assert!(d.step(&mut NullObserver).is_none());
    }

    #[test]
    fn test_restart_discards_previous_run() {
        let mut d = driver(vec![Task::Charge, Task::Charge]);
        d.handle(Command::Step, &mut NullObserver);
        d.start();
        assert_eq!(d.state().map(|s| s.steps_completed()), Some(0));
    }

    #[test]
    fn test_command_loop_runs_to_completion() {
        let mut d = driver(vec![Task::Charge, Task::Idle]);
        let (tx, rx) = unbounded();
        tx.send(Command::Start).unwrap();
        drop(tx);

        let (ev_tx, ev_rx) = unbounded::<StepEvent>();
        let mut sink = ev_tx;
        let reports = d.run(&rx, &mut sink);
        drop(sink);

        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_complete());
        assert_eq!(ev_rx.iter().count(), 4);
    }

    #[test]
    fn test_command_loop_manual_steps_and_stop() {
        let mut d = driver(vec![Task::Charge, Task::Discharge, Task::Idle]);
        let (tx, rx) = unbounded();
        for cmd in [Command::Step, Command::Step, Command::Stop, Command::Step] {
            tx.send(cmd).unwrap();
        }
        drop(tx);

        let reports = d.run(&rx, &mut NullObserver);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].stopped);
        assert_eq!(reports[0].steps_completed, 2);
        // 最后一条 Step 开启了新运行但未结束
        assert_eq!(d.state().map(|s| s.steps_completed()), Some(1));
    }

    #[test]
    fn test_stop_interrupts_auto_advancing_run() {
        let config = RunConfig {
            cells: vec![CellConfig::new(Chemistry::Nmc, Setpoint::new(3.7, 1.5)); 10],
            tasks: vec![Task::Charge; 10],
            seed: Some(5),
            step_delay_ms: 2,
            ..Default::default()
        };
        let mut d = RunDriver::from_config(config).unwrap();
        let (tx, rx) = unbounded();

        let controller = thread::spawn(move || {
            tx.send(Command::Start).unwrap();
            thread::sleep(Duration::from_millis(20));
            tx.send(Command::Stop).unwrap();
        });
        let reports = d.run(&rx, &mut NullObserver);
        controller.join().unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.stopped);
        assert_eq!(report.total_steps, 100);
        assert!(report.steps_completed > 0);
        assert!(report.steps_completed < report.total_steps);
        // 已施加的步保留在轨迹中
        let recorded: usize = report.traces.iter().map(|t| t.records.len()).sum();
        assert_eq!(recorded, report.steps_completed);
        assert!(!d.is_running());
    }

    #[test]
    fn test_unrecognized_task_is_accepted_and_counted() {
        let mut d = driver(vec![Task::Charge, Task::from("Equalize")]);
        assert_eq!(d.config().total_steps(), 4);
        assert!(!d.config().tasks[1].is_recognized());

        let report = d.execute(&mut NullObserver);
        assert_eq!(report.steps_completed, 4);
        for trace in &report.traces {
            // 未识别任务不改变电芯
            assert_eq!(trace.states[1], trace.states[0]);
            assert_eq!(trace.records[1].task.label(), "Equalize");
        }
    }

    #[test]
    fn test_empty_task_sequence_reports_immediately() {
        let mut d = driver(Vec::new());
        let report = d.handle(Command::Start, &mut NullObserver).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.total_steps, 0);
        assert_eq!(report.traces.len(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cfg = RunConfig { cells: Vec::new(), ..Default::default() };
        assert!(RunDriver::from_config(cfg).is_err());
    }
}
