use sim::models::model_trait::DevsModel;
use sim::simulator::{Message, Simulation};
use std::f64::INFINITY;

use super::conf::{ConvConf, HwConfig};
use super::dma::Dram;
use super::layout::MemoryLayout;
use super::main::create_simulation;
use super::msg::{self, StartCommand};
use super::packer::BeatFormat;
use super::plm::SharedScratchpad;
use super::profiler::{RunState, RunStatus, SharedRunStatus};
use crate::error::{ConvError, Result};
use crate::simulator::sim::inject_message;

/// One accelerator instance: scratchpad, memory window and the stage
/// models, driven one simulation step at a time.
pub struct ConvAccelerator {
  hw: HwConfig,
  format: BeatFormat,
  simulation: Simulation,
  pad: SharedScratchpad,
  dram: Dram,
  status: SharedRunStatus,
  cycle_origin: u32,
  max_cycles: Option<u64>,
}

impl ConvAccelerator {
  pub fn new(hw: HwConfig) -> Result<Self> {
    let format = hw
      .beat_format()
      .ok_or_else(|| ConvError::InvalidConfig(format!("unsupported dma_width {}", hw.dma_width)))?;
    let pad = SharedScratchpad::new(&hw);
    let dram = Dram::default();
    let status = SharedRunStatus::default();
    let simulation = create_simulation(&hw, format, &pad, &dram, &status);
    Ok(Self {
      hw,
      format,
      simulation,
      pad,
      dram,
      status,
      cycle_origin: 0,
      max_cycles: None,
    })
  }

  /// Presets the global cycle counter for subsequent runs.
  pub fn with_cycle_counter(mut self, origin: u32) -> Self {
    self.cycle_origin = origin;
    self
  }

  /// Aborts a run that has not finished after `limit` cycles.
  pub fn with_cycle_limit(mut self, limit: u64) -> Self {
    self.max_cycles = Some(limit);
    self
  }

  pub fn hw(&self) -> &HwConfig {
    &self.hw
  }

  pub fn format(&self) -> BeatFormat {
    self.format
  }

  pub fn dram(&self) -> &Dram {
    &self.dram
  }

  pub fn layout(&self, conf: &ConvConf) -> MemoryLayout {
    MemoryLayout::new(conf, self.format, self.hw.weight_layout)
  }

  pub fn simulation(&mut self) -> &mut Simulation {
    &mut self.simulation
  }

  /// Messages that the next step delivers.
  pub fn pending_messages(&self) -> &[Message] {
    self.simulation.get_messages()
  }

  pub fn global_time(&self) -> f64 {
    self.simulation.get_global_time()
  }

  pub fn status(&self) -> Result<RunStatus> {
    Ok(self.status.lock()?.clone())
  }

  pub fn is_running(&self) -> Result<bool> {
    Ok(self.status.lock()?.state == RunState::Running)
  }

  pub fn is_finished(&self) -> Result<bool> {
    Ok(self.status.lock()?.state == RunState::Finished)
  }

  /// Raises `accelerator_start` with a freshly latched configuration.
  ///
  /// The input stream must already be in the memory window.
  pub fn start(&mut self, conf: ConvConf) -> Result<()> {
    self.pad.lock().map_err(|_| ConvError::Poisoned)?.reset();
    {
      let mut status = self.status.lock()?;
      *status = RunStatus {
        state: RunState::Running,
        started_at: self.simulation.get_global_time(),
        ..RunStatus::default()
      };
    }

    let content = serde_json::to_string(&StartCommand {
      conf,
      cycle_origin: self.cycle_origin,
    })?;
    let now = self.simulation.get_global_time();
    for target in [msg::LOAD, msg::COMPUTE, msg::STORE, msg::PROFILER] {
      inject_message(&mut self.simulation, target, msg::START, &content);
    }
    log::info!("accelerator start at t={:.1}: {:?}", now, conf);
    Ok(())
  }

  /// Advances the simulation by one step.
  ///
  /// Does nothing unless a run is in progress. Fails when no model can
  /// make progress or the run exceeds its cycle limit.
  pub fn step(&mut self) -> Result<()> {
    if !self.is_running()? {
      return Ok(());
    }

    self.simulation.step()?;

    let status = self.status()?;
    if status.state != RunState::Running {
      return Ok(());
    }

    let elapsed = self.simulation.get_global_time() - status.started_at;
    if let Some(limit) = self.max_cycles {
      if elapsed > limit as f64 {
        self.abort()?;
        return Err(ConvError::CycleLimit { limit });
      }
    }

    if self.simulation.get_messages().is_empty() && self.stages_idle() {
      self.abort()?;
      return Err(ConvError::Stalled { cycle: elapsed });
    }
    Ok(())
  }

  /// Steps until the finished signal is raised.
  pub fn run(&mut self) -> Result<RunStatus> {
    while self.is_running()? {
      self.step()?;
    }
    self.status()
  }

  /// True when every model except the free-running profiler is passive.
  fn stages_idle(&mut self) -> bool {
    self
      .simulation
      .models()
      .iter()
      .filter(|model| model.id() != msg::PROFILER)
      .all(|model| model.until_next_event() == INFINITY)
  }

  /// Rebuilds the models so the next `start` sees no in-flight transfer
  /// or queued message from the aborted run.
  fn abort(&mut self) -> Result<()> {
    self.status.lock()?.state = RunState::Idle;
    self.simulation = create_simulation(&self.hw, self.format, &self.pad, &self.dram, &self.status);
    log::warn!("run aborted, stage models rebuilt");
    Ok(())
  }
}
