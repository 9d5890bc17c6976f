use serde::Serialize;
use sim::models::Reportable;

use super::config::{validate_config, AppConfig};
use super::host::{golden_outputs, OutputDump, Workload};
use super::sim::{model_step, Command, Shell, StepMode, TraceWriter};
use super::utils::{print_profile, print_simulation_records};
use crate::arch::conv::{ConvAccelerator, ConvConf, RunStatus};
use crate::error::{ConvError, Result};

/// Outcome of one host-driven run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub conf: ConvConf,
  pub dump: OutputDump,
  /// Output elements that differ from the software reference.
  pub mismatches: usize,
  pub status: RunStatus,
}

impl RunReport {
  pub fn passed(&self) -> bool {
    self.mismatches == 0
  }

  /// Simulated cycles between the start command and the finished signal.
  pub fn elapsed(&self) -> f64 {
    self.status.finished_at - self.status.started_at
  }
}

/// Host harness: stages a workload, starts the accelerator, drives it to
/// completion and checks the dumped outputs against the reference.
pub struct Simulator {
  config: AppConfig,
  accelerator: ConvAccelerator,
  trace: Option<TraceWriter>,
}

impl Simulator {
  pub fn new(config: AppConfig) -> Result<Self> {
    validate_config(&config)?;
    let accelerator = config.accelerator()?;
    let trace = match config.trace_path() {
      Some(path) => Some(TraceWriter::create(&path)?),
      None => None,
    };
    Ok(Self {
      config,
      accelerator,
      trace,
    })
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  pub fn accelerator(&mut self) -> &mut ConvAccelerator {
    &mut self.accelerator
  }

  pub fn run(&mut self) -> Result<RunReport> {
    let conf = self.config.accelerator;
    let sim = &self.config.simulation;
    let layout = self.accelerator.layout(&conf);
    let workload = Workload::generate(sim.workload, &conf, sim.seed);
    workload.stage(&layout, self.accelerator.dram())?;
    log::info!(
      "{} workload staged, {} beats, {:?} weights",
      sim.workload,
      layout.total_beats(),
      layout.weight_layout()
    );

    self.accelerator.start(conf)?;
    let outcome = match StepMode::from_flag(sim.step_mode) {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    };
    if let Some(trace) = &mut self.trace {
      trace.flush()?;
    }
    outcome?;

    let dump = OutputDump::read(&conf, &layout, self.accelerator.dram())?;
    let mismatches = dump.validate(&golden_outputs(&conf, &workload));
    let status = self.accelerator.status()?;

    if self.config.simulation.verbose {
      print_simulation_records(self.accelerator.simulation());
    }
    if !self.config.simulation.quiet {
      print_profile(&dump);
    }

    let report = RunReport {
      conf,
      dump,
      mismatches,
      status,
    };
    if report.passed() {
      log::info!("run finished in {:.0} cycles, outputs match", report.elapsed());
    } else {
      log::error!("run finished with {} mismatched outputs", report.mismatches);
    }
    Ok(report)
  }

  fn run_continuous(&mut self) -> Result<()> {
    while self.accelerator.is_running()? {
      model_step(&mut self.accelerator, &mut self.trace)?;
    }
    Ok(())
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode - Enter steps once, 'si N' steps N times, 'st' shows status, 'c' continues, 'q' quits");
    let mut shell = Shell::new()?;
    while self.accelerator.is_running()? {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if !self.accelerator.is_running()? {
              break;
            }
            model_step(&mut self.accelerator, &mut self.trace)?;
          }
          println!("t={:.1}", self.accelerator.global_time());
        },
        Command::Status => self.print_status()?,
        Command::Continue => return self.run_continuous(),
        Command::Quit => return Err(ConvError::Interrupted),
      }
    }
    Ok(())
  }

  fn print_status(&mut self) -> Result<()> {
    let status = self.accelerator.status()?;
    println!(
      "t={:.1} state={:?} pending={}",
      self.accelerator.global_time(),
      status.state,
      self.accelerator.pending_messages().len()
    );
    for model in self.accelerator.simulation().models().iter() {
      println!("  {:<10} {}", model.id(), model.status());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::simulator::config::load_default_config;
  use crate::simulator::host::WorkloadKind;

  fn small_config() -> AppConfig {
    let mut config = load_default_config().unwrap();
    config.accelerator = ConvConf {
      s: 2,
      r: 2,
      q: 3,
      p: 2,
      m: 3,
      c: 2,
      ..ConvConf::default()
    };
    config.simulation.quiet = true;
    config
  }

  #[test]
  fn small_run_matches_reference() {
    let mut simulator = Simulator::new(small_config()).unwrap();
    let report = simulator.run().unwrap();
    assert!(report.passed());
    assert_eq!(report.dump.tiles.len(), 3);
    assert!(report.elapsed() > 0.0);
  }

  #[test]
  fn simulator_can_run_twice() {
    let mut config = small_config();
    config.simulation.workload = WorkloadKind::Random;
    let mut simulator = Simulator::new(config).unwrap();
    let first = simulator.run().unwrap();
    let second = simulator.run().unwrap();
    assert!(first.passed() && second.passed());
    assert_eq!(first.dump, second.dump);
  }

  #[test]
  fn rejects_invalid_configuration() {
    let mut config = small_config();
    config.accelerator.c = 0;
    assert!(matches!(Simulator::new(config), Err(ConvError::InvalidConfig(_))));
  }
}
