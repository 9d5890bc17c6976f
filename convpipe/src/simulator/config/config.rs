use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::arch::conv::{ConvAccelerator, ConvConf, HwConfig, WeightLayout};
use crate::error::{ConvError, Result};
use crate::simulator::host::WorkloadKind;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Run-control options of the host harness.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationSection {
  pub quiet: bool,
  pub step_mode: bool,
  /// Print every model's event records after the run.
  pub verbose: bool,
  /// JSON-lines message trace; empty disables it.
  pub trace_file: String,
  pub max_cycles: u64,
  pub workload: WorkloadKind,
  pub seed: u64,
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      verbose: false,
      trace_file: String::new(),
      max_cycles: 10_000_000,
      workload: WorkloadKind::default(),
      seed: 42,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
  pub accelerator: ConvConf,
  pub hardware: HwConfig,
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn from_toml_str(text: &str) -> Result<Self> {
    Ok(toml::from_str(text)?)
  }

  pub fn to_toml_string(&self) -> Result<String> {
    Ok(toml::to_string_pretty(self)?)
  }

  pub fn trace_path(&self) -> Option<PathBuf> {
    let path = self.simulation.trace_file.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
  }

  /// Builds an accelerator for the hardware section.
  pub fn accelerator(&self) -> Result<ConvAccelerator> {
    Ok(ConvAccelerator::new(self.hardware)?.with_cycle_limit(self.simulation.max_cycles))
  }
}

/// Command-line overrides, applied on top of files and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub verbose: bool,
  pub trace_file: Option<String>,
  pub workload: Option<WorkloadKind>,
  pub seed: Option<u64>,
  pub max_cycles: Option<u64>,
  pub s: Option<i32>,
  pub r: Option<i32>,
  pub q: Option<i32>,
  pub p: Option<i32>,
  pub m: Option<i32>,
  pub c: Option<i32>,
  pub dma_width: Option<u32>,
  pub weight_layout: Option<WeightLayout>,
}

/// Built-in defaults only.
pub fn load_default_config() -> Result<AppConfig> {
  AppConfig::from_toml_str(DEFAULT_CONFIG)
}

/// Defaults, then the optional user file, then `CONVPIPE__SECTION__KEY`
/// environment variables.
pub fn load_layered_config(user_file: Option<&Path>) -> Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
  if let Some(path) = user_file {
    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
  }
  builder = builder.add_source(
    Environment::with_prefix("CONVPIPE")
      .prefix_separator("__")
      .separator("__")
      .try_parsing(true),
  );
  Ok(builder.build()?.try_deserialize()?)
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  let sim = &mut config.simulation;
  sim.quiet |= cli.quiet;
  sim.step_mode |= cli.step;
  sim.verbose |= cli.verbose;
  if let Some(file) = &cli.trace_file {
    sim.trace_file = file.clone();
  }
  if let Some(workload) = cli.workload {
    sim.workload = workload;
  }
  if let Some(seed) = cli.seed {
    sim.seed = seed;
  }
  if let Some(limit) = cli.max_cycles {
    sim.max_cycles = limit;
  }

  let acc = &mut config.accelerator;
  for (field, value) in [
    (&mut acc.s, cli.s),
    (&mut acc.r, cli.r),
    (&mut acc.q, cli.q),
    (&mut acc.p, cli.p),
    (&mut acc.m, cli.m),
    (&mut acc.c, cli.c),
  ] {
    if let Some(value) = value {
      *field = value;
    }
  }

  if let Some(width) = cli.dma_width {
    config.hardware.dma_width = width;
  }
  if let Some(layout) = cli.weight_layout {
    config.hardware.weight_layout = layout;
  }
}

/// The core trusts its registers; the harness refuses shapes it cannot run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
  let conf = &config.accelerator;
  let hw = &config.hardware;
  let invalid = |msg: String| -> Result<()> { Err(ConvError::InvalidConfig(msg)) };

  for (name, value) in [("S", conf.s), ("R", conf.r), ("Q", conf.q), ("P", conf.p), ("M", conf.m), ("C", conf.c)] {
    if value <= 0 {
      return invalid(format!("{} must be positive, got {}", name, value));
    }
  }
  if hw.beat_format().is_none() {
    return invalid(format!("dma_width must be 32 or 64, got {}", hw.dma_width));
  }
  if hw.beat_latency == 0 {
    return invalid("beat_latency must be at least 1".to_string());
  }
  if hw.macs_per_cycle == 0 {
    return invalid("macs_per_cycle must be at least 1".to_string());
  }
  for (region, needed, capacity) in [
    ("input window", conf.input_length(), hw.plm_input_words),
    ("weight tile", conf.weight_length(), hw.plm_weight_words),
    ("output tile", conf.output_length(), hw.plm_output_words),
  ] {
    if needed > capacity {
      return invalid(format!(
        "{} needs {} words, scratchpad holds {}",
        region, needed, capacity
      ));
    }
  }
  if config.simulation.max_cycles == 0 {
    return invalid("max_cycles must be positive".to_string());
  }
  Ok(())
}

/// Loads, layers, overrides and validates the configuration.
pub fn load_and_merge_configs(user_file: Option<&Path>, cli: &CliOverrides) -> Result<AppConfig> {
  let mut config = load_layered_config(user_file)?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
