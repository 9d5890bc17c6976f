use sim::utils::errors::SimulationError;
use thiserror::Error;

use crate::arch::conv::packer::PackError;

#[derive(Debug, Error)]
pub enum ConvError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse TOML: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("failed to render TOML: {0}")]
  TomlRender(#[from] toml::ser::Error),

  #[error("configuration error: {0}")]
  ConfigSource(#[from] config::ConfigError),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("simulation error: {0:?}")]
  Simulation(SimulationError),

  #[error("output stream: {0}")]
  Pack(#[from] PackError),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("pipeline stalled at cycle {cycle}: no model can make progress")]
  Stalled { cycle: f64 },

  #[error("run exceeded the cycle limit of {limit}")]
  CycleLimit { limit: u64 },

  #[error("memory access out of range: beat {offset} + {length}")]
  OutOfRange { offset: usize, length: usize },

  #[error("shared accelerator state is poisoned")]
  Poisoned,

  #[error("run interrupted by the user")]
  Interrupted,
}

impl From<SimulationError> for ConvError {
  fn from(err: SimulationError) -> Self {
    ConvError::Simulation(err)
  }
}

pub type Result<T> = std::result::Result<T, ConvError>;
