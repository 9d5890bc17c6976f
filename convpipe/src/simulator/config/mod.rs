pub mod config;

pub use config::{
  load_and_merge_configs, load_default_config, load_layered_config, validate_config, AppConfig, CliOverrides,
  SimulationSection,
};
