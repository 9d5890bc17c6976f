use sim::models::Model;
use sim::simulator::{Connector, Simulation};

use super::compute::Compute;
use super::conf::HwConfig;
use super::dma::{Dram, TransferUnit};
use super::handshake::Channel;
use super::load::Load;
use super::msg::{self, COMPUTE, DMA, LOAD, PROFILER, STORE};
use super::packer::BeatFormat;
use super::plm::SharedScratchpad;
use super::profiler::{Profiler, SharedRunStatus};
use super::store::Store;

fn connector(source: &str, target: &str, source_port: &str, target_port: &str) -> Connector {
  Connector::new(
    format!("{}_{}_{}", source, target, source_port),
    source.to_string(),
    target.to_string(),
    source_port.to_string(),
    target_port.to_string(),
  )
}

/// Wires the three stages, the Transfer Unit and the profiler.
pub fn create_simulation(
  hw: &HwConfig,
  format: BeatFormat,
  pad: &SharedScratchpad,
  dram: &Dram,
  status: &SharedRunStatus,
) -> Simulation {
  let models = vec![
    Model::new(
      String::from(LOAD),
      Box::new(Load::new(pad.clone(), format, hw.weight_layout)),
    ),
    Model::new(String::from(COMPUTE), Box::new(Compute::new(pad.clone(), *hw))),
    Model::new(
      String::from(STORE),
      Box::new(Store::new(pad.clone(), format, hw.weight_layout)),
    ),
    Model::new(
      String::from(DMA),
      Box::new(TransferUnit::new(dram.clone(), hw.beat_latency)),
    ),
    Model::new(String::from(PROFILER), Box::new(Profiler::new(status.clone()))),
  ];

  let mut connectors = vec![
    // data path
    connector(LOAD, DMA, msg::READ_REQ, msg::READ_REQ),
    connector(DMA, LOAD, msg::READ_RESP, msg::READ_RESP),
    connector(STORE, DMA, msg::WRITE_REQ, msg::WRITE_REQ),
    connector(DMA, STORE, msg::WRITE_RESP, msg::WRITE_RESP),
    // busy signals feed the stage counters
    connector(LOAD, PROFILER, msg::BUSY, msg::LOAD_BUSY),
    connector(COMPUTE, PROFILER, msg::BUSY, msg::COMPUTE_BUSY),
    connector(STORE, PROFILER, msg::BUSY, msg::STORE_BUSY),
    // trailer and completion
    connector(STORE, PROFILER, msg::PROFILE_REQ, msg::PROFILE_REQ),
    connector(PROFILER, STORE, msg::PROFILE_RESP, msg::PROFILE_RESP),
    connector(STORE, PROFILER, msg::FINISHED, msg::FINISHED),
  ];
  connectors.extend(Channel::ALL.iter().map(|channel| channel.connector()));

  Simulation::post(models, connectors)
}
