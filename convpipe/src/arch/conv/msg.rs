use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sim::models::ModelMessage;
use sim::utils::errors::SimulationError;

use super::conf::ConvConf;
use super::packer::Beat;

pub const LOAD: &str = "load";
pub const COMPUTE: &str = "compute";
pub const STORE: &str = "store";
pub const DMA: &str = "dma";
pub const PROFILER: &str = "profiler";

/// Source id of messages injected by the driver.
pub const HOST: &str = "host";

pub const START: &str = "start";
pub const BUSY: &str = "busy";
pub const READ_REQ: &str = "read_req";
pub const READ_RESP: &str = "read_resp";
pub const WRITE_REQ: &str = "write_req";
pub const WRITE_RESP: &str = "write_resp";
pub const PROFILE_REQ: &str = "profile_req";
pub const PROFILE_RESP: &str = "profile_resp";
pub const FINISHED: &str = "finished";
pub const LOAD_BUSY: &str = "load_busy";
pub const COMPUTE_BUSY: &str = "compute_busy";
pub const STORE_BUSY: &str = "store_busy";
pub const WEIGHT_READY: &str = "weight_ready";
pub const WEIGHT_CONSUMED: &str = "weight_consumed";
pub const OUTPUT_READY: &str = "output_ready";
pub const OUTPUT_CONSUMED: &str = "output_consumed";

/// Byte width of one element, carried for size bookkeeping only.
pub const UNIT_SIZE: usize = 4;

/// Latched by every model on `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
  pub conf: ConvConf,
  /// Initial value of the global cycle counter.
  pub cycle_origin: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusySignal {
  pub tile: usize,
  pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
  pub offset: usize,
  pub length: usize,
  pub unit_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
  pub offset: usize,
  pub beats: Vec<Beat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
  pub offset: usize,
  pub unit_size: usize,
  pub beats: Vec<Beat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
  pub offset: usize,
  pub length: usize,
}

pub fn encode<T: Serialize>(port: &str, payload: &T) -> Result<ModelMessage, SimulationError> {
  Ok(ModelMessage {
    port_name: port.to_string(),
    content: serde_json::to_string(payload).map_err(|_| SimulationError::InvalidModelState)?,
  })
}

pub fn decode<T: DeserializeOwned>(message: &ModelMessage) -> Result<T, SimulationError> {
  serde_json::from_str(&message.content).map_err(|e| {
    log::error!("malformed payload on {}: {}", message.port_name, e);
    SimulationError::InvalidModelState
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn payload_survives_the_port() {
    let request = ReadRequest {
      offset: 3,
      length: 7,
      unit_size: UNIT_SIZE,
    };
    let message = encode(READ_REQ, &request).unwrap();
    assert_eq!(message.port_name, READ_REQ);
    assert_eq!(decode::<ReadRequest>(&message).unwrap(), request);
  }

  #[test]
  fn wrong_payload_type_is_a_model_error() {
    let message = encode(BUSY, &BusySignal { tile: 0, busy: true }).unwrap();
    assert!(decode::<WriteAck>(&message).is_err());
  }
}
