use serde::{Deserialize, Serialize};
use sim::simulator::Connector;
use sim::utils::errors::SimulationError;

use super::msg::{COMPUTE, LOAD, OUTPUT_CONSUMED, OUTPUT_READY, STORE, WEIGHT_CONSUMED, WEIGHT_READY};

/// The four directed handshake channels between adjacent stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
  /// load -> compute
  WeightReady,
  /// compute -> load
  WeightConsumed,
  /// compute -> store
  OutputReady,
  /// store -> compute
  OutputConsumed,
}

impl Channel {
  pub const ALL: [Channel; 4] = [
    Channel::WeightReady,
    Channel::WeightConsumed,
    Channel::OutputReady,
    Channel::OutputConsumed,
  ];

  /// Port name, identical on both ends.
  pub fn port(self) -> &'static str {
    match self {
      Channel::WeightReady => WEIGHT_READY,
      Channel::WeightConsumed => WEIGHT_CONSUMED,
      Channel::OutputReady => OUTPUT_READY,
      Channel::OutputConsumed => OUTPUT_CONSUMED,
    }
  }

  pub fn endpoints(self) -> (&'static str, &'static str) {
    match self {
      Channel::WeightReady => (LOAD, COMPUTE),
      Channel::WeightConsumed => (COMPUTE, LOAD),
      Channel::OutputReady => (COMPUTE, STORE),
      Channel::OutputConsumed => (STORE, COMPUTE),
    }
  }

  pub fn connector(self) -> Connector {
    let (source, target) = self.endpoints();
    Connector::new(
      format!("{}_{}_{}", source, target, self.port()),
      source.to_string(),
      target.to_string(),
      self.port().to_string(),
      self.port().to_string(),
    )
  }
}

/// Receiving end of a handshake channel.
///
/// The sender raises it with a tile index and the receiver clears it when
/// it observes the credit. A second credit on a held latch, or a credit
/// for the wrong tile, is a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Latch {
  channel: Channel,
  credit: Option<usize>,
}

impl Latch {
  pub fn new(channel: Channel) -> Self {
    Self { channel, credit: None }
  }

  pub fn is_set(&self) -> bool {
    self.credit.is_some()
  }

  pub fn raise(&mut self, tile: usize) -> Result<(), SimulationError> {
    if let Some(held) = self.credit {
      log::error!(
        "{:?}: credit for tile {} raised while tile {} is unobserved",
        self.channel,
        tile,
        held
      );
      return Err(SimulationError::InvalidModelState);
    }
    self.credit = Some(tile);
    Ok(())
  }

  /// Clears the latch if it holds the credit for `tile`.
  ///
  /// Returns `Ok(false)` when the latch is empty; a credit for any other
  /// tile is an error.
  pub fn take(&mut self, tile: usize) -> Result<bool, SimulationError> {
    match self.credit {
      None => Ok(false),
      Some(held) if held == tile => {
        self.credit = None;
        Ok(true)
      },
      Some(held) => {
        log::error!("{:?}: expected tile {}, latch holds tile {}", self.channel, tile, held);
        Err(SimulationError::InvalidModelState)
      },
    }
  }

  pub fn clear(&mut self) {
    self.credit = None;
  }
}
