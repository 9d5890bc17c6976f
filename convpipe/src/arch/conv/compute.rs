use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::conf::{ConvConf, HwConfig};
use super::handshake::{Channel, Latch};
use super::msg::{self, BusySignal, StartCommand};
use super::packer::Element;
use super::plm::{Acc, Owner, SharedScratchpad, Slot};
use crate::model_record;

/// Direct convolution of one output tile over the resident input window.
///
/// `output[p*Q + q] = sum over c, r, s of input[c, p+r, q+s] * weights[c, r, s]`,
/// accumulated in 64 bits with wrap-around.
pub fn convolve_tile(conf: &ConvConf, input: &[Element], weights: &[Element], output: &mut [Acc]) {
  for p in 0..conf.output_height() {
    for q in 0..conf.output_width() {
      let mut acc: Acc = 0;
      for c in 0..conf.channels() {
        for r in 0..conf.kernel_height() {
          for s in 0..conf.kernel_width() {
            let x = Acc::from(input[conf.input_index(c, p + r, q + s)]);
            let w = Acc::from(weights[conf.weight_index(c, r, s)]);
            acc = acc.wrapping_add(x * w);
          }
        }
      }
      output[conf.output_index(p, q)] = acc;
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ComputeState {
  Idle,
  Weight(usize),  // waiting for weight tile m
  Busy(usize),    // multiply-accumulate in progress
  Release(usize), // output written, predecessor not yet stored
  Done,
}

/// Compute stage: one output tile per weight tile, ping/pong on both sides.
#[derive(Debug, Clone)]
pub struct Compute {
  pad: SharedScratchpad,
  hw: HwConfig,

  state: ComputeState,
  conf: ConvConf,
  ready: Latch,
  consumed: Latch,

  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl Compute {
  pub fn new(pad: SharedScratchpad, hw: HwConfig) -> Self {
    Self {
      pad,
      hw,
      state: ComputeState::Idle,
      conf: ConvConf::default(),
      ready: Latch::new(Channel::WeightReady),
      consumed: Latch::new(Channel::OutputConsumed),
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }

  fn run_tile(&mut self, m: usize) -> Result<(), SimulationError> {
    let slot = Slot::for_tile(m);
    let mut pad = self.pad.lock()?;
    pad.outputs.claim(slot, Owner::Compute)?;

    let pad = &mut *pad;
    let input = pad.input.read(self.conf.input_length())?;
    let weights = pad.weights.get(slot, Owner::Compute, self.conf.weight_length())?;
    let output = pad.outputs.get_mut(slot, Owner::Compute, self.conf.output_length())?;
    convolve_tile(&self.conf, input, weights, output);
    Ok(())
  }
}

impl DevsModel for Compute {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    match incoming_message.port_name.as_str() {
      msg::START => {
        let start: StartCommand = msg::decode(incoming_message)?;
        self.conf = start.conf;
        self.ready.clear();
        self.consumed.clear();
        self.state = ComputeState::Weight(0);
        model_record!(
          self,
          services,
          "start",
          format!("cycles_per_tile={}", self.hw.compute_cycles(&self.conf))
        );
      },
      msg::WEIGHT_READY => {
        let tile: usize = msg::decode(incoming_message)?;
        self.ready.raise(tile)?;
      },
      msg::OUTPUT_CONSUMED => {
        let tile: usize = msg::decode(incoming_message)?;
        self.consumed.raise(tile)?;
      },
      other => {
        log::warn!("compute: ignoring message on port {}", other);
        return Ok(());
      },
    }
    // a running tile keeps its own timer
    if !matches!(self.state, ComputeState::Busy(_)) {
      self.until_next_event = 0.0;
    }
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    loop {
      match self.state {
        ComputeState::Weight(m) => {
          if m >= self.conf.tiles() {
            model_record!(self, services, "done", format!("tiles={}", m));
            self.state = ComputeState::Done;
            continue;
          }
          if !self.ready.take(m)? {
            break;
          }
          self.run_tile(m)?;
          let cycles = self.hw.compute_cycles(&self.conf);
          messages.push(msg::encode(msg::BUSY, &BusySignal { tile: m, busy: true })?);
          model_record!(
            self,
            services,
            "compute",
            format!("tile={}, slot={:?}, cycles={}", m, Slot::for_tile(m), cycles)
          );
          self.state = ComputeState::Busy(m);
          self.until_next_event = cycles as f64;
          return Ok(messages);
        },
        ComputeState::Busy(m) => {
          self
            .pad
            .lock()?
            .weights
            .release(Slot::for_tile(m), Owner::Compute)?;
          messages.push(msg::encode(msg::BUSY, &BusySignal { tile: m, busy: false })?);
          messages.push(msg::encode(msg::WEIGHT_CONSUMED, &m)?);
          self.state = ComputeState::Release(m);
        },
        ComputeState::Release(m) => {
          if m > 0 && !self.consumed.take(m - 1)? {
            break;
          }
          self
            .pad
            .lock()?
            .outputs
            .transfer(Slot::for_tile(m), Owner::Compute, Owner::Store)?;
          messages.push(msg::encode(msg::OUTPUT_READY, &m)?);
          model_record!(self, services, "output_ready", format!("tile={}", m));
          self.state = ComputeState::Weight(m + 1);
        },
        ComputeState::Idle | ComputeState::Done => break,
      }
    }

    self.until_next_event = INFINITY;
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for Compute {
  fn status(&self) -> String {
    format!("state={:?}", self.state)
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for Compute {}

impl SerializableModel for Compute {
  fn get_type(&self) -> &'static str {
    "Compute"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn small_conf() -> ConvConf {
    ConvConf {
      s: 2,
      r: 2,
      q: 2,
      p: 2,
      m: 1,
      c: 2,
      ..ConvConf::default()
    }
  }

  #[test]
  fn single_position_sums_the_window() {
    let conf = ConvConf {
      s: 3,
      r: 3,
      q: 1,
      p: 1,
      m: 1,
      c: 1,
      ..ConvConf::default()
    };
    let input: Vec<Element> = (1..=9).collect();
    let weights = vec![1; 9];
    let mut output = vec![0; 1];
    convolve_tile(&conf, &input, &weights, &mut output);
    assert_eq!(output, vec![45]);
  }

  #[test]
  fn window_slides_over_rows_and_channels() {
    let conf = small_conf();
    // two channels of 3 x 3
    let input: Vec<Element> = (0..18).collect();
    // picks the top-left of channel 0 and bottom-right of channel 1
    let weights = vec![1, 0, 0, 0, 0, 0, 0, 2];
    let mut output = vec![0; 4];
    convolve_tile(&conf, &input, &weights, &mut output);
    let expect: Vec<Acc> = [(0, 0), (0, 1), (1, 0), (1, 1)]
      .iter()
      .map(|&(p, q)| {
        let top_left = input[conf.input_index(0, p, q)];
        let bottom_right = input[conf.input_index(1, p + 1, q + 1)];
        Acc::from(top_left) + 2 * Acc::from(bottom_right)
      })
      .collect();
    assert_eq!(output, expect);
  }

  #[test]
  fn accumulator_is_wider_than_elements() {
    let conf = ConvConf {
      s: 1,
      r: 1,
      q: 1,
      p: 1,
      m: 1,
      c: 2,
      ..ConvConf::default()
    };
    let input = vec![Element::MAX; 2];
    let weights = vec![Element::MAX; 2];
    let mut output = vec![0; 1];
    convolve_tile(&conf, &input, &weights, &mut output);
    assert_eq!(output[0], 2 * Acc::from(Element::MAX) * Acc::from(Element::MAX));
  }
}
