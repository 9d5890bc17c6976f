use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::conf::{ConvConf, WeightLayout};
use super::handshake::{Channel, Latch};
use super::layout::MemoryLayout;
use super::msg::{self, BusySignal, ReadRequest, ReadResponse, StartCommand};
use super::packer::{Beat, BeatFormat, Unpacker};
use super::plm::{Owner, SharedScratchpad, Slot};
use crate::model_record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum LoadState {
  Idle,
  Start,
  Input,          // waiting for the input window beats
  Weight(usize),  // waiting for the beats of a weight tile
  Release(usize), // tile loaded, predecessor not yet consumed
  Done,
}

/// Load stage: fills the input window once, then streams one weight tile
/// per output channel into the ping/pong weight buffers.
#[derive(Debug, Clone)]
pub struct Load {
  pad: SharedScratchpad,
  format: BeatFormat,
  weight_layout: WeightLayout,

  state: LoadState,
  conf: ConvConf,
  layout: MemoryLayout,
  unpacker: Unpacker,
  inbound: Option<Vec<Beat>>,
  consumed: Latch,

  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl Load {
  pub fn new(pad: SharedScratchpad, format: BeatFormat, weight_layout: WeightLayout) -> Self {
    let conf = ConvConf::default();
    Self {
      pad,
      format,
      weight_layout,
      state: LoadState::Idle,
      conf,
      layout: MemoryLayout::new(&conf, format, weight_layout),
      unpacker: Unpacker::new(format, 0),
      inbound: None,
      consumed: Latch::new(Channel::WeightConsumed),
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }

  fn issue(&mut self, m: usize, messages: &mut Vec<ModelMessage>, services: &mut Services) -> Result<(), SimulationError> {
    let slot = Slot::for_tile(m);
    self.pad.lock()?.weights.claim(slot, Owner::Load)?;

    let plan = self.unpacker.plan(self.layout.weight_length());
    debug_assert_eq!(
      self.unpacker.need_shift(),
      self.layout.weight_tile_start(m) % self.format.elements_per_beat() != 0
    );
    messages.push(msg::encode(msg::BUSY, &BusySignal { tile: m, busy: true })?);
    messages.push(msg::encode(
      msg::READ_REQ,
      &ReadRequest {
        offset: plan.offset,
        length: plan.length,
        unit_size: msg::UNIT_SIZE,
      },
    )?);
    model_record!(
      self,
      services,
      "load_weight",
      format!(
        "tile={}, slot={:?}, offset={}, beats={}, need_shift={}",
        m,
        slot,
        plan.offset,
        plan.length,
        self.unpacker.need_shift()
      )
    );
    self.state = LoadState::Weight(m);
    Ok(())
  }

  fn after_region(&mut self) {
    if self.weight_layout == WeightLayout::Aligned {
      self.unpacker.align();
    }
  }

  fn next_tile(&mut self, m: usize, messages: &mut Vec<ModelMessage>, services: &mut Services) -> Result<(), SimulationError> {
    if m < self.conf.tiles() {
      self.issue(m, messages, services)
    } else {
      model_record!(self, services, "done", format!("tiles={}", m));
      self.state = LoadState::Done;
      Ok(())
    }
  }
}

impl DevsModel for Load {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    match incoming_message.port_name.as_str() {
      msg::START => {
        let start: StartCommand = msg::decode(incoming_message)?;
        self.conf = start.conf;
        self.layout = MemoryLayout::new(&self.conf, self.format, self.weight_layout);
        self.unpacker = Unpacker::new(self.format, 0);
        self.inbound = None;
        self.consumed.clear();
        self.state = LoadState::Start;
        model_record!(self, services, "start", format!("{:?}", self.conf));
      },
      msg::READ_RESP => {
        let response: ReadResponse = msg::decode(incoming_message)?;
        if self.inbound.replace(response.beats).is_some() {
          log::error!("load: read response arrived before the previous one was consumed");
          return Err(SimulationError::InvalidModelState);
        }
      },
      msg::WEIGHT_CONSUMED => {
        let tile: usize = msg::decode(incoming_message)?;
        self.consumed.raise(tile)?;
      },
      other => {
        log::warn!("load: ignoring message on port {}", other);
        return Ok(());
      },
    }
    self.until_next_event = 0.0;
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    loop {
      match self.state {
        LoadState::Start => {
          let plan = self.unpacker.plan(self.layout.input_length());
          messages.push(msg::encode(
            msg::READ_REQ,
            &ReadRequest {
              offset: plan.offset,
              length: plan.length,
              unit_size: msg::UNIT_SIZE,
            },
          )?);
          model_record!(self, services, "load_input", format!("beats={}", plan.length));
          self.state = LoadState::Input;
        },
        LoadState::Input => {
          let Some(beats) = self.inbound.take() else { break };
          {
            let mut pad = self.pad.lock()?;
            let dest = pad.input.write(self.layout.input_length())?;
            self.unpacker.fill(&beats, dest)?;
            pad.input.seal();
          }
          self.after_region();
          model_record!(
            self,
            services,
            "input_loaded",
            format!("elements={}", self.layout.input_length())
          );
          self.next_tile(0, &mut messages, services)?;
        },
        LoadState::Weight(m) => {
          let Some(beats) = self.inbound.take() else { break };
          {
            let mut pad = self.pad.lock()?;
            let dest = pad
              .weights
              .get_mut(Slot::for_tile(m), Owner::Load, self.layout.weight_length())?;
            self.unpacker.fill(&beats, dest)?;
          }
          self.after_region();
          messages.push(msg::encode(msg::BUSY, &BusySignal { tile: m, busy: false })?);
          self.state = LoadState::Release(m);
        },
        LoadState::Release(m) => {
          // at most one tile ahead of compute
          if m > 0 && !self.consumed.take(m - 1)? {
            break;
          }
          self
            .pad
            .lock()?
            .weights
            .transfer(Slot::for_tile(m), Owner::Load, Owner::Compute)?;
          messages.push(msg::encode(msg::WEIGHT_READY, &m)?);
          model_record!(self, services, "weight_ready", format!("tile={}", m));
          self.next_tile(m + 1, &mut messages, services)?;
        },
        LoadState::Idle | LoadState::Done => break,
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

impl Reportable for Load {
  fn status(&self) -> String {
    format!("state={:?}, need_shift={}", self.state, self.unpacker.need_shift())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for Load {}

impl SerializableModel for Load {
  fn get_type(&self) -> &'static str {
    "Load"
  }
}
