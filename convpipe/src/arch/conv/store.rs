use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::conf::{ConvConf, WeightLayout};
use super::handshake::{Channel, Latch};
use super::layout::MemoryLayout;
use super::msg::{self, BusySignal, StartCommand, WriteAck, WriteRequest};
use super::packer::{BeatFormat, Burst, Element, Packer};
use super::plm::{Owner, SharedScratchpad, Slot};
use super::profiler::ProfileSnapshot;
use crate::model_record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum StoreState {
  Idle,
  Tile(usize),    // waiting for output tile m
  Writing(usize), // waiting for the write acknowledge of tile m
  Snapshot,       // waiting for the profiling counters
  Trailer,        // waiting for the trailer write acknowledge
  Done,
}

/// Store stage: writes the output tiles back to back, then the
/// profiling trailer, then raises the finished signal.
///
/// A tile too short to complete a beat issues no write at all. Its
/// elements stay in the packer and leave with the next tile's burst, so
/// its store-time sample is 0 and the next tile's covers both.
#[derive(Debug, Clone)]
pub struct Store {
  pad: SharedScratchpad,
  format: BeatFormat,
  weight_layout: WeightLayout,

  state: StoreState,
  conf: ConvConf,
  layout: MemoryLayout,
  packer: Packer,
  ready: Latch,
  ack: Option<WriteAck>,
  snapshot: Option<ProfileSnapshot>,

  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl Store {
  pub fn new(pad: SharedScratchpad, format: BeatFormat, weight_layout: WeightLayout) -> Self {
    let conf = ConvConf::default();
    let layout = MemoryLayout::new(&conf, format, weight_layout);
    Self {
      pad,
      format,
      weight_layout,
      state: StoreState::Idle,
      conf,
      layout,
      packer: Packer::new(format, layout.output_beat()),
      ready: Latch::new(Channel::OutputReady),
      ack: None,
      snapshot: None,
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }

  fn write(burst: Burst) -> Result<ModelMessage, SimulationError> {
    msg::encode(
      msg::WRITE_REQ,
      &WriteRequest {
        offset: burst.offset,
        unit_size: msg::UNIT_SIZE,
        beats: burst.beats,
      },
    )
  }

  /// Frees the output slot of tile `m` and moves on to the next tile or,
  /// after the last one, to the trailer.
  fn release_tile(
    &mut self,
    m: usize,
    messages: &mut Vec<ModelMessage>,
    services: &mut Services,
  ) -> Result<(), SimulationError> {
    self
      .pad
      .lock()?
      .outputs
      .release(Slot::for_tile(m), Owner::Store)?;
    messages.push(msg::encode(msg::OUTPUT_CONSUMED, &m)?);
    model_record!(self, services, "output_consumed", format!("tile={}", m));
    if m + 1 < self.conf.tiles() {
      self.state = StoreState::Tile(m + 1);
    } else {
      // any busy edge pushed before reaches the profiler ahead of this request
      messages.push(msg::encode(msg::PROFILE_REQ, &self.conf.tiles())?);
      self.state = StoreState::Snapshot;
    }
    Ok(())
  }

  /// Packs tile `m`; the last tile also flushes the partial beat.
  fn pack_tile(&mut self, m: usize) -> Result<Burst, SimulationError> {
    let elements: Vec<Element> = {
      let pad = self.pad.lock()?;
      pad
        .outputs
        .get(Slot::for_tile(m), Owner::Store, self.conf.output_length())?
        .iter()
        .map(|&acc| acc as Element)
        .collect()
    };
    let mut burst = self.packer.push(&elements);
    if m + 1 == self.conf.tiles() {
      burst.beats.extend(self.packer.flush().beats);
    }
    Ok(burst)
  }
}

impl DevsModel for Store {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    match incoming_message.port_name.as_str() {
      msg::START => {
        let start: StartCommand = msg::decode(incoming_message)?;
        self.conf = start.conf;
        self.layout = MemoryLayout::new(&self.conf, self.format, self.weight_layout);
        self.packer = Packer::new(self.format, self.layout.output_beat());
        self.ready.clear();
        self.ack = None;
        self.snapshot = None;
        self.state = StoreState::Tile(0);
        model_record!(
          self,
          services,
          "start",
          format!(
            "output_addr={}, output_beat={}",
            self.conf.mem_output_addr,
            self.layout.output_beat()
          )
        );
      },
      msg::OUTPUT_READY => {
        let tile: usize = msg::decode(incoming_message)?;
        self.ready.raise(tile)?;
      },
      msg::WRITE_RESP => {
        let ack: WriteAck = msg::decode(incoming_message)?;
        if self.ack.replace(ack).is_some() {
          log::error!("store: write acknowledge arrived twice");
          return Err(SimulationError::InvalidModelState);
        }
      },
      msg::PROFILE_RESP => {
        self.snapshot = Some(msg::decode(incoming_message)?);
      },
      other => {
        log::warn!("store: ignoring message on port {}", other);
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
        StoreState::Tile(m) => {
          if !self.ready.take(m)? {
            break;
          }
          let burst = self.pack_tile(m)?;
          model_record!(
            self,
            services,
            "store_tile",
            format!("tile={}, offset={}, beats={}", m, burst.offset, burst.beats.len())
          );
          if burst.beats.is_empty() {
            // nothing to write, the elements wait in the packer
            self.release_tile(m, &mut messages, services)?;
            continue;
          }
          messages.push(msg::encode(msg::BUSY, &BusySignal { tile: m, busy: true })?);
          messages.push(Self::write(burst)?);
          self.state = StoreState::Writing(m);
        },
        StoreState::Writing(m) => {
          if self.ack.take().is_none() {
            break;
          }
          messages.push(msg::encode(msg::BUSY, &BusySignal { tile: m, busy: false })?);
          self.release_tile(m, &mut messages, services)?;
        },
        StoreState::Snapshot => {
          let Some(snapshot) = self.snapshot.take() else { break };
          debug_assert_eq!(self.packer.cursor(), self.layout.trailer_beat());
          let burst = self.packer.push_beats(&snapshot.trailer());
          model_record!(
            self,
            services,
            "store_trailer",
            format!(
              "offset={}, cycles={}, overflow={}",
              burst.offset, snapshot.cycles, snapshot.overflow
            )
          );
          messages.push(Self::write(burst)?);
          self.state = StoreState::Trailer;
        },
        StoreState::Trailer => {
          if self.ack.take().is_none() {
            break;
          }
          messages.push(msg::encode(msg::FINISHED, &self.packer.cursor())?);
          model_record!(self, services, "finished", format!("end_beat={}", self.packer.cursor()));
          self.state = StoreState::Done;
        },
        StoreState::Idle | StoreState::Done => break,
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

impl Reportable for Store {
  fn status(&self) -> String {
    format!(
      "state={:?}, cursor={}, pending={}",
      self.state,
      self.packer.cursor(),
      self.packer.pending()
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for Store {}

impl SerializableModel for Store {
  fn get_type(&self) -> &'static str {
    "Store"
  }
}
