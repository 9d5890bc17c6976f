use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;
use std::sync::{Arc, Mutex, MutexGuard};

use super::msg::{self, ReadRequest, ReadResponse, WriteAck, WriteRequest};
use super::packer::Beat;
use crate::error::{ConvError, Result};
use crate::model_record;

/// External linear address space, addressed in beats.
#[derive(Debug, Clone, Default)]
pub struct Dram(Arc<Mutex<Vec<Beat>>>);

impl Dram {
  pub fn new(beats: usize) -> Self {
    Self(Arc::new(Mutex::new(vec![0; beats])))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<Beat>>> {
    self.0.lock().map_err(|_| ConvError::Poisoned)
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.lock()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.lock()?.is_empty())
  }

  /// Zero-fills the window and makes it `beats` long.
  pub fn reset(&self, beats: usize) -> Result<()> {
    let mut memory = self.lock()?;
    memory.clear();
    memory.resize(beats, 0);
    Ok(())
  }

  pub fn read(&self, offset: usize, length: usize) -> Result<Vec<Beat>> {
    let memory = self.lock()?;
    memory
      .get(offset..offset + length)
      .map(<[Beat]>::to_vec)
      .ok_or(ConvError::OutOfRange { offset, length })
  }

  pub fn write(&self, offset: usize, beats: &[Beat]) -> Result<()> {
    let mut memory = self.lock()?;
    let length = beats.len();
    memory
      .get_mut(offset..offset + length)
      .ok_or(ConvError::OutOfRange { offset, length })?
      .copy_from_slice(beats);
    Ok(())
  }

  pub fn contents(&self) -> Result<Vec<Beat>> {
    Ok(self.lock()?.clone())
  }
}

#[derive(Debug, Clone)]
struct Pending<T> {
  remaining: f64,
  request: T,
}

/// Transfer Unit: one read channel for the Load stage and one write
/// channel for the Store stage, each with a single outstanding request.
/// A request of `n` beats completes `n * beat_latency` cycles after it
/// is accepted.
#[derive(Debug, Clone)]
pub struct TransferUnit {
  dram: Dram,
  beat_latency: f64,
  read: Option<Pending<ReadRequest>>,
  write: Option<Pending<WriteRequest>>,
  records: Vec<ModelRecord>,
}

impl TransferUnit {
  pub fn new(dram: Dram, beat_latency: u32) -> Self {
    Self {
      dram,
      beat_latency: f64::from(beat_latency),
      read: None,
      write: None,
      records: Vec::new(),
    }
  }

  fn latency(&self, beats: usize) -> f64 {
    self.beat_latency * beats as f64
  }

  fn complete_read(&mut self, request: ReadRequest, services: &mut Services) -> std::result::Result<ModelMessage, SimulationError> {
    let beats = self.dram.read(request.offset, request.length).map_err(|e| {
      log::error!("read of {:?} failed: {}", request, e);
      SimulationError::InvalidModelState
    })?;
    model_record!(
      self,
      services,
      "read_done",
      format!("offset={}, beats={}", request.offset, request.length)
    );
    msg::encode(
      msg::READ_RESP,
      &ReadResponse {
        offset: request.offset,
        beats,
      },
    )
  }

  fn complete_write(&mut self, request: WriteRequest, services: &mut Services) -> std::result::Result<ModelMessage, SimulationError> {
    self.dram.write(request.offset, &request.beats).map_err(|e| {
      log::error!("write at beat {} failed: {}", request.offset, e);
      SimulationError::InvalidModelState
    })?;
    model_record!(
      self,
      services,
      "write_done",
      format!("offset={}, beats={}", request.offset, request.beats.len())
    );
    msg::encode(
      msg::WRITE_RESP,
      &WriteAck {
        offset: request.offset,
        length: request.beats.len(),
      },
    )
  }
}

impl DevsModel for TransferUnit {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> std::result::Result<(), SimulationError> {
    match incoming_message.port_name.as_str() {
      msg::READ_REQ => {
        if self.read.is_some() {
          log::error!("read channel already has an outstanding request");
          return Err(SimulationError::InvalidModelState);
        }
        let request: ReadRequest = msg::decode(incoming_message)?;
        model_record!(
          self,
          services,
          "read_req",
          format!("offset={}, beats={}", request.offset, request.length)
        );
        self.read = Some(Pending {
          remaining: self.latency(request.length),
          request,
        });
      },
      msg::WRITE_REQ => {
        if self.write.is_some() {
          log::error!("write channel already has an outstanding request");
          return Err(SimulationError::InvalidModelState);
        }
        let request: WriteRequest = msg::decode(incoming_message)?;
        model_record!(
          self,
          services,
          "write_req",
          format!("offset={}, beats={}", request.offset, request.beats.len())
        );
        self.write = Some(Pending {
          remaining: self.latency(request.beats.len()),
          request,
        });
      },
      other => {
        log::warn!("dma: ignoring message on port {}", other);
      },
    }
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> std::result::Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    if let Some(pending) = self.read.take() {
      if pending.remaining <= 0.0 {
        messages.push(self.complete_read(pending.request, services)?);
      } else {
        self.read = Some(pending);
      }
    }

    if let Some(pending) = self.write.take() {
      if pending.remaining <= 0.0 {
        messages.push(self.complete_write(pending.request, services)?);
      } else {
        self.write = Some(pending);
      }
    }

    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    if let Some(pending) = self.read.as_mut() {
      pending.remaining -= time_delta;
    }
    if let Some(pending) = self.write.as_mut() {
      pending.remaining -= time_delta;
    }
  }

  fn until_next_event(&self) -> f64 {
    let read = self.read.as_ref().map_or(INFINITY, |p| p.remaining);
    let write = self.write.as_ref().map_or(INFINITY, |p| p.remaining);
    f64::min(read, write)
  }
}

impl Reportable for TransferUnit {
  fn status(&self) -> String {
    format!(
      "read={}, write={}",
      if self.read.is_some() { "busy" } else { "idle" },
      if self.write.is_some() { "busy" } else { "idle" }
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for TransferUnit {}

impl SerializableModel for TransferUnit {
  fn get_type(&self) -> &'static str {
    "TransferUnit"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dram_reads_back_written_beats() {
    let dram = Dram::new(8);
    dram.write(2, &[7, 8, 9]).unwrap();
    assert_eq!(dram.read(1, 4).unwrap(), vec![0, 7, 8, 9]);
  }

  #[test]
  fn out_of_range_access_is_reported() {
    let dram = Dram::new(4);
    assert!(matches!(
      dram.read(3, 2),
      Err(ConvError::OutOfRange { offset: 3, length: 2 })
    ));
    assert!(dram.write(4, &[1]).is_err());
  }

  #[test]
  fn reset_zero_fills_and_resizes() {
    let dram = Dram::new(2);
    dram.write(0, &[5, 5]).unwrap();
    dram.reset(3).unwrap();
    assert_eq!(dram.contents().unwrap(), vec![0, 0, 0]);
  }

  #[test]
  fn channels_are_timed_independently() {
    let mut unit = TransferUnit::new(Dram::new(16), 2);
    let mut services = Services::default();

    let read = msg::encode(
      msg::READ_REQ,
      &ReadRequest {
        offset: 0,
        length: 3,
        unit_size: msg::UNIT_SIZE,
      },
    )
    .unwrap();
    let write = msg::encode(
      msg::WRITE_REQ,
      &WriteRequest {
        offset: 4,
        unit_size: msg::UNIT_SIZE,
        beats: vec![1],
      },
    )
    .unwrap();
    unit.events_ext(&read, &mut services).unwrap();
    unit.events_ext(&write, &mut services).unwrap();
    assert_eq!(unit.until_next_event(), 2.0);

    unit.time_advance(2.0);
    let out = unit.events_int(&mut services).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].port_name, msg::WRITE_RESP);
    assert_eq!(unit.until_next_event(), 4.0);

    // a second read on a busy channel breaks the one-outstanding rule
    assert!(unit.events_ext(&read, &mut services).is_err());
  }
}
