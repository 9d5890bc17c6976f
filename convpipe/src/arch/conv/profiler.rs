use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;
use std::sync::{Arc, Mutex, MutexGuard};

use super::counters::{CycleCounter, StageCounter};
use super::msg::{self, BusySignal, StartCommand};
use crate::error::{ConvError, Result};
use crate::model_record;

/// Counter values handed to the Store stage for the output trailer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
  pub cycles: u32,
  pub overflow: bool,
  pub load: Vec<u32>,
  pub compute: Vec<u32>,
  pub store: Vec<u32>,
}

impl ProfileSnapshot {
  /// Trailer values in stream order, one beat each.
  pub fn trailer(&self) -> Vec<u64> {
    let mut values = Vec::with_capacity(2 + self.load.len() + self.compute.len() + self.store.len());
    values.push(u64::from(self.cycles));
    values.push(u64::from(self.overflow));
    values.extend(self.load.iter().map(|&v| u64::from(v)));
    values.extend(self.compute.iter().map(|&v| u64::from(v)));
    values.extend(self.store.iter().map(|&v| u64::from(v)));
    values
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
  #[default]
  Idle,
  Running,
  Finished,
}

/// Run-level signals observed by the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatus {
  pub state: RunState,
  pub started_at: f64,
  pub finished_at: f64,
  /// Counters as they stood when the finished signal was raised.
  pub last: Option<ProfileSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct SharedRunStatus(Arc<Mutex<RunStatus>>);

impl SharedRunStatus {
  pub fn lock(&self) -> Result<MutexGuard<'_, RunStatus>> {
    self.0.lock().map_err(|_| ConvError::Poisoned)
  }

  fn update(&self, f: impl FnOnce(&mut RunStatus)) -> std::result::Result<(), SimulationError> {
    let mut status = self.0.lock().map_err(|_| SimulationError::InvalidModelState)?;
    f(&mut status);
    Ok(())
  }
}

/// Free-running counters of the accelerator.
///
/// Ticks once per cycle from `start` to `finished`. The three stage
/// counters follow the stages' busy signals; the global counter spans the
/// whole run.
#[derive(Debug, Clone)]
pub struct Profiler {
  status: SharedRunStatus,
  next_tick: f64,
  reply_pending: bool,
  cycle: CycleCounter,
  load: StageCounter,
  compute: StageCounter,
  store: StageCounter,
  records: Vec<ModelRecord>,
}

impl Profiler {
  pub fn new(status: SharedRunStatus) -> Self {
    Self {
      status,
      next_tick: INFINITY,
      reply_pending: false,
      cycle: CycleCounter::default(),
      load: StageCounter::default(),
      compute: StageCounter::default(),
      store: StageCounter::default(),
      records: Vec::new(),
    }
  }

  fn snapshot(&self) -> ProfileSnapshot {
    ProfileSnapshot {
      cycles: self.cycle.value(),
      overflow: self.cycle.overflow(),
      load: self.load.samples().to_vec(),
      compute: self.compute.samples().to_vec(),
      store: self.store.samples().to_vec(),
    }
  }

  fn stage(&mut self, port: &str) -> Option<&mut StageCounter> {
    match port {
      msg::LOAD_BUSY => Some(&mut self.load),
      msg::COMPUTE_BUSY => Some(&mut self.compute),
      msg::STORE_BUSY => Some(&mut self.store),
      _ => None,
    }
  }
}

impl DevsModel for Profiler {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> std::result::Result<(), SimulationError> {
    let port = incoming_message.port_name.as_str();
    match port {
      msg::START => {
        let start: StartCommand = msg::decode(incoming_message)?;
        let tiles = start.conf.tiles();
        self.cycle = CycleCounter::starting_at(start.cycle_origin);
        self.load = StageCounter::new(tiles);
        self.compute = StageCounter::new(tiles);
        self.store = StageCounter::new(tiles);
        self.reply_pending = false;
        self.next_tick = 1.0;
        let now = services.global_time();
        self.status.update(|s| {
          s.state = RunState::Running;
          s.started_at = now;
          s.finished_at = now;
          s.last = None;
        })?;
        model_record!(self, services, "start", format!("origin={}", start.cycle_origin));
      },
      msg::LOAD_BUSY | msg::COMPUTE_BUSY | msg::STORE_BUSY => {
        let signal: BusySignal = msg::decode(incoming_message)?;
        if let Some(counter) = self.stage(port) {
          if signal.busy {
            counter.rise(signal.tile);
          } else {
            counter.fall(signal.tile);
          }
        }
        model_record!(
          self,
          services,
          port,
          format!("tile={}, busy={}", signal.tile, signal.busy)
        );
      },
      msg::PROFILE_REQ => {
        self.reply_pending = true;
      },
      msg::FINISHED => {
        self.next_tick = INFINITY;
        let now = services.global_time();
        let last = self.snapshot();
        log::info!(
          "accelerator finished at t={:.1}, cycles={}, overflow={}",
          now,
          last.cycles,
          last.overflow
        );
        self.status.update(|s| {
          s.state = RunState::Finished;
          s.finished_at = now;
          s.last = Some(last);
        })?;
        model_record!(self, services, "finished", format!("cycles={}", self.cycle.value()));
      },
      other => {
        log::warn!("profiler: ignoring message on port {}", other);
      },
    }
    Ok(())
  }

  fn events_int(&mut self, _services: &mut Services) -> std::result::Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    if self.next_tick <= 0.0 {
      self.cycle.tick();
      self.load.tick();
      self.compute.tick();
      self.store.tick();
      self.next_tick = 1.0;
    }

    if self.reply_pending {
      self.reply_pending = false;
      messages.push(msg::encode(msg::PROFILE_RESP, &self.snapshot())?);
    }

    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.next_tick -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    if self.reply_pending {
      0.0
    } else {
      self.next_tick
    }
  }
}

impl Reportable for Profiler {
  fn status(&self) -> String {
    format!(
      "cycles={}, overflow={}, load={}, compute={}, store={}",
      self.cycle.value(),
      self.cycle.overflow(),
      self.load.value(),
      self.compute.value(),
      self.store.value()
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for Profiler {}

impl SerializableModel for Profiler {
  fn get_type(&self) -> &'static str {
    "Profiler"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::conv::conf::ConvConf;

  fn start(profiler: &mut Profiler, services: &mut Services, tiles: i32) {
    let command = StartCommand {
      conf: ConvConf {
        m: tiles,
        ..ConvConf::default()
      },
      cycle_origin: 0,
    };
    profiler
      .events_ext(&msg::encode(msg::START, &command).unwrap(), services)
      .unwrap();
  }

  fn tick(profiler: &mut Profiler, services: &mut Services) {
    profiler.time_advance(profiler.until_next_event());
    profiler.events_int(services).unwrap();
  }

  fn busy(port: &str, tile: usize, busy: bool) -> ModelMessage {
    msg::encode(port, &BusySignal { tile, busy }).unwrap()
  }

  #[test]
  fn busy_windows_become_per_tile_samples() {
    let status = SharedRunStatus::default();
    let mut profiler = Profiler::new(status.clone());
    let mut services = Services::default();
    start(&mut profiler, &mut services, 1);
    assert_eq!(status.lock().unwrap().state, RunState::Running);

    profiler.events_ext(&busy(msg::COMPUTE_BUSY, 0, true), &mut services).unwrap();
    for _ in 0..4 {
      tick(&mut profiler, &mut services);
    }
    profiler.events_ext(&busy(msg::COMPUTE_BUSY, 0, false), &mut services).unwrap();
    tick(&mut profiler, &mut services);

    let snapshot = profiler.snapshot();
    assert_eq!(snapshot.compute, vec![4]);
    assert_eq!(snapshot.load, vec![0]);
    assert_eq!(snapshot.cycles, 5);
  }

  #[test]
  fn snapshot_request_is_answered_without_a_tick() {
    let mut profiler = Profiler::new(SharedRunStatus::default());
    let mut services = Services::default();
    start(&mut profiler, &mut services, 2);
    tick(&mut profiler, &mut services);

    let request = ModelMessage {
      port_name: msg::PROFILE_REQ.to_string(),
      content: String::new(),
    };
    profiler.events_ext(&request, &mut services).unwrap();
    assert_eq!(profiler.until_next_event(), 0.0);
    let out = profiler.events_int(&mut services).unwrap();
    let snapshot: ProfileSnapshot = msg::decode(&out[0]).unwrap();
    assert_eq!(snapshot.cycles, 1);
    assert_eq!(snapshot.trailer(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(profiler.until_next_event(), 1.0);
  }

  #[test]
  fn finished_stops_the_clock() {
    let status = SharedRunStatus::default();
    let mut profiler = Profiler::new(status.clone());
    let mut services = Services::default();
    start(&mut profiler, &mut services, 0);
    tick(&mut profiler, &mut services);
    let finished = ModelMessage {
      port_name: msg::FINISHED.to_string(),
      content: String::new(),
    };
    profiler.events_ext(&finished, &mut services).unwrap();
    assert_eq!(profiler.until_next_event(), INFINITY);
    let status = status.lock().unwrap();
    assert_eq!(status.state, RunState::Finished);
    assert_eq!(status.last.as_ref().map(|s| s.cycles), Some(1));
  }
}
