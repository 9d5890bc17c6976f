use serde::{Deserialize, Serialize};
use sim::utils::errors::SimulationError;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::conf::HwConfig;
use super::packer::Element;

/// Accumulator width of the compute kernel.
pub type Acc = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
  Free,
  Load,
  Compute,
  Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
  Ping,
  Pong,
}

impl Slot {
  /// Even tiles use ping, odd tiles use pong.
  pub fn for_tile(m: usize) -> Self {
    if m % 2 == 0 {
      Slot::Ping
    } else {
      Slot::Pong
    }
  }

  fn index(self) -> usize {
    match self {
      Slot::Ping => 0,
      Slot::Pong => 1,
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlmError {
  #[error("{slot:?} is held by {owner:?}, cannot be claimed")]
  NotFree { slot: Slot, owner: Owner },
  #[error("{slot:?} is held by {actual:?}, not {expected:?}")]
  NotOwner { slot: Slot, expected: Owner, actual: Owner },
  #[error("access of {len} words exceeds capacity {capacity}")]
  Capacity { len: usize, capacity: usize },
  #[error("input window is not sealed yet")]
  InputNotSealed,
  #[error("input window is sealed for the rest of the run")]
  InputSealed,
  #[error("scratchpad lock poisoned")]
  Poisoned,
}

impl From<PlmError> for SimulationError {
  fn from(err: PlmError) -> Self {
    log::error!("scratchpad: {}", err);
    SimulationError::InvalidModelState
  }
}

/// Two buffers selected by tile parity, each with exactly one owner.
///
/// Producers claim a free slot and hand it to the consumer when they
/// raise the ready signal; the consumer frees it on release. Every access
/// names the accessing stage and is refused unless that stage owns the
/// slot.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
  buffers: [Vec<T>; 2],
  owners: [Owner; 2],
}

impl<T: Copy + Default> PingPong<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      buffers: [vec![T::default(); capacity], vec![T::default(); capacity]],
      owners: [Owner::Free; 2],
    }
  }

  pub fn capacity(&self) -> usize {
    self.buffers[0].len()
  }

  pub fn owner(&self, slot: Slot) -> Owner {
    self.owners[slot.index()]
  }

  pub fn claim(&mut self, slot: Slot, who: Owner) -> Result<(), PlmError> {
    match self.owner(slot) {
      Owner::Free => {
        self.owners[slot.index()] = who;
        Ok(())
      },
      owner => Err(PlmError::NotFree { slot, owner }),
    }
  }

  pub fn transfer(&mut self, slot: Slot, from: Owner, to: Owner) -> Result<(), PlmError> {
    self.check(slot, from)?;
    self.owners[slot.index()] = to;
    Ok(())
  }

  pub fn release(&mut self, slot: Slot, who: Owner) -> Result<(), PlmError> {
    self.transfer(slot, who, Owner::Free)
  }

  pub fn get(&self, slot: Slot, who: Owner, len: usize) -> Result<&[T], PlmError> {
    self.check(slot, who)?;
    self.check_len(len)?;
    Ok(&self.buffers[slot.index()][..len])
  }

  pub fn get_mut(&mut self, slot: Slot, who: Owner, len: usize) -> Result<&mut [T], PlmError> {
    self.check(slot, who)?;
    self.check_len(len)?;
    Ok(&mut self.buffers[slot.index()][..len])
  }

  fn check(&self, slot: Slot, who: Owner) -> Result<(), PlmError> {
    let actual = self.owner(slot);
    if actual == who {
      Ok(())
    } else {
      Err(PlmError::NotOwner {
        slot,
        expected: who,
        actual,
      })
    }
  }

  fn check_len(&self, len: usize) -> Result<(), PlmError> {
    if len <= self.capacity() {
      Ok(())
    } else {
      Err(PlmError::Capacity {
        len,
        capacity: self.capacity(),
      })
    }
  }

  fn reset(&mut self) {
    self.owners = [Owner::Free; 2];
  }
}

/// Input window: written once by Load, then read-only for the run.
#[derive(Debug, Clone)]
pub struct InputWindow {
  data: Vec<Element>,
  sealed: bool,
}

impl InputWindow {
  pub fn new(capacity: usize) -> Self {
    Self {
      data: vec![0; capacity],
      sealed: false,
    }
  }

  pub fn is_sealed(&self) -> bool {
    self.sealed
  }

  pub fn write(&mut self, len: usize) -> Result<&mut [Element], PlmError> {
    if self.sealed {
      return Err(PlmError::InputSealed);
    }
    if len > self.data.len() {
      return Err(PlmError::Capacity {
        len,
        capacity: self.data.len(),
      });
    }
    Ok(&mut self.data[..len])
  }

  pub fn seal(&mut self) {
    self.sealed = true;
  }

  pub fn read(&self, len: usize) -> Result<&[Element], PlmError> {
    if !self.sealed {
      return Err(PlmError::InputNotSealed);
    }
    if len > self.data.len() {
      return Err(PlmError::Capacity {
        len,
        capacity: self.data.len(),
      });
    }
    Ok(&self.data[..len])
  }
}

/// Private local memories: the input window and the two ping/pong pairs.
#[derive(Debug, Clone)]
pub struct Scratchpad {
  pub input: InputWindow,
  pub weights: PingPong<Element>,
  pub outputs: PingPong<Acc>,
}

impl Scratchpad {
  pub fn new(hw: &HwConfig) -> Self {
    Self {
      input: InputWindow::new(hw.plm_input_words),
      weights: PingPong::new(hw.plm_weight_words),
      outputs: PingPong::new(hw.plm_output_words),
    }
  }

  /// Returns every buffer to the unowned state for a fresh run. Contents
  /// are left as they are; the next load overwrites them.
  pub fn reset(&mut self) {
    self.input.sealed = false;
    self.weights.reset();
    self.outputs.reset();
  }
}

/// Handle shared by the three stage models.
#[derive(Debug, Clone)]
pub struct SharedScratchpad(Arc<Mutex<Scratchpad>>);

impl SharedScratchpad {
  pub fn new(hw: &HwConfig) -> Self {
    Self(Arc::new(Mutex::new(Scratchpad::new(hw))))
  }

  pub fn lock(&self) -> Result<MutexGuard<'_, Scratchpad>, PlmError> {
    self.0.lock().map_err(|_| PlmError::Poisoned)
  }
}
