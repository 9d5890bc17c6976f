use serde::{Deserialize, Serialize};

/// Free-running wall-cycle counter with a sticky overflow flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounter {
  value: u32,
  overflow: bool,
}

impl CycleCounter {
  pub fn starting_at(value: u32) -> Self {
    Self {
      value,
      overflow: value == u32::MAX,
    }
  }

  pub fn value(&self) -> u32 {
    self.value
  }

  pub fn overflow(&self) -> bool {
    self.overflow
  }

  /// Flags overflow when the counter reaches its maximum or wraps.
  pub fn tick(&mut self) {
    let (next, wrapped) = self.value.overflowing_add(1);
    self.value = next;
    if wrapped || next == u32::MAX {
      self.overflow = true;
    }
  }
}

/// Elapsed-cycle counter of one stage.
///
/// Zero while the stage is idle; counts once per tick while its busy
/// signal is high and is sampled for the tile on the falling edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounter {
  busy: Option<usize>,
  value: u32,
  samples: Vec<u32>,
}

impl StageCounter {
  pub fn new(tiles: usize) -> Self {
    Self {
      busy: None,
      value: 0,
      samples: vec![0; tiles],
    }
  }

  pub fn value(&self) -> u32 {
    self.value
  }

  pub fn is_busy(&self) -> bool {
    self.busy.is_some()
  }

  pub fn samples(&self) -> &[u32] {
    &self.samples
  }

  pub fn rise(&mut self, tile: usize) {
    self.busy = Some(tile);
    self.value = 0;
  }

  pub fn fall(&mut self, tile: usize) {
    if self.busy.take() != Some(tile) {
      log::warn!("busy window of tile {} closed without opening", tile);
    }
    if tile >= self.samples.len() {
      self.samples.resize(tile + 1, 0);
    }
    self.samples[tile] = self.value;
    self.value = 0;
  }

  pub fn tick(&mut self) {
    if self.busy.is_some() {
      self.value = self.value.saturating_add(1);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn overflow_is_sticky_after_wrap() {
    let mut counter = CycleCounter::starting_at(u32::MAX - 2);
    counter.tick();
    assert!(!counter.overflow());
    counter.tick();
    assert_eq!(counter.value(), u32::MAX);
    assert!(counter.overflow());
    counter.tick();
    assert_eq!(counter.value(), 0);
    for _ in 0..10 {
      counter.tick();
    }
    assert!(counter.overflow());
  }

  #[test]
  fn counter_starting_at_max_is_already_flagged() {
    assert!(CycleCounter::starting_at(u32::MAX).overflow());
    assert!(!CycleCounter::default().overflow());
  }

  #[test]
  fn stage_counter_counts_only_while_busy() {
    let mut counter = StageCounter::new(2);
    counter.tick();
    assert_eq!(counter.value(), 0);

    counter.rise(0);
    let mut last = 0;
    for _ in 0..5 {
      counter.tick();
      assert!(counter.value() >= last);
      last = counter.value();
    }
    counter.fall(0);
    assert_eq!(counter.value(), 0);
    counter.tick();

    counter.rise(1);
    counter.tick();
    counter.fall(1);
    assert_eq!(counter.samples(), &[5, 1]);
  }
}
