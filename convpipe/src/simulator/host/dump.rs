use serde::{Deserialize, Serialize};

use crate::arch::conv::packer::Unpacker;
use crate::arch::conv::{ConvConf, Dram, Element, MemoryLayout};
use crate::error::Result;

/// Mismatches reported individually before the log goes quiet.
const REPORTED_MISMATCHES: usize = 8;

/// Everything the Store stage wrote, decoded from the memory window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDump {
  pub tiles: Vec<Vec<Element>>,
  pub cycles: u32,
  pub overflow: bool,
  pub load: Vec<u32>,
  pub compute: Vec<u32>,
  pub store: Vec<u32>,
}

impl OutputDump {
  pub fn read(conf: &ConvConf, layout: &MemoryLayout, dram: &Dram) -> Result<Self> {
    let tiles_n = conf.tiles();
    let mut unpacker = Unpacker::new(layout.format(), layout.output_beat());
    let mut tiles = Vec::with_capacity(tiles_n);
    for _ in 0..tiles_n {
      let plan = unpacker.plan(conf.output_length());
      let beats = dram.read(plan.offset, plan.length)?;
      let mut tile = vec![0; conf.output_length()];
      unpacker.fill(&beats, &mut tile)?;
      tiles.push(tile);
    }

    let trailer = dram.read(layout.trailer_beat(), layout.trailer_beats())?;
    let counters = |k: usize| -> Vec<u32> {
      trailer[2 + k * tiles_n..2 + (k + 1) * tiles_n]
        .iter()
        .map(|&v| v as u32)
        .collect()
    };
    Ok(Self {
      tiles,
      cycles: trailer[0] as u32,
      overflow: trailer[1] != 0,
      load: counters(0),
      compute: counters(1),
      store: counters(2),
    })
  }

  /// Counts output elements that differ from `golden`.
  pub fn validate(&self, golden: &[Vec<Element>]) -> usize {
    let mut mismatches = 0;
    for (m, (got, expect)) in self.tiles.iter().zip(golden).enumerate() {
      for (i, (g, e)) in got.iter().zip(expect).enumerate() {
        if g != e {
          if mismatches < REPORTED_MISMATCHES {
            log::warn!("tile {} element {}: got {}, expected {}", m, i, g, e);
          }
          mismatches += 1;
        }
      }
    }
    if self.tiles.len() != golden.len() {
      log::warn!("{} tiles dumped, {} expected", self.tiles.len(), golden.len());
      mismatches += golden.len().abs_diff(self.tiles.len());
    }
    mismatches
  }

  pub fn total_load(&self) -> u64 {
    self.load.iter().map(|&v| u64::from(v)).sum()
  }

  pub fn total_compute(&self) -> u64 {
    self.compute.iter().map(|&v| u64::from(v)).sum()
  }

  pub fn total_store(&self) -> u64 {
    self.store.iter().map(|&v| u64::from(v)).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::conv::packer::Packer;
  use crate::arch::conv::{BeatFormat, WeightLayout};

  #[test]
  fn decodes_tiles_and_trailer_from_the_stream() {
    let conf = ConvConf {
      s: 1,
      r: 1,
      q: 3,
      p: 1,
      m: 2,
      c: 1,
      ..ConvConf::default()
    };
    let format = BeatFormat::default();
    let layout = MemoryLayout::new(&conf, format, WeightLayout::Packed);
    let dram = Dram::new(layout.total_beats());

    let mut packer = Packer::new(format, layout.output_beat());
    for burst in [
      packer.push(&[1, 2, 3]),
      packer.push(&[4, 5, 6]),
      packer.flush(),
      packer.push_beats(&[99, 1, 3, 4, 5, 6, 7, 8]),
    ] {
      dram.write(burst.offset, &burst.beats).unwrap();
    }

    let dump = OutputDump::read(&conf, &layout, &dram).unwrap();
    assert_eq!(dump.tiles, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    assert_eq!(dump.cycles, 99);
    assert!(dump.overflow);
    assert_eq!(dump.load, vec![3, 4]);
    assert_eq!(dump.compute, vec![5, 6]);
    assert_eq!(dump.store, vec![7, 8]);
    assert_eq!(dump.total_store(), 15);

    assert_eq!(dump.validate(&[vec![1, 2, 3], vec![4, 5, 6]]), 0);
    assert_eq!(dump.validate(&[vec![1, 2, 3], vec![4, 0, 0]]), 2);
  }
}
