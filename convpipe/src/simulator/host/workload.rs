use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::arch::conv::packer::{Burst, Packer};
use crate::arch::conv::{ConvConf, Dram, Element, MemoryLayout, WeightLayout};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
  /// Input `0..N-1`, every weight tile `0..C*R*S-1`.
  #[default]
  Sequential,
  /// Uniform values in `[-500, 500)` from a seeded generator.
  Random,
}

impl FromStr for WorkloadKind {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "sequential" => Ok(WorkloadKind::Sequential),
      "random" => Ok(WorkloadKind::Random),
      other => Err(format!("unknown workload '{}', expected sequential or random", other)),
    }
  }
}

impl fmt::Display for WorkloadKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkloadKind::Sequential => write!(f, "sequential"),
      WorkloadKind::Random => write!(f, "random"),
    }
  }
}

const RANDOM_RANGE: std::ops::Range<Element> = -500..500;

/// Input window and weight tiles of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
  pub input: Vec<Element>,
  pub weights: Vec<Vec<Element>>,
}

impl Workload {
  pub fn sequential(conf: &ConvConf) -> Self {
    // element values wrap the way the 32-bit registers do
    let ramp = |n: usize| (0..n).map(|i| i as Element).collect::<Vec<_>>();
    Self {
      input: ramp(conf.input_length()),
      weights: (0..conf.tiles()).map(|_| ramp(conf.weight_length())).collect(),
    }
  }

  pub fn random(conf: &ConvConf, seed: u64) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut draw = |n: usize| (0..n).map(|_| rng.gen_range(RANDOM_RANGE)).collect::<Vec<_>>();
    let input = draw(conf.input_length());
    let weights = (0..conf.tiles()).map(|_| draw(conf.weight_length())).collect();
    Self { input, weights }
  }

  pub fn generate(kind: WorkloadKind, conf: &ConvConf, seed: u64) -> Self {
    match kind {
      WorkloadKind::Sequential => Self::sequential(conf),
      WorkloadKind::Random => Self::random(conf, seed),
    }
  }

  /// Writes the input stream into a freshly sized memory window.
  pub fn stage(&self, layout: &MemoryLayout, dram: &Dram) -> Result<()> {
    dram.reset(layout.total_beats())?;
    let aligned = layout.weight_layout() == WeightLayout::Aligned;
    let write = |burst: Burst| dram.write(burst.offset, &burst.beats);

    let mut packer = Packer::new(layout.format(), 0);
    write(packer.push(&self.input))?;
    for tile in &self.weights {
      if aligned {
        write(packer.flush())?;
      }
      write(packer.push(tile))?;
    }
    write(packer.flush())?;
    debug_assert!(packer.cursor() <= layout.output_beat());
    log::debug!(
      "staged {} input and {} weight tiles in {} beats",
      self.input.len(),
      self.weights.len(),
      packer.cursor()
    );
    Ok(())
  }
}
