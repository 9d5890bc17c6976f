use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::packer::BeatFormat;

/// Configuration registers delivered once before a run.
///
/// Every stage latches a copy when it receives the start command and keeps
/// it until the run completes. The shape fields are `S, R, Q, P, M, C`:
/// kernel width, kernel height, output width, output height, output
/// channels (tiles) and input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvConf {
  pub mem_output_addr: i32,
  pub mem_input_addr: i32,
  pub s: i32,
  pub r: i32,
  pub q: i32,
  pub p: i32,
  pub m: i32,
  pub c: i32,
}

impl Default for ConvConf {
  fn default() -> Self {
    Self {
      mem_output_addr: 10000,
      mem_input_addr: 10000,
      s: 5,
      r: 5,
      q: 28,
      p: 28,
      m: 6,
      c: 3,
    }
  }
}

// Negative registers read as zero; the core does not validate shapes.
fn dim(value: i32) -> usize {
  value.max(0) as usize
}

impl ConvConf {
  pub fn kernel_width(&self) -> usize {
    dim(self.s)
  }

  pub fn kernel_height(&self) -> usize {
    dim(self.r)
  }

  pub fn output_width(&self) -> usize {
    dim(self.q)
  }

  pub fn output_height(&self) -> usize {
    dim(self.p)
  }

  pub fn tiles(&self) -> usize {
    dim(self.m)
  }

  pub fn channels(&self) -> usize {
    dim(self.c)
  }

  /// Width of the input window, `Q + S - 1`.
  pub fn input_width(&self) -> usize {
    (self.output_width() + self.kernel_width()).saturating_sub(1)
  }

  /// Height of the input window, `P + R - 1`.
  pub fn input_height(&self) -> usize {
    (self.output_height() + self.kernel_height()).saturating_sub(1)
  }

  /// `C * (P+R-1) * (Q+S-1)`
  pub fn input_length(&self) -> usize {
    self.channels() * self.input_height() * self.input_width()
  }

  /// `C * R * S`
  pub fn weight_length(&self) -> usize {
    self.channels() * self.kernel_height() * self.kernel_width()
  }

  /// `P * Q`
  pub fn output_length(&self) -> usize {
    self.output_height() * self.output_width()
  }

  pub fn input_index(&self, c: usize, y: usize, x: usize) -> usize {
    c * self.input_height() * self.input_width() + y * self.input_width() + x
  }

  pub fn weight_index(&self, c: usize, r: usize, s: usize) -> usize {
    c * self.kernel_height() * self.kernel_width() + r * self.kernel_width() + s
  }

  pub fn output_index(&self, p: usize, q: usize) -> usize {
    p * self.output_width() + q
  }
}

/// Placement of the weight tiles behind the input window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightLayout {
  /// Element-contiguous; region boundaries may fall mid-beat.
  #[default]
  Packed,
  /// Every region starts on a beat boundary.
  Aligned,
}

impl FromStr for WeightLayout {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "packed" => Ok(WeightLayout::Packed),
      "aligned" => Ok(WeightLayout::Aligned),
      other => Err(format!("unknown weight layout '{}', expected packed or aligned", other)),
    }
  }
}

impl fmt::Display for WeightLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WeightLayout::Packed => write!(f, "packed"),
      WeightLayout::Aligned => write!(f, "aligned"),
    }
  }
}

/// Fixed properties of the accelerator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwConfig {
  /// Transfer Unit word width in bits (32 or 64).
  pub dma_width: u32,
  pub plm_input_words: usize,
  pub plm_weight_words: usize,
  pub plm_output_words: usize,
  /// Cycles the Transfer Unit spends per beat.
  pub beat_latency: u32,
  /// Multiply-accumulate lanes of the compute kernel.
  pub macs_per_cycle: u32,
  pub weight_layout: WeightLayout,
}

impl Default for HwConfig {
  fn default() -> Self {
    Self {
      dma_width: 64,
      plm_input_words: 4000,
      plm_weight_words: 1200,
      plm_output_words: 1200,
      beat_latency: 1,
      macs_per_cycle: 5,
      weight_layout: WeightLayout::Packed,
    }
  }
}

impl HwConfig {
  pub fn beat_format(&self) -> Option<BeatFormat> {
    BeatFormat::from_dma_width(self.dma_width)
  }

  /// Cycles spent computing one output tile.
  pub fn compute_cycles(&self, conf: &ConvConf) -> u64 {
    let lanes = self.macs_per_cycle.max(1) as usize;
    (conf.output_length() * conf.weight_length().div_ceil(lanes)) as u64
  }
}
