use super::conf::{ConvConf, WeightLayout};
use super::packer::BeatFormat;

/// Element offsets of every region in the accelerator's memory window.
///
/// The input stream starts at element 0. The output region starts on the
/// first beat boundary after the last weight tile; the profiling trailer
/// starts on the first beat boundary after the last output tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
  format: BeatFormat,
  weight_layout: WeightLayout,
  input_length: usize,
  weight_start: usize,
  weight_stride: usize,
  weight_length: usize,
  output_start: usize,
  output_length: usize,
  tiles: usize,
}

impl MemoryLayout {
  pub fn new(conf: &ConvConf, format: BeatFormat, layout: WeightLayout) -> Self {
    let input_length = conf.input_length();
    let weight_length = conf.weight_length();
    let (weight_start, weight_stride) = match layout {
      WeightLayout::Packed => (input_length, weight_length),
      WeightLayout::Aligned => (format.round_up(input_length), format.round_up(weight_length)),
    };
    let input_end = weight_start + conf.tiles() * weight_stride;
    Self {
      format,
      weight_layout: layout,
      input_length,
      weight_start,
      weight_stride,
      weight_length,
      output_start: format.round_up(input_end),
      output_length: conf.output_length(),
      tiles: conf.tiles(),
    }
  }

  pub fn format(&self) -> BeatFormat {
    self.format
  }

  pub fn weight_layout(&self) -> WeightLayout {
    self.weight_layout
  }

  pub fn input_length(&self) -> usize {
    self.input_length
  }

  pub fn weight_length(&self) -> usize {
    self.weight_length
  }

  pub fn weight_tile_start(&self, m: usize) -> usize {
    self.weight_start + m * self.weight_stride
  }

  /// First beat of the output region.
  pub fn output_beat(&self) -> usize {
    self.output_start / self.format.elements_per_beat()
  }

  pub fn output_tile_start(&self, m: usize) -> usize {
    self.output_start + m * self.output_length
  }

  /// First beat of the profiling trailer.
  pub fn trailer_beat(&self) -> usize {
    self.format.beats_for(self.output_tile_start(self.tiles))
  }

  /// Cycle counter, overflow flag and three per-tile sequences.
  pub fn trailer_beats(&self) -> usize {
    2 + 3 * self.tiles
  }

  /// Beats the memory window must hold for one run.
  pub fn total_beats(&self) -> usize {
    self.trailer_beat() + self.trailer_beats()
  }
}
