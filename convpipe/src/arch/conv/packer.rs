use serde::{Deserialize, Serialize};
use sim::utils::errors::SimulationError;
use thiserror::Error;

pub type Beat = u64;
pub type Element = i32;

const ELEMENT_BITS: usize = 32;

/// Transfer Unit word width: one or two 32-bit elements per beat, lowest
/// sub-word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatFormat {
  elements_per_beat: usize,
}

impl Default for BeatFormat {
  fn default() -> Self {
    Self { elements_per_beat: 2 }
  }
}

impl BeatFormat {
  pub fn from_dma_width(bits: u32) -> Option<Self> {
    match bits {
      32 | 64 => Some(Self {
        elements_per_beat: bits as usize / ELEMENT_BITS,
      }),
      _ => None,
    }
  }

  pub fn elements_per_beat(&self) -> usize {
    self.elements_per_beat
  }

  pub fn beat_bits(&self) -> usize {
    self.elements_per_beat * ELEMENT_BITS
  }

  /// Beats needed to hold `elements` elements.
  pub fn beats_for(&self, elements: usize) -> usize {
    elements.div_ceil(self.elements_per_beat)
  }

  /// `elements` rounded up to a whole number of beats.
  pub fn round_up(&self, elements: usize) -> usize {
    self.beats_for(elements) * self.elements_per_beat
  }

  /// Masks a raw value down to the beat width.
  pub fn truncate(&self, value: u64) -> Beat {
    if self.beat_bits() >= 64 {
      value
    } else {
      value & ((1u64 << self.beat_bits()) - 1)
    }
  }

  pub fn sub_word(&self, beat: Beat, k: usize) -> Element {
    (beat >> (k * ELEMENT_BITS)) as u32 as Element
  }

  /// Splits one beat into its elements in address order.
  pub fn unpack(&self, beat: Beat) -> Vec<Element> {
    (0..self.elements_per_beat).map(|k| self.sub_word(beat, k)).collect()
  }

  /// Inverse of [`BeatFormat::unpack`]. Missing high sub-words are zero.
  pub fn pack(&self, elements: &[Element]) -> Beat {
    debug_assert!(elements.len() <= self.elements_per_beat);
    elements
      .iter()
      .enumerate()
      .fold(0, |beat, (k, &e)| beat | (u64::from(e as u32) << (k * ELEMENT_BITS)))
  }
}

/// A span of beats on the Transfer Unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
  pub offset: usize,
  pub length: usize,
}

/// Beats produced by the [`Packer`], to be written starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Burst {
  pub offset: usize,
  pub beats: Vec<Beat>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
  #[error("transfer delivered {got} beats, region needs {expected}")]
  ShortTransfer { expected: usize, got: usize },
}

impl From<PackError> for SimulationError {
  fn from(err: PackError) -> Self {
    log::error!("packer: {}", err);
    SimulationError::InvalidModelState
  }
}

#[derive(Debug, Clone, Copy)]
struct Carry {
  beat: Beat,
  next: usize,
}

/// Sequential reader of element regions from a beat stream.
///
/// Regions are moved back to back, so one may end in the middle of a
/// beat. That partially consumed beat is kept as a one-beat lookahead and
/// its remaining sub-words go to the next region (the need-shift case).
#[derive(Debug, Clone)]
pub struct Unpacker {
  format: BeatFormat,
  cursor: usize,
  carry: Option<Carry>,
}

impl Unpacker {
  pub fn new(format: BeatFormat, start_beat: usize) -> Self {
    Self {
      format,
      cursor: start_beat,
      carry: None,
    }
  }

  pub fn format(&self) -> BeatFormat {
    self.format
  }

  /// Next beat that has not been fetched yet.
  pub fn cursor(&self) -> usize {
    self.cursor
  }

  /// True while the next region begins inside an already fetched beat.
  pub fn need_shift(&self) -> bool {
    self.carry.is_some()
  }

  /// Sub-words still pending in the lookahead beat.
  pub fn carried(&self) -> usize {
    self.carry.map_or(0, |c| self.format.elements_per_beat - c.next)
  }

  /// Beats the next read must cover to complete a region of `len` elements.
  pub fn plan(&self, len: usize) -> TransferPlan {
    let fresh = len.saturating_sub(self.carried());
    TransferPlan {
      offset: self.cursor,
      length: self.format.beats_for(fresh),
    }
  }

  /// Fills `dest` from the lookahead beat and then from `beats`.
  ///
  /// `beats` must be exactly the span returned by [`Unpacker::plan`] for
  /// `dest.len()`. A final beat that is not fully consumed becomes the new
  /// lookahead.
  pub fn fill(&mut self, beats: &[Beat], dest: &mut [Element]) -> Result<(), PackError> {
    let from_carry = self.carried().min(dest.len());
    let expected = self.format.beats_for(dest.len() - from_carry);
    if beats.len() != expected {
      return Err(PackError::ShortTransfer {
        expected,
        got: beats.len(),
      });
    }

    let per_beat = self.format.elements_per_beat;
    let mut written = 0;

    if let Some(mut carry) = self.carry.take() {
      while written < dest.len() && carry.next < per_beat {
        dest[written] = self.format.sub_word(carry.beat, carry.next);
        carry.next += 1;
        written += 1;
      }
      if carry.next < per_beat {
        self.carry = Some(carry);
      }
    }

    for &beat in beats {
      let mut k = 0;
      while k < per_beat && written < dest.len() {
        dest[written] = self.format.sub_word(beat, k);
        k += 1;
        written += 1;
      }
      if k < per_beat {
        self.carry = Some(Carry { beat, next: k });
      }
    }

    self.cursor += beats.len();
    Ok(())
  }

  /// Drops the lookahead so the next region starts on a beat boundary.
  pub fn align(&mut self) {
    self.carry = None;
  }
}

/// Sequential writer of element regions into a beat stream.
///
/// Elements that do not yet fill a beat wait for the next region.
#[derive(Debug, Clone)]
pub struct Packer {
  format: BeatFormat,
  cursor: usize,
  pending: Vec<Element>,
}

impl Packer {
  pub fn new(format: BeatFormat, start_beat: usize) -> Self {
    Self {
      format,
      cursor: start_beat,
      pending: Vec::with_capacity(format.elements_per_beat),
    }
  }

  /// Next beat to be written.
  pub fn cursor(&self) -> usize {
    self.cursor
  }

  /// Elements waiting for the rest of their beat.
  pub fn pending(&self) -> usize {
    self.pending.len()
  }

  /// Appends elements; returns every beat they complete.
  pub fn push(&mut self, elements: &[Element]) -> Burst {
    let mut burst = Burst {
      offset: self.cursor,
      beats: Vec::with_capacity(self.format.beats_for(self.pending.len() + elements.len())),
    };
    for &e in elements {
      self.pending.push(e);
      if self.pending.len() == self.format.elements_per_beat {
        burst.beats.push(self.format.pack(&self.pending));
        self.pending.clear();
      }
    }
    self.cursor += burst.beats.len();
    burst
  }

  /// Emits the pending elements as one zero-padded beat, if any.
  pub fn flush(&mut self) -> Burst {
    let mut burst = Burst {
      offset: self.cursor,
      beats: Vec::new(),
    };
    if !self.pending.is_empty() {
      burst.beats.push(self.format.pack(&self.pending));
      self.pending.clear();
      self.cursor += 1;
    }
    burst
  }

  /// Flushes, then appends raw values one beat each.
  pub fn push_beats(&mut self, values: &[u64]) -> Burst {
    let mut burst = self.flush();
    burst
      .beats
      .extend(values.iter().map(|&v| self.format.truncate(v)));
    self.cursor += values.len();
    burst
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn formats() -> [BeatFormat; 2] {
    [
      BeatFormat::from_dma_width(32).unwrap(),
      BeatFormat::from_dma_width(64).unwrap(),
    ]
  }

  /// Writes `regions` back to back and returns the resulting memory image.
  fn pack_regions(format: BeatFormat, regions: &[Vec<Element>]) -> Vec<Beat> {
    fn place(burst: Burst, memory: &mut Vec<Beat>) {
      assert_eq!(burst.offset, memory.len());
      memory.extend(burst.beats);
    }

    let mut packer = Packer::new(format, 0);
    let mut memory = Vec::new();
    for region in regions {
      place(packer.push(region), &mut memory);
    }
    place(packer.flush(), &mut memory);
    memory
  }

  #[test]
  fn unpack_orders_low_sub_word_first() {
    let format = BeatFormat::default();
    let beat = (7u64 << 32) | u64::from((-3i32) as u32);
    assert_eq!(format.unpack(beat), vec![-3, 7]);
    assert_eq!(format.pack(&[-3, 7]), beat);
  }

  #[test]
  fn narrow_beats_hold_one_element() {
    let format = BeatFormat::from_dma_width(32).unwrap();
    assert_eq!(format.elements_per_beat(), 1);
    assert_eq!(format.unpack(0xffff_ffff), vec![-1]);
    assert_eq!(format.truncate(0x1_0000_0005), 5);
  }

  #[test]
  fn unsupported_widths_are_rejected() {
    assert!(BeatFormat::from_dma_width(16).is_none());
    assert!(BeatFormat::from_dma_width(128).is_none());
  }

  #[test]
  fn odd_region_leaves_carry_for_next_region() {
    let format = BeatFormat::default();
    let memory = pack_regions(format, &[vec![1, 2, 3], vec![4, 5]]);
    assert_eq!(memory.len(), 3);

    let mut unpacker = Unpacker::new(format, 0);
    let plan = unpacker.plan(3);
    assert_eq!(plan, TransferPlan { offset: 0, length: 2 });
    let mut first = [0; 3];
    unpacker.fill(&memory[0..2], &mut first).unwrap();
    assert_eq!(first, [1, 2, 3]);
    assert!(unpacker.need_shift());

    // the second region starts in beat 1, which is already fetched
    let plan = unpacker.plan(2);
    assert_eq!(plan, TransferPlan { offset: 2, length: 1 });
    let mut second = [0; 2];
    unpacker.fill(&memory[2..3], &mut second).unwrap();
    assert_eq!(second, [4, 5]);
    assert_eq!(unpacker.cursor(), 3);
  }

  #[test]
  fn region_smaller_than_carry_needs_no_transfer() {
    let format = BeatFormat::default();
    let memory = pack_regions(format, &[vec![9], vec![8]]);
    let mut unpacker = Unpacker::new(format, 0);
    let mut a = [0; 1];
    unpacker.fill(&memory[0..1], &mut a).unwrap();
    assert_eq!(unpacker.plan(1).length, 0);
    let mut b = [0; 1];
    unpacker.fill(&[], &mut b).unwrap();
    assert_eq!((a[0], b[0]), (9, 8));
    assert_eq!(unpacker.cursor(), 1);
  }

  #[test]
  fn wrong_beat_count_is_reported() {
    let mut unpacker = Unpacker::new(BeatFormat::default(), 0);
    let mut dest = [0; 4];
    assert_eq!(
      unpacker.fill(&[0], &mut dest),
      Err(PackError::ShortTransfer { expected: 2, got: 1 })
    );
  }

  #[test]
  fn align_skips_the_padding_of_a_rounded_region() {
    let format = BeatFormat::default();
    // region of 3 elements padded to 4, then a beat-aligned region
    let memory = vec![format.pack(&[1, 2]), format.pack(&[3, 0]), format.pack(&[4, 5])];
    let mut unpacker = Unpacker::new(format, 0);
    let mut first = [0; 3];
    unpacker.fill(&memory[0..2], &mut first).unwrap();
    unpacker.align();
    let plan = unpacker.plan(2);
    assert_eq!(plan, TransferPlan { offset: 2, length: 1 });
    let mut second = [0; 2];
    unpacker.fill(&memory[2..3], &mut second).unwrap();
    assert_eq!(second, [4, 5]);
  }

  #[test]
  fn push_beats_flushes_pending_elements_first() {
    let format = BeatFormat::default();
    let mut packer = Packer::new(format, 10);
    let burst = packer.push(&[1, 2, 3]);
    assert_eq!(burst.offset, 10);
    assert_eq!(burst.beats.len(), 1);
    assert_eq!(packer.pending(), 1);

    let trailer = packer.push_beats(&[42, 1]);
    assert_eq!(trailer.offset, 11);
    assert_eq!(trailer.beats, vec![format.pack(&[3]), 42, 1]);
    assert_eq!(packer.cursor(), 14);
  }

  #[test]
  fn random_regions_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for format in formats() {
      for _ in 0..50 {
        let regions: Vec<Vec<Element>> = (0..rng.gen_range(1..8))
          .map(|_| (0..rng.gen_range(1..20)).map(|_| rng.gen()).collect())
          .collect();
        let memory = pack_regions(format, &regions);

        let mut unpacker = Unpacker::new(format, 0);
        for region in &regions {
          let plan = unpacker.plan(region.len());
          let beats = &memory[plan.offset..plan.offset + plan.length];
          let mut dest = vec![0; region.len()];
          unpacker.fill(beats, &mut dest).unwrap();
          assert_eq!(&dest, region);
        }
        assert_eq!(unpacker.cursor(), memory.len());
      }
    }
  }
}
