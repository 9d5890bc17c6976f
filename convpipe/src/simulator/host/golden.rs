use crate::arch::conv::{ConvConf, Element};

use super::workload::Workload;

/// Reference output tile, accumulated without bound and then cut down to
/// the accelerator's 64-bit accumulator and 32-bit output element.
pub fn golden_tile(conf: &ConvConf, input: &[Element], weights: &[Element]) -> Vec<Element> {
  let mut out = vec![0; conf.output_length()];
  for p in 0..conf.output_height() {
    for q in 0..conf.output_width() {
      let mut sum: i128 = 0;
      for c in 0..conf.channels() {
        for r in 0..conf.kernel_height() {
          for s in 0..conf.kernel_width() {
            sum += i128::from(input[conf.input_index(c, p + r, q + s)])
              * i128::from(weights[conf.weight_index(c, r, s)]);
          }
        }
      }
      out[conf.output_index(p, q)] = sum as i64 as Element;
    }
  }
  out
}

pub fn golden_outputs(conf: &ConvConf, workload: &Workload) -> Vec<Vec<Element>> {
  workload
    .weights
    .iter()
    .map(|tile| golden_tile(conf, &workload.input, tile))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::conv::compute::convolve_tile;

  #[test]
  fn matches_the_kernel_after_truncation() {
    let conf = ConvConf {
      s: 3,
      r: 2,
      q: 3,
      p: 2,
      m: 2,
      c: 2,
      ..ConvConf::default()
    };
    let workload = Workload::random(&conf, 3);
    let golden = golden_outputs(&conf, &workload);
    for (tile, expect) in workload.weights.iter().zip(&golden) {
      let mut acc = vec![0; conf.output_length()];
      convolve_tile(&conf, &workload.input, tile, &mut acc);
      let got: Vec<Element> = acc.iter().map(|&v| v as Element).collect();
      assert_eq!(&got, expect);
    }
  }

  #[test]
  fn wide_sums_wrap_like_the_hardware() {
    let conf = ConvConf {
      s: 1,
      r: 1,
      q: 1,
      p: 1,
      m: 1,
      c: 3,
      ..ConvConf::default()
    };
    let input = vec![Element::MIN; 3];
    let weights = vec![Element::MIN; 3];
    let expect = (3 * i128::from(Element::MIN) * i128::from(Element::MIN)) as i64 as Element;
    assert_eq!(golden_tile(&conf, &input, &weights), vec![expect]);

    let mut acc = vec![0; 1];
    convolve_tile(&conf, &input, &weights, &mut acc);
    assert_eq!(acc[0] as Element, expect);
  }
}
