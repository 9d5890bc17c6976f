use convpipe::arch::conv::{ConvConf, Element};
use convpipe::simulator::config::load_default_config;
use convpipe::simulator::utils::log::init_log;
use convpipe::simulator::Simulator;

/// Up to six leading outputs of tile 0.
fn preview(tiles: &[Vec<Element>]) -> Vec<Element> {
  tiles.first().into_iter().flatten().take(6).copied().collect()
}

fn main() -> Result<(), convpipe::ConvError> {
  init_log(false);

  println!("Convpipe convolution accelerator");
  println!("================================");
  println!("Stages: Load -> Compute -> Store, ping/pong weight and output buffers\n");

  // LeNet-style first layer: 3x32x32 input, six 5x5 filters
  let config = load_default_config()?;
  let conf: ConvConf = config.accelerator;
  println!(
    "S={} R={} Q={} P={} M={} C={}\n",
    conf.s, conf.r, conf.q, conf.p, conf.m, conf.c
  );

  let mut simulator = Simulator::new(config)?;
  let report = simulator.run()?;

  println!("\nTile 0, first outputs: {:?}", preview(&report.dump.tiles));
  println!(
    "Finished in {:.0} cycles, {} mismatches",
    report.elapsed(),
    report.mismatches
  );
  Ok(())
}
