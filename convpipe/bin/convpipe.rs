use clap::Parser;
use convpipe::arch::conv::WeightLayout;
use convpipe::simulator::config::{load_and_merge_configs, CliOverrides};
use convpipe::simulator::host::WorkloadKind;
use convpipe::simulator::utils::log::init_log;
use convpipe::simulator::Simulator;
use std::path::PathBuf;
use std::process::ExitCode;

/// Convpipe - a double-buffered convolution accelerator simulator
#[derive(Parser, Debug)]
#[command(name = "convpipe")]
#[command(version = "0.1.0")]
#[command(about = "Load/compute/store convolution pipeline simulator", long_about = None)]
struct Args {
  /// Configuration file layered over the built-in defaults
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Enable step mode (interactive stepping)
  #[arg(long)]
  step: bool,

  /// Quiet mode (warnings and errors only)
  #[arg(short, long)]
  quiet: bool,

  /// Print every model's event records after the run
  #[arg(short, long)]
  verbose: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Input workload: sequential or random
  #[arg(long, value_name = "KIND")]
  workload: Option<WorkloadKind>,

  /// Seed of the random workload
  #[arg(long)]
  seed: Option<u64>,

  /// Abort a run that takes longer than this many cycles
  #[arg(long, value_name = "CYCLES")]
  max_cycles: Option<u64>,

  /// Kernel width
  #[arg(short = 'S', value_name = "S")]
  kernel_width: Option<i32>,

  /// Kernel height
  #[arg(short = 'R', value_name = "R")]
  kernel_height: Option<i32>,

  /// Output width
  #[arg(short = 'Q', value_name = "Q")]
  output_width: Option<i32>,

  /// Output height
  #[arg(short = 'P', value_name = "P")]
  output_height: Option<i32>,

  /// Output tiles
  #[arg(short = 'M', value_name = "M")]
  tiles: Option<i32>,

  /// Input channels
  #[arg(short = 'C', value_name = "C")]
  channels: Option<i32>,

  /// Transfer Unit word width in bits (32 or 64)
  #[arg(long, value_name = "BITS")]
  dma_width: Option<u32>,

  /// Weight placement: packed or aligned
  #[arg(long, value_name = "LAYOUT")]
  layout: Option<WeightLayout>,

  /// Print the merged configuration and exit
  #[arg(long)]
  dump_config: bool,
}

impl Args {
  fn overrides(&self) -> CliOverrides {
    CliOverrides {
      quiet: self.quiet,
      step: self.step,
      verbose: self.verbose,
      trace_file: self.trace_file.clone(),
      workload: self.workload,
      seed: self.seed,
      max_cycles: self.max_cycles,
      s: self.kernel_width,
      r: self.kernel_height,
      q: self.output_width,
      p: self.output_height,
      m: self.tiles,
      c: self.channels,
      dma_width: self.dma_width,
      weight_layout: self.layout,
    }
  }
}

fn run(args: Args) -> convpipe::error::Result<bool> {
  let config = load_and_merge_configs(args.config.as_deref(), &args.overrides())?;
  if args.dump_config {
    print!("{}", config.to_toml_string()?);
    return Ok(true);
  }

  let mut simulator = Simulator::new(config)?;
  let report = simulator.run()?;
  Ok(report.passed())
}

fn main() -> ExitCode {
  let args = Args::parse();
  init_log(args.quiet);

  match run(args) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::from(1),
    Err(e) => {
      log::error!("{}", e);
      ExitCode::from(2)
    },
  }
}
