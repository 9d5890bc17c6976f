use convpipe::arch::conv::{ConvAccelerator, ConvConf, HwConfig, RunState, WeightLayout};
use convpipe::error::ConvError;
use convpipe::simulator::config::load_default_config;
use convpipe::simulator::host::{golden_outputs, OutputDump, Workload, WorkloadKind};
use convpipe::simulator::utils::log::init_log;
use convpipe::simulator::{RunReport, Simulator};
use sim::models::Reportable;

fn small_conf() -> ConvConf {
  ConvConf {
    s: 2,
    r: 2,
    q: 2,
    p: 2,
    m: 3,
    c: 1,
    ..ConvConf::default()
  }
}

fn hardware(dma_width: u32, weight_layout: WeightLayout) -> HwConfig {
  HwConfig {
    dma_width,
    weight_layout,
    ..HwConfig::default()
  }
}

/// Stages `workload`, runs the accelerator to completion and decodes the window.
fn run_accelerator(acc: &mut ConvAccelerator, conf: ConvConf, workload: &Workload) -> OutputDump {
  let layout = acc.layout(&conf);
  workload.stage(&layout, acc.dram()).unwrap();
  acc.start(conf).unwrap();
  let status = acc.run().unwrap();
  assert_eq!(status.state, RunState::Finished);
  OutputDump::read(&conf, &layout, acc.dram()).unwrap()
}

/// `(time, subject)` of every `action` recorded by model `id`.
fn records(acc: &mut ConvAccelerator, id: &str, action: &str) -> Vec<(f64, String)> {
  let mut out = Vec::new();
  for model in acc.simulation().models() {
    if model.id() != id {
      continue;
    }
    for record in model.records() {
      if record.action == action {
        out.push((record.time, record.subject.clone()));
      }
    }
  }
  out
}

/// Time of `action` for each tile, indexed by the `tile=` field of the subject.
fn tile_times(acc: &mut ConvAccelerator, id: &str, action: &str, tiles: usize) -> Vec<f64> {
  let mut times = vec![f64::NAN; tiles];
  for (time, subject) in records(acc, id, action) {
    let tile: usize = subject
      .strip_prefix("tile=")
      .and_then(|rest| rest.split(',').next())
      .and_then(|n| n.parse().ok())
      .unwrap();
    times[tile] = time;
  }
  times
}

fn run_simulator(conf: ConvConf, hw: HwConfig, workload: WorkloadKind) -> RunReport {
  init_log(true);
  let mut config = load_default_config().unwrap();
  config.accelerator = conf;
  config.hardware = hw;
  config.simulation.quiet = true;
  config.simulation.workload = workload;
  Simulator::new(config).unwrap().run().unwrap()
}

#[test]
fn small_shape_matches_reference_for_every_format() {
  for dma_width in [32, 64] {
    for layout in [WeightLayout::Packed, WeightLayout::Aligned] {
      let report = run_simulator(small_conf(), hardware(dma_width, layout), WorkloadKind::Random);
      assert!(report.passed(), "dma_width={} layout={}", dma_width, layout);
      assert_eq!(report.dump.tiles.len(), 3);
    }
  }
}

#[test]
fn odd_shapes_cross_beat_boundaries() {
  // odd input and weight lengths put every other tile start mid-beat
  let conf = ConvConf {
    s: 3,
    r: 1,
    q: 3,
    p: 1,
    m: 5,
    c: 1,
    ..ConvConf::default()
  };
  let report = run_simulator(conf, hardware(64, WeightLayout::Packed), WorkloadKind::Random);
  assert!(report.passed());
  assert_eq!(report.dump.load, vec![1, 2, 1, 2, 1]);
}

#[test]
fn sequential_workload_first_output() {
  let report = run_simulator(small_conf(), HwConfig::default(), WorkloadKind::Sequential);
  // window [0 1; 3 4] against weights [0 1; 2 3]
  assert_eq!(report.dump.tiles[0][0], 19);
  assert_eq!(report.dump.tiles[0], report.dump.tiles[2]);
}

#[test]
fn repeated_runs_are_deterministic() {
  let conf = small_conf();
  let workload = Workload::random(&conf, 11);
  let mut acc = ConvAccelerator::new(HwConfig::default()).unwrap();
  let first = run_accelerator(&mut acc, conf, &workload);
  let second = run_accelerator(&mut acc, conf, &workload);
  assert_eq!(first.tiles, second.tiles);
  assert_eq!(first.load, second.load);
  assert_eq!(first.compute, second.compute);
  assert_eq!(first.store, second.store);
  assert_eq!(first.validate(&golden_outputs(&conf, &workload)), 0);

  let mut fresh = ConvAccelerator::new(HwConfig::default()).unwrap();
  assert_eq!(run_accelerator(&mut fresh, conf, &workload), first);
}

#[test]
fn single_tile_run() {
  let conf = ConvConf { m: 1, ..small_conf() };
  let report = run_simulator(conf, HwConfig::default(), WorkloadKind::Random);
  assert!(report.passed());
  assert_eq!(report.dump.compute, vec![HwConfig::default().compute_cycles(&conf) as u32]);
}

#[test]
fn canonical_counters_and_trailer() {
  let conf = ConvConf::default();
  let hw = HwConfig::default();
  let workload = Workload::sequential(&conf);
  let mut acc = ConvAccelerator::new(hw).unwrap();
  let dump = run_accelerator(&mut acc, conf, &workload);

  assert_eq!(dump.validate(&golden_outputs(&conf, &workload)), 0);
  assert_eq!(dump.load, vec![38, 37, 38, 37, 38, 37]);
  assert_eq!(dump.compute, vec![11760; 6]);
  assert_eq!(dump.store, vec![392; 6]);
  assert!(!dump.overflow);
  // every tile computes back to back once the pipeline fills
  assert!(u64::from(dump.cycles) >= dump.total_compute());
  assert!(u64::from(dump.cycles) < dump.total_compute() + dump.total_load() + dump.total_store() + 1536);

  let layout = acc.layout(&conf);
  assert_eq!(layout.trailer_beats(), 2 + 3 * 6);
  assert_eq!(acc.dram().len().unwrap(), layout.total_beats());
}

#[cfg(feature = "long-tests")]
#[test]
fn canonical_shape_for_every_format() {
  let conf = ConvConf::default();
  for dma_width in [32, 64] {
    for layout in [WeightLayout::Packed, WeightLayout::Aligned] {
      let report = run_simulator(conf, hardware(dma_width, layout), WorkloadKind::Random);
      assert!(report.passed(), "dma_width={} layout={}", dma_width, layout);
      let weight_beats = if dma_width == 32 { 75 } else { 38 };
      let store_beats = if dma_width == 32 { 784 } else { 392 };
      assert!(report.dump.load.iter().all(|&v| v <= weight_beats));
      assert_eq!(report.dump.store, vec![store_beats; 6]);
    }
  }
}

#[test]
fn cycle_counter_overflow_is_sticky() {
  let conf = small_conf();
  let workload = Workload::sequential(&conf);
  let mut acc = ConvAccelerator::new(HwConfig::default())
    .unwrap()
    .with_cycle_counter(u32::MAX - 10);
  let dump = run_accelerator(&mut acc, conf, &workload);
  assert!(dump.overflow);
  assert!(dump.cycles < 1000);
  assert_eq!(dump.validate(&golden_outputs(&conf, &workload)), 0);
}

#[test]
fn zero_tiles_stall() {
  let conf = ConvConf { m: 0, ..small_conf() };
  let mut acc = ConvAccelerator::new(HwConfig::default()).unwrap();
  let layout = acc.layout(&conf);
  Workload::sequential(&conf).stage(&layout, acc.dram()).unwrap();
  acc.start(conf).unwrap();
  assert!(matches!(acc.run(), Err(ConvError::Stalled { .. })));
  assert!(!acc.is_running().unwrap());
}

#[test]
fn cycle_limit_aborts_the_run() {
  let conf = ConvConf::default();
  let mut acc = ConvAccelerator::new(HwConfig::default())
    .unwrap()
    .with_cycle_limit(100);
  let layout = acc.layout(&conf);
  Workload::sequential(&conf).stage(&layout, acc.dram()).unwrap();
  acc.start(conf).unwrap();
  assert!(matches!(acc.run(), Err(ConvError::CycleLimit { limit: 100 })));
  assert!(!acc.is_finished().unwrap());
}

#[test]
fn step_without_start_is_a_no_op() {
  let mut acc = ConvAccelerator::new(HwConfig::default()).unwrap();
  acc.step().unwrap();
  assert_eq!(acc.global_time(), 0.0);
  assert!(acc.pending_messages().is_empty());
}

#[test]
fn slow_store_holds_back_compute() {
  // 32-beat output tiles at 40 cycles a beat against 64-cycle compute
  let conf = ConvConf {
    s: 1,
    r: 1,
    q: 8,
    p: 8,
    m: 4,
    c: 1,
    ..ConvConf::default()
  };
  let hw = HwConfig {
    beat_latency: 40,
    macs_per_cycle: 100,
    ..HwConfig::default()
  };
  let workload = Workload::random(&conf, 21);
  let mut acc = ConvAccelerator::new(hw).unwrap();
  let dump = run_accelerator(&mut acc, conf, &workload);
  assert_eq!(dump.validate(&golden_outputs(&conf, &workload)), 0);
  assert_eq!(dump.compute, vec![64; 4]);
  assert_eq!(dump.store, vec![1280; 4]);

  let started = tile_times(&mut acc, "compute", "compute", 4);
  let ready = tile_times(&mut acc, "compute", "output_ready", 4);
  let consumed = tile_times(&mut acc, "store", "output_consumed", 4);
  for m in 1..4 {
    assert!(ready[m] >= consumed[m - 1], "tile {} handed over before tile {} left", m, m - 1);
  }
  // compute finished each later tile long before its output slot came free
  assert!((1..4).all(|m| ready[m] > started[m] + 64.0));
}

#[test]
fn sub_beat_tiles_share_a_write() {
  // one-element tiles: every even tile waits in the packer for its partner
  let conf = ConvConf {
    s: 1,
    r: 1,
    q: 1,
    p: 1,
    m: 6,
    c: 2,
    ..ConvConf::default()
  };
  let workload = Workload::random(&conf, 8);
  let mut acc = ConvAccelerator::new(HwConfig::default()).unwrap();
  let dump = run_accelerator(&mut acc, conf, &workload);
  assert_eq!(dump.validate(&golden_outputs(&conf, &workload)), 0);
  assert_eq!(dump.store, vec![0, 1, 0, 1, 0, 1]);
  // three tile writes and the trailer, none of them empty
  let writes = records(&mut acc, "dma", "write_req");
  assert_eq!(writes.len(), 4);
  assert!(writes.iter().all(|(_, subject)| !subject.ends_with("beats=0")));
}

#[test]
fn accelerator_runs_again_after_cycle_limit() {
  let mut acc = ConvAccelerator::new(HwConfig::default())
    .unwrap()
    .with_cycle_limit(100);
  let canonical = ConvConf::default();
  let layout = acc.layout(&canonical);
  Workload::sequential(&canonical).stage(&layout, acc.dram()).unwrap();
  acc.start(canonical).unwrap();
  assert!(matches!(acc.run(), Err(ConvError::CycleLimit { limit: 100 })));

  // the small shape fits inside the same limit
  let conf = small_conf();
  let workload = Workload::random(&conf, 5);
  let dump = run_accelerator(&mut acc, conf, &workload);
  assert_eq!(dump.validate(&golden_outputs(&conf, &workload)), 0);

  let mut fresh = ConvAccelerator::new(HwConfig::default()).unwrap();
  assert_eq!(run_accelerator(&mut fresh, conf, &workload), dump);
}

#[test]
fn accelerator_runs_again_after_stall() {
  let mut acc = ConvAccelerator::new(HwConfig::default()).unwrap();
  let empty = ConvConf { m: 0, ..small_conf() };
  let layout = acc.layout(&empty);
  Workload::sequential(&empty).stage(&layout, acc.dram()).unwrap();
  acc.start(empty).unwrap();
  assert!(matches!(acc.run(), Err(ConvError::Stalled { .. })));
  assert!(acc.pending_messages().is_empty());

  let conf = small_conf();
  let workload = Workload::sequential(&conf);
  let dump = run_accelerator(&mut acc, conf, &workload);
  assert_eq!(dump.tiles[0][0], 19);
  assert_eq!(dump.validate(&golden_outputs(&conf, &workload)), 0);
}
