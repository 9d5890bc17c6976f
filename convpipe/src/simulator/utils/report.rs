use sim::models::{Model, Reportable};
use sim::simulator::Simulation;

use crate::simulator::host::OutputDump;

pub fn print_simulation_records(simulation: &mut Simulation) {
  println!("\n--- Simulation Records ---");

  for model in simulation.models().iter() {
    print_model_records(model);
  }

  println!("--- End Records ---\n");
}

fn print_model_records(model: &Model) {
  let records = model.records();
  if !records.is_empty() {
    println!("\n[{}]", model.id());
    for record in records {
      println!("  Time {:.1}: {} {}", record.time, record.action, record.subject);
    }
  }
}

/// Renders the per-tile counters and totals of one run.
pub fn format_profile(dump: &OutputDump) -> String {
  let mut out = String::new();
  out.push_str(&format!("{:>6} {:>10} {:>10} {:>10}\n", "tile", "load", "compute", "store"));
  for (m, ((load, compute), store)) in dump.load.iter().zip(&dump.compute).zip(&dump.store).enumerate() {
    out.push_str(&format!("{:>6} {:>10} {:>10} {:>10}\n", m, load, compute, store));
  }
  out.push_str(&format!(
    "{:>6} {:>10} {:>10} {:>10}\n",
    "total",
    dump.total_load(),
    dump.total_compute(),
    dump.total_store()
  ));
  out.push_str(&format!(
    "cycles {}{}\n",
    dump.cycles,
    if dump.overflow { " (overflowed)" } else { "" }
  ));
  out
}

pub fn print_profile(dump: &OutputDump) {
  print!("{}", format_profile(dump));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn profile_lists_tiles_and_totals() {
    let dump = OutputDump {
      tiles: vec![vec![0], vec![0]],
      cycles: 120,
      overflow: true,
      load: vec![10, 11],
      compute: vec![20, 20],
      store: vec![5, 6],
    };
    let text = format_profile(&dump);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[1].split_whitespace().eq(["0", "10", "20", "5"]));
    assert!(lines[3].split_whitespace().eq(["total", "21", "40", "11"]));
    assert_eq!(lines[4], "cycles 120 (overflowed)");
  }
}
