pub mod dump;
pub mod golden;
pub mod workload;

pub use dump::OutputDump;
pub use golden::{golden_outputs, golden_tile};
pub use workload::{Workload, WorkloadKind};
