pub mod accelerator;
pub mod compute;
pub mod conf;
pub mod counters;
pub mod dma;
pub mod handshake;
pub mod layout;
pub mod load;
pub mod main;
pub mod msg;
pub mod packer;
pub mod plm;
pub mod profiler;
pub mod store;

pub use accelerator::ConvAccelerator;
pub use conf::{ConvConf, HwConfig, WeightLayout};
pub use dma::Dram;
pub use layout::MemoryLayout;
pub use packer::{Beat, BeatFormat, Element};
pub use profiler::{ProfileSnapshot, RunState, RunStatus};
