pub mod arch;
pub mod error;
pub mod simulator;

pub use arch::conv::{ConvAccelerator, ConvConf, HwConfig};
pub use error::ConvError;
pub use simulator::utils::log;
pub use simulator::{RunReport, Simulator};
