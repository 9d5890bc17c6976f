pub mod log;
pub mod report;

pub use report::{format_profile, print_profile, print_simulation_records};
