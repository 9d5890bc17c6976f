pub mod inject;
pub mod model;
pub mod records;
pub mod shell;

pub use inject::inject_message;
pub use model::{model_step, StepMode, TraceWriter};
pub use shell::{Command, Shell};
