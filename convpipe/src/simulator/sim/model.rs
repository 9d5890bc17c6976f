use log::LevelFilter;
use serde_json;
use sim::simulator::Message;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::arch::conv::ConvAccelerator;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

impl StepMode {
  pub fn from_flag(step: bool) -> Self {
    if step {
      StepMode::Step
    } else {
      StepMode::Continuous
    }
  }
}

/// JSON-lines record of every delivered message.
pub struct TraceWriter {
  writer: BufWriter<File>,
  entries: u64,
}

impl TraceWriter {
  pub fn create(path: &Path) -> Result<Self> {
    let file = File::create(path)?;
    log::info!("writing message trace to {}", path.display());
    Ok(Self {
      writer: BufWriter::new(file),
      entries: 0,
    })
  }

  pub fn write(&mut self, msg: &Message) -> Result<()> {
    let entry = serde_json::json!({
      "time": msg.time(),
      "source": msg.source_id(),
      "source_port": msg.source_port(),
      "target": msg.target_id(),
      "target_port": msg.target_port(),
      "content": msg.content()
    });
    writeln!(self.writer, "{}", entry)?;
    self.entries += 1;
    Ok(())
  }

  pub fn entries(&self) -> u64 {
    self.entries
  }

  pub fn flush(&mut self) -> Result<()> {
    self.writer.flush()?;
    Ok(())
  }
}

/// Delivers the pending messages and advances the accelerator one step.
pub fn model_step(accelerator: &mut ConvAccelerator, trace: &mut Option<TraceWriter>) -> Result<()> {
  let messages = accelerator.pending_messages();

  if log::max_level() >= LevelFilter::Debug {
    for msg in messages.iter() {
      log::debug!(
        "[MSG] t={:.1} {}:{} -> {}:{} | {}",
        msg.time(),
        msg.source_id(),
        msg.source_port(),
        msg.target_id(),
        msg.target_port(),
        msg.content()
      );
    }
  }

  if let Some(writer) = trace {
    for msg in messages.iter() {
      writer.write(msg)?;
    }
  }

  accelerator.step()
}
