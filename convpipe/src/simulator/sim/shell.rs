use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::error::{ConvError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Step(u32), // Step N times
  Status,
  Quit,
  Continue,
}

/// Parses one line of step-mode input.
pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
  let trimmed = line.trim();

  if trimmed.is_empty() {
    return Ok(Command::Step(1));
  }

  if let Some(rest) = trimmed.strip_prefix("si") {
    let num_str = rest.trim();
    if num_str.is_empty() {
      return Err("'si' requires a number, e.g., 'si 100'".to_string());
    }
    return match num_str.parse::<u32>() {
      Ok(n) if n > 0 => Ok(Command::Step(n)),
      Ok(_) => Err("step count must be greater than 0".to_string()),
      Err(e) => Err(format!("invalid number '{}': {}", num_str, e)),
    };
  }

  match trimmed {
    "q" => Ok(Command::Quit),
    "c" => Ok(Command::Continue),
    "st" => Ok(Command::Status),
    _ => Err(format!(
      "unknown command '{}'. Use Enter to step, 'si 100' to step N times, 'st' for status, 'c' to continue, 'q' to quit",
      trimmed
    )),
  }
}

/// Line editor for interactive step mode.
pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| ConvError::Io(std::io::Error::other(e)))?;
    Ok(Self { editor })
  }

  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(convpipe) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          match parse_command(trimmed) {
            Ok(cmd) => return Ok(cmd),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        },
        // Ctrl-C and Ctrl-D both quit
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(ConvError::Io(std::io::Error::other(err))),
      }
    }
  }
}
