use sim::simulator::{Message, Simulation};

use crate::arch::conv::msg;

/// Injects a host message into `target_model` at the current global time.
///
/// The message is delivered on the next simulation step.
pub fn inject_message(simulation: &mut Simulation, target_model: &str, port: &str, content: &str) {
  let msg = Message::new(
    msg::HOST.to_string(),
    port.to_string(),
    target_model.to_string(),
    port.to_string(),
    simulation.get_global_time(),
    content.to_string(),
  );
  simulation.inject_input(msg);
}
