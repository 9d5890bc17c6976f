use env_logger::{Builder, Env};

/// Installs the global logger. `RUST_LOG` wins over the default filter.
///
/// Safe to call more than once; later calls are ignored, which lets every
/// test initialise logging for itself.
pub fn init_log(quiet: bool) {
  let default_filter = if quiet { "warn" } else { "info" };
  let _ = Builder::from_env(Env::default().default_filter_or(default_filter))
    .format_timestamp(None)
    .try_init();
}
