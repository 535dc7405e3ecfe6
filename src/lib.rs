pub mod cli;
pub mod config;
pub mod hot_reload;
pub mod listener;
pub mod runtime;
pub mod scenes;
pub mod scheduler;
pub mod scripts;
pub mod time;
pub mod watch;

use std::path::Path;
use std::rc::Rc;

use anyhow::Result;

pub use config::{RuntimeConfig, RuntimeConfigOverrides};
pub use runtime::{BootReport, RunSummary, Runtime};

/// Loads the config at `config_path`, applies `overrides`, boots the scripts and runs
/// headless with log-backed listener output.
pub fn run_with_overrides(config_path: impl AsRef<Path>, overrides: RuntimeConfigOverrides) -> Result<RunSummary> {
    let mut config = RuntimeConfig::load_or_default(config_path);
    if !overrides.is_empty() {
        log::info!("[cli] overriding {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);
    config.validate()?;
    let mut runtime = Runtime::new(config, Rc::new(time::SystemClock::new()), listener::ListenerHandle::logging());
    runtime.boot()?;
    runtime.run()
}
