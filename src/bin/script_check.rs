use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use cartridge_core::hot_reload::{HotReloadUpdater, NoopReloadHooks};
use cartridge_core::listener::{ListenerHandle, ListenerMessage, RecordingListener};
use cartridge_core::scripts::{GuestApi, RhaiVm, ScriptHost};
use cartridge_core::time::SystemClock;
use cartridge_core::watch::discover_units;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let root = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("assets/scripts"));
    println!("[script-check] checking scripts under '{}'", root.display());

    let listener = RecordingListener::new();
    let handle = ListenerHandle::new(listener.clone());
    let guest = GuestApi::new();
    let mut host = ScriptHost::new(Box::new(RhaiVm::with_guest_api(&guest)), Rc::new(SystemClock::new()), handle.clone());
    let mut updater = HotReloadUpdater::new(handle);

    let units = discover_units(&root)?;
    let mut failed = 0usize;
    for (unit, path) in &units {
        let source = std::fs::read_to_string(path).with_context(|| format!("Reading '{}'", path.display()))?;
        let outcome = updater.update_source(&mut host, &mut NoopReloadHooks, unit, &source, false);
        guest.clear_commands();
        if !outcome.is_applied() {
            failed += 1;
        }
        for error in listener.errors() {
            println!("  error   {error}");
        }
        for message in listener.messages() {
            if let ListenerMessage::ScriptWarnings { warnings, .. } = message {
                for warning in warnings {
                    println!("  warning {warning}");
                }
            }
        }
        listener.drain();
    }

    println!("[script-check] {} unit(s), {failed} failed", units.len());
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
