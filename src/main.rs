use cartridge_core::cli::CliOverrides;
use cartridge_core::config::DEFAULT_CONFIG_PATH;
use cartridge_core::run_with_overrides;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            log::error!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = cli.config_path().cloned().unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
    match run_with_overrides(config_path, cli.into_config_overrides()) {
        Ok(summary) => log::info!(
            "[runtime] stopped after {} frame(s), {} step(s), {} reload(s)",
            summary.frames,
            summary.steps,
            summary.reloads
        ),
        Err(err) => {
            log::error!("Application error: {err:?}");
            std::process::exit(1);
        }
    }
}
