use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scenes::Easing;

pub const DEFAULT_CONFIG_PATH: &str = "config/runtime.json";

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_update_rate")]
    pub update_rate: f64,
    /// Pace of the headless frame host, in frames per second.
    #[serde(default = "SchedulerConfig::default_refresh_rate")]
    pub refresh_rate: f64,
    #[serde(default)]
    pub max_frames: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "ScriptConfig::default_root")]
    pub root: PathBuf,
    #[serde(default = "ScriptConfig::default_entry_point")]
    pub entry_point: String,
    #[serde(default = "ScriptConfig::default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "ScriptConfig::default_reload_timeout_ms")]
    pub reload_timeout_ms: u64,
    #[serde(default)]
    pub max_operations: Option<u64>,
    #[serde(default = "ScriptConfig::default_update_fn")]
    pub update_fn: String,
    #[serde(default = "ScriptConfig::default_draw_fn")]
    pub draw_fn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReloadConfig {
    #[serde(default = "ReloadConfig::default_true")]
    pub watch: bool,
    #[serde(default = "ReloadConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "ReloadConfig::default_true")]
    pub report_errors: bool,
    #[serde(default = "ReloadConfig::default_true")]
    pub report_warnings: bool,
    #[serde(default = "ReloadConfig::default_true")]
    pub allow_reinit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "SceneConfig::default_auto_update")]
    pub auto_update: bool,
    /// Curve guests see through `transition_alpha()`.
    #[serde(default)]
    pub transition_easing: Easing,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub scenes: SceneConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeConfigOverrides {
    pub scripts_root: Option<PathBuf>,
    pub update_rate: Option<f64>,
    pub max_frames: Option<u64>,
    pub watch: Option<bool>,
}

impl SchedulerConfig {
    const fn default_update_rate() -> f64 {
        60.0
    }

    const fn default_refresh_rate() -> f64 {
        60.0
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_rate: Self::default_update_rate(),
            refresh_rate: Self::default_refresh_rate(),
            max_frames: None,
        }
    }
}

impl ScriptConfig {
    fn default_root() -> PathBuf {
        PathBuf::from("assets/scripts")
    }

    fn default_entry_point() -> String {
        "init".to_string()
    }

    const fn default_call_timeout_ms() -> u64 {
        250
    }

    const fn default_reload_timeout_ms() -> u64 {
        3_000
    }

    fn default_update_fn() -> String {
        "update".to_string()
    }

    fn default_draw_fn() -> String {
        "draw".to_string()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            entry_point: Self::default_entry_point(),
            call_timeout_ms: Self::default_call_timeout_ms(),
            reload_timeout_ms: Self::default_reload_timeout_ms(),
            max_operations: None,
            update_fn: Self::default_update_fn(),
            draw_fn: Self::default_draw_fn(),
        }
    }
}

impl ReloadConfig {
    const fn default_true() -> bool {
        true
    }

    const fn default_poll_interval_ms() -> u64 {
        300
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            watch: true,
            poll_interval_ms: Self::default_poll_interval_ms(),
            report_errors: true,
            report_warnings: true,
            allow_reinit: true,
        }
    }
}

impl SceneConfig {
    const fn default_auto_update() -> bool {
        true
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { auto_update: Self::default_auto_update(), transition_easing: Easing::default() }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        cfg.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] {err:#}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scheduler.update_rate.is_finite() && self.scheduler.update_rate > 0.0) {
            bail!("scheduler.update_rate must be a positive number, got {}", self.scheduler.update_rate);
        }
        if !(self.scheduler.refresh_rate.is_finite() && self.scheduler.refresh_rate > 0.0) {
            bail!("scheduler.refresh_rate must be a positive number, got {}", self.scheduler.refresh_rate);
        }
        if self.script.entry_point.trim().is_empty() {
            bail!("script.entry_point must not be empty");
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(root) = overrides.scripts_root.as_ref() {
            self.script.root = root.clone();
        }
        if let Some(rate) = overrides.update_rate {
            self.scheduler.update_rate = rate;
        }
        if let Some(frames) = overrides.max_frames {
            self.scheduler.max_frames = Some(frames);
        }
        if let Some(watch) = overrides.watch {
            self.reload.watch = watch;
        }
    }
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.scripts_root.is_none() && self.update_rate.is_none() && self.max_frames.is_none() && self.watch.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.scripts_root.is_some() {
            fields.push("scripts");
        }
        if self.update_rate.is_some() {
            fields.push("update_rate");
        }
        if self.max_frames.is_some() {
            fields.push("frames");
        }
        if self.watch.is_some() {
            fields.push("watch");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp config");
        file.write_all(json.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(r#"{ "scheduler": { "update_rate": 30 }, "reload": { "watch": false } }"#);
        let cfg = RuntimeConfig::load(file.path()).expect("load");
        assert_eq!(cfg.scheduler.update_rate, 30.0);
        assert_eq!(cfg.scheduler.refresh_rate, 60.0);
        assert!(!cfg.reload.watch);
        assert!(cfg.reload.allow_reinit);
        assert_eq!(cfg.script.entry_point, "init");
        assert_eq!(cfg.script.reload_timeout(), Duration::from_secs(3));
        assert!(cfg.scenes.auto_update);
        assert_eq!(cfg.scenes.transition_easing, Easing::Linear);
    }

    #[test]
    fn bundled_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let cfg = RuntimeConfig::load(&path).expect("bundled config");
        assert_eq!(cfg.scenes.transition_easing, Easing::EaseInOut);
        assert_eq!(cfg.reload.poll_interval(), Duration::from_millis(300));
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let file = write_config(r#"{ "scheduler": { "update_rate": 0 } }"#);
        let err = RuntimeConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("update_rate"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load_or_default("does/not/exist.json");
        assert_eq!(cfg.script.root, PathBuf::from("assets/scripts"));
        assert_eq!(cfg.script.call_timeout_ms, 250);
    }

    #[test]
    fn overrides_replace_selected_fields() {
        let mut cfg = RuntimeConfig::default();
        let overrides = RuntimeConfigOverrides {
            scripts_root: Some(PathBuf::from("demo")),
            max_frames: Some(120),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
        assert_eq!(overrides.applied_fields(), vec!["scripts", "frames"]);
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.script.root, PathBuf::from("demo"));
        assert_eq!(cfg.scheduler.max_frames, Some(120));
        assert_eq!(cfg.scheduler.update_rate, 60.0);
        assert!(RuntimeConfigOverrides::default().is_empty());
    }
}
