use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::config::RuntimeConfig;
use crate::hot_reload::{HotReloadUpdater, NoopReloadHooks, ReloadHooks, ReloadOutcome};
use crate::listener::ListenerHandle;
use crate::scenes::{SceneManager, ScriptScene};
use crate::scheduler::{FrameCallbacks, FrameHost, FrameReport, FrameScheduler, PacedFrameHost};
use crate::scripts::{GuestApi, GuestCommand, RhaiVm, ScriptHost};
use crate::time::Clock;
use crate::watch::{discover_units, SourceChange};

#[cfg(feature = "watch")]
use crate::watch::SourceWatcher;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
    pub initialized: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub steps: u64,
    pub reloads: usize,
}

/// Owns the script host, hot reloader and scene manager, and services frames for a
/// [`FrameScheduler`].
pub struct Runtime {
    config: RuntimeConfig,
    clock: Rc<dyn Clock>,
    guest: GuestApi,
    host: Rc<RefCell<ScriptHost>>,
    updater: HotReloadUpdater,
    hooks: Box<dyn ReloadHooks>,
    scenes: SceneManager,
    #[cfg(feature = "watch")]
    watcher: Option<SourceWatcher>,
    step_observer: Option<Box<dyn FnMut(u64)>>,
    fps: u32,
    steps: u64,
    reloads: usize,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, clock: Rc<dyn Clock>, listener: ListenerHandle) -> Self {
        let guest = GuestApi::new();
        let mut host = ScriptHost::new(Box::new(RhaiVm::with_guest_api(&guest)), clock.clone(), listener.clone());
        host.set_max_operations(config.script.max_operations);
        let updater = HotReloadUpdater::new(listener.clone())
            .with_entry_point(config.script.entry_point.clone())
            .with_timeouts(config.script.reload_timeout(), config.script.call_timeout())
            .with_reporting(config.reload.report_errors, config.reload.report_warnings);
        let mut scenes = SceneManager::new(clock.clone());
        scenes.set_auto_update(config.scenes.auto_update);
        scenes.set_listener(listener);
        Self {
            config,
            clock,
            guest,
            host: Rc::new(RefCell::new(host)),
            updater,
            hooks: Box::new(NoopReloadHooks),
            scenes,
            #[cfg(feature = "watch")]
            watcher: None,
            step_observer: None,
            fps: 0,
            steps: 0,
            reloads: 0,
        }
    }

    pub fn with_reload_hooks(mut self, hooks: impl ReloadHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Called with the total step count after every frame that ran at least one step.
    pub fn set_step_observer(&mut self, observer: impl FnMut(u64) + 'static) {
        self.step_observer = Some(Box::new(observer));
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn host(&self) -> Rc<RefCell<ScriptHost>> {
        self.host.clone()
    }

    pub fn guest(&self) -> &GuestApi {
        &self.guest
    }

    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut SceneManager {
        &mut self.scenes
    }

    pub fn updater(&self) -> &HotReloadUpdater {
        &self.updater
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Loads every script below the configured root in unit order, then runs the entry
    /// point once.
    pub fn boot(&mut self) -> Result<BootReport> {
        let root = self.config.script.root.clone();
        let units = discover_units(&root)?;
        if units.is_empty() {
            log::warn!("[runtime] no scripts found in {}", root.display());
        }
        let mut report = BootReport::default();
        for (unit, path) in units {
            let source = read_source(&path)?;
            match self.load_unit(&unit, &source, false) {
                ReloadOutcome::Applied { .. } | ReloadOutcome::Unchanged => report.loaded.push(unit),
                ReloadOutcome::Failed | ReloadOutcome::Unavailable => report.failed.push(unit),
            }
        }
        report.initialized = match self.host.try_borrow_mut() {
            Ok(mut host) => self.updater.initialize(&mut host),
            Err(_) => false,
        };
        self.apply_guest_commands();
        log::info!(
            "[runtime] booted {} unit(s), {} failed, entry point {}",
            report.loaded.len(),
            report.failed.len(),
            if report.initialized { "ran" } else { "skipped" }
        );
        Ok(report)
    }

    pub fn load_unit(&mut self, unit: &str, source: &str, allow_reinit: bool) -> ReloadOutcome {
        let outcome = match self.host.try_borrow_mut() {
            Ok(mut host) => self.updater.update_source(&mut host, self.hooks.as_mut(), unit, source, allow_reinit),
            Err(_) => {
                log::warn!("[runtime] script host busy, '{unit}' not loaded");
                return ReloadOutcome::Unavailable;
            }
        };
        self.apply_guest_commands();
        outcome
    }

    pub fn reload_change(&mut self, change: &SourceChange) -> Result<ReloadOutcome> {
        let source = read_source(&change.path)?;
        let outcome = self.load_unit(&change.unit, &source, self.config.reload.allow_reinit);
        if outcome.is_applied() {
            self.reloads += 1;
        }
        Ok(outcome)
    }

    #[cfg(feature = "watch")]
    pub fn start_watching(&mut self) -> Result<()> {
        let watcher = SourceWatcher::new(&self.config.script.root, self.config.reload.poll_interval())?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Applies file changes seen by the watcher since the last poll.
    pub fn poll_changes(&mut self) -> Vec<(String, ReloadOutcome)> {
        #[cfg(feature = "watch")]
        {
            let changes = match self.watcher.as_mut() {
                Some(watcher) => watcher.drain_changes(),
                None => return Vec::new(),
            };
            let mut outcomes = Vec::new();
            for change in changes {
                match self.reload_change(&change) {
                    Ok(outcome) => outcomes.push((change.unit, outcome)),
                    Err(err) => log::warn!("[runtime] reload of '{}' skipped: {err:#}", change.unit),
                }
            }
            outcomes
        }
        #[cfg(not(feature = "watch"))]
        {
            Vec::new()
        }
    }

    /// Watches for edits, services one frame, and returns its report.
    pub fn step_frame<H: FrameHost>(&mut self, scheduler: &mut FrameScheduler<H>) -> Option<FrameReport> {
        self.poll_changes();
        scheduler.frame(self)
    }

    /// Runs headless on a paced host until `max_frames` is reached, or forever. Every scene
    /// is destroyed on the way out.
    pub fn run(&mut self) -> Result<RunSummary> {
        #[cfg(feature = "watch")]
        if self.config.reload.watch && self.watcher.is_none() {
            if let Err(err) = self.start_watching() {
                log::warn!("[runtime] hot reload disabled: {err:#}");
            }
        }
        let mut scheduler = FrameScheduler::new(PacedFrameHost::new(self.config.scheduler.refresh_rate), self.clock.clone());
        scheduler.set_update_rate(self.config.scheduler.update_rate);
        scheduler.start();
        let mut frames = 0;
        while self.config.scheduler.max_frames.map_or(true, |max| frames < max) {
            if !scheduler.host_mut().wait_for_frame() {
                break;
            }
            if self.step_frame(&mut scheduler).is_some() {
                frames += 1;
            }
        }
        scheduler.stop();
        self.scenes.clear();
        Ok(RunSummary { frames, steps: self.steps, reloads: self.reloads })
    }

    fn apply_guest_commands(&mut self) {
        for command in self.guest.drain_commands() {
            match command {
                GuestCommand::RegisterScene(id) => {
                    let scene = ScriptScene::new(id, self.host.clone(), self.config.script.call_timeout());
                    if let Err(err) = self.scenes.add_scene(Box::new(scene)) {
                        log::debug!("[runtime] {err}");
                    }
                }
                GuestCommand::Scene(command) => {
                    if let Err(err) = self.scenes.apply(command) {
                        log::warn!("[runtime] scene navigation failed: {err}");
                    }
                }
            }
        }
        self.sync_guest();
    }

    fn sync_guest(&self) {
        self.guest.sync(self.fps, self.steps, self.scenes.active_id());
        self.guest.sync_transition(self.scenes.transition_alpha(self.config.scenes.transition_easing));
    }

    fn call_guest(&self, name: &str) {
        let Ok(mut host) = self.host.try_borrow_mut() else {
            return;
        };
        if !host.has_function(name) {
            return;
        }
        if let Err(err) = host.call(name, &[], self.config.script.call_timeout()) {
            host.listener().report_error(&err);
        }
    }
}

impl FrameCallbacks for Runtime {
    fn update(&mut self) {
        self.apply_guest_commands();
        let update_fn = self.config.script.update_fn.clone();
        self.call_guest(&update_fn);
        self.scenes.update();
        self.steps += 1;
        self.sync_guest();
    }

    fn draw(&mut self) {
        let draw_fn = self.config.script.draw_fn.clone();
        self.call_guest(&draw_fn);
        self.scenes.draw();
    }

    fn tick(&mut self) {
        self.scenes.poll_pending();
    }

    fn watch_step(&mut self) {
        let steps = self.steps;
        if let Some(observer) = self.step_observer.as_mut() {
            observer(steps);
        }
    }

    fn update_rate(&mut self) -> Option<f64> {
        self.guest.update_rate()
    }

    fn set_fps(&mut self, fps: u32) {
        self.fps = fps;
        self.sync_guest();
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))
}
