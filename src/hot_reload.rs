//! Applies edited script units to a live [`ScriptHost`].
//!
//! Each unit is reloaded only when its text changes. The cache is updated before the
//! compile so a broken edit is attempted once, not on every trigger. After a successful
//! reload the entry point is re-run only when its own definition changed, which keeps
//! game state intact across edits elsewhere.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::listener::{ListenerHandle, ListenerMessage};
use crate::scripts::{ErrorKind, ScriptError, ScriptHost};

pub const DEFAULT_ENTRY_POINT: &str = "init";
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_millis(3_000);
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_millis(250);

/// Collaborators whose transient state would desync from freshly loaded code. Invoked
/// before every reload attempt, whether or not it succeeds.
pub trait ReloadHooks {
    fn cancel_scheduled_audio(&mut self) {}

    fn clear_draw_surface(&mut self) {}
}

pub struct NoopReloadHooks;

impl ReloadHooks for NoopReloadHooks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No VM attached; nothing was touched.
    Unavailable,
    /// Same text as the last attempt for this unit.
    Unchanged,
    Failed,
    Applied { reinitialized: bool },
}

impl ReloadOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, ReloadOutcome::Applied { .. })
    }
}

pub struct HotReloadUpdater {
    sources: HashMap<String, String>,
    last_entry_body: Option<String>,
    entry_point: String,
    reload_timeout: Duration,
    init_timeout: Duration,
    report_errors: bool,
    report_warnings: bool,
    listener: ListenerHandle,
}

impl HotReloadUpdater {
    pub fn new(listener: ListenerHandle) -> Self {
        Self {
            sources: HashMap::new(),
            last_entry_body: None,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            report_errors: true,
            report_warnings: true,
            listener,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_timeouts(mut self, reload: Duration, init: Duration) -> Self {
        self.reload_timeout = reload;
        self.init_timeout = init;
        self
    }

    pub fn with_reporting(mut self, errors: bool, warnings: bool) -> Self {
        self.report_errors = errors;
        self.report_warnings = warnings;
        self
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn cached_source(&self, unit: &str) -> Option<&str> {
        self.sources.get(unit).map(String::as_str)
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Drops the cached text for `unit` so the next update always recompiles it.
    pub fn forget(&mut self, unit: &str) -> bool {
        self.sources.remove(unit).is_some()
    }

    pub fn update_source(
        &mut self,
        host: &mut ScriptHost,
        hooks: &mut dyn ReloadHooks,
        unit: &str,
        source: &str,
        allow_reinit: bool,
    ) -> ReloadOutcome {
        if !host.is_available() {
            return ReloadOutcome::Unavailable;
        }
        if self.sources.get(unit).is_some_and(|cached| cached == source) {
            return ReloadOutcome::Unchanged;
        }
        self.sources.insert(unit.to_string(), source.to_string());

        hooks.cancel_scheduled_audio();
        hooks.clear_draw_surface();

        host.clear_warnings();
        let timeout = self.reload_timeout;
        let ran = catch_unwind(AssertUnwindSafe(|| host.run(source, timeout, unit)));
        if let Err(panic) = ran {
            let error = ScriptError::new(panic_message(panic.as_ref()), ErrorKind::Init, unit);
            log::error!("[reload] {error}");
            if self.report_errors {
                self.listener.report_error(&error);
            }
            return ReloadOutcome::Failed;
        }

        if host.last_error().is_none() {
            log::info!("[reload] compiled '{unit}'");
            self.listener.post_message(&ListenerMessage::compile_success(unit));
        }
        self.report_warnings(host, unit);

        if let Some(error) = host.last_error() {
            let error = error.tagged(ErrorKind::Init, unit);
            log::warn!("[reload] {error}");
            if self.report_errors {
                self.listener.report_error(&error);
            }
            return ReloadOutcome::Failed;
        }

        let reinitialized = allow_reinit && self.reinit_if_changed(host);
        ReloadOutcome::Applied { reinitialized }
    }

    /// Runs the entry point once at boot, recording its definition for later comparisons.
    /// Returns `false` when the entry point is missing or fails.
    pub fn initialize(&mut self, host: &mut ScriptHost) -> bool {
        let Some(body) = host.function_source(&self.entry_point) else {
            log::debug!("[reload] no '{}' entry point defined", self.entry_point);
            return false;
        };
        self.last_entry_body = Some(body);
        self.call_entry_point(host)
    }

    fn reinit_if_changed(&mut self, host: &mut ScriptHost) -> bool {
        let Some(body) = host.function_source(&self.entry_point) else {
            return false;
        };
        if self.last_entry_body.as_deref() == Some(body.as_str()) {
            return false;
        }
        self.last_entry_body = Some(body);
        log::info!("[reload] '{}' changed, re-running", self.entry_point);
        self.call_entry_point(host);
        true
    }

    fn call_entry_point(&self, host: &mut ScriptHost) -> bool {
        match host.call(&self.entry_point, &[], self.init_timeout) {
            Ok(_) => true,
            Err(err) => {
                let error = err.tagged(ErrorKind::Init, &err.file);
                log::warn!("[reload] {error}");
                if self.report_errors {
                    self.listener.report_error(&error);
                }
                false
            }
        }
    }

    fn report_warnings(&self, host: &ScriptHost, unit: &str) {
        let warnings = host.warnings();
        if warnings.is_empty() {
            return;
        }
        for warning in warnings {
            log::warn!("[reload] {warning}");
        }
        if self.report_warnings {
            self.listener
                .post_message(&ListenerMessage::ScriptWarnings { file: unit.to_string(), warnings: warnings.to_vec() });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "script host panicked".to_string()
    }
}
