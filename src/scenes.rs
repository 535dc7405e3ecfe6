//! Scene registry and lifecycle.
//!
//! A scene moves through `Idle -> Initializing -> Active <-> Paused -> Destroyed`. The
//! manager owns every registered scene, tracks the active one plus a navigation stack,
//! and drives at most one timed transition at a time. Navigation requested from inside a
//! scene callback is queued and applied at the start of the next [`SceneManager::update`].

pub mod script_scene;
pub mod transition;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use futures_util::task::noop_waker_ref;
use thiserror::Error;

use crate::listener::{ListenerHandle, ListenerMessage};
use crate::time::Clock;

pub use script_scene::ScriptScene;
pub use transition::{Easing, Transition, TransitionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneStatus {
    Idle,
    Initializing,
    Active,
    Paused,
    Destroyed,
}

impl SceneStatus {
    pub fn label(self) -> &'static str {
        match self {
            SceneStatus::Idle => "idle",
            SceneStatus::Initializing => "initializing",
            SceneStatus::Active => "active",
            SceneStatus::Paused => "paused",
            SceneStatus::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of [`Scene::init`]. A pending future is polled by the manager until it resolves.
pub enum SceneInit {
    Ready,
    Pending(LocalBoxFuture<'static, ()>),
}

impl fmt::Debug for SceneInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneInit::Ready => f.write_str("Ready"),
            SceneInit::Pending(_) => f.write_str("Pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneCommand {
    Activate(String),
    Transition { id: String, duration_ms: f64, destroy_previous: bool, pause_previous: bool },
    Push(String),
    Pop { destroy: bool },
    Remove(String),
}

/// Handed to [`Scene::update`]; navigation requested here runs on the next manager update.
pub struct SceneContext<'a> {
    now_ms: f64,
    commands: &'a mut Vec<SceneCommand>,
}

impl<'a> SceneContext<'a> {
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    pub fn goto(&mut self, id: &str) {
        self.commands.push(SceneCommand::Activate(id.to_string()));
    }

    pub fn transition(&mut self, id: &str, duration_ms: f64) {
        self.commands.push(SceneCommand::Transition {
            id: id.to_string(),
            duration_ms,
            destroy_previous: false,
            pause_previous: true,
        });
    }

    pub fn push(&mut self, id: &str) {
        self.commands.push(SceneCommand::Push(id.to_string()));
    }

    pub fn pop(&mut self, destroy: bool) {
        self.commands.push(SceneCommand::Pop { destroy });
    }
}

pub trait Scene {
    fn id(&self) -> &str;

    fn init(&mut self) -> SceneInit {
        SceneInit::Ready
    }

    fn update(&mut self, _ctx: &mut SceneContext<'_>) {}

    fn draw(&mut self) {}

    fn on_pause(&mut self) {}

    fn on_resume(&mut self) {}

    fn destroy(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("scene '{0}' is not registered")]
    UnknownScene(String),
    #[error("scene '{0}' is already registered")]
    DuplicateScene(String),
}

struct SceneEntry {
    scene: Box<dyn Scene>,
    status: SceneStatus,
    pending_init: Option<LocalBoxFuture<'static, ()>>,
}

pub struct SceneManager {
    clock: Rc<dyn Clock>,
    registry: HashMap<String, SceneEntry>,
    active_id: Option<String>,
    stack: Vec<String>,
    transition: Option<Transition>,
    queued: Vec<SceneCommand>,
    auto_update: bool,
    listener: Option<ListenerHandle>,
}

impl SceneManager {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            registry: HashMap::new(),
            active_id: None,
            stack: Vec::new(),
            transition: None,
            queued: Vec::new(),
            auto_update: true,
            listener: None,
        }
    }

    /// Posts a `scene_changed` message to `listener` whenever the active scene changes.
    pub fn set_listener(&mut self, listener: ListenerHandle) {
        self.listener = Some(listener);
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        self.auto_update = enabled;
    }

    pub fn has_scene(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<SceneStatus> {
        self.registry.get(id).map(|entry| entry.status)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn transition(&self) -> Option<&Transition> {
        self.transition.as_ref()
    }

    pub fn transition_progress(&self) -> Option<f64> {
        self.transition.as_ref().map(|transition| transition.progress)
    }

    /// Eased progress of the in-flight transition, for compositing the incoming scene.
    pub fn transition_alpha(&self, easing: Easing) -> Option<f64> {
        self.transition_progress().map(|progress| easing.apply(progress))
    }

    pub fn scene_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn add_scene(&mut self, scene: Box<dyn Scene>) -> Result<(), SceneError> {
        let id = scene.id().to_string();
        if self.registry.contains_key(&id) {
            return Err(SceneError::DuplicateScene(id));
        }
        log::debug!("[scenes] registered '{id}'");
        self.registry.insert(id, SceneEntry { scene, status: SceneStatus::Idle, pending_init: None });
        Ok(())
    }

    /// Destroys and unregisters `id`. Returns `false` when it was not registered.
    pub fn remove_scene(&mut self, id: &str) -> bool {
        let Some(mut entry) = self.registry.remove(id) else {
            return false;
        };
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        self.stack.retain(|entry_id| entry_id != id);
        if self.transition.as_ref().is_some_and(|transition| transition.involves(id)) {
            log::debug!("[scenes] '{id}' was removed mid-transition");
            self.cancel_transition(None);
        }
        entry.status = SceneStatus::Destroyed;
        entry.pending_init = None;
        entry.scene.destroy();
        log::debug!("[scenes] removed '{id}'");
        true
    }

    /// Makes `id` the active scene immediately, replacing the top of the stack.
    pub fn set_active_scene(&mut self, id: &str) -> Result<(), SceneError> {
        self.ensure_registered(id)?;
        self.cancel_transition(Some(id));
        let previous = self.active_id.clone();
        if previous.as_deref() == Some(id) {
            self.activate(id);
            return Ok(());
        }
        if let Some(previous) = previous.as_deref() {
            self.pause(previous);
        }
        self.activate(id);
        self.stack.retain(|entry| entry != id && Some(entry.as_str()) != previous.as_deref());
        self.stack.push(id.to_string());
        self.active_id = Some(id.to_string());
        self.notify_changed(previous, id);
        Ok(())
    }

    pub fn transition_to(&mut self, id: &str, options: TransitionOptions) -> Result<(), SceneError> {
        self.ensure_registered(id)?;
        if self.active_id.as_deref() == Some(id) {
            // Heading back to the current scene abandons any transition away from it.
            self.cancel_transition(Some(id));
            return Ok(());
        }
        if options.duration_ms <= 0.0 {
            self.cancel_transition(Some(id));
            if let Some(previous) = self.active_id.clone() {
                if options.destroy_previous {
                    self.remove_scene(&previous);
                } else if options.pause_previous {
                    self.pause(&previous);
                }
            }
            return self.set_active_scene(id);
        }
        self.cancel_transition(Some(id));
        let now = self.clock.now_ms();
        self.transition = Some(Transition::new(self.active_id.clone(), id.to_string(), now, options));
        self.activate(id);
        Ok(())
    }

    /// Pauses the current top and activates `id` above it.
    pub fn push_scene(&mut self, id: &str) -> Result<(), SceneError> {
        self.ensure_registered(id)?;
        if self.stack.last().map(String::as_str) == Some(id) {
            return Ok(());
        }
        let previous = self.active_id.clone();
        if let Some(top) = self.stack.last().cloned() {
            self.pause(&top);
        }
        self.activate(id);
        self.stack.retain(|entry| entry != id);
        self.stack.push(id.to_string());
        self.active_id = Some(id.to_string());
        self.notify_changed(previous, id);
        Ok(())
    }

    /// Removes the top of the stack, destroying or pausing it, and resumes the scene below.
    pub fn pop_scene(&mut self, destroy: bool) -> Option<String> {
        let top = self.stack.pop()?;
        if destroy {
            self.remove_scene(&top);
        } else {
            self.pause(&top);
        }
        if self.active_id.as_deref() == Some(top.as_str()) {
            self.active_id = None;
        }
        match self.stack.last().cloned() {
            Some(below) => {
                self.activate(&below);
                self.active_id = Some(below.clone());
                self.notify_changed(Some(top.clone()), &below);
            }
            None => self.active_id = None,
        }
        Some(top)
    }

    /// Queues navigation to run at the start of the next [`update`](Self::update).
    pub fn queue(&mut self, command: SceneCommand) {
        self.queued.push(command);
    }

    pub fn apply(&mut self, command: SceneCommand) -> Result<(), SceneError> {
        match command {
            SceneCommand::Activate(id) => self.set_active_scene(&id),
            SceneCommand::Transition { id, duration_ms, destroy_previous, pause_previous } => self.transition_to(
                &id,
                TransitionOptions { duration_ms, transition_fn: None, destroy_previous, pause_previous },
            ),
            SceneCommand::Push(id) => self.push_scene(&id),
            SceneCommand::Pop { destroy } => {
                self.pop_scene(destroy);
                Ok(())
            }
            SceneCommand::Remove(id) => {
                if self.remove_scene(&id) {
                    Ok(())
                } else {
                    Err(SceneError::UnknownScene(id))
                }
            }
        }
    }

    /// Advances any in-flight transition, otherwise updates the active scene.
    pub fn update(&mut self) {
        for command in std::mem::take(&mut self.queued) {
            if let Err(err) = self.apply(command) {
                log::warn!("[scenes] queued navigation failed: {err}");
            }
        }
        self.poll_pending();

        let now = self.clock.now_ms();
        let completed = match self.transition.as_mut() {
            Some(transition) => transition.advance(now),
            None => false,
        };
        if completed {
            if let Some(transition) = self.transition.take() {
                self.complete_transition(transition);
            }
            return;
        }
        if !self.auto_update {
            return;
        }
        if let Some(id) = self.active_id.clone() {
            self.update_scene(&id, now);
        }
    }

    /// Draws both sides of an in-flight transition, otherwise only the active scene.
    pub fn draw(&mut self) {
        let ids: Vec<String> = match self.transition.as_ref() {
            Some(transition) => transition.from.iter().cloned().chain(std::iter::once(transition.to.clone())).collect(),
            None => self.active_id.iter().cloned().collect(),
        };
        for id in ids {
            if let Some(entry) = self.registry.get_mut(&id) {
                if entry.status == SceneStatus::Active {
                    entry.scene.draw();
                }
            }
        }
    }

    /// Polls every pending asynchronous init once.
    pub fn poll_pending(&mut self) {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut resolved = Vec::new();
        for (id, entry) in self.registry.iter_mut() {
            let Some(future) = entry.pending_init.as_mut() else {
                continue;
            };
            if let Poll::Ready(()) = future.as_mut().poll(&mut cx) {
                entry.pending_init = None;
                resolved.push(id.clone());
            }
        }
        for id in resolved {
            self.finish_init(&id);
        }
    }

    /// Destroys every scene and resets navigation.
    pub fn clear(&mut self) {
        self.active_id = None;
        self.stack.clear();
        self.transition = None;
        self.queued.clear();
        for (id, mut entry) in self.registry.drain() {
            entry.status = SceneStatus::Destroyed;
            entry.pending_init = None;
            entry.scene.destroy();
            log::debug!("[scenes] cleared '{id}'");
        }
    }

    fn ensure_registered(&self, id: &str) -> Result<(), SceneError> {
        if self.registry.contains_key(id) {
            Ok(())
        } else {
            Err(SceneError::UnknownScene(id.to_string()))
        }
    }

    fn activate(&mut self, id: &str) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        match (entry.status, entry.pending_init.is_some()) {
            (SceneStatus::Idle, _) | (SceneStatus::Initializing, false) => self.begin_init(id),
            (SceneStatus::Paused, _) => {
                entry.scene.on_resume();
                entry.status = SceneStatus::Active;
            }
            _ => {}
        }
    }

    fn begin_init(&mut self, id: &str) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        entry.status = SceneStatus::Initializing;
        match entry.scene.init() {
            SceneInit::Ready => entry.status = SceneStatus::Active,
            SceneInit::Pending(mut future) => {
                let mut cx = Context::from_waker(noop_waker_ref());
                if future.as_mut().poll(&mut cx).is_ready() {
                    entry.status = SceneStatus::Active;
                } else {
                    log::debug!("[scenes] '{id}' initializing asynchronously");
                    entry.pending_init = Some(future);
                }
            }
        }
    }

    fn finish_init(&mut self, id: &str) {
        let is_target = self.active_id.as_deref() == Some(id)
            || self.transition.as_ref().is_some_and(|transition| transition.to == id);
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        if entry.status != SceneStatus::Initializing {
            return;
        }
        entry.status = if is_target { SceneStatus::Active } else { SceneStatus::Paused };
        log::debug!("[scenes] '{id}' finished initializing ({})", entry.status);
    }

    /// Drops the in-flight transition, pausing its target unless it is `keep` or already
    /// the active scene.
    fn cancel_transition(&mut self, keep: Option<&str>) {
        let Some(cancelled) = self.transition.take() else {
            return;
        };
        let target = cancelled.to.as_str();
        log::debug!("[scenes] transition to '{target}' cancelled");
        if keep != Some(target) && self.active_id.as_deref() != Some(target) {
            self.pause(target);
        }
    }

    fn pause(&mut self, id: &str) {
        if let Some(entry) = self.registry.get_mut(id) {
            if entry.status == SceneStatus::Active {
                entry.scene.on_pause();
                entry.status = SceneStatus::Paused;
            }
        }
    }

    fn update_scene(&mut self, id: &str, now_ms: f64) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        if entry.status != SceneStatus::Active {
            return;
        }
        let mut commands = Vec::new();
        let mut ctx = SceneContext { now_ms, commands: &mut commands };
        entry.scene.update(&mut ctx);
        self.queued.extend(commands);
    }

    fn complete_transition(&mut self, transition: Transition) {
        let Transition { from, to, .. } = &transition;
        if let Some(previous) = from.as_deref().filter(|previous| *previous != to.as_str()) {
            if transition.destroy_previous {
                self.remove_scene(previous);
            } else if transition.pause_previous {
                self.pause(previous);
            }
        }
        if !self.registry.contains_key(to.as_str()) {
            return;
        }
        self.stack.retain(|entry| entry != to && Some(entry) != from.as_ref());
        self.stack.push(to.clone());
        self.active_id = Some(to.clone());
        self.notify_changed(from.clone(), to);
    }

    fn notify_changed(&self, from: Option<String>, to: &str) {
        log::info!("[scenes] active scene '{}' -> '{to}'", from.as_deref().unwrap_or("-"));
        if let Some(listener) = self.listener.as_ref() {
            listener.post_message(&ListenerMessage::SceneChanged { from, to: to.to_string() });
        }
    }
}
