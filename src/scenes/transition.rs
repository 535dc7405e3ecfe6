use std::fmt;

use serde::Deserialize;

/// Options for [`SceneManager::transition_to`](super::SceneManager::transition_to).
pub struct TransitionOptions {
    pub duration_ms: f64,
    /// Called with the raw progress in `[0, 1]` on every manager update while in flight.
    pub transition_fn: Option<Box<dyn FnMut(f64)>>,
    pub destroy_previous: bool,
    pub pause_previous: bool,
}

impl Default for TransitionOptions {
    fn default() -> Self {
        Self { duration_ms: 0.0, transition_fn: None, destroy_previous: false, pause_previous: true }
    }
}

impl fmt::Debug for TransitionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionOptions")
            .field("duration_ms", &self.duration_ms)
            .field("transition_fn", &self.transition_fn.is_some())
            .field("destroy_previous", &self.destroy_previous)
            .field("pause_previous", &self.pause_previous)
            .finish()
    }
}

impl TransitionOptions {
    pub fn timed(duration_ms: f64) -> Self {
        Self { duration_ms, ..Self::default() }
    }

    pub fn with_fn(mut self, transition_fn: impl FnMut(f64) + 'static) -> Self {
        self.transition_fn = Some(Box::new(transition_fn));
        self
    }

    pub fn destroy_previous(mut self, destroy: bool) -> Self {
        self.destroy_previous = destroy;
        self
    }

    pub fn pause_previous(mut self, pause: bool) -> Self {
        self.pause_previous = pause;
        self
    }
}

/// A timed hand-over between two scenes; both draw until it completes.
pub struct Transition {
    pub from: Option<String>,
    pub to: String,
    pub start_ms: f64,
    pub duration_ms: f64,
    pub progress: f64,
    transition_fn: Option<Box<dyn FnMut(f64)>>,
    pub(super) destroy_previous: bool,
    pub(super) pause_previous: bool,
}

impl Transition {
    pub(super) fn new(from: Option<String>, to: String, start_ms: f64, options: TransitionOptions) -> Self {
        Self {
            from,
            to,
            start_ms,
            duration_ms: options.duration_ms,
            progress: 0.0,
            transition_fn: options.transition_fn,
            destroy_previous: options.destroy_previous,
            pause_previous: options.pause_previous,
        }
    }

    /// Moves progress to `now_ms` and runs the transition callback. Returns `true` once complete.
    pub(super) fn advance(&mut self, now_ms: f64) -> bool {
        self.progress = ((now_ms - self.start_ms) / self.duration_ms).clamp(0.0, 1.0);
        if let Some(transition_fn) = self.transition_fn.as_mut() {
            transition_fn(self.progress);
        }
        self.progress >= 1.0
    }

    pub fn involves(&self, id: &str) -> bool {
        self.to == id || self.from.as_deref() == Some(id)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("start_ms", &self.start_ms)
            .field("duration_ms", &self.duration_ms)
            .field("progress", &self.progress)
            .finish()
    }
}

/// Curve applied to raw transition progress, e.g. to derive a composite alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl Easing {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => t * (2.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
        }
    }
}
