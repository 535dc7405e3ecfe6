pub mod host;

use std::rc::Rc;

use crate::time::Clock;

pub use host::{FrameHost, FrameRequest, ManualFrameHost, PacedFrameHost};

pub const DEFAULT_UPDATE_RATE: f64 = 60.0;
pub const MAX_STEPS_PER_FRAME: u32 = 10;
/// Gaps longer than this are treated as the host having been suspended.
pub const STALL_THRESHOLD_MS: f64 = 160.0;
pub const STALL_RESUME_DT_MS: f64 = 16.0;
const SMOOTHING: f64 = 0.9;
const SAMPLE_WEIGHT: f64 = 0.1;
const JITTER_FPS_TOLERANCE: i64 = 2;

/// Hooks invoked by [`FrameScheduler::frame`]. Only `update` and `draw` are required.
pub trait FrameCallbacks {
    fn update(&mut self);

    fn draw(&mut self);

    fn tick(&mut self) {}

    fn watch_step(&mut self) {}

    fn update_rate(&mut self) -> Option<f64> {
        None
    }

    fn set_fps(&mut self, _fps: u32) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub current_frame: u64,
    pub floating_frame: f64,
    pub smoothed_dt: f64,
    pub last_sample_ms: f64,
    pub measured_fps: u32,
    pub update_rate: f64,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            current_frame: 0,
            floating_frame: 0.0,
            smoothed_dt: 1000.0 / DEFAULT_UPDATE_RATE,
            last_sample_ms: 0.0,
            measured_fps: DEFAULT_UPDATE_RATE as u32,
            update_rate: DEFAULT_UPDATE_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub steps: u32,
    pub measured_fps: u32,
    pub update_rate: f64,
    pub current_frame: u64,
    pub stalled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

/// Fixed-step scheduler: turns host frame callbacks into a bounded number of logic steps
/// followed by exactly one draw.
pub struct FrameScheduler<H: FrameHost> {
    host: H,
    clock: Rc<dyn Clock>,
    state: FrameState,
    pending: Option<FrameRequest>,
    run_state: RunState,
}

impl<H: FrameHost> FrameScheduler<H> {
    pub fn new(host: H, clock: Rc<dyn Clock>) -> Self {
        Self { host, clock, state: FrameState::default(), pending: None, run_state: RunState::Idle }
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// Resets frame counters and begins requesting host frames. Calling it while running
    /// restarts the timing state.
    pub fn start(&mut self) {
        self.cancel_pending();
        self.state.current_frame = 0;
        self.state.floating_frame = 0.0;
        self.state.last_sample_ms = self.clock.now_ms();
        self.run_state = RunState::Running;
        self.pending = Some(self.host.request_frame());
    }

    pub fn stop(&mut self) {
        self.cancel_pending();
        if self.run_state == RunState::Running {
            self.run_state = RunState::Stopped;
        }
    }

    pub fn resume(&mut self) {
        if self.run_state != RunState::Stopped {
            return;
        }
        self.state.last_sample_ms = self.clock.now_ms();
        self.run_state = RunState::Running;
        self.pending = Some(self.host.request_frame());
    }

    /// Rates that are not strictly positive and finite are ignored.
    pub fn set_update_rate(&mut self, rate: f64) -> bool {
        if rate > 0.0 && rate.is_finite() {
            self.state.update_rate = rate;
            true
        } else {
            log::debug!("[scheduler] ignoring update rate {rate}");
            false
        }
    }

    /// Services one host frame callback. Returns `None` when the scheduler is not running,
    /// which covers callbacks delivered after `stop()`.
    pub fn frame(&mut self, callbacks: &mut dyn FrameCallbacks) -> Option<FrameReport> {
        if self.run_state != RunState::Running {
            return None;
        }
        self.pending = Some(self.host.request_frame());

        let now = self.clock.now_ms();
        let stalled = (now - self.state.last_sample_ms).abs() > STALL_THRESHOLD_MS;
        if stalled {
            self.state.last_sample_ms = now - STALL_RESUME_DT_MS;
        }
        let dt = now - self.state.last_sample_ms;
        self.state.smoothed_dt = self.state.smoothed_dt * SMOOTHING + dt * SAMPLE_WEIGHT;
        self.state.last_sample_ms = now;

        if self.state.smoothed_dt > 0.0 {
            self.state.measured_fps = js_round(1000.0 / self.state.smoothed_dt).max(0.0) as u32;
        }
        callbacks.set_fps(self.state.measured_fps);

        let update_rate = match callbacks.update_rate() {
            Some(rate) if rate > 0.0 && rate.is_finite() => rate,
            _ => self.state.update_rate,
        };

        self.state.floating_frame += self.state.smoothed_dt * update_rate / 1000.0;
        let backlog = js_round(self.state.floating_frame - self.state.current_frame as f64);
        let mut steps = backlog.clamp(0.0, MAX_STEPS_PER_FRAME as f64) as u32;

        // Accumulated rounding at 60Hz alternates 0 and 2 step frames; pin it to one.
        if update_rate == 60.0
            && (self.state.measured_fps as i64 - 60).abs() < JITTER_FPS_TOLERANCE
            && (steps == 0 || steps == 2)
        {
            steps = 1;
            self.state.floating_frame = self.state.current_frame as f64 + 1.0;
        }

        for step in 1..=steps {
            callbacks.update();
            if step < steps {
                callbacks.tick();
            }
        }
        self.state.current_frame += steps as u64;

        callbacks.draw();
        callbacks.tick();
        if steps > 0 {
            callbacks.watch_step();
        }

        Some(FrameReport {
            steps,
            measured_fps: self.state.measured_fps,
            update_rate,
            current_frame: self.state.current_frame,
            stalled,
        })
    }

    fn cancel_pending(&mut self) {
        if let Some(request) = self.pending.take() {
            self.host.cancel_frame(request);
        }
    }
}

/// Half-up rounding; `f64::round` rounds -0.5 away from zero.
fn js_round(value: f64) -> f64 {
    (value + 0.5).floor()
}
