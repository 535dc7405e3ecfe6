use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

/// The display side of the frame loop: hands out one callback per refresh on request.
pub trait FrameHost {
    fn request_frame(&mut self) -> FrameRequest;

    fn cancel_frame(&mut self, request: FrameRequest);
}

/// Records requests without any timing. Tests and replay drivers pull frames with
/// [`ManualFrameHost::take_pending`].
#[derive(Debug, Default)]
pub struct ManualFrameHost {
    next_id: u64,
    pending: Option<FrameRequest>,
    requested: usize,
    cancelled: usize,
}

impl ManualFrameHost {
    pub fn take_pending(&mut self) -> Option<FrameRequest> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<FrameRequest> {
        self.pending
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }
}

impl FrameHost for ManualFrameHost {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        self.requested += 1;
        let request = FrameRequest(self.next_id);
        self.pending = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
            self.cancelled += 1;
        }
    }
}

/// Sleeps the calling thread to emulate a display refresh when running headless.
pub struct PacedFrameHost {
    interval: Duration,
    next_id: u64,
    pending: Option<(FrameRequest, Instant)>,
    last_due: Option<Instant>,
}

impl PacedFrameHost {
    pub fn new(refresh_rate: f64) -> Self {
        let refresh_rate = if refresh_rate > 0.0 && refresh_rate.is_finite() { refresh_rate } else { 60.0 };
        Self {
            interval: Duration::from_secs_f64(1.0 / refresh_rate),
            next_id: 0,
            pending: None,
            last_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the pending frame is due. Returns `false` when no frame was requested.
    pub fn wait_for_frame(&mut self) -> bool {
        let Some((_, due)) = self.pending.take() else {
            return false;
        };
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
        self.last_due = Some(due);
        true
    }
}

impl FrameHost for PacedFrameHost {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let now = Instant::now();
        let due = match self.last_due {
            // Drop missed refreshes instead of bursting to catch up.
            Some(last) if last + self.interval > now => last + self.interval,
            _ => now,
        };
        let request = FrameRequest(self.next_id);
        self.pending = Some((request, due));
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if matches!(self.pending, Some((pending, _)) if pending == request) {
            self.pending = None;
        }
    }
}
