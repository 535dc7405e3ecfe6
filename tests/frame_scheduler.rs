use cartridge_core::scheduler::{FrameCallbacks, FrameScheduler, ManualFrameHost, MAX_STEPS_PER_FRAME};
use cartridge_core::time::ManualClock;
use std::rc::Rc;

#[derive(Default)]
struct Counter {
    updates: u32,
    draws: u32,
    watch_steps: u32,
    rate: Option<f64>,
}

impl FrameCallbacks for Counter {
    fn update(&mut self) {
        self.updates += 1;
    }

    fn draw(&mut self) {
        self.draws += 1;
    }

    fn watch_step(&mut self) {
        self.watch_steps += 1;
    }

    fn update_rate(&mut self) -> Option<f64> {
        self.rate
    }
}

fn started() -> (FrameScheduler<ManualFrameHost>, ManualClock) {
    let clock = ManualClock::starting_at(500.0);
    let mut scheduler = FrameScheduler::new(ManualFrameHost::default(), Rc::new(clock.clone()));
    scheduler.start();
    (scheduler, clock)
}

#[test]
fn uneven_refresh_near_sixty_hz_always_runs_one_step() {
    let (mut scheduler, clock) = started();
    let mut counter = Counter::default();
    let gaps = [16.0, 17.3, 16.4, 17.0, 16.2, 17.1];
    for frame in 0..240 {
        clock.advance(gaps[frame % gaps.len()]);
        let before = counter.updates;
        let report = scheduler.frame(&mut counter).expect("running");
        assert!((58..=62).contains(&report.measured_fps), "fps {} drifted", report.measured_fps);
        assert_eq!(report.steps, 1, "frame {frame} ran {} steps", report.steps);
        assert_eq!(counter.updates - before, 1);
    }
    assert_eq!(counter.draws, 240);
    assert_eq!(counter.watch_steps, 240);
}

#[test]
fn frame_counter_never_decreases_or_outruns_the_accumulator() {
    let (mut scheduler, clock) = started();
    let mut counter = Counter { rate: Some(144.0), ..Default::default() };
    let mut previous = 0;
    for frame in 0..300 {
        clock.advance(if frame % 7 == 0 { 40.0 } else { 11.0 });
        scheduler.frame(&mut counter).expect("running");
        let state = scheduler.state();
        assert!(state.current_frame >= previous);
        assert!(state.current_frame as f64 <= state.floating_frame + 0.5);
        previous = state.current_frame;
    }
    assert_eq!(previous, counter.updates as u64);
}

#[test]
fn long_pause_is_clamped_and_steps_are_capped() {
    let (mut scheduler, clock) = started();
    let mut counter = Counter::default();
    clock.advance(1000.0 / 60.0);
    scheduler.frame(&mut counter).expect("running");

    clock.advance(5_000.0);
    let report = scheduler.frame(&mut counter).expect("running");
    assert!(report.stalled);
    assert_eq!(scheduler.state().last_sample_ms, 500.0 + 1000.0 / 60.0 + 5_000.0);
    assert!(report.steps <= MAX_STEPS_PER_FRAME);
    assert!(scheduler.state().smoothed_dt < 20.0, "stall must not poison the average");
}

#[test]
fn backlog_beyond_ten_steps_is_capped() {
    let (mut scheduler, clock) = started();
    let mut counter = Counter { rate: Some(2_000.0), ..Default::default() };
    for _ in 0..5 {
        clock.advance(1000.0 / 60.0);
        let report = scheduler.frame(&mut counter).expect("running");
        assert_eq!(report.steps, MAX_STEPS_PER_FRAME);
    }
    assert_eq!(counter.updates, 5 * MAX_STEPS_PER_FRAME);
    assert_eq!(counter.draws, 5);
}

#[test]
fn slow_update_rate_still_draws_every_frame() {
    let (mut scheduler, clock) = started();
    let mut counter = Counter { rate: Some(10.0), ..Default::default() };
    let mut zero_step_frames = 0;
    for _ in 0..60 {
        clock.advance(1000.0 / 60.0);
        if scheduler.frame(&mut counter).expect("running").steps == 0 {
            zero_step_frames += 1;
        }
    }
    assert_eq!(counter.draws, 60);
    assert!(zero_step_frames > 0);
    assert_eq!(counter.watch_steps, 60 - zero_step_frames);
    assert!((9..=11).contains(&counter.updates), "expected ~10 updates, got {}", counter.updates);
}

#[test]
fn every_frame_requests_the_next_one() {
    let (mut scheduler, clock) = started();
    let mut counter = Counter::default();
    for _ in 0..3 {
        assert!(scheduler.host_mut().take_pending().is_some());
        clock.advance(1000.0 / 60.0);
        scheduler.frame(&mut counter).expect("running");
    }
    scheduler.stop();
    assert!(scheduler.host().pending().is_none());
    assert!(!scheduler.is_running());
}
