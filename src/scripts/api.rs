use std::cell::{Ref, RefCell};
use std::rc::Rc;

use rhai::{Engine, FLOAT, INT};

use crate::scenes::SceneCommand;

/// Requests a guest script made during a call; the runtime applies them between calls.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestCommand {
    RegisterScene(String),
    Scene(SceneCommand),
}

/// Read-mostly view of the runtime exposed to guests, refreshed by the runtime every step.
#[derive(Debug, Default)]
pub struct GuestState {
    pub fps: u32,
    pub frame: u64,
    pub current_scene: Option<String>,
    pub update_rate: Option<f64>,
    /// Eased progress of the running scene transition, `None` when there is none.
    pub transition_alpha: Option<f64>,
    commands: Vec<GuestCommand>,
}

#[derive(Clone, Default)]
pub struct GuestApi {
    state: Rc<RefCell<GuestState>>,
}

impl GuestApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, GuestState> {
        self.state.borrow()
    }

    pub fn sync(&self, fps: u32, frame: u64, current_scene: Option<&str>) {
        let mut state = self.state.borrow_mut();
        state.fps = fps;
        state.frame = frame;
        state.current_scene = current_scene.map(str::to_string);
    }

    pub fn sync_transition(&self, alpha: Option<f64>) {
        self.state.borrow_mut().transition_alpha = alpha;
    }

    pub fn update_rate(&self) -> Option<f64> {
        self.state.borrow().update_rate
    }

    pub fn drain_commands(&self) -> Vec<GuestCommand> {
        self.state.borrow_mut().commands.drain(..).collect()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    fn push(state: &Rc<RefCell<GuestState>>, command: GuestCommand) {
        state.borrow_mut().commands.push(command);
    }

    pub fn register(&self, engine: &mut Engine) {
        let state = self.state.clone();
        engine.register_fn("scene_register", move |id: &str| {
            Self::push(&state, GuestCommand::RegisterScene(id.to_string()));
        });

        let state = self.state.clone();
        engine.register_fn("scene_goto", move |id: &str| {
            Self::push(&state, GuestCommand::Scene(SceneCommand::Activate(id.to_string())));
        });
        let state = self.state.clone();
        engine.register_fn("scene_goto", move |id: &str, duration_ms: INT| {
            Self::push(
                &state,
                GuestCommand::Scene(SceneCommand::Transition {
                    id: id.to_string(),
                    duration_ms: duration_ms as f64,
                    destroy_previous: false,
                    pause_previous: true,
                }),
            );
        });

        let state = self.state.clone();
        engine.register_fn("scene_push", move |id: &str| {
            Self::push(&state, GuestCommand::Scene(SceneCommand::Push(id.to_string())));
        });
        let state = self.state.clone();
        engine.register_fn("scene_pop", move || {
            Self::push(&state, GuestCommand::Scene(SceneCommand::Pop { destroy: false }));
        });
        let state = self.state.clone();
        engine.register_fn("scene_pop", move |destroy: bool| {
            Self::push(&state, GuestCommand::Scene(SceneCommand::Pop { destroy }));
        });

        let state = self.state.clone();
        engine.register_fn("set_update_rate", move |hz: FLOAT| {
            state.borrow_mut().update_rate = Some(hz);
        });
        let state = self.state.clone();
        engine.register_fn("set_update_rate", move |hz: INT| {
            state.borrow_mut().update_rate = Some(hz as f64);
        });

        let state = self.state.clone();
        engine.register_fn("fps", move || state.borrow().fps as INT);
        let state = self.state.clone();
        engine.register_fn("frame", move || state.borrow().frame as INT);
        let state = self.state.clone();
        engine.register_fn("scene_current", move || state.borrow().current_scene.clone().unwrap_or_default());
        let state = self.state.clone();
        engine.register_fn("transition_alpha", move || state.borrow().transition_alpha.unwrap_or(1.0) as FLOAT);
    }
}
