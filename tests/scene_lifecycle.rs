use cartridge_core::scenes::{
    Scene, SceneContext, SceneError, SceneInit, SceneManager, SceneStatus, TransitionOptions,
};
use cartridge_core::time::ManualClock;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

type Journal = Rc<RefCell<Vec<String>>>;

struct Recorder {
    id: &'static str,
    journal: Journal,
}

impl Recorder {
    fn boxed(id: &'static str, journal: &Journal) -> Box<dyn Scene> {
        Box::new(Recorder { id, journal: journal.clone() })
    }

    fn note(&self, hook: &str) {
        self.journal.borrow_mut().push(format!("{}.{hook}", self.id));
    }
}

impl Scene for Recorder {
    fn id(&self) -> &str {
        self.id
    }

    fn init(&mut self) -> SceneInit {
        self.note("init");
        SceneInit::Ready
    }

    fn update(&mut self, _ctx: &mut SceneContext<'_>) {
        self.note("update");
    }

    fn draw(&mut self) {
        self.note("draw");
    }

    fn on_pause(&mut self) {
        self.note("pause");
    }

    fn on_resume(&mut self) {
        self.note("resume");
    }

    fn destroy(&mut self) {
        self.note("destroy");
    }
}

/// A scene with no hooks at all.
struct Bare(&'static str);

impl Scene for Bare {
    fn id(&self) -> &str {
        self.0
    }
}

/// Resolves once the shared flag is set.
struct Gate(Rc<Cell<bool>>);

impl Future for Gate {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.0.get() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

struct Loader {
    id: &'static str,
    ready: Rc<Cell<bool>>,
    journal: Journal,
}

impl Scene for Loader {
    fn id(&self) -> &str {
        self.id
    }

    fn init(&mut self) -> SceneInit {
        SceneInit::Pending(Box::pin(Gate(self.ready.clone())))
    }

    fn update(&mut self, _ctx: &mut SceneContext<'_>) {
        self.journal.borrow_mut().push(format!("{}.update", self.id));
    }

    fn draw(&mut self) {
        self.journal.borrow_mut().push(format!("{}.draw", self.id));
    }
}

fn menu_and_game() -> (SceneManager, ManualClock, Journal) {
    let clock = ManualClock::starting_at(10_000.0);
    let journal = Journal::default();
    let mut scenes = SceneManager::new(Rc::new(clock.clone()));
    scenes.add_scene(Recorder::boxed("menu", &journal)).expect("menu");
    scenes.add_scene(Recorder::boxed("game", &journal)).expect("game");
    (scenes, clock, journal)
}

fn count(journal: &Journal, entry: &str) -> usize {
    journal.borrow().iter().filter(|line| *line == entry).count()
}

#[test]
fn invalid_ids_raise() {
    let (mut scenes, _, journal) = menu_and_game();
    assert_eq!(scenes.set_active_scene("credits"), Err(SceneError::UnknownScene("credits".into())));
    let err = scenes.add_scene(Recorder::boxed("menu", &journal)).unwrap_err();
    assert_eq!(err.to_string(), "scene 'menu' is already registered");
}

#[test]
fn menu_to_game_transition_pauses_menu() {
    let (mut scenes, clock, journal) = menu_and_game();
    scenes.set_active_scene("menu").expect("menu");
    assert_eq!(scenes.status("menu"), Some(SceneStatus::Active));

    scenes.transition_to("game", TransitionOptions::timed(500.0)).expect("transition");
    assert_eq!(scenes.status("game"), Some(SceneStatus::Active));
    assert_eq!(scenes.active_id(), Some("menu"));
    journal.borrow_mut().clear();
    scenes.draw();
    assert_eq!(*journal.borrow(), vec!["menu.draw", "game.draw"]);

    clock.advance(200.0);
    scenes.update();
    assert_eq!(scenes.active_id(), Some("menu"));
    assert_eq!(count(&journal, "menu.update"), 1);
    assert_eq!(count(&journal, "game.update"), 0);

    clock.advance(300.0);
    scenes.update();
    assert_eq!(scenes.active_id(), Some("game"));
    assert_eq!(scenes.status("menu"), Some(SceneStatus::Paused));
    assert!(scenes.transition().is_none());
    assert_eq!(scenes.stack(), ["game".to_string()]);

    journal.borrow_mut().clear();
    scenes.draw();
    assert_eq!(*journal.borrow(), vec!["game.draw"]);
}

#[test]
fn menu_to_game_transition_can_destroy_menu() {
    let (mut scenes, clock, journal) = menu_and_game();
    scenes.set_active_scene("menu").expect("menu");
    scenes.transition_to("game", TransitionOptions::timed(500.0).destroy_previous(true)).expect("transition");
    clock.advance(600.0);
    scenes.update();
    assert_eq!(scenes.active_id(), Some("game"));
    assert_eq!(scenes.status("menu"), None);
    assert_eq!(count(&journal, "menu.destroy"), 1);
}

#[test]
fn transition_callback_sees_progress() {
    let (mut scenes, clock, _) = menu_and_game();
    scenes.set_active_scene("menu").expect("menu");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    scenes
        .transition_to("game", TransitionOptions::timed(400.0).with_fn(move |p| sink.borrow_mut().push(p)))
        .expect("transition");
    for _ in 0..4 {
        clock.advance(100.0);
        scenes.update();
    }
    assert_eq!(*seen.borrow(), vec![0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn second_transition_overwrites_the_first() {
    let clock = ManualClock::new();
    let journal = Journal::default();
    let mut scenes = SceneManager::new(Rc::new(clock.clone()));
    for id in ["menu", "game", "credits"] {
        scenes.add_scene(Recorder::boxed(id, &journal)).expect("add");
    }
    scenes.set_active_scene("menu").expect("menu");
    scenes.transition_to("game", TransitionOptions::timed(500.0)).expect("game");
    scenes.transition_to("credits", TransitionOptions::timed(100.0)).expect("credits");
    clock.advance(100.0);
    scenes.update();
    assert_eq!(scenes.active_id(), Some("credits"));
    assert_eq!(scenes.status("game"), Some(SceneStatus::Paused), "abandoned target is parked");
    assert_eq!(scenes.status("menu"), Some(SceneStatus::Paused));
}

#[test]
fn push_then_pop_resumes_exactly_once() {
    let (mut scenes, _, journal) = menu_and_game();
    scenes.add_scene(Recorder::boxed("pause", &journal)).expect("pause");
    scenes.set_active_scene("game").expect("game");
    scenes.push_scene("pause").expect("push");
    assert_eq!(scenes.status("game"), Some(SceneStatus::Paused));
    assert_eq!(scenes.active_id(), Some("pause"));

    assert_eq!(scenes.pop_scene(false).as_deref(), Some("pause"));
    assert_eq!(scenes.active_id(), Some("game"));
    assert_eq!(scenes.status("game"), Some(SceneStatus::Active));
    assert_eq!(count(&journal, "game.resume"), 1);
    assert_eq!(count(&journal, "game.init"), 1);
}

#[test]
fn scenes_without_hooks_cycle_freely() {
    let clock = ManualClock::new();
    let mut scenes = SceneManager::new(Rc::new(clock));
    scenes.add_scene(Box::new(Bare("a"))).expect("a");
    scenes.add_scene(Box::new(Bare("b"))).expect("b");
    for _ in 0..3 {
        scenes.set_active_scene("a").expect("a");
        scenes.push_scene("b").expect("b");
        scenes.pop_scene(false);
        scenes.update();
        scenes.draw();
    }
    assert_eq!(scenes.status("a"), Some(SceneStatus::Active));
    assert_eq!(scenes.status("b"), Some(SceneStatus::Paused));
    assert!(scenes.remove_scene("b"));
    assert!(!scenes.remove_scene("b"));
}

#[test]
fn async_init_defers_activation_until_resolved() {
    let clock = ManualClock::new();
    let journal = Journal::default();
    let ready = Rc::new(Cell::new(false));
    let mut scenes = SceneManager::new(Rc::new(clock));
    scenes
        .add_scene(Box::new(Loader { id: "level", ready: ready.clone(), journal: journal.clone() }))
        .expect("level");
    scenes.set_active_scene("level").expect("activate");
    assert_eq!(scenes.status("level"), Some(SceneStatus::Initializing));
    assert_eq!(scenes.active_id(), Some("level"));

    scenes.update();
    scenes.draw();
    assert!(journal.borrow().is_empty(), "initializing scenes neither update nor draw");

    ready.set(true);
    scenes.update();
    assert_eq!(scenes.status("level"), Some(SceneStatus::Active));
    scenes.draw();
    assert_eq!(*journal.borrow(), vec!["level.update", "level.draw"]);
}

#[test]
fn async_init_resolving_after_navigation_lands_paused() {
    let clock = ManualClock::new();
    let journal = Journal::default();
    let ready = Rc::new(Cell::new(false));
    let mut scenes = SceneManager::new(Rc::new(clock));
    scenes
        .add_scene(Box::new(Loader { id: "level", ready: ready.clone(), journal: journal.clone() }))
        .expect("level");
    scenes.add_scene(Recorder::boxed("menu", &journal)).expect("menu");
    scenes.set_active_scene("level").expect("level");
    scenes.set_active_scene("menu").expect("menu");

    ready.set(true);
    scenes.poll_pending();
    assert_eq!(scenes.status("level"), Some(SceneStatus::Paused));
    assert_eq!(scenes.active_id(), Some("menu"));
}

fn menu_game_credits() -> (SceneManager, ManualClock, Journal) {
    let clock = ManualClock::new();
    let journal = Journal::default();
    let mut scenes = SceneManager::new(Rc::new(clock.clone()));
    for id in ["menu", "game", "credits"] {
        scenes.add_scene(Recorder::boxed(id, &journal)).expect("add");
    }
    scenes.set_active_scene("menu").expect("menu");
    (scenes, clock, journal)
}

#[test]
fn transitioning_back_to_current_scene_cancels_the_transition() {
    let (mut scenes, clock, journal) = menu_game_credits();
    scenes.transition_to("game", TransitionOptions::timed(500.0)).expect("game");
    scenes.transition_to("menu", TransitionOptions::timed(500.0)).expect("back to menu");
    assert!(scenes.transition().is_none());

    clock.advance(600.0);
    scenes.update();
    assert_eq!(scenes.active_id(), Some("menu"));
    assert_eq!(scenes.status("menu"), Some(SceneStatus::Active));
    assert_eq!(scenes.status("game"), Some(SceneStatus::Paused));
    assert_eq!(count(&journal, "game.pause"), 1);
    assert_eq!(count(&journal, "menu.pause"), 0);
    assert_eq!(scenes.stack(), ["menu".to_string()]);
}

#[test]
fn set_active_scene_during_transition_parks_the_abandoned_target() {
    let (mut scenes, clock, journal) = menu_game_credits();
    scenes.transition_to("game", TransitionOptions::timed(500.0)).expect("game");
    scenes.set_active_scene("credits").expect("credits");
    assert!(scenes.transition().is_none());
    assert_eq!(scenes.active_id(), Some("credits"));
    assert_eq!(scenes.status("game"), Some(SceneStatus::Paused));
    assert_eq!(count(&journal, "game.pause"), 1);
    assert_eq!(count(&journal, "menu.pause"), 1);

    clock.advance(600.0);
    scenes.update();
    assert_eq!(scenes.active_id(), Some("credits"));
}

#[test]
fn instant_transition_during_timed_one_parks_the_abandoned_target() {
    let (mut scenes, _, journal) = menu_game_credits();
    scenes.transition_to("game", TransitionOptions::timed(500.0)).expect("game");
    scenes.transition_to("credits", TransitionOptions::default()).expect("credits");
    assert!(scenes.transition().is_none());
    assert_eq!(scenes.active_id(), Some("credits"));
    assert_eq!(scenes.status("game"), Some(SceneStatus::Paused));
    assert_eq!(scenes.status("menu"), Some(SceneStatus::Paused));
    assert_eq!(count(&journal, "game.pause"), 1);
    assert_eq!(count(&journal, "menu.pause"), 1);

    journal.borrow_mut().clear();
    scenes.draw();
    assert_eq!(*journal.borrow(), vec!["credits.draw"]);
}
