use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::{Scene, SceneContext, SceneInit};
use crate::scripts::ScriptHost;

/// A scene whose lifecycle hooks are guest functions named `<id>_init`, `<id>_update`,
/// `<id>_draw`, `<id>_pause`, `<id>_resume` and `<id>_destroy`. Missing hooks are skipped.
pub struct ScriptScene {
    id: String,
    host: Rc<RefCell<ScriptHost>>,
    timeout: Duration,
}

impl ScriptScene {
    pub fn new(id: impl Into<String>, host: Rc<RefCell<ScriptHost>>, timeout: Duration) -> Self {
        Self { id: id.into(), host, timeout }
    }

    pub fn hook_name(&self, hook: &str) -> String {
        format!("{}_{hook}", self.id)
    }

    fn invoke(&self, hook: &str) {
        let name = self.hook_name(hook);
        let Ok(mut host) = self.host.try_borrow_mut() else {
            log::warn!("[scenes] '{name}' skipped, script host is busy");
            return;
        };
        if !host.has_function(&name) {
            return;
        }
        if let Err(err) = host.call(&name, &[], self.timeout) {
            host.listener().report_error(&err);
        }
    }
}

impl Scene for ScriptScene {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> SceneInit {
        self.invoke("init");
        SceneInit::Ready
    }

    fn update(&mut self, _ctx: &mut SceneContext<'_>) {
        self.invoke("update");
    }

    fn draw(&mut self) {
        self.invoke("draw");
    }

    fn on_pause(&mut self) {
        self.invoke("pause");
    }

    fn on_resume(&mut self) {
        self.invoke("resume");
    }

    fn destroy(&mut self) {
        self.invoke("destroy");
    }
}
