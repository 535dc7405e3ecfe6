use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use anyhow::Result;
use serde::Serialize;

use crate::scripts::{ScriptError, ScriptWarning};

/// Informational payloads posted to the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ListenerMessage {
    CompileSuccess {
        file: String,
    },
    ScriptWarnings {
        file: String,
        warnings: Vec<ScriptWarning>,
    },
    SceneChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        to: String,
    },
}

impl ListenerMessage {
    pub fn compile_success(file: impl Into<String>) -> Self {
        ListenerMessage::CompileSuccess { file: file.into() }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Supplied by the embedding application. Failures are logged by [`ListenerHandle`] and
/// never reach the caller.
pub trait RuntimeListener {
    fn log(&self, message: &str) -> Result<()>;

    fn report_error(&self, error: &ScriptError) -> Result<()>;

    fn post_message(&self, payload: &ListenerMessage) -> Result<()>;
}

#[derive(Clone)]
pub struct ListenerHandle(Rc<dyn RuntimeListener>);

impl ListenerHandle {
    pub fn new(listener: Rc<dyn RuntimeListener>) -> Self {
        Self(listener)
    }

    pub fn logging() -> Self {
        Self(Rc::new(LogListener))
    }

    pub fn log(&self, message: &str) {
        if let Err(err) = self.0.log(message) {
            log::warn!("[listener] log callback failed: {err:#}");
        }
    }

    pub fn report_error(&self, error: &ScriptError) {
        if let Err(err) = self.0.report_error(error) {
            log::warn!("[listener] report_error callback failed: {err:#}");
        }
    }

    pub fn post_message(&self, payload: &ListenerMessage) {
        if let Err(err) = self.0.post_message(payload) {
            log::warn!("[listener] post_message callback failed: {err:#}");
        }
    }
}

/// Forwards everything to the `log` facade.
pub struct LogListener;

impl RuntimeListener for LogListener {
    fn log(&self, message: &str) -> Result<()> {
        log::info!("[script] {message}");
        Ok(())
    }

    fn report_error(&self, error: &ScriptError) -> Result<()> {
        log::error!("[script] {error}");
        Ok(())
    }

    fn post_message(&self, payload: &ListenerMessage) -> Result<()> {
        log::debug!("[script] message {}", payload.to_json());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Log(String),
    Error(ScriptError),
    Message(ListenerMessage),
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeEvent::Log(message) => write!(f, "Log {message}"),
            RuntimeEvent::Error(error) => write!(f, "Error {error}"),
            RuntimeEvent::Message(payload) => write!(f, "Message {}", payload.to_json()),
        }
    }
}

/// Keeps every event in order; used by tests and the script checker.
#[derive(Default)]
pub struct RecordingListener {
    events: RefCell<Vec<RuntimeEvent>>,
}

impl RecordingListener {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.borrow().clone()
    }

    pub fn drain(&self) -> Vec<RuntimeEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn errors(&self) -> Vec<ScriptError> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::Log(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<ListenerMessage> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::Message(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RuntimeListener for RecordingListener {
    fn log(&self, message: &str) -> Result<()> {
        self.events.borrow_mut().push(RuntimeEvent::Log(message.to_string()));
        Ok(())
    }

    fn report_error(&self, error: &ScriptError) -> Result<()> {
        self.events.borrow_mut().push(RuntimeEvent::Error(error.clone()));
        Ok(())
    }

    fn post_message(&self, payload: &ListenerMessage) -> Result<()> {
        self.events.borrow_mut().push(RuntimeEvent::Message(payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FailingListener;

    impl RuntimeListener for FailingListener {
        fn log(&self, _message: &str) -> Result<()> {
            bail!("log sink closed")
        }

        fn report_error(&self, _error: &ScriptError) -> Result<()> {
            bail!("error sink closed")
        }

        fn post_message(&self, _payload: &ListenerMessage) -> Result<()> {
            bail!("message sink closed")
        }
    }

    #[test]
    fn compile_success_payload_shape() {
        let payload = ListenerMessage::compile_success("main");
        assert_eq!(payload.to_json(), serde_json::json!({ "name": "compile_success", "file": "main" }));
    }

    #[test]
    fn scene_changed_omits_missing_origin() {
        let payload = ListenerMessage::SceneChanged { from: None, to: "menu".to_string() };
        assert_eq!(payload.to_json(), serde_json::json!({ "name": "scene_changed", "to": "menu" }));
    }

    #[test]
    fn failing_listener_is_contained() {
        let handle = ListenerHandle::new(Rc::new(FailingListener));
        handle.log("hello");
        handle.report_error(&ScriptError::new("boom", crate::scripts::ErrorKind::Runtime, "main"));
        handle.post_message(&ListenerMessage::compile_success("main"));
    }

    #[test]
    fn recording_listener_keeps_order() {
        let listener = RecordingListener::new();
        let handle = ListenerHandle::new(listener.clone());
        handle.log("first");
        handle.post_message(&ListenerMessage::compile_success("main"));
        let events = listener.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].to_string(), "Log first");
        assert!(listener.events().is_empty());
    }
}
