pub mod api;
pub mod rhai_vm;
pub mod source;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::listener::ListenerHandle;
use crate::time::{millis, Clock};

pub use api::{GuestApi, GuestCommand, GuestState};
pub use rhai_vm::RhaiVm;

/// How many VM operations pass between two deadline checks.
pub const DEADLINE_CHECK_INTERVAL: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Init,
    Runtime,
    Call,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Init => "init",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Call => "call",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error record surfaced to listeners. Serialises to
/// `{ error, type, line?, column?, file, stack? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{kind} error in '{file}'{}: {error}", position_suffix(.line, .column))]
pub struct ScriptError {
    pub error: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

fn position_suffix(line: &Option<u32>, column: &Option<u32>) -> String {
    match (*line, *column) {
        (Some(line), Some(column)) => format!(" at {line}:{column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

impl ScriptError {
    pub fn new(error: impl Into<String>, kind: ErrorKind, file: impl Into<String>) -> Self {
        Self { error: error.into(), kind, line: None, column: None, file: file.into(), stack: None }
    }

    pub fn from_vm(err: VmError, kind: ErrorKind, file: impl Into<String>) -> Self {
        Self {
            error: err.message,
            kind,
            line: err.line,
            column: err.column,
            file: err.unit.unwrap_or_else(|| file.into()),
            stack: err.stack,
        }
    }

    pub fn tagged(&self, kind: ErrorKind, file: &str) -> Self {
        Self { kind, file: file.to_string(), ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptWarning {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub file: String,
}

impl fmt::Display for ScriptWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}: {}", self.file, position_suffix(&self.line, &self.column), self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmErrorClass {
    Parse,
    Runtime,
    Timeout,
    MissingFunction,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct VmError {
    pub class: VmErrorClass,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Unit the failing code lives in, when the VM knows better than the caller.
    pub unit: Option<String>,
    pub stack: Option<String>,
}

impl VmError {
    pub fn new(class: VmErrorClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into(), line: None, column: None, unit: None, stack: None }
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Continue,
    DeadlineExpired,
    StepsExhausted,
}

/// Deadline plus step counter consulted by the VM while it executes. Preemption is
/// cooperative: a VM that never ticks the budget runs past its timeout.
pub struct ExecutionBudget {
    clock: Rc<dyn Clock>,
    deadline_ms: Cell<f64>,
    steps: Cell<u64>,
    max_steps: Cell<Option<u64>>,
}

impl ExecutionBudget {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self { clock, deadline_ms: Cell::new(f64::INFINITY), steps: Cell::new(0), max_steps: Cell::new(None) }
    }

    pub fn arm(&self, timeout: Duration) {
        self.deadline_ms.set(self.clock.now_ms() + millis(timeout));
        self.steps.set(0);
    }

    pub fn set_max_steps(&self, max_steps: Option<u64>) {
        self.max_steps.set(max_steps);
    }

    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    pub fn deadline_ms(&self) -> f64 {
        self.deadline_ms.get()
    }

    pub fn tick(&self) -> BudgetStatus {
        let steps = self.steps.get() + 1;
        self.steps.set(steps);
        if self.max_steps.get().is_some_and(|max| steps > max) {
            return BudgetStatus::StepsExhausted;
        }
        if steps % DEADLINE_CHECK_INTERVAL == 0 && self.clock.now_ms() > self.deadline_ms.get() {
            return BudgetStatus::DeadlineExpired;
        }
        BudgetStatus::Continue
    }
}

/// Contract with the embedded bytecode VM.
pub trait ScriptVm {
    /// Called once when the VM is attached to a host.
    fn bind_budget(&mut self, budget: Rc<ExecutionBudget>);

    /// Compiles and executes `source` as `unit`, replacing that unit's previous program on
    /// success. Returns the display form of the result, if any.
    fn run(&mut self, source: &str, unit: &str) -> Result<Option<String>, VmError>;

    fn call(&mut self, name: &str, args: &[serde_json::Value]) -> Result<Option<String>, VmError>;

    fn has_function(&self, name: &str) -> bool;

    /// Full textual definition of a guest function, used to detect edits.
    fn function_source(&self, name: &str) -> Option<String>;

    fn take_warnings(&mut self) -> Vec<ScriptWarning>;

    /// Lines printed by the guest since the last call.
    fn take_output(&mut self) -> Vec<String>;
}

pub struct ScriptHost {
    vm: Option<Box<dyn ScriptVm>>,
    budget: Rc<ExecutionBudget>,
    last_error: Option<ScriptError>,
    warnings: Vec<ScriptWarning>,
    listener: ListenerHandle,
}

impl ScriptHost {
    pub fn new(mut vm: Box<dyn ScriptVm>, clock: Rc<dyn Clock>, listener: ListenerHandle) -> Self {
        let budget = Rc::new(ExecutionBudget::new(clock));
        vm.bind_budget(budget.clone());
        Self { vm: Some(vm), budget, last_error: None, warnings: Vec::new(), listener }
    }

    /// A host with no VM attached; every invocation fails with an `Unavailable` error.
    pub fn detached(clock: Rc<dyn Clock>, listener: ListenerHandle) -> Self {
        Self {
            vm: None,
            budget: Rc::new(ExecutionBudget::new(clock)),
            last_error: None,
            warnings: Vec::new(),
            listener,
        }
    }

    pub fn is_available(&self) -> bool {
        self.vm.is_some()
    }

    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    pub fn set_max_operations(&mut self, max_operations: Option<u64>) {
        self.budget.set_max_steps(max_operations);
    }

    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    pub fn listener(&self) -> &ListenerHandle {
        &self.listener
    }

    pub fn run(&mut self, source: &str, timeout: Duration, unit: &str) -> Result<Option<String>, ScriptError> {
        self.run_as(ErrorKind::Runtime, source, timeout, unit)
    }

    pub fn run_as(
        &mut self,
        kind: ErrorKind,
        source: &str,
        timeout: Duration,
        unit: &str,
    ) -> Result<Option<String>, ScriptError> {
        self.invoke(kind, timeout, unit, |vm| vm.run(source, unit))
    }

    pub fn call(
        &mut self,
        name: &str,
        args: &[serde_json::Value],
        timeout: Duration,
    ) -> Result<Option<String>, ScriptError> {
        self.invoke(ErrorKind::Call, timeout, name, |vm| vm.call(name, args))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.vm.as_ref().is_some_and(|vm| vm.has_function(name))
    }

    pub fn function_source(&self, name: &str) -> Option<String> {
        self.vm.as_ref().and_then(|vm| vm.function_source(name))
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    pub fn warnings(&self) -> &[ScriptWarning] {
        &self.warnings
    }

    fn invoke<F>(&mut self, kind: ErrorKind, timeout: Duration, file: &str, body: F) -> Result<Option<String>, ScriptError>
    where
        F: FnOnce(&mut dyn ScriptVm) -> Result<Option<String>, VmError>,
    {
        self.last_error = None;
        self.budget.arm(timeout);
        let Some(vm) = self.vm.as_mut() else {
            let error = ScriptError::from_vm(VmError::new(VmErrorClass::Unavailable, "script vm unavailable"), kind, file);
            self.last_error = Some(error.clone());
            return Err(error);
        };
        let result = body(&mut **vm);
        self.warnings.extend(vm.take_warnings());
        for line in vm.take_output() {
            self.listener.log(&line);
        }
        result.map_err(|err| {
            let error = ScriptError::from_vm(err, kind, file);
            self.last_error = Some(error.clone());
            error
        })
    }
}
