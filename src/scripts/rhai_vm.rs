use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, ParseError, ParseErrorType, Scope, AST};

use super::api::GuestApi;
use super::source;
use super::{BudgetStatus, ExecutionBudget, ScriptVm, ScriptWarning, VmError, VmErrorClass};

struct CompiledUnit {
    id: String,
    source: String,
    ast: AST,
}

/// [`ScriptVm`] backed by rhai. Every unit keeps its own AST; the callable library is the
/// merge of all units' functions in load order, so a later unit overrides an earlier one.
///
/// Functions cannot see top-level variables; every call binds one persistent object map
/// as `this` so guests keep state across calls and reloads.
pub struct RhaiVm {
    engine: Engine,
    lint: Engine,
    scope: Scope<'static>,
    state: Dynamic,
    units: Vec<CompiledUnit>,
    library: AST,
    budget: Rc<RefCell<Option<Rc<ExecutionBudget>>>>,
    output: Rc<RefCell<Vec<String>>>,
    warnings: Vec<ScriptWarning>,
}

impl RhaiVm {
    pub fn new() -> Self {
        let budget: Rc<RefCell<Option<Rc<ExecutionBudget>>>> = Rc::new(RefCell::new(None));
        let output = Rc::new(RefCell::new(Vec::new()));

        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        let progress_budget = budget.clone();
        engine.on_progress(move |_ops| {
            let slot = progress_budget.borrow();
            let budget = slot.as_ref()?;
            match budget.tick() {
                BudgetStatus::Continue => None,
                BudgetStatus::DeadlineExpired => Some(Dynamic::from("deadline expired".to_string())),
                BudgetStatus::StepsExhausted => Some(Dynamic::from("step budget exhausted".to_string())),
            }
        });
        let print_output = output.clone();
        engine.on_print(move |text| print_output.borrow_mut().push(text.to_string()));
        engine.on_debug(|text, source, pos| {
            log::debug!("[script] {}{:?}: {text}", source.unwrap_or("<anonymous>"), pos);
        });

        let mut lint = Engine::new();
        lint.set_strict_variables(true);

        Self {
            engine,
            lint,
            scope: Scope::new(),
            state: Dynamic::from_map(Map::new()),
            units: Vec::new(),
            library: AST::empty(),
            budget,
            output,
            warnings: Vec::new(),
        }
    }

    pub fn with_guest_api(api: &GuestApi) -> Self {
        let mut vm = Self::new();
        api.register(&mut vm.engine);
        vm
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// The map guest functions see as `this`.
    pub fn state(&self) -> &Dynamic {
        &self.state
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|unit| unit.id.as_str())
    }

    fn functions_excluding(&self, unit: &str) -> AST {
        let mut library = AST::empty();
        for compiled in self.units.iter().filter(|compiled| compiled.id != unit) {
            library.combine(compiled.ast.clone_functions_only());
        }
        library
    }

    fn install(&mut self, unit: &str, source: &str, ast: AST) {
        match self.units.iter_mut().find(|compiled| compiled.id == unit) {
            Some(existing) => {
                existing.source = source.to_string();
                existing.ast = ast;
            }
            None => self.units.push(CompiledUnit { id: unit.to_string(), source: source.to_string(), ast }),
        }
        self.library = self.functions_excluding("");
    }

    /// Re-running a unit declares its top-level variables again; only the newest binding of
    /// each name is kept.
    fn drop_shadowed_variables(&mut self) {
        let entries: Vec<(String, bool, Dynamic)> =
            self.scope.iter_raw().map(|(name, constant, value)| (name.to_string(), constant, value.clone())).collect();
        let mut seen = HashSet::new();
        let mut kept: Vec<_> = entries.into_iter().rev().filter(|(name, _, _)| seen.insert(name.clone())).collect();
        if kept.len() == self.scope.len() {
            return;
        }
        kept.reverse();
        let mut scope = Scope::new();
        for (name, constant, value) in kept {
            if constant {
                scope.push_constant_dynamic(name, value);
            } else {
                scope.push_dynamic(name, value);
            }
        }
        self.scope = scope;
    }

    fn lint_unit(&mut self, source: &str, unit: &str) {
        let Err(err) = self.lint.compile_with_scope(&self.scope, source) else {
            return;
        };
        if let ParseErrorType::VariableUndefined(name) = err.err_type() {
            let (line, column) = position_of(err.position());
            self.warnings.push(ScriptWarning {
                message: format!("undefined variable '{name}'"),
                line,
                column,
                file: unit.to_string(),
            });
        }
    }
}

impl Default for RhaiVm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptVm for RhaiVm {
    fn bind_budget(&mut self, budget: Rc<ExecutionBudget>) {
        *self.budget.borrow_mut() = Some(budget);
    }

    fn run(&mut self, source: &str, unit: &str) -> Result<Option<String>, VmError> {
        let mut ast = self.engine.compile(source).map_err(|err| parse_error(&err, unit))?;
        ast.set_source(unit);
        self.lint_unit(source, unit);

        let mut program = self.functions_excluding(unit);
        program.combine(ast.clone());
        let rewind_to = self.scope.len();
        match self.engine.eval_ast_with_scope::<Dynamic>(&mut self.scope, &program) {
            Ok(value) => {
                if self.scope.len() > rewind_to {
                    self.drop_shadowed_variables();
                }
                self.install(unit, source, ast);
                Ok(display(value))
            }
            Err(err) => {
                self.scope.rewind(rewind_to);
                Err(eval_error(&err, Some(unit)))
            }
        }
    }

    fn call(&mut self, name: &str, args: &[serde_json::Value]) -> Result<Option<String>, VmError> {
        let args = args
            .iter()
            .map(rhai::serde::to_dynamic)
            .collect::<Result<Vec<Dynamic>, _>>()
            .map_err(|err| eval_error(&err, None))?;
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true).bind_this_ptr(&mut self.state);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.library, name, args)
            .map(display)
            .map_err(|err| eval_error(&err, None))
    }

    fn has_function(&self, name: &str) -> bool {
        self.library.iter_functions().any(|function| function.name == name)
    }

    fn function_source(&self, name: &str) -> Option<String> {
        self.units.iter().rev().find_map(|unit| source::function_definition(&unit.source, name)).map(str::to_string)
    }

    fn take_warnings(&mut self) -> Vec<ScriptWarning> {
        std::mem::take(&mut self.warnings)
    }

    fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.output.borrow_mut())
    }
}

fn display(value: Dynamic) -> Option<String> {
    if value.is_unit() {
        None
    } else {
        Some(value.to_string())
    }
}

fn position_of(pos: rhai::Position) -> (Option<u32>, Option<u32>) {
    (pos.line().map(|line| line as u32), pos.position().map(|column| column as u32))
}

fn parse_error(err: &ParseError, unit: &str) -> VmError {
    let (line, column) = position_of(err.position());
    let mut error = VmError::new(VmErrorClass::Parse, err.err_type().to_string()).at(line, column);
    error.unit = Some(unit.to_string());
    error
}

fn eval_error(err: &EvalAltResult, unit: Option<&str>) -> VmError {
    let mut frames = Vec::new();
    let mut origin = unit.map(str::to_string);
    let mut current = err;
    while let EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) = current {
        let (line, column) = position_of(*pos);
        let location = if source.is_empty() { "<main>" } else { source.as_str() };
        frames.push(format!("at {name} ({location}:{}:{})", line.unwrap_or(0), column.unwrap_or(0)));
        if !source.is_empty() {
            origin = Some(source.clone());
        }
        current = &**inner;
    }

    let class = match current {
        EvalAltResult::ErrorTerminated(..) => VmErrorClass::Timeout,
        EvalAltResult::ErrorFunctionNotFound(..) if frames.is_empty() => VmErrorClass::MissingFunction,
        _ => VmErrorClass::Runtime,
    };
    let message = match current {
        EvalAltResult::ErrorTerminated(reason, _) => format!("script terminated: {reason}"),
        other => strip_position(&other.to_string()).to_string(),
    };
    let (line, column) = position_of(current.position());
    let mut error = VmError::new(class, message).at(line, column);
    error.unit = origin;
    if !frames.is_empty() {
        frames.reverse();
        error.stack = Some(frames.join("\n"));
    }
    error
}

/// Rhai appends ` (line N, position M)` to error text; the position is reported separately.
fn strip_position(message: &str) -> &str {
    match message.rfind(" (line ") {
        Some(index) if message.ends_with(')') => &message[..index],
        _ => message,
    }
}
