use std::fmt;
use std::rc::Rc;

use crate::ast::{Node, NodeKind, Program};
use crate::environment::{Frame, Sink, SinkMeta};
use crate::module::ModuleRegistry;
use crate::parser::parse;
use crate::value::{Closure, Executable, Value};
use crate::{DEFAULT_MAX_EVAL_DEPTH, Error, ParseError, REST_MARKER};

pub mod bridge;

/// Expected argument count of a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive range
    Between(usize, usize),
    /// Zero or more
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
            Arity::Between(min, max) => (*min..=*max).contains(&count),
            Arity::Any => true,
        }
    }

    /// Check an argument count, naming the callee in the error
    pub fn validate(&self, callee: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity(callee, *self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Between(min, max) => write!(f, "between {min} and {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Evaluation budgets and output routing
#[derive(Debug, Clone)]
pub struct Config {
    /// Nesting limit for form evaluation; `None` disables the check
    pub max_depth: Option<usize>,
    /// Number of form dispatches allowed over the evaluator's lifetime
    pub step_limit: Option<u64>,
    /// Where printed text and diagnostics go after capture
    pub default_sink: Sink,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: Some(DEFAULT_MAX_EVAL_DEPTH),
            step_limit: None,
            default_sink: Sink::Stdout,
        }
    }
}

/// The execution context: root frame, module registry and budgets.
///
/// Evaluation never returns a Rust error. A failing form reports a
/// diagnostic through [`Frame::report`] at the failing node and evaluates to
/// `nil`, and the surrounding program carries on.
pub struct Evaluator {
    root: Frame,
    pub(crate) modules: ModuleRegistry,
    config: Config,
    depth: usize,
    steps: u64,
}

impl Evaluator {
    /// An evaluator with an empty root frame
    pub fn new(config: Config) -> Self {
        let root = Frame::root();
        root.set_meta::<SinkMeta>(Rc::new(config.default_sink));
        Evaluator {
            root,
            modules: ModuleRegistry::default(),
            config,
            depth: 0,
            steps: 0,
        }
    }

    /// An evaluator with the core library, the `builtins` program and the
    /// test modules installed
    pub fn with_standard_bindings(config: Config) -> Self {
        let mut evaluator = Evaluator::new(config);
        evaluator.setup_standard_bindings();
        evaluator
    }

    pub fn setup_standard_bindings(&mut self) {
        crate::builtinops::install(&self.root);
        crate::builtinops::register_builtins_module(self);
        crate::testing::register_test_modules(self);

        let root = self.root.clone();
        let position = crate::ast::Position::synthetic("<setup>");
        self.import("builtins", &root, &position);
    }

    pub fn root(&self) -> &Frame {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh frame for an entry program, child of the root
    pub fn gen_bindings(&self) -> Frame {
        self.root.fork()
    }

    pub fn register_module(&mut self, name: &str, program: Program) -> Result<(), Error> {
        self.modules.register(name, program)
    }

    pub fn register_realized_module(
        &mut self,
        name: &str,
        exports: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), Error> {
        self.modules.register_realized(name, exports.into_iter().collect())
    }

    /// Parse `text` and run it on a fresh binding frame
    pub fn eval_source(&mut self, source_name: &str, text: &str) -> Result<Value, ParseError> {
        let program = parse(source_name, text)?;
        let frame = self.gen_bindings();
        Ok(self.execute_program(&frame, &program))
    }

    /// Evaluate top-level forms in order; the last value is the result
    pub fn execute_program(&mut self, frame: &Frame, program: &Program) -> Value {
        let mut result = Value::Nil;
        for node in &program.nodes {
            result = self.evaluate_form(frame, node);
        }
        result
    }

    /// Evaluate a node in call position
    pub fn evaluate_form(&mut self, frame: &Frame, node: &Node) -> Value {
        if let Some(limit) = self.config.step_limit
            && self.steps >= limit
        {
            return frame.report(
                Error::Eval("evaluation step limit exceeded".to_owned()),
                &node.position,
            );
        }
        self.steps += 1;

        if let Some(max_depth) = self.config.max_depth
            && self.depth >= max_depth
        {
            return frame.report(
                Error::Eval("evaluation depth limit exceeded".to_owned()),
                &node.position,
            );
        }

        self.depth += 1;
        let result = self.dispatch(frame, node);
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, frame: &Frame, node: &Node) -> Value {
        let Some(items) = node.as_parenthesis() else {
            return frame.report(
                Error::Eval("expected invocation".to_owned()),
                &node.position,
            );
        };
        let Some((head, args)) = items.split_first() else {
            return frame.report(
                Error::Eval("cannot execute empty parenthesis".to_owned()),
                &node.position,
            );
        };

        match self.resolve_value(frame, head) {
            Value::Executable(executable) => self.apply(&executable, frame, node, args),
            other => frame.report(
                Error::Eval(format!(
                    "cannot evaluate expression of kind {}",
                    other.kind_name()
                )),
                &node.position,
            ),
        }
    }

    /// Turn any node into a value in `frame`
    pub fn resolve_value(&mut self, frame: &Frame, node: &Node) -> Value {
        match &node.kind {
            NodeKind::Atom(label) => Value::Atom(Rc::clone(label)),
            NodeKind::Parenthesis(_) => self.evaluate_form(frame, node),
            NodeKind::Reference(label) => match frame.resolve(label) {
                Some(value) => value,
                None => frame.report(Error::UnboundName(label.to_string()), &node.position),
            },
            NodeKind::NumberLiteral(n) => Value::Number(*n),
            NodeKind::StringLiteral(s) => Value::String(Rc::clone(s)),
        }
    }

    /// Call `executable` from `frame`. `callsite` is the whole invoking form
    /// and `args` are its raw argument nodes.
    pub fn apply(
        &mut self,
        executable: &Executable,
        frame: &Frame,
        callsite: &Node,
        args: &[Node],
    ) -> Value {
        match executable {
            Executable::NativeRaw { func, .. } => func(self, frame, callsite, args),
            Executable::NativeEval { func, .. } => {
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| self.resolve_value(frame, arg))
                    .collect();
                match func(values) {
                    Ok(value) => value,
                    Err(err) => frame.report(err, &callsite.position),
                }
            }
            Executable::Interpreted(closure) => self.apply_closure(closure, frame, callsite, args),
        }
    }

    fn apply_closure(
        &mut self,
        closure: &Closure,
        frame: &Frame,
        callsite: &Node,
        args: &[Node],
    ) -> Value {
        let call_frame = closure.frame.fork_call(frame);

        match closure.params.split_last() {
            Some((last, leading)) if &**last == REST_MARKER => {
                if args.len() < leading.len() {
                    return frame.report(
                        Error::arity(closure.display_name(), Arity::AtLeast(leading.len()), args.len()),
                        &callsite.position,
                    );
                }
                let (positional, rest) = args.split_at(leading.len());
                for (param, arg) in leading.iter().zip(positional) {
                    let value = self.resolve_value(frame, arg);
                    call_frame.bind_local(Rc::clone(param), value);
                }
                let rest_values: Vec<Value> =
                    rest.iter().map(|arg| self.resolve_value(frame, arg)).collect();
                call_frame.bind_local(Rc::clone(last), Value::from(rest_values));
            }
            _ => {
                if closure.params.len() != args.len() {
                    return frame.report(
                        Error::arity(
                            closure.display_name(),
                            Arity::Exact(closure.params.len()),
                            args.len(),
                        ),
                        &callsite.position,
                    );
                }
                for (param, arg) in closure.params.iter().zip(args) {
                    let value = self.resolve_value(frame, arg);
                    call_frame.bind_local(Rc::clone(param), value);
                }
            }
        }

        self.evaluate_form(&call_frame, &closure.body)
    }
}

fn arity_mismatch(frame: &Frame, callsite: &Node, callee: &str, expected: Arity, got: usize) -> Value {
    frame.report(Error::arity(callee, expected, got), &callsite.position)
}

/// Resolve a `def`/`defun` name node, refusing names already bound here
fn binding_name(frame: &Frame, form: &str, name_node: &Node) -> Result<Rc<str>, Value> {
    let Some(name) = name_node.as_reference() else {
        return Err(frame.report(
            Error::type_error(format!(
                "{form} expects a reference as name, got {}",
                name_node.kind_name()
            )),
            &name_node.position,
        ));
    };
    if frame.is_bound_locally(name) {
        return Err(frame.report(Error::Redefinition(name.to_string()), &name_node.position));
    }
    Ok(Rc::clone(name))
}

/// Build a closure over `frame` from a parameter list and a body
fn make_closure(
    frame: &Frame,
    params_node: &Node,
    body: &Node,
    name: Option<Rc<str>>,
) -> Result<Closure, Value> {
    let Some(param_nodes) = params_node.as_parenthesis() else {
        return Err(frame.report(
            Error::type_error("lambda expects a parenthesized parameter list"),
            &params_node.position,
        ));
    };

    let mut params: Vec<Rc<str>> = Vec::with_capacity(param_nodes.len());
    for (i, param) in param_nodes.iter().enumerate() {
        let Some(label) = param.as_reference() else {
            return Err(frame.report(
                Error::type_error(format!(
                    "lambda parameters must be references, got {}",
                    param.kind_name()
                )),
                &param.position,
            ));
        };
        if &**label == REST_MARKER && i + 1 != param_nodes.len() {
            return Err(frame.report(
                Error::type_error(format!("{REST_MARKER} must be the last parameter")),
                &param.position,
            ));
        }
        if params.contains(label) {
            return Err(frame.report(
                Error::type_error(format!("duplicate parameter name {label}")),
                &param.position,
            ));
        }
        params.push(Rc::clone(label));
    }

    if body.as_parenthesis().is_none() {
        return Err(frame.report(
            Error::type_error(format!(
                "lambda body must be a parenthesized form, got {}",
                body.kind_name()
            )),
            &body.position,
        ));
    }

    Ok(Closure {
        frame: frame.clone(),
        params,
        body: body.clone(),
        name,
    })
}

/// `(def name value)`
pub(crate) fn eval_def(
    evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [name_node, value_node] => {
            let name = match binding_name(frame, "def", name_node) {
                Ok(name) => name,
                Err(reported) => return reported,
            };
            let value = evaluator.resolve_value(frame, value_node);
            frame.bind_local(name, value)
        }
        _ => arity_mismatch(frame, callsite, "def", Arity::Exact(2), args.len()),
    }
}

/// `(if condition then else)`; only the taken branch is evaluated
pub(crate) fn eval_if(
    evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [condition_node, then_node, else_node] => {
            let condition = evaluator.resolve_value(frame, condition_node);
            match condition.as_bool() {
                Some(true) => evaluator.resolve_value(frame, then_node),
                Some(false) => evaluator.resolve_value(frame, else_node),
                None => frame.report(
                    Error::type_error(format!(
                        "if condition must be :true or :false, got {condition}"
                    )),
                    &condition_node.position,
                ),
            }
        }
        _ => arity_mismatch(frame, callsite, "if", Arity::Exact(3), args.len()),
    }
}

/// `(lambda (params...) body)`
pub(crate) fn eval_lambda(
    _evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [params_node, body] => match make_closure(frame, params_node, body, None) {
            Ok(closure) => Value::Executable(Executable::Interpreted(Rc::new(closure))),
            Err(reported) => reported,
        },
        _ => arity_mismatch(frame, callsite, "lambda", Arity::Exact(2), args.len()),
    }
}

/// `(defun name (params...) body)`
pub(crate) fn eval_defun(
    _evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [name_node, params_node, body] => {
            let name = match binding_name(frame, "defun", name_node) {
                Ok(name) => name,
                Err(reported) => return reported,
            };
            match make_closure(frame, params_node, body, Some(Rc::clone(&name))) {
                Ok(closure) => frame.bind_local(
                    name,
                    Value::Executable(Executable::Interpreted(Rc::new(closure))),
                ),
                Err(reported) => reported,
            }
        }
        _ => arity_mismatch(frame, callsite, "defun", Arity::Exact(3), args.len()),
    }
}

/// `(seq a b ...)` evaluates each form in order and yields the last value
pub(crate) fn eval_seq(
    evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    if args.is_empty() {
        return arity_mismatch(frame, callsite, "seq", Arity::AtLeast(1), 0);
    }
    let mut result = Value::Nil;
    for arg in args {
        result = evaluator.evaluate_form(frame, arg);
    }
    result
}

/// `(pure value)` yields a zero-argument callable returning `value`
pub(crate) fn eval_pure(
    evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [value_node] => {
            let value = evaluator.resolve_value(frame, value_node);
            Value::Executable(Executable::raw("pure", move |_, frame, callsite, args| {
                if args.is_empty() {
                    value.clone()
                } else {
                    arity_mismatch(frame, callsite, "pure", Arity::Exact(0), args.len())
                }
            }))
        }
        _ => arity_mismatch(frame, callsite, "pure", Arity::Exact(1), args.len()),
    }
}

/// `(import :name)` merges a module's exports into the current frame
pub(crate) fn eval_import(
    evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [name_node] => {
            let name = evaluator.resolve_value(frame, name_node);
            match name.as_key() {
                Some(name) => evaluator.import(name, frame, &callsite.position),
                None => frame.report(
                    Error::type_error(format!(
                        "import expects an atom or string module name, got {name}"
                    )),
                    &name_node.position,
                ),
            }
        }
        _ => arity_mismatch(frame, callsite, "import", Arity::Exact(1), args.len()),
    }
}

/// `(quote node)` yields the argument unevaluated
pub(crate) fn eval_quote(
    _evaluator: &mut Evaluator,
    frame: &Frame,
    callsite: &Node,
    args: &[Node],
) -> Value {
    match args {
        [node] => Value::Node(node.clone()),
        _ => arity_mismatch(frame, callsite, "quote", Arity::Exact(1), args.len()),
    }
}

/// Data-driven harness shared by the test modules of this crate
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::environment::CapturedOutput;

    /// Test result variants for data-driven evaluation tests
    #[derive(Debug)]
    pub(crate) enum TestResult {
        /// Evaluates to this value without any diagnostic
        EvalResult(Value),
        /// Evaluates to `nil` and emits a diagnostic containing this text
        Reports(&'static str),
        /// Emits exactly this output (diagnostics included) and any value
        Prints(&'static str),
        /// Setup step: any value, no diagnostic
        Setup,
    }
    pub(crate) use TestResult::*;

    /// Test cases that share one binding frame
    pub(crate) struct TestEnvironment(pub Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases
    pub(crate) fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(value.into())
    }

    /// Macro for setup expressions (definitions, imports)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, $crate::evaluator::test_support::TestResult::Setup)
        };
    }
    pub(crate) use test_setup;

    pub(crate) fn quiet_config() -> Config {
        Config {
            default_sink: Sink::Discard,
            ..Config::default()
        }
    }

    pub(crate) fn standard_evaluator() -> Evaluator {
        Evaluator::with_standard_bindings(quiet_config())
    }

    /// Run a program on `frame` and return its value plus everything printed
    pub(crate) fn run_capturing(
        evaluator: &mut Evaluator,
        frame: &Frame,
        source: &str,
    ) -> (Value, String) {
        let program = parse("test.lisp", source)
            .unwrap_or_else(|e| panic!("unexpected parse error for '{source}': {e}"));
        let capture: Rc<CapturedOutput> = frame.capture_output();
        let value = evaluator.execute_program(frame, &program);
        (value, capture.contents())
    }

    pub(crate) fn execute_test_case(
        evaluator: &mut Evaluator,
        frame: &Frame,
        input: &str,
        expected: &TestResult,
        test_id: &str,
    ) {
        let (actual, output) = run_capturing(evaluator, frame, input);
        match expected {
            EvalResult(expected_val) => {
                assert!(
                    !output.contains("Error:"),
                    "{test_id}: unexpected diagnostic for '{input}': {output}"
                );
                assert_eq!(&actual, expected_val, "{test_id}: wrong value for '{input}'");
            }
            Reports(expected_text) => {
                assert!(
                    output.contains("Error:") && output.contains(expected_text),
                    "{test_id}: diagnostic should contain '{expected_text}' for '{input}', got: {output:?}"
                );
                assert!(actual.is_nil(), "{test_id}: expected nil, got {actual:?}");
            }
            Prints(expected_output) => {
                assert_eq!(
                    output, *expected_output,
                    "{test_id}: wrong output for '{input}'"
                );
            }
            Setup => {
                assert!(
                    !output.contains("Error:"),
                    "{test_id}: setup '{input}' reported: {output}"
                );
            }
        }
    }

    /// Each case runs in a fresh evaluator
    pub(crate) fn run_comprehensive_tests(test_cases: Vec<(&'static str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let mut evaluator = standard_evaluator();
            let frame = evaluator.gen_bindings();
            let test_id = format!("Test #{}", i + 1);
            execute_test_case(&mut evaluator, &frame, input, expected, &test_id);
        }
    }

    /// Cases within one environment share an evaluator and a binding frame
    pub(crate) fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let mut evaluator = standard_evaluator();
            let frame = evaluator.gen_bindings();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(&mut evaluator, &frame, input, expected, &test_id);
            }
        }
    }
}
