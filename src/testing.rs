//! Runtime for the test-definition dialect.
//!
//! Test state lives in frame metadata rather than in the evaluator. The
//! runner installs a [`TestSuiteMeta`] on the entry frame, and each test body
//! runs in a child frame carrying an [`ActiveTestMeta`] plus its own output
//! capture. Both keys are dynamic, so `assert` and `fail` find the running
//! test through the call chain, even inside helpers defined outside the
//! test body.
//!
//! ```text
//! (import :test)
//! (test :addition (assert (eq (+ 1 2) 3)))
//! (test "gives up" ((fail "not implemented")))
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::ast::{Node, Position, Program};
use crate::environment::{Frame, MetaKey};
use crate::evaluator::bridge::IntoNative;
use crate::evaluator::{Arity, Evaluator};
use crate::value::{Executable, Value};
use crate::Error;

/// Native module backing the dialect
pub const NATIVE_TEST_MODULE: &str = "ntest";
/// Program module re-exporting the dialect under short names
pub const TEST_MODULE: &str = "test";

const STDTEST_SOURCE: &str = include_str!("prelude/stdtest.lisp");

/// Which tests of a suite actually run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TestSelection {
    #[default]
    All,
    /// Whitelist: only these names run
    Only(Vec<String>),
    /// Blacklist: these names are skipped
    Except(Vec<String>),
}

impl TestSelection {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            TestSelection::All => true,
            TestSelection::Only(names) => names.iter().any(|n| n == name),
            TestSelection::Except(names) => !names.iter().any(|n| n == name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "ok"),
            TestStatus::Failed => write!(f, "FAILED"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One failed assertion, located at the asserting form
#[derive(Debug, Clone)]
pub struct TestFailure {
    pub message: String,
    pub position: Position,
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.message, self.position)
    }
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub failures: Vec<TestFailure>,
    /// Everything printed while the body ran, diagnostics included
    pub output: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct TestSuite {
    pub name: String,
    pub results: Vec<TestResult>,
    pub duration: Duration,
}

impl TestSuite {
    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn result(&self, name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Suite-wide state shared by every frame beneath the runner's entry frame
#[derive(Debug)]
pub struct SuiteState {
    name: String,
    started: Instant,
    /// Cleared while a test body runs, so nested tests are no-ops
    testing: Cell<bool>,
    selection: TestSelection,
    results: RefCell<Vec<TestResult>>,
}

impl SuiteState {
    fn new(name: &str, selection: TestSelection) -> Self {
        SuiteState {
            name: name.to_owned(),
            started: Instant::now(),
            testing: Cell::new(true),
            selection,
            results: RefCell::new(Vec::new()),
        }
    }
}

pub struct TestSuiteMeta;

impl MetaKey for TestSuiteMeta {
    type Value = SuiteState;
    const DYNAMIC: bool = true;
}

/// The test whose body is currently running
#[derive(Debug)]
pub struct ActiveTest {
    pub name: String,
    pub suite_name: String,
    failures: RefCell<Vec<TestFailure>>,
}

pub struct ActiveTestMeta;

impl MetaKey for ActiveTestMeta {
    type Value = ActiveTest;
    const DYNAMIC: bool = true;
}

/// Record a failure against the test running beneath `frame`
fn record_failure(frame: &Frame, message: String, position: &Position) -> Value {
    match frame.get_meta::<ActiveTestMeta>() {
        Some(active) => {
            tracing::debug!(test = %active.name, %position, "assertion failed: {message}");
            active.failures.borrow_mut().push(TestFailure {
                message,
                position: position.clone(),
            });
            Value::Nil
        }
        None => frame.report(Error::Eval("no active test".to_owned()), position),
    }
}

/// `(ntest.test name body)`
fn ntest_test(evaluator: &mut Evaluator, frame: &Frame, callsite: &Node, args: &[Node]) -> Value {
    let [name_node, body] = args else {
        return frame.report(
            Error::arity("test", Arity::Exact(2), args.len()),
            &callsite.position,
        );
    };
    let name_value = evaluator.resolve_value(frame, name_node);
    let Some(name) = name_value.as_key().map(str::to_owned) else {
        return frame.report(
            Error::type_error(format!(
                "test name must be an atom or string, got {name_value}"
            )),
            &name_node.position,
        );
    };

    let Some(suite) = frame.get_meta::<TestSuiteMeta>() else {
        return Value::Nil;
    };
    if !suite.testing.get() {
        return Value::Nil;
    }

    if !suite.selection.includes(&name) {
        tracing::debug!(suite = %suite.name, test = %name, "test skipped");
        suite.results.borrow_mut().push(TestResult {
            name,
            status: TestStatus::Skipped,
            failures: Vec::new(),
            output: String::new(),
            duration: Duration::ZERO,
        });
        return Value::Nil;
    }

    let test_frame = frame.fork();
    let active = Rc::new(ActiveTest {
        name: name.clone(),
        suite_name: suite.name.clone(),
        failures: RefCell::new(Vec::new()),
    });
    test_frame.set_meta::<ActiveTestMeta>(Rc::clone(&active));
    let capture = test_frame.capture_output();

    suite.testing.set(false);
    let started = Instant::now();
    evaluator.resolve_value(&test_frame, body);
    let duration = started.elapsed();
    suite.testing.set(true);

    let failures = active.failures.take();
    let status = if failures.is_empty() {
        TestStatus::Passed
    } else {
        TestStatus::Failed
    };
    tracing::debug!(suite = %suite.name, test = %name, %status, "test finished");
    suite.results.borrow_mut().push(TestResult {
        name,
        status,
        failures,
        output: capture.contents(),
        duration,
    });
    Value::Nil
}

/// `(ntest.fail message)` yields a callable recording the failure where it
/// is invoked
fn ntest_fail(message: Value) -> Value {
    let message = message.to_string();
    Value::Executable(Executable::raw("fail", move |_, frame, callsite, args| {
        if !args.is_empty() {
            return frame.report(
                Error::arity("fail", Arity::Exact(0), args.len()),
                &callsite.position,
            );
        }
        record_failure(frame, message.clone(), &callsite.position)
    }))
}

/// `(ntest.assert condition [message])`
fn ntest_assert(evaluator: &mut Evaluator, frame: &Frame, callsite: &Node, args: &[Node]) -> Value {
    let (condition_node, message_node) = match args {
        [condition] => (condition, None),
        [condition, message] => (condition, Some(message)),
        _ => {
            return frame.report(
                Error::arity("assert", Arity::Between(1, 2), args.len()),
                &callsite.position,
            );
        }
    };

    let condition = evaluator.resolve_value(frame, condition_node);
    if condition.as_bool() == Some(true) {
        return Value::Nil;
    }
    let message = match message_node {
        Some(node) => evaluator.resolve_value(frame, node).to_string(),
        None => format!("assertion failed: {}", condition_node.to_source()),
    };
    record_failure(frame, message, &callsite.position)
}

/// Register the native `ntest` module and the `test` program over it
pub(crate) fn register_test_modules(evaluator: &mut Evaluator) {
    let exports = vec![
        (
            format!("{NATIVE_TEST_MODULE}.test"),
            Value::Executable(Executable::raw("test", ntest_test)),
        ),
        (
            format!("{NATIVE_TEST_MODULE}.fail"),
            Value::Executable(IntoNative::<(Value,)>::into_native(ntest_fail, "fail")),
        ),
        (
            format!("{NATIVE_TEST_MODULE}.assert"),
            Value::Executable(Executable::raw("assert", ntest_assert)),
        ),
    ];
    if let Err(err) = evaluator.register_realized_module(NATIVE_TEST_MODULE, exports) {
        tracing::error!(module = NATIVE_TEST_MODULE, "could not register module: {err}");
    }
    evaluator.register_bundled_module(TEST_MODULE, "stdtest.lisp", STDTEST_SOURCE);
}

impl Evaluator {
    /// Run `program` as a test suite on a fresh binding frame
    pub fn run_tests(
        &mut self,
        program: &Program,
        suite_name: &str,
        selection: TestSelection,
    ) -> TestSuite {
        let frame = self.gen_bindings();
        let state = Rc::new(SuiteState::new(suite_name, selection));
        frame.set_meta::<TestSuiteMeta>(Rc::clone(&state));

        tracing::info!(suite = suite_name, "running test suite");
        self.execute_program(&frame, program);

        let suite = TestSuite {
            name: state.name.clone(),
            results: state.results.take(),
            duration: state.started.elapsed(),
        };
        tracing::info!(
            suite = suite_name,
            passed = suite.passed(),
            failed = suite.failed(),
            skipped = suite.skipped(),
            "test suite finished"
        );
        suite
    }
}
