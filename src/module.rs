//! Lazy module registry.
//!
//! A module is registered as a program and realized on first import: its
//! body runs once in a fork of the root frame, and whatever it `export`s is
//! cached. Later imports copy the cached exports. Native modules can be
//! registered already realized.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::{Position, Program};
use crate::environment::Frame;
use crate::evaluator::Evaluator;
use crate::parser::parse;
use crate::value::{Executable, Value};
use crate::Error;

pub type Exports = BTreeMap<String, Value>;

enum ModuleState {
    Registered(Program),
    /// The body is running; a re-entrant import is a cycle
    Realizing,
    Realized(Rc<Exports>),
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleState>,
}

impl ModuleRegistry {
    pub fn register(&mut self, name: &str, program: Program) -> Result<(), Error> {
        self.insert_new(name, ModuleState::Registered(program))?;
        tracing::debug!(module = name, "registering module");
        Ok(())
    }

    pub fn register_realized(&mut self, name: &str, exports: Exports) -> Result<(), Error> {
        self.insert_new(name, ModuleState::Realized(Rc::new(exports)))?;
        tracing::debug!(module = name, "registering realized module");
        Ok(())
    }

    fn insert_new(&mut self, name: &str, state: ModuleState) -> Result<(), Error> {
        if self.modules.contains_key(name) {
            return Err(Error::ModuleAlreadyRegistered(name.to_owned()));
        }
        self.modules.insert(name.to_owned(), state);
        Ok(())
    }

    pub fn is_realized(&self, name: &str) -> bool {
        matches!(self.modules.get(name), Some(ModuleState::Realized(_)))
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Evaluator {
    /// Merge the exports of module `name` into `into`, realizing it first if
    /// needed. Failures are reported at `position`.
    pub fn import(&mut self, name: &str, into: &Frame, position: &Position) -> Value {
        let cached = match self.modules.modules.get(name) {
            None => return into.report(Error::UnresolvedModule(name.to_owned()), position),
            Some(ModuleState::Realizing) => {
                return into.report(Error::ImportCycle(name.to_owned()), position);
            }
            Some(ModuleState::Realized(exports)) => Some(Rc::clone(exports)),
            Some(ModuleState::Registered(_)) => None,
        };
        let exports = match cached {
            Some(exports) => {
                tracing::debug!(module = name, "reusing realized module");
                exports
            }
            None => self.realize(name, into),
        };

        for (label, value) in exports.iter() {
            into.bind_local(label.as_str(), value.clone());
        }
        Value::Nil
    }

    /// The body runs in a fresh child of the root, on behalf of `importer`
    fn realize(&mut self, name: &str, importer: &Frame) -> Rc<Exports> {
        let Some(ModuleState::Registered(program)) = self
            .modules
            .modules
            .insert(name.to_owned(), ModuleState::Realizing)
        else {
            return Rc::default();
        };
        tracing::debug!(module = name, "realizing module");

        let exports: Rc<RefCell<Exports>> = Rc::default();
        let module_frame = self.root().fork_call(importer);
        let sink = Rc::clone(&exports);
        module_frame.bind_local(
            "export",
            Value::Executable(Executable::raw("export", move |evaluator, frame, _, args| {
                for arg in args {
                    match arg.as_reference() {
                        Some(label) => {
                            let value = evaluator.resolve_value(frame, arg);
                            sink.borrow_mut().insert(label.to_string(), value);
                        }
                        None => {
                            frame.report(
                                Error::type_error(format!(
                                    "export expects references, got {}",
                                    arg.kind_name()
                                )),
                                &arg.position,
                            );
                        }
                    }
                }
                Value::Nil
            })),
        );

        self.execute_program(&module_frame, &program);

        let exports = Rc::new(exports.take());
        tracing::debug!(module = name, exports = exports.len(), "module realized");
        self.modules
            .modules
            .insert(name.to_owned(), ModuleState::Realized(Rc::clone(&exports)));
        exports
    }

    /// Register a program shipped with the crate. A failure here is a
    /// packaging bug, logged rather than surfaced to the host.
    pub(crate) fn register_bundled_module(&mut self, name: &str, source_name: &str, source: &str) {
        let result = parse(source_name, source)
            .map_err(|err| err.to_string())
            .and_then(|program| {
                self.register_module(name, program)
                    .map_err(|err| err.to_string())
            });
        if let Err(message) = result {
            tracing::error!(module = name, "could not register bundled module: {message}");
        }
    }

    pub fn is_module_realized(&self, name: &str) -> bool {
        self.modules.is_realized(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.module_names()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::evaluator::test_support::*;
    use std::cell::Cell;

    fn program(name: &str, text: &str) -> Program {
        parse(name, text).unwrap()
    }

    #[test]
    fn test_module_realized_once() {
        let counter = Rc::new(Cell::new(0u32));
        let mut evaluator = standard_evaluator();
        let bump = Rc::clone(&counter);
        evaluator.register_native::<_, ()>("bump-counter", move || {
            bump.set(bump.get() + 1);
        });
        evaluator
            .register_module(
                "counted",
                program("counted.lisp", "(bump-counter) (def value 7) (export value)"),
            )
            .unwrap();
        assert!(!evaluator.is_module_realized("counted"));

        let first = evaluator.gen_bindings();
        let second = evaluator.gen_bindings();
        let (_, output) = run_capturing(&mut evaluator, &first, "(import :counted)");
        assert!(output.is_empty(), "{output}");
        let (value, _) = run_capturing(&mut evaluator, &second, "(import \"counted\") (identity value)");

        assert_eq!(value, Value::Number(7.0));
        assert_eq!(first.resolve("value"), Some(Value::Number(7.0)));
        assert_eq!(counter.get(), 1);
        assert!(evaluator.is_module_realized("counted"));
    }

    #[test]
    fn test_module_frame_is_isolated() {
        let mut evaluator = standard_evaluator();
        evaluator
            .register_module(
                "helpers",
                program(
                    "helpers.lisp",
                    "(def secret 41) (defun reveal () (+ secret 1)) (export reveal)",
                ),
            )
            .unwrap();

        let frame = evaluator.gen_bindings();
        let (value, output) = run_capturing(&mut evaluator, &frame, "(import :helpers) (reveal)");
        assert!(output.is_empty(), "{output}");
        assert_eq!(value, Value::Number(42.0));
        assert_eq!(frame.resolve("secret"), None);
        assert_eq!(frame.resolve("export"), None);
    }

    #[test]
    fn test_module_output_reaches_the_importer() {
        let mut evaluator = standard_evaluator();
        evaluator
            .register_module(
                "noisy",
                program(
                    "noisy.lisp",
                    "(debuglog :loading) (defun warn () (debuglog :warned)) (export warn)",
                ),
            )
            .unwrap();

        let frame = evaluator.gen_bindings();
        let (_, output) = run_capturing(&mut evaluator, &frame, "(import :noisy) (warn)");
        assert_eq!(output, ":loading\n:warned\n");

        // realized once: a second importer only sees its own calls
        let other = evaluator.gen_bindings();
        let (_, output) = run_capturing(&mut evaluator, &other, "(import :noisy) (warn)");
        assert_eq!(output, ":warned\n");
    }

    #[test]
    fn test_import_errors_data_driven() {
        let mut evaluator = standard_evaluator();
        evaluator
            .register_module("loop-a", program("a.lisp", "(import :loop-b) (def a 1) (export a)"))
            .unwrap();
        evaluator
            .register_module("loop-b", program("b.lisp", "(import :loop-a) (def b 2) (export b)"))
            .unwrap();
        evaluator
            .register_module("bad-export", program("bad.lisp", "(def ok 1) (export ok 5 :x)"))
            .unwrap();

        // Diagnostics from module bodies surface through the importing frame
        let test_cases = vec![
            ("(import :nowhere)", "unresolved module nowhere"),
            ("(import 5)", "import expects an atom or string module name, got 5"),
            ("(import)", "import expects exactly 1 arguments but got 0"),
            (
                "(import :loop-a)",
                "import cycle detected while realizing module loop-a",
            ),
            ("(import :bad-export)", "export expects references, got number literal"),
        ];

        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let capture = evaluator.root().capture_output();
            let frame = evaluator.gen_bindings();
            let value = evaluator.execute_program(&frame, &program("import.lisp", input));
            assert!(value.is_nil(), "Import test #{}", i + 1);
            assert!(
                capture.contents().contains(expected),
                "Import test #{}: expected '{expected}', got {:?}",
                i + 1,
                capture.contents()
            );
        }

        // The outer realization completes despite the cycle
        assert!(evaluator.is_module_realized("loop-a"));
        assert!(evaluator.is_module_realized("loop-b"));
        let frame = evaluator.gen_bindings();
        let (value, _) = run_capturing(&mut evaluator, &frame, "(import :loop-a) (identity a)");
        assert_eq!(value, Value::Number(1.0));

        // Invalid exports are skipped, valid ones kept
        let (value, _) = run_capturing(&mut evaluator, &frame, "(import :bad-export) (identity ok)");
        assert_eq!(value, Value::Number(1.0));
    }

    #[test]
    fn test_registration_rules() {
        let mut evaluator = standard_evaluator();
        evaluator
            .register_module("m", program("m.lisp", "(def x 1) (export x)"))
            .unwrap();
        assert_eq!(
            evaluator.register_module("m", program("m2.lisp", "")),
            Err(Error::ModuleAlreadyRegistered("m".to_owned()))
        );
        assert!(
            evaluator
                .register_realized_module("builtins", Vec::new())
                .is_err()
        );

        evaluator
            .register_realized_module(
                "native",
                vec![("answer".to_owned(), Value::Number(42.0))],
            )
            .unwrap();
        assert!(evaluator.is_module_realized("native"));

        let frame = evaluator.gen_bindings();
        let (value, _) = run_capturing(&mut evaluator, &frame, "(import :native) (identity answer)");
        assert_eq!(value, Value::Number(42.0));

        let names = evaluator.module_names();
        for expected in ["builtins", "m", "native", "ntest", "test"] {
            assert!(names.contains(&expected.to_owned()), "{names:?}");
        }
    }

    #[test]
    fn test_later_import_wins() {
        let mut evaluator = standard_evaluator();
        evaluator
            .register_module("first", program("1.lisp", "(def shared 1) (export shared)"))
            .unwrap();
        evaluator
            .register_module("second", program("2.lisp", "(def shared 2) (export shared)"))
            .unwrap();

        let frame = evaluator.gen_bindings();
        let (value, _) = run_capturing(
            &mut evaluator,
            &frame,
            "(import :first) (import :second) (identity shared)",
        );
        assert_eq!(value, Value::Number(2.0));
    }
}
