//! Core builtin library installed into the root frame.
//!
//! The core is deliberately small. Everything else a script commonly needs
//! (`not`, `and`, `greater`, ...) is written in the language itself in
//! `prelude/builtins.lisp` and imported on top of it.
//!
//! ## Functions vs Special Forms
//!
//! - **Special Forms**: receive the unevaluated argument nodes and decide
//!   what to evaluate (`def`, `if`, `lambda`, `seq`, `quote`, ...)
//! - **Functions**: plain Rust functions bound through the typed bridge,
//!   which resolves every argument, checks the count and coerces each value
//!
//! ```text
//! (def total (+ 1 2 3))            ; 6
//! (if (less total 10) :small :big) ; :small
//! (hash-get (hash :a 1) :a)        ; 1
//! ```
//!
//! ## Adding New Operations
//!
//! 1. Implement the function with typed parameters (`f64`, `String`,
//!    `Value`, [`Rest`], or injected context such as [`Frame`])
//! 2. Add it to [`builtin_ops`] with its identifier
//! 3. Add cases to the data-driven tests below

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ast::Node;
use crate::environment::Frame;
use crate::evaluator::bridge::{IntoNative, Rest};
use crate::evaluator::{
    Evaluator, eval_def, eval_defun, eval_if, eval_import, eval_lambda, eval_pure, eval_quote,
    eval_seq,
};
use crate::value::{Executable, Value};
use crate::{Error, FALSE_LABEL, TRUE_LABEL};

/// Name under which the higher-level builtin program is registered
pub const BUILTINS_MODULE: &str = "builtins";

const BUILTINS_SOURCE: &str = include_str!("prelude/builtins.lisp");

/// Signature shared by all special forms
pub(crate) type SpecialFormFn = fn(&mut Evaluator, &Frame, &Node, &[Node]) -> Value;

/// Represents the implementation of a builtin (function or special form)
#[derive(Clone)]
pub(crate) enum OpKind {
    /// Controls evaluation of its own argument nodes
    SpecialForm(SpecialFormFn),
    /// Bridged function over evaluated, coerced arguments
    Function(Executable),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
        }
    }
}

/// Definition of a builtin operation
#[derive(Debug, Clone)]
pub(crate) struct BuiltinOp {
    /// The name bound in the root frame
    pub id: &'static str,
    pub op_kind: OpKind,
}

impl BuiltinOp {
    #[cfg_attr(not(test), expect(dead_code))]
    pub(crate) fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    fn into_executable(self) -> Executable {
        match self.op_kind {
            OpKind::SpecialForm(func) => Executable::raw(self.id, func),
            OpKind::Function(executable) => executable,
        }
    }
}

//
// Builtin Function Implementations
//

fn builtin_add(first: f64, rest: Rest<f64>) -> f64 {
    std::iter::once(first).chain(rest).fold(0.0, |acc, n| acc + n)
}

fn builtin_sub(first: f64, rest: Rest<f64>) -> f64 {
    rest.iter().fold(first, |acc, n| acc - n)
}

fn builtin_mul(first: f64, rest: Rest<f64>) -> f64 {
    std::iter::once(first).chain(rest).fold(1.0, |acc, n| acc * n)
}

// IEEE semantics: dividing by zero yields an infinity or NaN
fn builtin_div(first: f64, rest: Rest<f64>) -> f64 {
    rest.iter().fold(first, |acc, n| acc / n)
}

fn builtin_less(a: f64, b: f64) -> bool {
    a < b
}

/// Chained structural equality: every adjacent pair must be equal
fn builtin_eq(first: Value, rest: Rest<Value>) -> bool {
    let mut prev = &first;
    for current in rest.iter() {
        if prev != current {
            return false;
        }
        prev = current;
    }
    true
}

fn hash_key(value: &Value) -> Result<String, Error> {
    value.as_key().map(str::to_owned).ok_or_else(|| {
        Error::type_error(format!("hash keys must be atoms or strings, got {value}"))
    })
}

fn builtin_hash(args: Rest<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::type_error(format!(
            "hash expects an even number of arguments but got {}",
            args.len()
        )));
    }
    let mut entries = BTreeMap::new();
    for pair in args.chunks_exact(2) {
        entries.insert(hash_key(&pair[0])?, pair[1].clone());
    }
    Ok(Value::from(entries))
}

fn builtin_hash_get(hash: Value, key: Value) -> Result<Value, Error> {
    let Value::Hash(entries) = hash else {
        return Err(Error::type_error(format!(
            "hash-get expects a hash, got {hash}"
        )));
    };
    let key = hash_key(&key)?;
    Ok(entries.get(&key).cloned().unwrap_or(Value::Nil))
}

fn builtin_hash_merge(hashes: Rest<Value>) -> Result<Value, Error> {
    let mut merged = BTreeMap::new();
    for hash in hashes {
        match hash {
            Value::Hash(entries) => {
                merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            other => {
                return Err(Error::type_error(format!(
                    "hash-merge expects hashes, got {other}"
                )));
            }
        }
    }
    Ok(Value::Hash(Rc::new(merged)))
}

fn builtin_list(items: Rest<Value>) -> Vec<Value> {
    items.0
}

fn builtin_tostring(value: Value) -> String {
    value.to_string()
}

fn builtin_debuglog(frame: Frame, values: Rest<Value>) {
    let line: Vec<String> = values.iter().map(ToString::to_string).collect();
    frame.print(&format!("{}\n", line.join(" ")));
}

fn builtin_reflect_type(value: Value) -> Value {
    Value::atom(value.kind_name())
}

/// All core operations, in registration order.
///
/// Values hold `Rc`s, so unlike a process-wide table the registry is built
/// per call and installed into one root frame at a time.
pub(crate) fn builtin_ops() -> Vec<BuiltinOp> {
    fn special_form(id: &'static str, func: SpecialFormFn) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(func),
        }
    }

    fn function<Args, F>(id: &'static str, f: F) -> BuiltinOp
    where
        F: IntoNative<Args>,
    {
        BuiltinOp {
            id,
            op_kind: OpKind::Function(f.into_native(id)),
        }
    }

    vec![
        // Special forms
        special_form("def", eval_def),
        special_form("if", eval_if),
        special_form("lambda", eval_lambda),
        special_form("defun", eval_defun),
        special_form("seq", eval_seq),
        special_form("pure", eval_pure),
        special_form("import", eval_import),
        special_form("quote", eval_quote),
        // Arithmetic
        function::<(f64, Rest<f64>), _>("+", builtin_add),
        function::<(f64, Rest<f64>), _>("-", builtin_sub),
        function::<(f64, Rest<f64>), _>("*", builtin_mul),
        function::<(f64, Rest<f64>), _>("/", builtin_div),
        // Comparison
        function::<(f64, f64), _>("less", builtin_less),
        function::<(Value, Rest<Value>), _>("eq", builtin_eq),
        // Hashes and lists
        function::<(Rest<Value>,), _>("hash", builtin_hash),
        function::<(Value, Value), _>("hash-get", builtin_hash_get),
        function::<(Rest<Value>,), _>("hash-merge", builtin_hash_merge),
        function::<(Rest<Value>,), _>("list", builtin_list),
        // Rendering and reflection
        function::<(Value,), _>("tostring", builtin_tostring),
        function::<(Frame, Rest<Value>), _>("debuglog", builtin_debuglog),
        function::<(Value,), _>("reflect-type", builtin_reflect_type),
    ]
}

/// Bind the core operations and constants in `root`
pub(crate) fn install(root: &Frame) {
    for op in builtin_ops() {
        let id = op.id;
        root.bind_local(id, Value::Executable(op.into_executable()));
    }
    root.bind_local(TRUE_LABEL, Value::bool(true));
    root.bind_local(FALSE_LABEL, Value::bool(false));
    root.bind_local("nil", Value::Nil);
}

/// Register the bundled `builtins` program as a module
pub(crate) fn register_builtins_module(evaluator: &mut Evaluator) {
    evaluator.register_bundled_module(BUILTINS_MODULE, "builtins.lisp", BUILTINS_SOURCE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::test_support::*;
    use crate::parser::parse;

    fn quoted(text: &str) -> Value {
        match parse("q.lisp", text) {
            Ok(program) => Value::Node(program.nodes[0].clone()),
            Err(err) => panic!("bad quoted source: {err}"),
        }
    }

    #[test]
    fn test_builtin_ops_registry() {
        let ops = builtin_ops();
        let find = |id: &str| ops.iter().find(|op| op.id == id);

        for id in ["def", "if", "lambda", "defun", "seq", "pure", "import", "quote"] {
            assert!(find(id).is_some_and(BuiltinOp::is_special_form), "{id}");
        }
        for id in ["+", "-", "*", "/", "less", "eq", "hash", "hash-get", "hash-merge"] {
            assert!(find(id).is_some_and(|op| !op.is_special_form()), "{id}");
        }
        for id in ["list", "tostring", "debuglog", "reflect-type"] {
            assert!(find(id).is_some_and(|op| !op.is_special_form()), "{id}");
        }
        assert!(find("unknown").is_none());

        let mut ids: Vec<&str> = ops.iter().map(|op| op.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ops.len(), "duplicate builtin ids");
    }

    #[test]
    fn test_install_binds_constants_and_names() {
        let root = Frame::root();
        install(&root);
        assert_eq!(root.resolve("true"), Some(Value::bool(true)));
        assert_eq!(root.resolve("false"), Some(Value::bool(false)));
        assert_eq!(root.resolve("nil"), Some(Value::Nil));
        match root.resolve("seq") {
            Some(Value::Executable(executable)) => assert_eq!(executable.name(), "seq"),
            other => panic!("expected seq to be executable, got {other:?}"),
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        let test_cases = vec![
            // === ARITHMETIC ===
            ("(+ 1 2 3)", success(6.0)),
            ("(+ 5)", success(5.0)),
            ("(+ 0.5 0.25)", success(0.75)),
            ("(- 10 1 2)", success(7.0)),
            ("(- 4)", success(4.0)),
            ("(* 2 3 4)", success(24.0)),
            ("(* 7)", success(7.0)),
            ("(/ 12 2 3)", success(2.0)),
            ("(/ 1 0)", success(f64::INFINITY)),
            ("(/ -1 0)", success(f64::NEG_INFINITY)),
            ("(+ (* 2 3) (- 10 4))", success(12.0)),
            ("(+)", Reports("+ expects at least 1 arguments but got 0")),
            ("(/)", Reports("/ expects at least 1 arguments but got 0")),
            ("(+ 1 :a)", Reports("could not coerce :a to number")),
            ("(* \"2\" 3)", Reports("could not coerce 2 to number")),
            ("(- nil)", Reports("could not coerce nil to number")),
            // === COMPARISON ===
            ("(less 1 2)", success(true)),
            ("(less 2 1)", success(false)),
            ("(less 1 1)", success(false)),
            ("(less -3 -2.5)", success(true)),
            ("(less 1)", Reports("less expects exactly 2 arguments but got 1")),
            ("(less :a 1)", Reports("could not coerce :a to number")),
            ("(eq 1 1 1)", success(true)),
            ("(eq 1 1 2)", success(false)),
            ("(eq 1)", success(true)),
            ("(eq :a :a)", success(true)),
            ("(eq :a \"a\")", success(false)),
            ("(eq nil nil)", success(true)),
            ("(eq (list 1 :b) (list 1 :b))", success(true)),
            ("(eq (list 1) (list 1 2))", success(false)),
            ("(eq (quote (a \"b\")) (quote (a   \"b\")))", success(true)),
            ("(eq (hash :a 1) (hash \"a\" 1))", success(true)),
            ("(eq)", Reports("eq expects at least 1 arguments but got 0")),
            // === HASHES ===
            ("(hash-get (hash :a 1 \"b\" 2) :b)", success(2.0)),
            ("(hash-get (hash :a 1 :a 2) \"a\")", success(2.0)),
            ("(hash-get (hash) :missing)", EvalResult(Value::Nil)),
            ("(tostring (hash :b 2 :a 1))", success("{a=1, b=2}")),
            ("(tostring (hash))", success("{}")),
            ("(hash :a)", Reports("hash expects an even number of arguments but got 1")),
            ("(hash 1 2)", Reports("hash keys must be atoms or strings, got 1")),
            ("(hash-get 5 :a)", Reports("hash-get expects a hash, got 5")),
            ("(hash-get (hash) 5)", Reports("hash keys must be atoms or strings, got 5")),
            ("(hash-get (hash))", Reports("hash-get expects exactly 2 arguments but got 1")),
            ("(tostring (hash-merge (hash :a 1 :b 1) (hash :b 2)))", success("{a=1, b=2}")),
            ("(tostring (hash-merge))", success("{}")),
            ("(hash-merge (hash) 1)", Reports("hash-merge expects hashes, got 1")),
            // === LISTS ===
            ("(list)", success(Vec::new())),
            ("(list 1 :a)", success(vec![Value::Number(1.0), Value::atom("a")])),
            ("(tostring (list 1 :a \"s\" nil (list)))", success("[1, :a, s, nil, []]")),
            // === RENDERING ===
            ("(tostring 3)", success("3")),
            ("(tostring 2.5)", success("2.5")),
            ("(tostring -0.125)", success("-0.125")),
            ("(tostring :x)", success(":x")),
            ("(tostring \"raw\")", success("raw")),
            ("(tostring nil)", success("nil")),
            ("(tostring true)", success(":true")),
            ("(tostring (quote (a :b \"c\\n\" 1.5)))", success("(a :b \"c\\n\" 1.5)")),
            ("(tostring +)", success("<native +>")),
            ("(tostring)", Reports("tostring expects exactly 1 arguments but got 0")),
            ("(debuglog :a 1 \"two\" (list 3))", Prints(":a 1 two [3]\n")),
            ("(debuglog)", Prints("\n")),
            ("(debuglog undefined-name)", Prints("Error: could not resolve variable undefined-name at test.lisp:1:11 until 1:25\nnil\n")),
            // === REFLECTION ===
            ("(reflect-type nil)", success(Value::atom("nil"))),
            ("(reflect-type :a)", success(Value::atom("atom"))),
            ("(reflect-type \"s\")", success(Value::atom("string"))),
            ("(reflect-type 1)", success(Value::atom("number"))),
            ("(reflect-type (quote x))", success(Value::atom("node"))),
            ("(reflect-type (list))", success(Value::atom("list"))),
            ("(reflect-type (hash))", success(Value::atom("hash"))),
            ("(reflect-type seq)", success(Value::atom("executable"))),
            ("(reflect-type (lambda () (identity 1)))", success(Value::atom("executable"))),
            ("(quote (f x))", success(quoted("(f x)"))),
            // === CONSTANTS ===
            ("(identity true)", success(true)),
            ("(identity false)", success(false)),
            ("(identity nil)", EvalResult(Value::Nil)),
            // === BUILTINS PROGRAM ===
            ("(not true)", success(false)),
            ("(not false)", success(true)),
            ("(not 1)", Reports("if condition must be :true or :false, got 1")),
            ("(and true true)", success(true)),
            ("(and true false)", success(false)),
            ("(and false true)", success(false)),
            ("(and false 1)", Reports("if condition must be :true or :false, got 1")),
            ("(or false false)", success(false)),
            ("(or false true)", success(true)),
            ("(or true false)", success(true)),
            ("(greater 2 1)", success(true)),
            ("(greater 1 1)", success(false)),
            ("(less-eq 1 1)", success(true)),
            ("(less-eq 2 1)", success(false)),
            ("(greater-eq 1 1)", success(true)),
            ("(greater-eq 1 2)", success(false)),
            ("(neq 1 2)", success(true)),
            ("(neq :a :a)", success(false)),
            ("(identity :x)", success(Value::atom("x"))),
            ("(not)", Reports("not expects exactly 1 arguments but got 0")),
            ("(tostring not)", success("<function not [value] (if value false true)>")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_builtins_are_shared_not_redefined() {
        let test_environments = vec![TestEnvironment(vec![
            // entry frames are children of the root, so shadowing is allowed
            test_setup!("(defun not (v) (identity :shadowed))"),
            ("(not true)", success(Value::atom("shadowed"))),
            ("(neq 1 2)", success(true)),
            ("(def + 1)", Setup),
            ("(identity +)", success(1.0)),
        ])];
        run_tests_in_environment(test_environments);
    }

    #[test]
    fn test_builtins_module_registered_and_realized() {
        let evaluator = standard_evaluator();
        assert!(evaluator.is_module_realized(BUILTINS_MODULE));
        for name in ["not", "and", "or", "greater", "less-eq", "greater-eq", "neq", "identity"] {
            assert!(evaluator.root().is_bound_locally(name), "{name}");
        }
    }

    #[test]
    fn test_core_only_evaluator_has_no_prelude() {
        let evaluator = Evaluator::new(quiet_config());
        install(evaluator.root());
        assert!(evaluator.root().resolve("seq").is_some());
        assert!(evaluator.root().resolve("not").is_none());
        assert!(evaluator.module_names().is_empty());
    }

    #[test]
    fn test_position_of_native_failure_covers_whole_form() {
        let mut evaluator = standard_evaluator();
        let frame = evaluator.gen_bindings();
        let (_, output) = run_capturing(&mut evaluator, &frame, "(list 1)\n  (less 1 :x)");
        assert_eq!(
            output,
            "Error: could not coerce :x to number at test.lisp:2:3 until 2:14\n"
        );
    }
}
