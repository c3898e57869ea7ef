//! nealisp - an embeddable s-expression scripting runtime
//!
//! This crate evaluates parsed programs directly against a tree of lexical
//! frames. There is no compile step: a program is parsed once into an
//! immutable AST and then walked by the [`evaluator::Evaluator`].
//!
//! ```text
//! (defun square (x) (* x x))
//! (def make-adder (lambda (n) (lambda (m) (+ n m))))
//! (debuglog (square 4) ((make-adder 5) 3))
//! (import :builtins)
//! ```
//!
//! ## Language at a glance
//!
//! - `:label` is an atom, `name` is a reference, `(f a b)` is an invocation
//! - booleans are the two atoms `true` and `false`; there is no truthiness
//! - numbers are always double-precision floats
//! - only parenthesized forms are executable; every other node in call
//!   position is an error
//! - a trailing `...` formal makes a closure variadic
//!
//! ## Recoverable errors
//!
//! Language-level failures never unwind. Each failure site emits a
//! diagnostic of the shape
//! `Error: <message> at <file>:<line>:<col> until <line>:<col>` and the
//! failing sub-expression evaluates to `nil`, so the rest of the program
//! keeps running. Only [`ParseError`] (before evaluation) and a few
//! host-facing registration operations return `Result`.
//!
//! ## Modules
//!
//! - `ast`: source positions and the immutable syntax tree
//! - `parser`: text to [`ast::Program`]
//! - `value`: runtime values and executables
//! - `environment`: lexical frames, typed frame metadata, output channel
//! - `evaluator`: eval/apply, special forms and the typed native bridge
//! - `module`: lazy module registry
//! - `builtinops`: the core builtin library
//! - `testing`: the test-definition dialect runtime
//! - `host`: binding host (JSON-shaped) data into frames

use thiserror::Error;

use crate::evaluator::Arity;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default nesting limit for form evaluation, see [`evaluator::Config`]
pub const DEFAULT_MAX_EVAL_DEPTH: usize = 256;

/// Label of the atom used as boolean true
pub const TRUE_LABEL: &str = "true";

/// Label of the atom used as boolean false
pub const FALSE_LABEL: &str = "false";

/// Formal parameter name that marks a closure as variadic (last position only)
pub const REST_MARKER: &str = "...";

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed escapes, stray parens)
    InvalidSyntax,
    /// Input ended before a form was complete (unterminated string, unclosed parens)
    Incomplete,
    /// Form nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
}

/// A structured parse failure. Parsing is all-or-nothing: a program with a
/// parse failure never reaches the evaluator.
#[derive(Debug, PartialEq, Clone, Error)]
#[error("{message} at {offset} in `{source_name}`")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset into the source text where the failure was detected
    pub offset: usize,
    pub source_name: String,
    /// Context snippet from the input around the failure (max 100 chars)
    pub context: Option<String>,
}

impl ParseError {
    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        source_name: &str,
        input: &str,
        offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        ParseError {
            kind,
            message: message.into(),
            offset,
            source_name: source_name.to_owned(),
            context: Some(display_context),
        }
    }
}

/// Language-level error kinds.
///
/// Inside the evaluator these are never propagated with `?` across a form
/// boundary: they are rendered with [`std::fmt::Display`] into a diagnostic at the
/// failing node and the form yields `nil`. Host-facing registration calls
/// return them directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{callee} expects {expected} arguments but got {got}")]
    Arity {
        callee: String,
        expected: Arity,
        got: usize,
    },
    #[error("{0}")]
    Type(String),
    #[error("could not resolve variable {0}")]
    UnboundName(String),
    #[error("cannot redefine {0} in local context")]
    Redefinition(String),
    #[error("unresolved module {0}")]
    UnresolvedModule(String),
    #[error("import cycle detected while realizing module {0}")]
    ImportCycle(String),
    #[error("module {0} is already registered")]
    ModuleAlreadyRegistered(String),
    #[error("{name} failed: {message}")]
    NativeBridge { name: String, message: String },
    #[error("{0}")]
    Eval(String),
}

impl Error {
    pub fn arity(callee: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::Arity {
            callee: callee.into(),
            expected,
            got,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }
}

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod module;
pub mod parser;
pub mod testing;
pub mod value;

#[cfg(feature = "json")]
pub mod host;

pub use ast::{Node, NodeKind, Position, Program};
pub use environment::Frame;
pub use evaluator::{Config, Evaluator};
pub use value::{Executable, Value};
