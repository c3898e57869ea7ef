//! Runtime values.
//!
//! [`Value`] is a closed set of kinds. Booleans are not a separate kind:
//! they are the atoms `:true` and `:false`. Compound values (lists and
//! hashes) are immutable snapshots shared by reference counting, so
//! cloning a value never copies its contents.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{Node, format_number};
use crate::environment::Frame;
use crate::evaluator::Evaluator;
use crate::{Error, FALSE_LABEL, TRUE_LABEL};

/// Calling convention of a raw native: receives the evaluator, the caller's
/// frame, the calling form and the unevaluated argument nodes.
pub type RawFn = dyn Fn(&mut Evaluator, &Frame, &Node, &[Node]) -> Value;

/// Calling convention of an evaluating native: receives argument values
/// already resolved left to right in the caller's frame.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error>;

#[derive(Clone)]
pub enum Value {
    Nil,
    Atom(Rc<str>),
    String(Rc<str>),
    Number(f64),
    /// A quoted syntax node
    Node(Node),
    List(Rc<[Value]>),
    Hash(Rc<BTreeMap<String, Value>>),
    Foreign(ForeignObject),
    Executable(Executable),
}

impl Value {
    pub fn atom(label: &str) -> Value {
        Value::Atom(label.into())
    }

    pub fn bool(b: bool) -> Value {
        Value::atom(if b { TRUE_LABEL } else { FALSE_LABEL })
    }

    /// Interpret as a boolean. Only the atoms `true` and `false` qualify.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Atom(label) if &**label == TRUE_LABEL => Some(true),
            Value::Atom(label) if &**label == FALSE_LABEL => Some(false),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Name of this value's kind, as reported by `reflect-type`
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Atom(_) => "atom",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Node(_) => "node",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Foreign(_) => "foreign",
            Value::Executable(_) => "executable",
        }
    }

    /// Key coercion used by hashes: strings and atom labels are keys
    pub(crate) fn as_key(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Atom(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Atom(a), Value::Atom(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Foreign(a), Value::Foreign(b)) => a == b,
            (Value::Executable(a), Value::Executable(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Atom(label) => write!(f, ":{label}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Node(node) => write!(f, "{node}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Hash(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                write!(f, "}}")
            }
            Value::Foreign(object) => write!(f, "<foreign {}>", object.type_name()),
            Value::Executable(executable) => write!(f, "{executable}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Node(node) => write!(f, "Node({node:?})"),
            other => write!(f, "{other}"),
        }
    }
}

// From implementations for host-side construction
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items.into())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Hash(Rc::new(entries))
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Nil
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Node(node)
    }
}

impl From<Executable> for Value {
    fn from(executable: Executable) -> Self {
        Value::Executable(executable)
    }
}

impl From<ForeignObject> for Value {
    fn from(object: ForeignObject) -> Self {
        Value::Foreign(object)
    }
}

/// An opaque host value. The runtime passes it around but never looks
/// inside; only the host can downcast it back.
#[derive(Clone)]
pub struct ForeignObject {
    type_name: &'static str,
    inner: Rc<dyn Any>,
}

impl ForeignObject {
    pub fn new<T: Any>(value: T) -> Self {
        ForeignObject {
            type_name: std::any::type_name::<T>(),
            inner: Rc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for ForeignObject {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ForeignObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObject")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A user-defined function: parameters, body and the frame it was created in
pub struct Closure {
    pub frame: Frame,
    pub params: Vec<Rc<str>>,
    pub body: Node,
    pub name: Option<Rc<str>>,
}

impl Closure {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

// Debug must not walk the captured frame: closures stored in the frame they
// capture would recurse forever.
impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.display_name())
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Anything that can sit in call position
#[derive(Clone)]
pub enum Executable {
    /// Receives unevaluated argument nodes; special forms are raw natives
    NativeRaw { name: Rc<str>, func: Rc<RawFn> },
    /// Receives evaluated argument values
    NativeEval { name: Rc<str>, func: Rc<OperationFn> },
    Interpreted(Rc<Closure>),
}

impl Executable {
    pub fn raw(
        name: &str,
        func: impl Fn(&mut Evaluator, &Frame, &Node, &[Node]) -> Value + 'static,
    ) -> Self {
        Executable::NativeRaw {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn eval(name: &str, func: impl Fn(Vec<Value>) -> Result<Value, Error> + 'static) -> Self {
        Executable::NativeEval {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Executable::NativeRaw { name, .. } | Executable::NativeEval { name, .. } => name,
            Executable::Interpreted(closure) => closure.display_name(),
        }
    }
}

impl PartialEq for Executable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Executable::NativeRaw { func: a, .. }, Executable::NativeRaw { func: b, .. }) => {
                Rc::ptr_eq(a, b)
            }
            (Executable::NativeEval { func: a, .. }, Executable::NativeEval { func: b, .. }) => {
                Rc::ptr_eq(a, b)
            }
            (Executable::Interpreted(a), Executable::Interpreted(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executable::NativeRaw { name, .. } | Executable::NativeEval { name, .. } => {
                write!(f, "<native {name}>")
            }
            Executable::Interpreted(closure) => {
                write!(
                    f,
                    "<function {} [{}] {}>",
                    closure.display_name(),
                    closure.params.join(", "),
                    closure.body
                )
            }
        }
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executable::Interpreted(closure) => write!(f, "{closure:?}"),
            other => write!(f, "{other}"),
        }
    }
}
