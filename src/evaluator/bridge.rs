//! Typed adapters that turn Rust functions into native executables.
//!
//! Every parameter type implements [`FromArg`], which says how the slot is
//! filled from a call: by evaluating the next argument, by taking the next
//! raw node, by collecting everything that is left, or by injecting call
//! context that consumes no argument at all.
//!
//! A signature without raw slots is eager: every argument is resolved left
//! to right in the caller's frame before the count is checked, exactly like
//! a function over evaluated values. A signature with a raw slot checks the
//! count first and fills its slots in order. In both cases all slots are
//! filled before the first coercion failure is reported.
//!
//! ```rust,ignore
//! fn scale(factor: f64, values: Rest<f64>) -> Vec<Value> {
//!     values.iter().map(|v| Value::Number(v * factor)).collect()
//! }
//! evaluator.register_native::<_, (f64, Rest<f64>)>("scale", scale);
//! ```
//!
//! Return types normalize through [`IntoValueResult`]. A returned
//! `Err(Error::Eval(message))` is reported as `<name> failed: <message>`;
//! other error kinds are already language errors and are reported as is.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::slice;
use std::vec;

use crate::Error;
use crate::ast::{Node, Position};
use crate::environment::Frame;
use crate::evaluator::{Arity, Evaluator};
use crate::value::{Executable, Value};

/// The argument side of one native call
pub struct CallArgs<'a> {
    evaluator: &'a mut Evaluator,
    frame: &'a Frame,
    callsite: &'a Node,
    nodes: slice::Iter<'a, Node>,
    /// Arguments resolved up front, for eager signatures
    resolved: Option<vec::IntoIter<Value>>,
}

impl<'a> CallArgs<'a> {
    fn new(
        evaluator: &'a mut Evaluator,
        frame: &'a Frame,
        callsite: &'a Node,
        nodes: &'a [Node],
        eager: bool,
    ) -> Self {
        let resolved = eager.then(|| {
            nodes
                .iter()
                .map(|node| evaluator.resolve_value(frame, node))
                .collect::<Vec<_>>()
                .into_iter()
        });
        CallArgs {
            evaluator,
            frame,
            callsite,
            nodes: nodes.iter(),
            resolved,
        }
    }

    fn next_node(&mut self) -> Result<&'a Node, Error> {
        self.nodes
            .next()
            .ok_or_else(|| Error::Eval("missing argument".to_owned()))
    }

    fn next_value(&mut self) -> Result<Value, Error> {
        if let Some(resolved) = &mut self.resolved {
            return resolved
                .next()
                .ok_or_else(|| Error::Eval("missing argument".to_owned()));
        }
        let node = self.next_node()?;
        Ok(self.evaluator.resolve_value(self.frame, node))
    }

    fn rest_nodes(&mut self) -> Vec<Node> {
        self.nodes.by_ref().cloned().collect()
    }

    fn rest_values(&mut self) -> Vec<Value> {
        if let Some(resolved) = &mut self.resolved {
            return resolved.by_ref().collect();
        }
        let mut values = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.by_ref() {
            values.push(self.evaluator.resolve_value(self.frame, node));
        }
        values
    }
}

/// How a parameter slot consumes call arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumes {
    /// Call context, no argument
    Injected,
    One,
    /// Everything that is left; only meaningful as the last parameter
    Rest,
}

/// A parameter type a native function can declare
pub trait FromArg: Sized {
    const CONSUMES: Consumes;
    /// Takes its argument unevaluated
    const RAW: bool = false;

    fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error>;
}

/// Coercion of one evaluated value, shared by single and rest parameters
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Error>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(Error::type_error(format!(
                "could not coerce {other} to number"
            ))),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Error> {
        value.as_bool().ok_or_else(|| {
            Error::type_error(format!("could not coerce {value} to a boolean"))
        })
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::String(s) | Value::Atom(s) => Ok(s.to_string()),
            other => Err(Error::type_error(format!(
                "could not coerce {other} to string"
            ))),
        }
    }
}

macro_rules! impl_from_arg_for_value_types {
    ($($t:ty),*) => {
        $(
            impl FromArg for $t {
                const CONSUMES: Consumes = Consumes::One;

                fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error> {
                    <$t as FromValue>::from_value(args.next_value()?)
                }
            }
        )*
    };
}

impl_from_arg_for_value_types!(Value, f64, bool, String);

/// The next argument, unevaluated
impl FromArg for Node {
    const CONSUMES: Consumes = Consumes::One;
    const RAW: bool = true;

    fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error> {
        args.next_node().cloned()
    }
}

/// All remaining arguments, evaluated and coerced element by element
#[derive(Debug, Clone, PartialEq)]
pub struct Rest<T>(pub Vec<T>);

impl<T> Deref for Rest<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> IntoIterator for Rest<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: FromValue> FromArg for Rest<T> {
    const CONSUMES: Consumes = Consumes::Rest;

    fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error> {
        args.rest_values()
            .into_iter()
            .map(T::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Rest)
    }
}

/// All remaining arguments as raw nodes
#[derive(Debug, Clone)]
pub struct RawRest(pub Vec<Node>);

impl FromArg for RawRest {
    const CONSUMES: Consumes = Consumes::Rest;
    const RAW: bool = true;

    fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error> {
        Ok(RawRest(args.rest_nodes()))
    }
}

/// The caller's frame
impl FromArg for Frame {
    const CONSUMES: Consumes = Consumes::Injected;

    fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error> {
        Ok(args.frame.clone())
    }
}

/// Reports diagnostics at the call site of the running native
#[derive(Debug, Clone)]
pub struct Reporter {
    frame: Frame,
    position: Position,
}

impl Reporter {
    pub fn report(&self, message: impl fmt::Display) -> Value {
        self.frame.report(message, &self.position)
    }

    pub fn position(&self) -> &Position {
        &self.position
    }
}

impl FromArg for Reporter {
    const CONSUMES: Consumes = Consumes::Injected;

    fn from_arg(args: &mut CallArgs<'_>) -> Result<Self, Error> {
        Ok(Reporter {
            frame: args.frame.clone(),
            position: args.callsite.position.clone(),
        })
    }
}

fn arity_of(slots: &[Consumes]) -> Arity {
    let fixed = slots.iter().filter(|slot| **slot == Consumes::One).count();
    match (slots.contains(&Consumes::Rest), fixed) {
        (true, 0) => Arity::Any,
        (true, n) => Arity::AtLeast(n),
        (false, n) => Arity::Exact(n),
    }
}

/// Normalizes native return types to `Result<Value, Error>`
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

macro_rules! impl_into_value_result {
    ($($t:ty),*) => {
        $(
            impl IntoValueResult for $t {
                fn into_value_result(self) -> Result<Value, Error> {
                    Ok(self.into())
                }
            }

            impl IntoValueResult for Result<$t, Error> {
                fn into_value_result(self) -> Result<Value, Error> {
                    self.map(Into::into)
                }
            }
        )*
    };
}

impl_into_value_result!(Value, f64, bool, String, &'static str, (), Vec<Value>);

fn bridge_failure(name: &str, err: Error) -> Error {
    match err {
        Error::Eval(message) => Error::NativeBridge {
            name: name.to_owned(),
            message,
        },
        other => other,
    }
}

/// Conversion of a Rust function into a raw native executable,
/// parameterized by its argument tuple
pub trait IntoNative<Args> {
    fn into_native(self, name: &str) -> Executable;
}

impl<F, R> IntoNative<()> for F
where
    F: Fn() -> R + 'static,
    R: IntoValueResult,
{
    fn into_native(self, name: &str) -> Executable {
        let label: Rc<str> = name.into();
        Executable::raw(name, move |evaluator, frame, callsite, nodes| {
            for node in nodes {
                evaluator.resolve_value(frame, node);
            }
            let result = Arity::Exact(0)
                .validate(&label, nodes.len())
                .and_then(|()| (self)().into_value_result());
            match result {
                Ok(value) => value,
                Err(err) => frame.report(bridge_failure(&label, err), &callsite.position),
            }
        })
    }
}

macro_rules! impl_into_native_for_arity {
    ($( $p:ident : $A:ident ),+) => {
        impl<F, R, $( $A ),+> IntoNative<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> R + 'static,
            $( $A: FromArg, )+
            R: IntoValueResult,
        {
            fn into_native(self, name: &str) -> Executable {
                let arity = arity_of(&[ $( <$A as FromArg>::CONSUMES ),+ ]);
                let eager = ![ $( <$A as FromArg>::RAW ),+ ].contains(&true);
                let label: Rc<str> = name.into();
                Executable::raw(name, move |evaluator, frame, callsite, nodes| {
                    let mut args = CallArgs::new(evaluator, frame, callsite, nodes, eager);
                    let result = arity.validate(&label, nodes.len()).and_then(|()| {
                        $(
                            let $p = <$A as FromArg>::from_arg(&mut args);
                        )+
                        (self)( $( $p? ),+ ).into_value_result()
                    });
                    match result {
                        Ok(value) => value,
                        Err(err) => frame.report(bridge_failure(&label, err), &callsite.position),
                    }
                })
            }
        }
    };
}

impl_into_native_for_arity!(p0: A1);
impl_into_native_for_arity!(p0: A1, p1: A2);
impl_into_native_for_arity!(p0: A1, p1: A2, p2: A3);
impl_into_native_for_arity!(p0: A1, p1: A2, p2: A3, p3: A4);
impl_into_native_for_arity!(p0: A1, p1: A2, p2: A3, p3: A4, p4: A5);
impl_into_native_for_arity!(p0: A1, p1: A2, p2: A3, p3: A4, p4: A5, p5: A6);

impl Frame {
    /// Bind a typed Rust function in this frame
    pub fn bind_native<F, Args>(&self, name: &str, func: F) -> Value
    where
        F: IntoNative<Args>,
    {
        self.bind_local(name, Value::Executable(func.into_native(name)))
    }

    /// Bind a function over already evaluated arguments in this frame
    pub fn bind_eval(
        &self,
        name: &str,
        func: impl Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    ) -> Value {
        self.bind_local(name, Value::Executable(Executable::eval(name, func)))
    }
}

impl Evaluator {
    /// Bind a typed Rust function in the root frame, visible to every program
    pub fn register_native<F, Args>(&mut self, name: &str, func: F)
    where
        F: IntoNative<Args>,
    {
        self.root.bind_native(name, func);
    }
}
