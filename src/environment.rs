//! Lexical frames.
//!
//! A [`Frame`] is a node in the scope tree: a local binding table plus an
//! optional parent. Frames are shared by reference counting. A closure keeps
//! its defining frame alive, and many children may share one parent.
//!
//! Each frame also carries a typed metadata table. Reads walk the parent
//! chain, writes stay local, which lets a runner install state (an active
//! test, an output capture) that everything evaluated underneath can see.
//!
//! A frame created for a call also remembers the frame it was called from.
//! Keys marked [`MetaKey::DYNAMIC`] are looked up through that caller
//! instead of the defining parent, so a closure defined anywhere still
//! prints into the capture of whoever is running it.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::ast::Position;
use crate::value::Value;

/// A typed key into frame metadata. The key type itself is the identity.
pub trait MetaKey: 'static {
    type Value: 'static;

    /// Follow the call chain rather than the lexical chain on lookup
    const DYNAMIC: bool = false;
}

/// Where printed text goes once it has been captured (or not)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sink {
    #[default]
    Stdout,
    Stderr,
    Discard,
}

/// Metadata key for the default output sink, installed on the root frame
pub struct SinkMeta;

impl MetaKey for SinkMeta {
    type Value = Sink;
}

/// Accumulates everything printed beneath the frame that installed it
#[derive(Debug, Default)]
pub struct CapturedOutput {
    text: RefCell<String>,
}

impl CapturedOutput {
    pub fn contents(&self) -> String {
        self.text.borrow().clone()
    }

    fn append(&self, text: &str) {
        self.text.borrow_mut().push_str(text);
    }
}

pub struct OutputCaptureMeta;

impl MetaKey for OutputCaptureMeta {
    type Value = CapturedOutput;
    const DYNAMIC: bool = true;
}

struct FrameData {
    parent: Option<Frame>,
    /// Set on call frames. Weak, so closures created during a call do not
    /// keep their caller alive.
    caller: Option<Weak<FrameData>>,
    bindings: RefCell<HashMap<Rc<str>, Value>>,
    meta: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

#[derive(Clone)]
pub struct Frame(Rc<FrameData>);

impl Frame {
    /// A frame without a parent
    pub fn root() -> Self {
        Frame::with_parent(None, None)
    }

    fn with_parent(parent: Option<Frame>, caller: Option<&Frame>) -> Self {
        Frame(Rc::new(FrameData {
            parent,
            caller: caller.map(|caller| Rc::downgrade(&caller.0)),
            bindings: RefCell::new(HashMap::new()),
            meta: RefCell::new(HashMap::new()),
        }))
    }

    pub fn parent(&self) -> Option<&Frame> {
        self.0.parent.as_ref()
    }

    /// A new child frame whose only parent is this frame
    pub fn fork(&self) -> Frame {
        Frame::with_parent(Some(self.clone()), None)
    }

    /// A child of this frame evaluated on behalf of `caller`: names resolve
    /// through this frame, dynamic metadata through `caller`
    pub fn fork_call(&self, caller: &Frame) -> Frame {
        Frame::with_parent(Some(self.clone()), Some(caller))
    }

    /// Look a name up through the parent chain. The nearest binding wins.
    pub fn resolve(&self, label: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(frame) = current {
            if let Some(value) = frame.0.bindings.borrow().get(label) {
                return Some(value.clone());
            }
            current = frame.parent();
        }
        None
    }

    /// Insert or overwrite a binding in this frame only
    pub fn bind_local(&self, label: impl Into<Rc<str>>, value: Value) -> Value {
        self.0
            .bindings
            .borrow_mut()
            .insert(label.into(), value.clone());
        value
    }

    pub fn is_bound_locally(&self, label: &str) -> bool {
        self.0.bindings.borrow().contains_key(label)
    }

    /// Names bound in this frame, sorted
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .0
            .bindings
            .borrow()
            .keys()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        names
    }

    pub fn get_meta<K: MetaKey>(&self) -> Option<Rc<K::Value>> {
        let key = TypeId::of::<K>();
        let mut current = Some(self.clone());
        while let Some(frame) = current {
            let entry = frame.0.meta.borrow().get(&key).cloned();
            if let Some(entry) = entry {
                return entry.downcast::<K::Value>().ok();
            }
            current = match &frame.0.caller {
                Some(caller) if K::DYNAMIC => caller.upgrade().map(Frame),
                _ => frame.0.parent.clone(),
            };
        }
        None
    }

    pub fn set_meta<K: MetaKey>(&self, value: Rc<K::Value>) {
        self.0.meta.borrow_mut().insert(TypeId::of::<K>(), value);
    }

    /// Install a fresh capture buffer on this frame
    pub fn capture_output(&self) -> Rc<CapturedOutput> {
        let capture = Rc::new(CapturedOutput::default());
        self.set_meta::<OutputCaptureMeta>(Rc::clone(&capture));
        capture
    }

    /// Emit text: into the nearest capture buffer, then to the default sink
    pub fn print(&self, text: &str) {
        if let Some(capture) = self.get_meta::<OutputCaptureMeta>() {
            capture.append(text);
        }
        let sink = self.get_meta::<SinkMeta>().map_or(Sink::Stdout, |sink| *sink);
        match sink {
            Sink::Stdout => print!("{text}"),
            Sink::Stderr => eprint!("{text}"),
            Sink::Discard => {}
        }
    }

    /// Emit a diagnostic for `position` and yield `nil`
    pub fn report(&self, message: impl fmt::Display, position: &Position) -> Value {
        tracing::debug!(%position, "{message}");
        self.print(&format!("Error: {message} {position}\n"));
        Value::Nil
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("locals", &self.local_names())
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Position, SourceFile};

    struct Counter;

    impl MetaKey for Counter {
        type Value = std::cell::Cell<u32>;
    }

    struct Running;

    impl MetaKey for Running {
        type Value = &'static str;
        const DYNAMIC: bool = true;
    }

    #[test]
    fn test_resolution_and_shadowing() {
        let root = Frame::root();
        root.bind_local("x", Value::Number(1.0));
        root.bind_local("y", Value::Number(2.0));

        let child = root.fork();
        child.bind_local("x", Value::Number(10.0));

        assert_eq!(child.resolve("x"), Some(Value::Number(10.0)));
        assert_eq!(child.resolve("y"), Some(Value::Number(2.0)));
        assert_eq!(root.resolve("x"), Some(Value::Number(1.0)));
        assert_eq!(child.resolve("z"), None);

        assert!(child.is_bound_locally("x"));
        assert!(!child.is_bound_locally("y"));

        // last write per frame wins
        child.bind_local("x", Value::Number(11.0));
        assert_eq!(child.resolve("x"), Some(Value::Number(11.0)));
        assert_eq!(child.local_names(), vec!["x".to_owned()]);
    }

    #[test]
    fn test_siblings_share_parent() {
        let root = Frame::root();
        let a = root.fork();
        let b = root.fork();
        a.bind_local("only-a", Value::Nil);
        root.bind_local("shared", Value::atom("s"));

        assert_eq!(b.resolve("only-a"), None);
        assert_eq!(a.resolve("shared"), Some(Value::atom("s")));
        assert_eq!(b.resolve("shared"), Some(Value::atom("s")));
    }

    #[test]
    fn test_meta_reads_through_writes_local() {
        let root = Frame::root();
        let child = root.fork();
        let grandchild = child.fork();

        assert!(grandchild.get_meta::<Counter>().is_none());

        root.set_meta::<Counter>(Rc::new(std::cell::Cell::new(1)));
        assert_eq!(grandchild.get_meta::<Counter>().map(|c| c.get()), Some(1));

        child.set_meta::<Counter>(Rc::new(std::cell::Cell::new(2)));
        assert_eq!(grandchild.get_meta::<Counter>().map(|c| c.get()), Some(2));
        assert_eq!(root.get_meta::<Counter>().map(|c| c.get()), Some(1));
    }

    #[test]
    fn test_dynamic_meta_follows_the_caller() {
        let root = Frame::root();
        root.set_meta::<Counter>(Rc::new(std::cell::Cell::new(1)));
        let defining = root.fork();
        defining.set_meta::<Running>(Rc::new("defining"));

        let caller = root.fork();
        caller.set_meta::<Running>(Rc::new("caller"));
        caller.set_meta::<Counter>(Rc::new(std::cell::Cell::new(2)));

        let call = defining.fork_call(&caller);
        let inner = call.fork();
        assert_eq!(inner.get_meta::<Running>().as_deref(), Some(&"caller"));
        // lexical keys still come from the defining side
        assert_eq!(inner.get_meta::<Counter>().map(|c| c.get()), Some(1));

        let bare = defining.fork_call(&root);
        assert!(bare.get_meta::<Running>().is_none());
    }

    #[test]
    fn test_call_frame_prints_into_caller_capture() {
        let root = Frame::root();
        root.set_meta::<SinkMeta>(Rc::new(Sink::Discard));
        let defining = root.fork();
        let caller = root.fork();
        let capture = caller.capture_output();

        defining.fork_call(&caller).print("from a call");
        defining.fork().print("lexical only");

        assert_eq!(capture.contents(), "from a call");
    }

    #[test]
    fn test_print_captures_through_children() {
        let root = Frame::root();
        root.set_meta::<SinkMeta>(Rc::new(Sink::Discard));
        let outer = root.fork();
        let capture = outer.capture_output();

        outer.fork().fork().print("hello ");
        outer.print("world");
        root.print("not captured");

        assert_eq!(capture.contents(), "hello world");
    }

    #[test]
    fn test_report_format() {
        let root = Frame::root();
        root.set_meta::<SinkMeta>(Rc::new(Sink::Discard));
        let capture = root.capture_output();

        let file = SourceFile::new("main.lisp", "(f)\n(g x)");
        let result = root.report("something broke", &Position::new(file, 4, 9));

        assert!(result.is_nil());
        assert_eq!(
            capture.contents(),
            "Error: something broke at main.lisp:2:1 until 2:6\n"
        );
    }
}
