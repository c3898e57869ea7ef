//! This module defines the immutable syntax tree produced by the parser and
//! walked by the evaluator. Every node carries a [`Position`] that points back
//! into its [`SourceFile`] so diagnostics can name the exact span. Nodes are
//! cheap to clone (children and labels are reference counted) and are never
//! mutated after parsing. Equality between nodes is structural and ignores
//! positions, which is what the parse/render round trip relies on.
//! Small constructor helpers such as [`reference`] and [`paren`] make it
//! convenient to build trees by hand in tests.

use std::fmt;
use std::rc::Rc;

/// Allowed non-alphanumeric characters in identifiers.
/// `.` is included so that namespaced names (`ntest.fail`) and the rest
/// marker `...` are plain identifiers.
pub(crate) const IDENTIFIER_SPECIAL_CHARS: &str = "+-*/<>=!?_$.%&^~";

/// Check if a string is a valid identifier (reference or atom label)
/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + IDENTIFIER_SPECIAL_CHARS
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || IDENTIFIER_SPECIAL_CHARS.contains(c))
        }
    }
}

/// A named unit of source text. Positions share it by reference.
#[derive(Debug)]
pub struct SourceFile {
    name: String,
    text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Rc<Self> {
        Rc::new(SourceFile {
            name: name.into(),
            text: text.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A byte span inside a [`SourceFile`]. Lines and columns are 1-based and
/// computed on demand; columns count characters, not bytes.
#[derive(Clone)]
pub struct Position {
    file: Rc<SourceFile>,
    start: usize,
    end: usize,
}

impl Position {
    pub fn new(file: Rc<SourceFile>, start: usize, end: usize) -> Self {
        Position { file, start, end }
    }

    /// A zero-width position in an empty file, for nodes and natives that
    /// do not originate from source text.
    pub fn synthetic(name: &str) -> Self {
        Position::new(SourceFile::new(name, ""), 0, 0)
    }

    pub fn file_name(&self) -> &str {
        self.file.name()
    }

    pub fn file(&self) -> &Rc<SourceFile> {
        &self.file
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn start_line(&self) -> usize {
        line_at(self.file.text(), self.start)
    }

    pub fn start_column(&self) -> usize {
        column_at(self.file.text(), self.start)
    }

    pub fn end_line(&self) -> usize {
        line_at(self.file.text(), self.end)
    }

    pub fn end_column(&self) -> usize {
        column_at(self.file.text(), self.end)
    }
}

fn prefix(text: &str, offset: usize) -> &str {
    let mut end = offset.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn line_at(text: &str, offset: usize) -> usize {
    prefix(text, offset).matches('\n').count() + 1
}

/// One-based, counted in characters
fn column_at(text: &str, offset: usize) -> usize {
    let before = prefix(text, offset);
    let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
    before[line_start..].chars().count() + 1
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}:{}:{} until {}:{}",
            self.file_name(),
            self.start_line(),
            self.start_column(),
            self.end_line(),
            self.end_column()
        )
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}..{}", self.file_name(), self.start, self.end)
    }
}

/// The shape of a syntax node
#[derive(Clone)]
pub enum NodeKind {
    /// `:label`
    Atom(Rc<str>),
    /// A bare identifier, resolved against the frame chain
    Reference(Rc<str>),
    /// `( ... )`, the only executable shape
    Parenthesis(Rc<[Node]>),
    /// String literal, already unescaped
    StringLiteral(Rc<str>),
    NumberLiteral(f64),
}

#[derive(Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub position: Position,
}

impl Node {
    pub fn new(kind: NodeKind, position: Position) -> Self {
        Node { kind, position }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Atom(_) => "atom",
            NodeKind::Reference(_) => "reference",
            NodeKind::Parenthesis(_) => "parenthesis",
            NodeKind::StringLiteral(_) => "string literal",
            NodeKind::NumberLiteral(_) => "number literal",
        }
    }

    /// The label of a bare reference, if this node is one
    pub fn as_reference(&self) -> Option<&Rc<str>> {
        match &self.kind {
            NodeKind::Reference(label) => Some(label),
            _ => None,
        }
    }

    /// The children of a parenthesized form, if this node is one
    pub fn as_parenthesis(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::Parenthesis(items) => Some(items),
            _ => None,
        }
    }

    /// Render back to parseable source text
    pub fn to_source(&self) -> String {
        self.to_string()
    }
}

/// Render a number the way it is written in source: integral values
/// without a fractional part, everything else in shortest round-trip form.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

pub(crate) fn write_escaped_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Atom(label) => write!(f, ":{label}"),
            NodeKind::Reference(label) => write!(f, "{label}"),
            NodeKind::Parenthesis(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            NodeKind::StringLiteral(s) => write_escaped_string(f, s),
            NodeKind::NumberLiteral(n) => write!(f, "{}", format_number(*n)),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Atom(label) => write!(f, "Atom({label})"),
            NodeKind::Reference(label) => write!(f, "Reference({label})"),
            NodeKind::Parenthesis(items) => {
                write!(f, "Parenthesis(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                write!(f, ")")
            }
            NodeKind::StringLiteral(s) => write!(f, "StringLiteral({s:?})"),
            NodeKind::NumberLiteral(n) => write!(f, "NumberLiteral({n})"),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (NodeKind::Atom(a), NodeKind::Atom(b)) => a == b,
            (NodeKind::Reference(a), NodeKind::Reference(b)) => a == b,
            (NodeKind::Parenthesis(a), NodeKind::Parenthesis(b)) => a == b,
            (NodeKind::StringLiteral(a), NodeKind::StringLiteral(b)) => a == b,
            (NodeKind::NumberLiteral(a), NodeKind::NumberLiteral(b)) => a == b,
            _ => false,
        }
    }
}

/// A parsed source unit: the ordered top-level nodes of one file
#[derive(Clone, Debug)]
pub struct Program {
    pub position: Position,
    pub nodes: Vec<Node>,
}

impl Program {
    pub fn source_name(&self) -> &str {
        self.position.file_name()
    }

    pub fn to_source(&self) -> String {
        self.nodes
            .iter()
            .map(Node::to_source)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

// Hand-construction helpers. Positions are synthetic.

#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn atom(label: &str) -> Node {
    Node::new(NodeKind::Atom(label.into()), Position::synthetic("<ast>"))
}

#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn reference(label: &str) -> Node {
    Node::new(NodeKind::Reference(label.into()), Position::synthetic("<ast>"))
}

#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn string(s: &str) -> Node {
    Node::new(NodeKind::StringLiteral(s.into()), Position::synthetic("<ast>"))
}

#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn number(n: f64) -> Node {
    Node::new(NodeKind::NumberLiteral(n), Position::synthetic("<ast>"))
}

#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn paren(items: Vec<Node>) -> Node {
    Node::new(
        NodeKind::Parenthesis(items.into()),
        Position::synthetic("<ast>"),
    )
}
