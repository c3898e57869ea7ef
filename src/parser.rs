//! Source text to [`Program`].
//!
//! The grammar is small: `;` comments and whitespace are trivia, `( ... )`
//! groups nodes, `:label` is an atom, `"..."` is a string literal,
//! `-?digits(.digits)?` is a number and any other identifier token is a
//! reference. Every node records its byte span in the source file.

use std::rc::Rc;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, take_while1},
    character::complete::{char, digit1, multispace1},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::pair,
};

use crate::ast::{IDENTIFIER_SPECIAL_CHARS, Node, NodeKind, Position, Program, SourceFile, is_valid_identifier};
use crate::{MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

type NomError<'a> = nom::error::Error<&'a str>;

/// Parse a complete program. Fails as a whole on the first malformed node.
pub fn parse(source_name: &str, text: &str) -> Result<Program, ParseError> {
    let file = SourceFile::new(source_name, text);
    SourceParser { file }.parse_program()
}

struct SourceParser {
    file: Rc<SourceFile>,
}

/// Skip whitespace and `;` line comments
fn trivia(input: &str) -> IResult<&str, ()> {
    value((), many0_count(alt((multispace1, comment)))).parse(input)
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), opt(is_not("\n")))).parse(input)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || IDENTIFIER_SPECIAL_CHARS.contains(c)
}

/// Tokens must be followed by trivia, a paren, a string quote or the end of input
fn at_delimiter(rest: &str) -> bool {
    rest.chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || "()\";".contains(c))
}

fn soft_error(input: &str, kind: ErrorKind) -> nom::Err<NomError<'_>> {
    nom::Err::Error(NomError::new(input, kind))
}

fn hard_error(input: &str, kind: ErrorKind) -> nom::Err<NomError<'_>> {
    nom::Err::Failure(NomError::new(input, kind))
}

impl SourceParser {
    fn text(&self) -> &str {
        self.file.text()
    }

    fn offset(&self, input: &str) -> usize {
        self.text().len() - input.len()
    }

    fn span(&self, start: usize, end: usize) -> Position {
        Position::new(Rc::clone(&self.file), start, end)
    }

    fn parse_program(&self) -> Result<Program, ParseError> {
        let text = self.text();
        let mut input = text;
        let mut nodes = Vec::new();

        loop {
            let (rest, ()) = trivia(input).map_err(|e| self.convert_error(e))?;
            if rest.is_empty() {
                break;
            }
            if rest.starts_with(')') {
                return Err(self.error_at(
                    ParseErrorKind::InvalidSyntax,
                    "unexpected closing parenthesis",
                    self.offset(rest),
                ));
            }
            let (after, node) = self.node(rest, 0).map_err(|e| self.convert_error(e))?;
            nodes.push(node);
            input = after;
        }

        Ok(Program {
            position: self.span(0, text.len()),
            nodes,
        })
    }

    fn node<'a>(&self, input: &'a str, depth: usize) -> IResult<&'a str, Node> {
        if depth >= MAX_PARSE_DEPTH {
            return Err(hard_error(input, ErrorKind::TooLarge));
        }
        alt((
            |i| self.parenthesis(i, depth),
            |i| self.string_literal(i),
            |i| self.number_literal(i),
            |i| self.atom(i),
            |i| self.reference(i),
        ))
        .parse(input)
    }

    fn parenthesis<'a>(&self, input: &'a str, depth: usize) -> IResult<&'a str, Node> {
        let start = self.offset(input);
        let (mut rest, _) = char('(').parse(input)?;
        let mut items = Vec::new();

        loop {
            let (after_trivia, ()) = trivia(rest)?;
            if let Ok((after, _)) = char::<&str, NomError<'_>>(')').parse(after_trivia) {
                let end = self.offset(after);
                return Ok((
                    after,
                    Node::new(NodeKind::Parenthesis(items.into()), self.span(start, end)),
                ));
            }
            if after_trivia.is_empty() {
                // Report the unclosed paren itself rather than the end of input
                return Err(hard_error(input, ErrorKind::Eof));
            }
            match self.node(after_trivia, depth + 1) {
                Ok((after, item)) => {
                    items.push(item);
                    rest = after;
                }
                Err(nom::Err::Error(e)) => return Err(nom::Err::Failure(e)),
                Err(other) => return Err(other),
            }
        }
    }

    /// Parse a string literal, resolving escape sequences
    fn string_literal<'a>(&self, input: &'a str) -> IResult<&'a str, Node> {
        let start = self.offset(input);
        let (mut remaining, _) = char('"').parse(input)?;
        let mut chars = String::new();

        loop {
            let mut char_iter = remaining.chars();
            match char_iter.next() {
                Some('"') => {
                    let rest = char_iter.as_str();
                    let end = self.offset(rest);
                    return Ok((
                        rest,
                        Node::new(
                            NodeKind::StringLiteral(chars.into()),
                            self.span(start, end),
                        ),
                    ));
                }
                Some('\\') => {
                    match char_iter.next() {
                        Some('n') => chars.push('\n'),
                        Some('t') => chars.push('\t'),
                        Some('r') => chars.push('\r'),
                        Some('\\') => chars.push('\\'),
                        Some('"') => chars.push('"'),
                        Some(_) => return Err(hard_error(remaining, ErrorKind::EscapedTransform)),
                        None => return Err(hard_error(input, ErrorKind::Escaped)),
                    }
                    remaining = char_iter.as_str();
                }
                Some(ch) => {
                    chars.push(ch);
                    remaining = char_iter.as_str();
                }
                None => return Err(hard_error(input, ErrorKind::Escaped)),
            }
        }
    }

    fn number_literal<'a>(&self, input: &'a str) -> IResult<&'a str, Node> {
        let start = self.offset(input);
        let (rest, digits) =
            recognize((opt(char('-')), digit1, opt(pair(char('.'), digit1)))).parse(input)?;

        if !at_delimiter(rest) {
            return Err(soft_error(input, ErrorKind::Digit));
        }

        match digits.parse::<f64>() {
            Ok(n) => Ok((
                rest,
                Node::new(
                    NodeKind::NumberLiteral(n),
                    self.span(start, self.offset(rest)),
                ),
            )),
            Err(_) => Err(soft_error(input, ErrorKind::Float)),
        }
    }

    fn identifier<'a>(&self, input: &'a str) -> IResult<&'a str, &'a str> {
        let (rest, candidate) = take_while1(is_identifier_char).parse(input)?;
        if is_valid_identifier(candidate) && at_delimiter(rest) {
            Ok((rest, candidate))
        } else {
            Err(soft_error(input, ErrorKind::Alpha))
        }
    }

    fn atom<'a>(&self, input: &'a str) -> IResult<&'a str, Node> {
        let start = self.offset(input);
        let (after_colon, _) = char(':').parse(input)?;
        let (rest, label) = self.identifier(after_colon)?;
        Ok((
            rest,
            Node::new(
                NodeKind::Atom(label.into()),
                self.span(start, self.offset(rest)),
            ),
        ))
    }

    fn reference<'a>(&self, input: &'a str) -> IResult<&'a str, Node> {
        let start = self.offset(input);
        let (rest, label) = self.identifier(input)?;
        Ok((
            rest,
            Node::new(
                NodeKind::Reference(label.into()),
                self.span(start, self.offset(rest)),
            ),
        ))
    }

    fn error_at(&self, kind: ParseErrorKind, message: &str, offset: usize) -> ParseError {
        ParseError::with_context(kind, message, self.file.name(), self.text(), offset)
    }

    /// Convert nom parsing errors to user-friendly messages
    fn convert_error(&self, error: nom::Err<NomError<'_>>) -> ParseError {
        match error {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let offset = self.offset(e.input);
                match e.code {
                    ErrorKind::TooLarge => self.error_at(
                        ParseErrorKind::TooDeeplyNested,
                        &format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                        offset,
                    ),
                    ErrorKind::Eof => {
                        self.error_at(ParseErrorKind::Incomplete, "unclosed parenthesis", offset)
                    }
                    ErrorKind::Escaped => self.error_at(
                        ParseErrorKind::Incomplete,
                        "unterminated string literal",
                        offset,
                    ),
                    ErrorKind::EscapedTransform => self.error_at(
                        ParseErrorKind::InvalidSyntax,
                        "invalid escape sequence in string literal",
                        offset,
                    ),
                    _ => {
                        let near: String = e.input.chars().take(10).collect();
                        self.error_at(
                            ParseErrorKind::InvalidSyntax,
                            &format!("invalid syntax near '{near}'"),
                            offset,
                        )
                    }
                }
            }
            nom::Err::Incomplete(_) => {
                self.error_at(ParseErrorKind::Incomplete, "incomplete input", self.text().len())
            }
        }
    }
}
