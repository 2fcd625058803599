//! Boolean label expression parser.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('&' | '|') term)*      -- '&' and '|' may not be mixed at one level
//! term   := '!' term | '(' expr ')' | label
//! label  := [A-Za-z0-9_\-:./]+ | '"' (escaped char)* '"'
//! ```
//!
//! ASCII whitespace between tokens is ignored. Parentheses and negations
//! nest at most [`MAX_NESTING`] deep. The parsed tree is normalized
//! (nested same-operator groups flattened, operands sorted and deduplicated,
//! double negation removed) so equal expressions render to equal strings.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Deepest accepted nesting of '(' and '!'.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Node {
    Label(Arc<str>),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    pub(crate) fn evaluate(&self, has: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Node::Label(label) => has(label),
            Node::Not(inner) => !inner.evaluate(has),
            Node::And(children) => children.iter().all(|c| c.evaluate(has)),
            Node::Or(children) => children.iter().any(|c| c.evaluate(has)),
        }
    }

    /// Canonical rendering; equal trees render identically.
    pub(crate) fn render(&self, out: &mut String) {
        match self {
            Node::Label(label) => render_label(label, out),
            Node::Not(inner) => {
                out.push('!');
                match inner.as_ref() {
                    Node::Label(_) | Node::Not(_) => inner.render(out),
                    _ => {
                        out.push('(');
                        inner.render(out);
                        out.push(')');
                    }
                }
            }
            Node::And(children) => render_group(children, '&', out),
            Node::Or(children) => render_group(children, '|', out),
        }
    }

    pub(crate) fn labels<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Label(label) => out.push(label),
            Node::Not(inner) => inner.labels(out),
            Node::And(children) | Node::Or(children) => {
                for child in children {
                    child.labels(out);
                }
            }
        }
    }
}

fn render_group(children: &[Node], op: char, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push(op);
        }
        match child {
            Node::And(_) | Node::Or(_) => {
                out.push('(');
                child.render(out);
                out.push(')');
            }
            _ => child.render(out),
        }
    }
}

pub(crate) fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/')
}

fn render_label(label: &str, out: &mut String) {
    if !label.is_empty() && label.chars().all(is_label_char) {
        out.push_str(label);
        return;
    }
    out.push('"');
    for c in label.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Parse and normalize. `Ok(None)` for the empty (always visible) expression.
pub(crate) fn parse(expression: &str) -> Result<Option<Node>> {
    let mut parser = Parser {
        src: expression,
        chars: expression.char_indices().collect(),
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Ok(None);
    }
    let node = parser.expr()?;
    parser.skip_ws();
    if let Some(&(offset, c)) = parser.chars.get(parser.pos) {
        let reason = if c == ')' {
            "unbalanced parenthesis".to_string()
        } else {
            format!("unexpected character {:?}", c)
        };
        return Err(parser.error_at(offset, reason));
    }
    Ok(Some(normalize(node)))
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(o, _)| o)
            .unwrap_or(self.src.len())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn error_at(&self, position: usize, reason: impl Into<String>) -> Error {
        Error::VisibilityParse {
            expression: self.src.to_string(),
            position,
            reason: reason.into(),
        }
    }

    /// Parse a nested term one level deeper.
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Node>) -> Result<Node> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_at(
                self.offset(),
                format!("nesting deeper than {} levels", MAX_NESTING),
            ));
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    fn expr(&mut self) -> Result<Node> {
        let first = self.term()?;
        let mut operator: Option<char> = None;
        let mut operands = vec![first];
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(c @ ('&' | '|')) => c,
                _ => break,
            };
            if let Some(existing) = operator {
                if existing != op {
                    return Err(self.error_at(
                        self.offset(),
                        "cannot mix '&' and '|' without parentheses",
                    ));
                }
            }
            operator = Some(op);
            self.pos += 1;
            operands.push(self.term()?);
        }
        Ok(match operator {
            None => operands.swap_remove(0),
            Some('&') => Node::And(operands),
            Some(_) => Node::Or(operands),
        })
    }

    fn term(&mut self) -> Result<Node> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error_at(self.offset(), "expected label, '!' or '('")),
            Some('!') => self.nested(|p| {
                p.pos += 1;
                Ok(Node::Not(Box::new(p.term()?)))
            }),
            Some('(') => self.nested(|p| {
                let open = p.offset();
                p.pos += 1;
                p.skip_ws();
                if p.peek() == Some(')') {
                    return Err(p.error_at(open, "empty parentheses"));
                }
                let inner = p.expr()?;
                p.skip_ws();
                if p.peek() != Some(')') {
                    return Err(p.error_at(open, "unbalanced parenthesis"));
                }
                p.pos += 1;
                Ok(inner)
            }),
            Some('"') => self.quoted(),
            Some(c) if is_label_char(c) => {
                let start = self.offset();
                while matches!(self.peek(), Some(c) if is_label_char(c)) {
                    self.pos += 1;
                }
                let end = self.offset();
                Ok(Node::Label(Arc::from(&self.src[start..end])))
            }
            Some(')') => Err(self.error_at(self.offset(), "unbalanced parenthesis")),
            Some(c) => Err(self.error_at(self.offset(), format!("invalid character {:?}", c))),
        }
    }

    fn quoted(&mut self) -> Result<Node> {
        let open = self.offset();
        self.pos += 1;
        let mut label = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error_at(open, "unterminated quoted label")),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ ('"' | '\\')) => {
                            label.push(c);
                            self.pos += 1;
                        }
                        _ => return Err(self.error_at(self.offset(), "invalid escape in label")),
                    }
                }
                Some(c) => {
                    label.push(c);
                    self.pos += 1;
                }
            }
        }
        if label.is_empty() {
            return Err(self.error_at(open, "empty quoted label"));
        }
        Ok(Node::Label(Arc::from(label.as_str())))
    }
}

fn normalize(node: Node) -> Node {
    match node {
        Node::Label(_) => node,
        Node::Not(inner) => match normalize(*inner) {
            Node::Not(double) => *double,
            other => Node::Not(Box::new(other)),
        },
        Node::And(children) => normalize_group(children, true),
        Node::Or(children) => normalize_group(children, false),
    }
}

fn normalize_group(children: Vec<Node>, is_and: bool) -> Node {
    let mut flat = Vec::with_capacity(children.len());
    for child in children.into_iter().map(normalize) {
        match (child, is_and) {
            (Node::And(grand), true) | (Node::Or(grand), false) => flat.extend(grand),
            (other, _) => flat.push(other),
        }
    }
    flat.sort();
    flat.dedup();
    if flat.len() == 1 {
        return flat.swap_remove(0);
    }
    if is_and {
        Node::And(flat)
    } else {
        Node::Or(flat)
    }
}
