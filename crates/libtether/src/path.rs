//! Parser for inspect expressions: a leading identifier followed by
//! `.name` attribute steps and `[key]` index steps, e.g.
//! `cache.stats['hits']`. A `.` inside brackets is literal, and a bracketed
//! key loses one surrounding layer of quotes.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Attr(String),
    Index(String),
}

impl Step {
    pub fn key(&self) -> &str {
        match self {
            Step::Attr(name) => name,
            Step::Index(key) => key,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Step::Attr(name) => format!("attribute '{name}'"),
            Step::Index(key) => format!("key '{key}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPath {
    pub root: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty expression")]
    Empty,
    #[error("expression must start with an identifier")]
    MissingRoot,
    #[error("empty attribute name after '.'")]
    EmptyAttribute,
    #[error("empty index key in '[]'")]
    EmptyIndex,
    #[error("unterminated '[' in expression")]
    UnterminatedIndex,
}

pub fn parse(expression: &str) -> Result<AccessPath, PathError> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err(PathError::Empty);
    }

    let mut chars = expr.chars().peekable();

    let mut root = String::new();
    while let Some(&c) = chars.peek() {
        if c == '.' || c == '[' {
            break;
        }
        root.push(c);
        chars.next();
    }
    if root.is_empty() {
        return Err(PathError::MissingRoot);
    }

    let mut steps = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '.' || n == '[' {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(PathError::EmptyAttribute);
                }
                steps.push(Step::Attr(name));
            }
            '[' => {
                // Everything up to the closing bracket is the key, dots
                // included.
                let mut key = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    key.push(n);
                }
                if !closed {
                    return Err(PathError::UnterminatedIndex);
                }
                let key = strip_quotes(key.trim());
                if key.is_empty() {
                    return Err(PathError::EmptyIndex);
                }
                steps.push(Step::Index(key));
            }
            // Unreachable: root consumption stops only at '.' or '[', and
            // both arms above consume through their terminator.
            _ => unreachable!("stepped past an unconsumed character"),
        }
    }

    Ok(AccessPath { root, steps })
}

/// Strip a single layer of matching surrounding quotes, if present.
fn strip_quotes(key: &str) -> String {
    let bytes = key.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return key[1..key.len() - 1].to_string();
        }
    }
    key.to_string()
}
