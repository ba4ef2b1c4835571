//! Bind parameter handling.
//!
//! Generated SQL uses Oracle-style named placeholders (`:district`). sqlx
//! binds positionally, so named placeholders are rewritten to the backend's
//! numbered syntax (`$1` / `?1`) and the values are ordered to match. A name
//! that appears more than once reuses the same position.

use super::{Backend, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Parameters supplied with a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParams {
    /// Values keyed by placeholder name (stored lowercase).
    Named(BTreeMap<String, Value>),
    /// Values for placeholders already written in the backend's syntax.
    Positional(Vec<Value>),
}

impl QueryParams {
    /// Creates an empty named parameter set.
    pub fn named() -> Self {
        Self::Named(BTreeMap::new())
    }

    /// Returns true if no values are supplied.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Named(map) => map.is_empty(),
            Self::Positional(values) => values.is_empty(),
        }
    }
}

/// Errors raised while binding parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("no value supplied for bind parameter :{0}")]
    Missing(String),

    #[error("bind parameter :{0} does not appear in the statement")]
    Unused(String),
}

/// A statement ready for execution with positional values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Prepares `sql` and `params` for positional execution on `backend`.
pub fn bind_parameters(
    sql: &str,
    params: Option<&QueryParams>,
    backend: Backend,
) -> Result<BoundStatement, BindError> {
    match params {
        None => Ok(BoundStatement {
            sql: sql.to_string(),
            values: Vec::new(),
        }),
        Some(QueryParams::Positional(values)) => Ok(BoundStatement {
            sql: sql.to_string(),
            values: values.clone(),
        }),
        Some(QueryParams::Named(map)) => rewrite_named(sql, map, backend),
    }
}

fn rewrite_named(
    sql: &str,
    params: &BTreeMap<String, Value>,
    backend: Backend,
) -> Result<BoundStatement, BindError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<String> = Vec::new();
    // One entry per open `[`: true for a subscript, false for an array literal.
    let mut brackets: Vec<bool> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = skip_quoted(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_comment_end(&chars, i + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            '$' if !chars[..i].last().is_some_and(|ch| is_ident_char(*ch)) => {
                match dollar_tag_len(&chars, i) {
                    Some(tag_len) => {
                        let end = skip_dollar_quoted(&chars, i, tag_len);
                        out.extend(&chars[i..end]);
                        i = end;
                    }
                    None => {
                        out.push(c);
                        i += 1;
                    }
                }
            }
            '[' => {
                brackets.push(opens_subscript(&out));
                out.push(c);
                i += 1;
            }
            ']' => {
                brackets.pop();
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                // PostgreSQL cast operator
                out.push_str("::");
                i += 2;
            }
            ':' if brackets.last() == Some(&true) && follows_slice_bound(&out) => {
                out.push(c);
                i += 1;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_') =>
            {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
                    .map_or(chars.len(), |p| start + p);
                let name: String = chars[start..end].iter().collect::<String>().to_lowercase();

                let position = match order.iter().position(|n| *n == name) {
                    Some(p) => p + 1,
                    None => {
                        if !params.contains_key(&name) {
                            return Err(BindError::Missing(name));
                        }
                        order.push(name);
                        order.len()
                    }
                };
                out.push_str(&backend.placeholder(position));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    if let Some(unused) = params.keys().find(|k| !order.contains(k)) {
        return Err(BindError::Unused(unused.clone()));
    }

    let values = order
        .iter()
        .filter_map(|name| params.get(name).cloned())
        .collect();

    Ok(BoundStatement { sql: out, values })
}

/// Returns the index just past a quoted section starting at `start`.
/// Doubled quote characters are escapes.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Returns the length of a `$tag$` opener at `start`, if there is one.
/// `$1` style placeholders are not tags.
fn dollar_tag_len(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if chars.get(i).is_some_and(|ch| ch.is_ascii_digit()) {
        return None;
    }
    while let Some(&ch) = chars.get(i) {
        if ch == '$' {
            return Some(i + 1 - start);
        }
        if !is_ident_char(ch) {
            return None;
        }
        i += 1;
    }
    None
}

/// Returns the index just past the dollar-quoted body opened at `start`.
fn skip_dollar_quoted(chars: &[char], start: usize, tag_len: usize) -> usize {
    let tag = &chars[start..start + tag_len];
    let mut i = start + tag_len;
    while i + tag_len <= chars.len() {
        if &chars[i..i + tag_len] == tag {
            return i + tag_len;
        }
        i += 1;
    }
    chars.len()
}

/// A `[` right after an operand subscripts it; after `ARRAY`, `[`, `,` or
/// `(` it starts an array literal.
fn opens_subscript(before: &str) -> bool {
    let before = before.trim_end();
    let Some(last) = before.chars().last() else {
        return false;
    };
    if !(is_ident_char(last) || matches!(last, ')' | ']' | '"')) {
        return false;
    }
    let word_start = before
        .char_indices()
        .rev()
        .take_while(|(_, ch)| is_ident_char(*ch))
        .last()
        .map_or(before.len(), |(idx, _)| idx);
    !before[word_start..].eq_ignore_ascii_case("array")
}

/// Inside a subscript, a `:` after an operand or the opening `[` separates
/// slice bounds.
fn follows_slice_bound(before: &str) -> bool {
    before
        .trim_end()
        .chars()
        .last()
        .is_some_and(|ch| is_ident_char(ch) || matches!(ch, '[' | ')' | ']'))
}

fn find_block_comment_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}
