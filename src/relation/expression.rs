//! Eager-loading expression tree and its parsers.
//!
//! String syntax: `author`, `posts.comments`, `[posts(published).tags, profile]`.
//! Object syntax: `{ "posts(published)": { "tags": true }, "profile": true }`.
//! Arrays of either form are merged.

use crate::error::RelationError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One node of an eager expression. The root node has an empty name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationExpression {
    pub name: String,
    /// Requested scope names, in order, without duplicates.
    pub args: Vec<String>,
    pub children: BTreeMap<String, RelationExpression>,
}

impl RelationExpression {
    pub fn root() -> Self {
        RelationExpression::default()
    }

    pub fn node(name: impl Into<String>) -> Self {
        RelationExpression {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    /// Parse a raw eager spec (string, object or array of those) into a root node.
    pub fn parse(raw: &Value) -> Result<Self, RelationError> {
        let mut root = RelationExpression::root();
        match raw {
            Value::String(s) => root.merge_children(parse_str(s)?),
            Value::Object(_) => root.merge_children(parse_object(raw)?),
            Value::Array(items) => {
                for item in items {
                    let parsed = RelationExpression::parse(item)?;
                    root.merge_children(parsed.children.into_values().collect());
                }
            }
            Value::Null => {}
            other => return Err(RelationError::Parse(format!("unsupported eager value: {}", other))),
        }
        Ok(root)
    }

    pub fn parse_str(s: &str) -> Result<Self, RelationError> {
        RelationExpression::parse(&Value::String(s.to_string()))
    }

    /// Append a scope name unless already present.
    pub fn add_arg(&mut self, scope: &str, prepend: bool) -> bool {
        if self.args.iter().any(|a| a == scope) {
            return false;
        }
        if prepend {
            self.args.insert(0, scope.to_string());
        } else {
            self.args.push(scope.to_string());
        }
        true
    }

    fn merge(&mut self, other: RelationExpression) {
        for arg in other.args {
            self.add_arg(&arg, false);
        }
        self.merge_children(other.children.into_values().collect());
    }

    fn merge_children(&mut self, nodes: Vec<RelationExpression>) {
        for node in nodes {
            match self.children.get_mut(&node.name) {
                Some(existing) => existing.merge(node),
                None => {
                    self.children.insert(node.name.clone(), node);
                }
            }
        }
    }
}

impl fmt::Display for RelationExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_root() {
            f.write_str(&self.name)?;
            if !self.args.is_empty() {
                write!(f, "({})", self.args.join(", "))?;
            }
            if self.children.is_empty() {
                return Ok(());
            }
            f.write_str(".")?;
        }
        let children: Vec<String> = self.children.values().map(|c| c.to_string()).collect();
        if children.len() == 1 && !self.is_root() {
            f.write_str(&children[0])
        } else {
            write!(f, "[{}]", children.join(", "))
        }
    }
}

fn parse_str(input: &str) -> Result<Vec<RelationExpression>, RelationError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let nodes = parser.list()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(nodes)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> RelationError {
        let text: String = self.chars.iter().collect();
        RelationError::Parse(format!("{} at {} in '{}'", message, self.pos, text))
    }

    fn list(&mut self) -> Result<Vec<RelationExpression>, RelationError> {
        let mut out = self.item()?;
        while self.eat(',') {
            out.extend(self.item()?);
        }
        Ok(out)
    }

    fn item(&mut self) -> Result<Vec<RelationExpression>, RelationError> {
        if self.eat('[') {
            let nodes = self.list()?;
            if !self.eat(']') {
                return Err(self.error("expected ']'"));
            }
            return Ok(nodes);
        }
        Ok(vec![self.node()?])
    }

    fn node(&mut self) -> Result<RelationExpression, RelationError> {
        let mut node = RelationExpression::node(self.ident()?);
        if self.eat('(') {
            loop {
                let arg = self.ident()?;
                node.add_arg(&arg, false);
                if self.eat(')') {
                    break;
                }
                if !self.eat(',') {
                    return Err(self.error("expected ',' or ')'"));
                }
            }
        }
        if self.eat('.') {
            node.merge_children(self.item()?);
        }
        Ok(node)
    }

    fn ident(&mut self) -> Result<String, RelationError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected relation name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }
}

fn parse_object(raw: &Value) -> Result<Vec<RelationExpression>, RelationError> {
    let Value::Object(map) = raw else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (key, value) in map {
        let mut node = match parse_str(key)?.as_slice() {
            [single] if single.children.is_empty() => single.clone(),
            _ => return Err(RelationError::Parse(format!("invalid eager key '{}'", key))),
        };
        match value {
            Value::Bool(false) | Value::Null => continue,
            Value::Bool(true) => {}
            Value::Object(_) => node.merge_children(parse_object(value)?),
            other => {
                return Err(RelationError::Parse(format!(
                    "invalid eager value for '{}': {}",
                    key, other
                )))
            }
        }
        out.push(node);
    }
    Ok(out)
}
