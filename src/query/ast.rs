use std::fmt;

use crate::record::{CompOp, Value};

/// An attribute reference, optionally qualified with its relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelAttr {
    pub rel: Option<String>,
    pub attr: String,
}

impl RelAttr {
    pub fn new(rel: Option<&str>, attr: &str) -> Self {
        Self {
            rel: rel.map(|r| r.to_string()),
            attr: attr.to_string(),
        }
    }

    pub fn unqualified(attr: &str) -> Self {
        Self::new(None, attr)
    }

    pub fn qualified(rel: &str, attr: &str) -> Self {
        Self::new(Some(rel), attr)
    }
}

impl fmt::Display for RelAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rel {
            Some(rel) => write!(f, "{}.{}", rel, self.attr),
            None => write!(f, "{}", self.attr),
        }
    }
}

/// Right-hand side of a condition: another attribute or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Attr(RelAttr),
    Value(Value),
}

/// One comparison from a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs: RelAttr,
    pub op: CompOp,
    pub rhs: Rhs,
}

impl Condition {
    pub fn with_value(lhs: RelAttr, op: CompOp, value: Value) -> Self {
        Self {
            lhs,
            op,
            rhs: Rhs::Value(value),
        }
    }

    pub fn with_attr(lhs: RelAttr, op: CompOp, rhs: RelAttr) -> Self {
        Self {
            lhs,
            op,
            rhs: Rhs::Attr(rhs),
        }
    }
}

/// SELECT list: everything, or an explicit attribute list.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Star,
    Attrs(Vec<RelAttr>),
}
