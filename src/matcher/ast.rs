//! Parsed form of a route predicate.

use serde_json::Value;

/// Where a path starts: the whole document (`$`) or the node under test (`@`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Document,
    Current,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub root: PathRoot,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// `.name`, `.*`, `[...]`
    Child(Vec<Selector>),
    /// `..name`, `..*`, `..[...]`
    Descendant(Vec<Selector>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Name(String),
    Index(i64),
    Wildcard,
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Filter(Box<FilterExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// `?(@.field)` - the path selects at least one node
    Exists(Path),
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    Constant(bool),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(Path),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    In,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "contains",
            CmpOp::In => "in",
        };
        f.write_str(symbol)
    }
}

/// A top-level `path <op> literal` test applied to every node the path selects.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafTest {
    pub op: CmpOp,
    pub literal: Value,
}
