//! The AST handed over by the front end.
//!
//! Every node is binary: a [`NodeKind`] plus optional `left`/`right`
//! children. Meaning is carried by shape rather than by dedicated node
//! types, e.g. a statement list is a chain of links whose `left` is the
//! statement and whose `right` is the next link. [`navigate`] turns those
//! shapes into typed views; the constructors below build them.

pub mod eval;
pub mod navigate;
pub mod reader;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use navigate::{CallSite, FunctionDef};

/// Binary operators. `Eq` is assignment; the comparisons yield 1 or 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Eq => "=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessEq => "<=",
            Operator::GreaterEq => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::Less
                | Operator::Greater
                | Operator::LessEq
                | Operator::GreaterEq
        )
    }
}

/// Built-in I/O calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Out,
    In,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Operator(Operator),
    Variable(String),
    Number(i64),
    /// Control keywords: `ST`, `RET`, `IF`, `ELSE`, `VAR`, `PARAM`.
    Keyword(String),
    /// `FUNC` definition nodes, function heads, and `CALL`.
    Function(String),
    Builtin(Builtin),
    Pointer,
    Unknown(String),
}

impl NodeKind {
    pub fn is_keyword(&self, name: &str) -> bool {
        matches!(self, NodeKind::Keyword(k) if k == name)
    }

    pub fn is_function(&self, name: &str) -> bool {
        matches!(self, NodeKind::Function(f) if f == name)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Operator(op) => write!(f, "operator `{}`", op.symbol()),
            NodeKind::Variable(name) => write!(f, "variable `{}`", name),
            NodeKind::Number(n) => write!(f, "number {}", n),
            NodeKind::Keyword(k) => write!(f, "keyword `{}`", k),
            NodeKind::Function(name) => write!(f, "function `{}`", name),
            NodeKind::Builtin(Builtin::Out) => write!(f, "builtin `OUT`"),
            NodeKind::Builtin(Builtin::In) => write!(f, "builtin `IN`"),
            NodeKind::Pointer => write!(f, "pointer"),
            NodeKind::Unknown(name) => write!(f, "unknown `{}`", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<AstNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<AstNode>>,
}

// ─── Constructors ──────────────────────────────────────────────────

impl AstNode {
    pub fn new(kind: NodeKind, left: Option<AstNode>, right: Option<AstNode>) -> Self {
        Self {
            kind,
            left: left.map(Box::new),
            right: right.map(Box::new),
        }
    }

    pub fn leaf(kind: NodeKind) -> Self {
        Self::new(kind, None, None)
    }

    pub fn keyword(name: &str, left: Option<AstNode>, right: Option<AstNode>) -> Self {
        Self::new(NodeKind::Keyword(name.to_string()), left, right)
    }

    pub fn number(value: i64) -> Self {
        Self::leaf(NodeKind::Number(value))
    }

    pub fn var(name: &str) -> Self {
        Self::leaf(NodeKind::Variable(name.to_string()))
    }

    pub fn op(op: Operator, lhs: AstNode, rhs: AstNode) -> Self {
        Self::new(NodeKind::Operator(op), Some(lhs), Some(rhs))
    }

    /// `name = value`, usable as a statement or an expression.
    pub fn assign(name: &str, value: AstNode) -> Self {
        Self::op(Operator::Eq, Self::var(name), value)
    }

    /// Link `items` into a chain of `link`-kind nodes.
    fn chain_of(link: &str, items: Vec<AstNode>) -> Option<AstNode> {
        items
            .into_iter()
            .rev()
            .fold(None, |next, item| Some(Self::keyword(link, Some(item), next)))
    }

    /// A statement chain; `None` for an empty body.
    pub fn chain(stmts: Vec<AstNode>) -> Option<AstNode> {
        Self::chain_of("ST", stmts)
    }

    /// A nested `ST` block used as a single statement.
    pub fn block(stmts: Vec<AstNode>) -> Self {
        Self::chain(stmts).unwrap_or_else(|| Self::keyword("ST", None, None))
    }

    pub fn ret(value: AstNode) -> Self {
        Self::keyword("RET", Some(value), None)
    }

    /// `VAR name = init`.
    pub fn declare(name: &str, init: AstNode) -> Self {
        Self::keyword("VAR", Some(Self::var(name)), Some(init))
    }

    pub fn if_then(cond: AstNode, then: Vec<AstNode>) -> Self {
        Self::keyword("IF", Some(cond), Self::chain(then))
    }

    pub fn if_else(cond: AstNode, then: Vec<AstNode>, otherwise: Vec<AstNode>) -> Self {
        let arms = Self::keyword("ELSE", Self::chain(then), Self::chain(otherwise));
        Self::keyword("IF", Some(cond), Some(arms))
    }

    pub fn call(name: &str, args: Vec<AstNode>) -> Self {
        let callee = Self::new(
            NodeKind::Function(name.to_string()),
            Self::chain_of("PARAM", args),
            None,
        );
        Self::new(NodeKind::Function("CALL".to_string()), Some(callee), None)
    }

    fn builtin(builtin: Builtin, name: &str) -> Self {
        let link = Self::keyword("PARAM", Some(Self::var(name)), None);
        Self::new(NodeKind::Builtin(builtin), Some(link), None)
    }

    pub fn out(name: &str) -> Self {
        Self::builtin(Builtin::Out, name)
    }

    pub fn input(name: &str) -> Self {
        Self::builtin(Builtin::In, name)
    }

    /// `FUNC` node: head carries the name and `PARAM`/`VAR` chain, the
    /// right child is the body.
    pub fn func(name: &str, params: &[&str], body: Vec<AstNode>) -> Self {
        let params = params
            .iter()
            .map(|p| Self::keyword("VAR", Some(Self::var(p)), None))
            .collect();
        let head = Self::new(
            NodeKind::Function(name.to_string()),
            Self::chain_of("PARAM", params),
            None,
        );
        Self::new(
            NodeKind::Function("FUNC".to_string()),
            Some(head),
            Self::chain(body),
        )
    }

    /// Chain function nodes into a program root.
    pub fn program(functions: Vec<AstNode>) -> Self {
        Self::chain(functions).unwrap_or_else(|| Self::keyword("ST", None, None))
    }

    pub fn left(&self) -> Option<&AstNode> {
        self.left.as_deref()
    }

    pub fn right(&self) -> Option<&AstNode> {
        self.right.as_deref()
    }

    /// Number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.left().map_or(0, AstNode::size) + self.right().map_or(0, AstNode::size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_links_in_order() {
        let chain = AstNode::chain(vec![AstNode::number(1), AstNode::number(2)]).unwrap();
        assert!(chain.kind.is_keyword("ST"));
        assert_eq!(chain.left().unwrap().kind, NodeKind::Number(1));
        let next = chain.right().unwrap();
        assert_eq!(next.left().unwrap().kind, NodeKind::Number(2));
        assert!(next.right().is_none());
        assert!(AstNode::chain(vec![]).is_none());
    }

    #[test]
    fn test_func_shape() {
        let f = AstNode::func("f", &["x"], vec![AstNode::ret(AstNode::var("x"))]);
        assert!(f.kind.is_function("FUNC"));
        let head = f.left().unwrap();
        assert!(head.kind.is_function("f"));
        let param = head.left().unwrap();
        assert!(param.kind.is_keyword("PARAM"));
        assert!(param.left().unwrap().kind.is_keyword("VAR"));
        assert!(f.right().unwrap().left().unwrap().kind.is_keyword("RET"));
    }

    #[test]
    fn test_node_kind_display() {
        assert_eq!(
            NodeKind::Operator(Operator::LessEq).to_string(),
            "operator `<=`"
        );
        assert_eq!(NodeKind::Keyword("LOOP".into()).to_string(), "keyword `LOOP`");
        assert_eq!(NodeKind::Pointer.to_string(), "pointer");
    }

    #[test]
    fn test_size_counts_all_nodes() {
        let e = AstNode::op(Operator::Add, AstNode::var("a"), AstNode::number(1));
        assert_eq!(e.size(), 3);
    }
}
