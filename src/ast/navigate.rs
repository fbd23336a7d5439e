//! AST navigation: typed views over the binary node shapes.
//!
//! Both the IR builder and the interpreter go through these helpers, so a
//! shape is decoded (and rejected) in exactly one place.

use super::{AstNode, NodeKind};
use crate::error::{CompileError, Result};

/// A function definition: `FUNC` node with head and body.
#[derive(Clone, Debug)]
pub struct FunctionDef<'a> {
    pub name: &'a str,
    pub params: Vec<&'a str>,
    pub body: &'a AstNode,
}

/// The callee and argument expressions of a `CALL` node.
#[derive(Clone, Debug)]
pub struct CallSite<'a> {
    pub callee: &'a str,
    pub args: Vec<&'a AstNode>,
}

/// The parts of an `IF` node. `otherwise` is only meaningful when
/// `has_else` is set; an `ELSE` with an empty arm still gets a block.
#[derive(Clone, Debug)]
pub struct IfParts<'a> {
    pub cond: &'a AstNode,
    pub then: Option<&'a AstNode>,
    pub otherwise: Option<&'a AstNode>,
    pub has_else: bool,
}

/// Iterator over the `left` items of a chain of links.
pub struct ChainItems<'a> {
    next_link: Option<&'a AstNode>,
}

impl<'a> Iterator for ChainItems<'a> {
    type Item = &'a AstNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let link = self.next_link?;
            self.next_link = link.right();
            if let Some(item) = link.left() {
                return Some(item);
            }
        }
    }
}

/// Items of the chain starting at `link`. Links without a `left` child are
/// skipped.
pub fn chain_items(link: Option<&AstNode>) -> ChainItems<'_> {
    ChainItems { next_link: link }
}

pub fn variable_name(node: &AstNode) -> Option<&str> {
    match &node.kind {
        NodeKind::Variable(name) => Some(name),
        _ => None,
    }
}

/// Every function of a program chain, in source order.
pub fn functions(program: &AstNode) -> Result<Vec<FunctionDef<'_>>> {
    let defs = chain_items(Some(program))
        .map(|node| match &node.kind {
            NodeKind::Function(_) => function_def(node),
            other => Err(CompileError::UnexpectedNode {
                found: other.to_string(),
                context: "program",
            }),
        })
        .collect::<Result<Vec<_>>>()?;
    if defs.is_empty() {
        return Err(CompileError::EmptyProgram);
    }
    Ok(defs)
}

pub fn function_def(node: &AstNode) -> Result<FunctionDef<'_>> {
    let head = node
        .left()
        .ok_or(CompileError::MissingFunctionPart("head"))?;
    let body = node
        .right()
        .ok_or(CompileError::MissingFunctionPart("body"))?;
    let name = match &head.kind {
        NodeKind::Function(name) => name.as_str(),
        other => {
            return Err(CompileError::UnexpectedNode {
                found: other.to_string(),
                context: "function head",
            })
        }
    };
    let params = chain_items(head.left())
        .map(param_name)
        .collect::<Result<Vec<_>>>()?;
    Ok(FunctionDef { name, params, body })
}

fn param_name(node: &AstNode) -> Result<&str> {
    match &node.kind {
        NodeKind::Variable(name) => Ok(name),
        NodeKind::Keyword(k) if k == "VAR" => node
            .left()
            .and_then(variable_name)
            .ok_or(CompileError::MissingChild {
                context: "VAR",
                child: "variable",
            }),
        other => Err(CompileError::UnexpectedNode {
            found: other.to_string(),
            context: "parameter list",
        }),
    }
}

pub fn call_site(node: &AstNode) -> Result<CallSite<'_>> {
    let callee = node.left().ok_or(CompileError::MissingChild {
        context: "CALL",
        child: "callee",
    })?;
    match &callee.kind {
        NodeKind::Function(name) => Ok(CallSite {
            callee: name,
            args: chain_items(callee.left()).collect(),
        }),
        other => Err(CompileError::UnexpectedNode {
            found: other.to_string(),
            context: "CALL",
        }),
    }
}

pub fn if_parts(node: &AstNode) -> Result<IfParts<'_>> {
    let cond = node.left().ok_or(CompileError::MissingChild {
        context: "IF",
        child: "condition",
    })?;
    let parts = match node.right() {
        Some(arms) if arms.kind.is_keyword("ELSE") => IfParts {
            cond,
            then: arms.left(),
            otherwise: arms.right(),
            has_else: true,
        },
        then => IfParts {
            cond,
            then,
            otherwise: None,
            has_else: false,
        },
    };
    Ok(parts)
}

/// Variable named by an `OUT`/`IN` node (`left` link, whose `left` is the
/// variable).
pub fn builtin_target<'a>(node: &'a AstNode, context: &'static str) -> Result<&'a str> {
    node.left()
        .and_then(AstNode::left)
        .and_then(variable_name)
        .ok_or(CompileError::MissingChild {
            context,
            child: "variable",
        })
}

/// Both children of a binary operator node.
pub fn operands(node: &AstNode) -> Result<(&AstNode, &AstNode)> {
    let missing = |child| CompileError::MissingChild {
        context: "operator",
        child,
    };
    Ok((
        node.left().ok_or_else(|| missing("left operand"))?,
        node.right().ok_or_else(|| missing("right operand"))?,
    ))
}

/// `VAR` node: the declared variable and its initializer.
pub fn declaration(stmt: &AstNode) -> Result<(&str, &AstNode)> {
    let target = stmt.left().ok_or(CompileError::MissingChild {
        context: "VAR",
        child: "variable",
    })?;
    let name = variable_name(target)
        .ok_or_else(|| CompileError::InvalidAssignTarget(target.kind.to_string()))?;
    let init = stmt.right().ok_or(CompileError::MissingChild {
        context: "VAR",
        child: "initializer",
    })?;
    Ok((name, init))
}
