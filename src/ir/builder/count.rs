//! Pre-sizing pass: node-kind tallies that seed the initial capacities of
//! variable tables, block lists and command lists. Over-counting is fine;
//! arrays grow with `push_doubling` when a tally falls short.

use crate::ast::{AstNode, NodeKind};

/// Initial command capacity of a `MERGE<n>` block.
pub const MERGE_CAPACITY: usize = 20;

fn tally(node: Option<&AstNode>, weight: &dyn Fn(&NodeKind) -> usize) -> usize {
    match node {
        Some(n) => weight(&n.kind) + tally(n.left(), weight) + tally(n.right(), weight),
        None => 0,
    }
}

/// Variable-table slots: every keyword, operator and variable node may
/// introduce a name or a temporary.
pub fn variables(node: Option<&AstNode>) -> usize {
    1 + tally(node, &|kind| match kind {
        NodeKind::Keyword(_) | NodeKind::Operator(_) | NodeKind::Variable(_) => 1,
        _ => 0,
    })
}

/// Blocks: the entry, two per `IF` (arm + merge) and one per `ELSE`.
pub fn blocks(node: Option<&AstNode>) -> usize {
    1 + tally(node, &|kind| match kind {
        NodeKind::Keyword(k) if k == "IF" => 2,
        NodeKind::Keyword(k) if k == "ELSE" => 1,
        _ => 0,
    })
}

/// Commands a subtree can emit: at most one per operator, keyword, call
/// or builtin node.
pub fn commands(node: Option<&AstNode>) -> usize {
    tally(node, &|kind| match kind {
        NodeKind::Operator(_) | NodeKind::Keyword(_) | NodeKind::Builtin(_) => 1,
        NodeKind::Function(f) if f == "CALL" => 1,
        _ => 0,
    })
    .max(1)
}
