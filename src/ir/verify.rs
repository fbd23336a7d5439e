//! Control-flow checks over each function's block graph.
//!
//! Edges come from IF/JMP targets plus fall-through into the next block in
//! layout order. A function passes when every branch stays inside it,
//! every block is reachable from the entry, and every merge block has at
//! least two distinct predecessors.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;

use super::{Block, BlockRole, FuncId, Opcode, Program};
use crate::error::{CompileError, Result};

pub fn verify_program(program: &Program) -> Result<()> {
    for i in 0..program.functions.len() {
        verify_function(program, FuncId(i as u32))?;
    }
    Ok(())
}

fn falls_through(block: &Block) -> bool {
    !matches!(
        block.commands.last().map(|c| c.opcode),
        Some(Opcode::Jmp | Opcode::If | Opcode::Ret)
    )
}

pub fn verify_function(program: &Program, id: FuncId) -> Result<()> {
    let func = program.function(id);
    let n = func.blocks.len();
    let mut graph = DiGraph::<usize, ()>::with_capacity(n, n * 2);
    let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();

    for (i, block) in func.blocks.iter().enumerate() {
        for cmd in &block.commands {
            for target in cmd.branch_targets() {
                let index = target.block.0 as usize;
                if target.func != id || index >= n {
                    let target_name = program
                        .functions
                        .get(target.func.0 as usize)
                        .and_then(|f| f.blocks.get(index))
                        .map_or_else(|| "?".to_string(), |b| b.name.to_string());
                    return Err(CompileError::ForeignBranchTarget {
                        function: func.name.to_string(),
                        block: block.name.to_string(),
                        target: target_name,
                    });
                }
                graph.add_edge(nodes[i], nodes[index], ());
            }
        }
        if falls_through(block) && i + 1 < n {
            graph.add_edge(nodes[i], nodes[i + 1], ());
        }
    }

    if n == 0 {
        return Ok(());
    }

    let mut reached = vec![false; n];
    let mut dfs = Dfs::new(&graph, nodes[0]);
    while let Some(node) = dfs.next(&graph) {
        reached[graph[node]] = true;
    }
    if let Some(i) = reached.iter().position(|r| !r) {
        return Err(CompileError::UnreachableBlock {
            function: func.name.to_string(),
            block: func.blocks[i].name.to_string(),
        });
    }

    for (i, block) in func.blocks.iter().enumerate() {
        if block.role != BlockRole::Merge {
            continue;
        }
        let mut preds: Vec<NodeIndex> = graph
            .neighbors_directed(nodes[i], Direction::Incoming)
            .collect();
        preds.sort();
        preds.dedup();
        if preds.len() < 2 {
            return Err(CompileError::MergeNotJoined {
                function: func.name.to_string(),
                block: block.name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, Operator};
    use crate::ir::builder::build_program;
    use crate::ir::{BlockId, BlockRef, Command, Function, Name, Operand};

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn test_built_programs_verify() {
        let ast = AstNode::program(vec![AstNode::func(
            "main",
            &["a"],
            vec![
                AstNode::if_else(
                    AstNode::op(Operator::Equal, AstNode::var("a"), AstNode::number(0)),
                    vec![AstNode::if_then(
                        AstNode::var("a"),
                        vec![AstNode::ret(AstNode::number(3))],
                    )],
                    vec![],
                ),
                AstNode::ret(AstNode::number(1)),
            ],
        )]);
        let program = build_program(&ast).unwrap();
        verify_program(&program).unwrap();
    }

    #[test]
    fn test_function_named_like_a_merge_block() {
        let ast = AstNode::program(vec![
            AstNode::func("MERGED", &[], vec![AstNode::ret(AstNode::number(1))]),
            AstNode::func(
                "main",
                &[],
                vec![AstNode::ret(AstNode::call("MERGED", vec![]))],
            ),
        ]);
        let program = build_program(&ast).unwrap();
        assert_eq!(program.functions[0].blocks[0].role, BlockRole::Entry);
        verify_program(&program).unwrap();
    }

    #[test]
    fn test_unreachable_block() {
        let mut f = Function::with_capacity(name("f"), 1, 2);
        let entry = f.add_block(Block::with_capacity(name("f"), 1));
        f.block_mut(entry).push(Command::ret(Operand::Number(0)));
        f.add_block(Block::with_capacity(name("IF0"), 1));
        let program = Program { functions: vec![f] };
        assert!(matches!(
            verify_program(&program),
            Err(CompileError::UnreachableBlock { block, .. }) if block == "IF0"
        ));
    }

    #[test]
    fn test_foreign_branch_target() {
        let mut f = Function::with_capacity(name("f"), 1, 1);
        let entry = f.add_block(Block::with_capacity(name("f"), 1));
        let elsewhere = BlockRef {
            func: FuncId(1),
            block: BlockId(0),
        };
        f.block_mut(entry).push(Command::jump(elsewhere));
        let mut g = Function::with_capacity(name("g"), 1, 1);
        g.add_block(Block::with_capacity(name("g"), 1));
        let program = Program {
            functions: vec![f, g],
        };
        assert!(matches!(
            verify_program(&program),
            Err(CompileError::ForeignBranchTarget { target, .. }) if target == "g"
        ));
    }

    #[test]
    fn test_merge_needs_two_predecessors() {
        let mut f = Function::with_capacity(name("f"), 1, 2);
        let entry = f.add_block(Block::with_capacity(name("f"), 1));
        let merge = f.add_block(Block::with_capacity(name("MERGE0"), 1).with_role(BlockRole::Merge));
        let target = BlockRef {
            func: FuncId(0),
            block: merge,
        };
        f.block_mut(entry).push(Command::jump(target));
        let program = Program { functions: vec![f] };
        assert!(matches!(
            verify_program(&program),
            Err(CompileError::MergeNotJoined { .. })
        ));
    }
}
