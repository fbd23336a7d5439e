//! Human-readable IR listing: one section per function with its variable
//! table and per-block commands.

use std::fmt::Write;

use super::{Command, Function, Opcode, Operand, Program};

pub fn format_operand(program: &Program, func: &Function, op: &Operand) -> String {
    match op {
        Operand::Number(n) => n.to_string(),
        Operand::Var(id) => func.var(*id).name.to_string(),
        Operand::Block(r) => program.block(*r).name.to_string(),
    }
}

pub fn format_command(program: &Program, func: &Function, cmd: &Command) -> String {
    let fmt = |op: &Operand| format_operand(program, func, op);
    let text = if cmd.opcode == Opcode::If {
        let cond = cmd.dest.as_ref().map(fmt).unwrap_or_default();
        let t = cmd.op1.as_ref().map(fmt).unwrap_or_default();
        let f = cmd.op2.as_ref().map(fmt).unwrap_or_default();
        format!("{:<6} {} ? {} : {}", cmd.opcode, cond, t, f)
    } else {
        let sources: Vec<String> = cmd.op1.iter().chain(cmd.op2.iter()).map(fmt).collect();
        let mut line = format!("{:<6} {}", cmd.opcode, sources.join(", "));
        if let Some(dest) = &cmd.dest {
            if !sources.is_empty() {
                line.push(' ');
            }
            let _ = write!(line, "-> {}", fmt(dest));
        }
        line
    };
    text.trim_end().to_string()
}

pub fn dump_function(program: &Program, func: &Function) -> String {
    let mut out = String::new();
    let params: Vec<&str> = func
        .params
        .iter()
        .map(|id| func.var(*id).name.as_str())
        .collect();
    let _ = writeln!(
        out,
        "function {}({}) frame={} temps={}",
        func.name,
        params.join(", "),
        func.frame_bytes(),
        func.temp_count
    );
    for var in &func.vars {
        let _ = writeln!(out, "  var {:<6} {}", var.name, var.storage);
    }
    for block in &func.blocks {
        match block.code_offset {
            Some(offset) => {
                let _ = writeln!(out, "  block {} @ {:#x}:", block.name, offset);
            }
            None => {
                let _ = writeln!(out, "  block {}:", block.name);
            }
        }
        for cmd in &block.commands {
            let _ = writeln!(out, "    {}", format_command(program, func, cmd));
        }
    }
    out
}

pub fn dump_program(program: &Program) -> String {
    program
        .functions
        .iter()
        .map(|f| dump_function(program, f))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, Operator};
    use crate::ir::builder::build_program;

    #[test]
    fn test_dump_increment() {
        let ast = AstNode::program(vec![AstNode::func(
            "f",
            &["x"],
            vec![AstNode::ret(AstNode::op(
                Operator::Add,
                AstNode::var("x"),
                AstNode::number(1),
            ))],
        )]);
        let program = build_program(&ast).unwrap();
        insta::assert_snapshot!(dump_program(&program), @r###"
        function f(x) frame=8 temps=1
          var x      memory[-8]
          var $t0    stack
          block f:
            PAROUT -> x
            ADD    x, 1 -> $t0
            RET    $t0
        "###);
    }

    #[test]
    fn test_dump_if_else_with_call() {
        let ast = AstNode::program(vec![
            AstNode::func(
                "main",
                &[],
                vec![
                    AstNode::declare("a", AstNode::number(0)),
                    AstNode::if_else(
                        AstNode::op(Operator::Equal, AstNode::var("a"), AstNode::number(0)),
                        vec![AstNode::assign("b", AstNode::call("one", vec![]))],
                        vec![AstNode::assign("b", AstNode::number(2))],
                    ),
                    AstNode::out("b"),
                    AstNode::ret(AstNode::var("b")),
                ],
            ),
            AstNode::func("one", &[], vec![AstNode::ret(AstNode::number(1))]),
        ]);
        let program = build_program(&ast).unwrap();
        insta::assert_snapshot!(dump_program(&program), @r###"
        function main() frame=16 temps=2
          var a      memory[-8]
          var $t0    stack
          var $t1    register
          var b      memory[-16]
          block main:
            EQ     0 -> a
            CMPEQ  a, 0 -> $t0
            IF     $t0 ? IF0 : ELSE0
          block IF0:
            CALL   one -> $t1
            EQ     $t1 -> b
            JMP    MERGE0
          block ELSE0:
            EQ     2 -> b
            JMP    MERGE0
          block MERGE0:
            OUT    b
            RET    b

        function one() frame=0 temps=0
          block one:
            RET    1
        "###);
    }
}
