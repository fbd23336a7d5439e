use tracing::warn;

use super::count::{self, MERGE_CAPACITY};
use super::expr::binary_opcode;
use super::FunctionBuilder;
use crate::ast::navigate;
use crate::ast::{AstNode, Builtin, NodeKind, Operator};
use crate::error::{CompileError, Result};
use crate::ir::{BlockRole, Command, Operand};

impl FunctionBuilder<'_> {
    pub(crate) fn lower_chain(&mut self, link: Option<&AstNode>) -> Result<()> {
        for stmt in navigate::chain_items(link) {
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, stmt: &AstNode) -> Result<()> {
        let before = self.live_temps;
        self.lower_statement_kind(stmt)?;
        let dangling = self.live_temps - before;
        if dangling != 0 {
            return Err(CompileError::DanglingTemporary {
                function: self.func.name.to_string(),
                count: dangling,
            });
        }
        Ok(())
    }

    fn lower_statement_kind(&mut self, stmt: &AstNode) -> Result<()> {
        match &stmt.kind {
            NodeKind::Keyword(k) => match k.as_str() {
                "ST" => self.lower_chain(Some(stmt)),
                "RET" => self.lower_ret(stmt),
                "IF" => self.lower_if(stmt),
                "VAR" => {
                    let (name, init) = navigate::declaration(stmt)?;
                    let src = self.lower_expr(init)?;
                    let dest = self.declare(name)?;
                    self.push(Command::assign(src, dest));
                    Ok(())
                }
                _ => Err(CompileError::UnknownKeyword(k.clone())),
            },
            NodeKind::Builtin(Builtin::Out) => {
                let name = navigate::builtin_target(stmt, "OUT")?;
                let var = self.declare(name)?;
                self.push(Command::out(Operand::Var(var)));
                Ok(())
            }
            NodeKind::Builtin(Builtin::In) => {
                let name = navigate::builtin_target(stmt, "IN")?;
                let var = self.declare(name)?;
                self.push(Command::input(var));
                Ok(())
            }
            NodeKind::Function(f) if f == "CALL" => self.lower_call_discarded(stmt),
            NodeKind::Operator(Operator::Eq) => self.lower_assign(stmt).map(|_| ()),
            NodeKind::Operator(op) => {
                warn!(
                    function = %self.func.name,
                    operator = op.symbol(),
                    "expression statement has no effect beyond its operands"
                );
                let (a, b) = self.binary_operands(stmt)?;
                self.push(Command::binary(binary_opcode(*op), a, b, None));
                Ok(())
            }
            // A bare name still declares the variable; a bare literal is only
            // range-checked.
            NodeKind::Variable(name) => self.declare(name).map(|_| ()),
            NodeKind::Number(n) => self.literal(*n).map(|_| ()),
            other => Err(CompileError::UnexpectedNode {
                found: other.to_string(),
                context: "statement",
            }),
        }
    }

    fn lower_ret(&mut self, stmt: &AstNode) -> Result<()> {
        let value = stmt.left().ok_or(CompileError::MissingChild {
            context: "RET",
            child: "value",
        })?;
        let value = self.lower_expr(value)?;
        self.push(Command::ret(value));
        Ok(())
    }

    fn lower_if(&mut self, stmt: &AstNode) -> Result<()> {
        let parts = navigate::if_parts(stmt)?;
        let n = self.ctx.fresh_if_label();
        let elder = self.current;
        let cond = self.lower_expr(parts.cond)?;

        let then_block = self.open_block(format!("IF{}", n), BlockRole::Then, count::commands(parts.then))?;
        self.lower_chain(parts.then)?;
        let then_end = self.current;

        let else_arm = if parts.has_else {
            let block = self.open_block(
                format!("ELSE{}", n),
                BlockRole::Else,
                count::commands(parts.otherwise),
            )?;
            self.lower_chain(parts.otherwise)?;
            Some((block, self.current))
        } else {
            None
        };

        let merge = self.open_block(format!("MERGE{}", n), BlockRole::Merge, MERGE_CAPACITY)?;
        let merge_ref = self.block_ref(merge);

        // Arms end in whichever block is current after lowering them, which
        // is a nested MERGE when the arm contains an IF.
        self.push_to(then_end, Command::jump(merge_ref));
        if let Some((_, else_end)) = else_arm {
            self.push_to(else_end, Command::jump(merge_ref));
        }

        let if_false = else_arm.map_or(merge, |(block, _)| block);
        let branch = Command::branch(cond, self.block_ref(then_block), self.block_ref(if_false));
        self.push_to(elder, branch);
        Ok(())
    }
}
