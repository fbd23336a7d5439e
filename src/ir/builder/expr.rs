use super::FunctionBuilder;
use crate::ast::navigate;
use crate::ast::{AstNode, NodeKind, Operator};
use crate::error::{CompileError, Result};
use crate::ir::{Command, Opcode, Operand, Storage};

impl FunctionBuilder<'_> {
    /// Lower an expression to the operand holding its value.
    pub(crate) fn lower_expr(&mut self, node: &AstNode) -> Result<Operand> {
        match &node.kind {
            NodeKind::Number(n) => Ok(Operand::Number(self.literal(*n)?)),
            NodeKind::Variable(name) => Ok(Operand::Var(self.declare(name)?)),
            NodeKind::Operator(Operator::Eq) => self.lower_assign(node),
            NodeKind::Operator(op) => {
                let (a, b) = self.binary_operands(node)?;
                let dest = self.func.add_temp(Storage::Stack);
                self.push(Command::binary(binary_opcode(*op), a, b, Some(dest)));
                Ok(Operand::Var(dest))
            }
            NodeKind::Function(f) if f == "CALL" => self.lower_call(node),
            other => Err(CompileError::UnexpectedNode {
                found: other.to_string(),
                context: "expression",
            }),
        }
    }

    /// `target = value`: lower the value first, then the target. The
    /// assigned variable is the result, so no temporary is made.
    pub(crate) fn lower_assign(&mut self, node: &AstNode) -> Result<Operand> {
        let (target, value) = navigate::operands(node)?;
        let src = self.lower_expr(value)?;
        let name = navigate::variable_name(target)
            .ok_or_else(|| CompileError::InvalidAssignTarget(target.kind.to_string()))?;
        let dest = self.declare(name)?;
        self.push(Command::assign(src, dest));
        Ok(Operand::Var(dest))
    }

    /// Both operands of an arithmetic or comparison node, left first.
    ///
    /// A variable operand is read when the consuming command runs. When
    /// the right side contains an assignment, the left variable is copied
    /// onto the evaluation stack first so it keeps its value from before
    /// the right side ran.
    pub(crate) fn binary_operands(&mut self, node: &AstNode) -> Result<(Operand, Operand)> {
        let (lhs, rhs) = navigate::operands(node)?;
        let mut a = self.lower_expr(lhs)?;
        if contains_assignment(rhs) {
            a = self.capture(a);
        }
        let b = self.lower_expr(rhs)?;
        Ok((a, b))
    }

    /// Copy a named variable into a stack temporary; other operands are
    /// already fixed values.
    fn capture(&mut self, op: Operand) -> Operand {
        match op {
            Operand::Var(id) if !self.func.var(id).storage.is_temporary() => {
                let temp = self.func.add_temp(Storage::Stack);
                self.push(Command::assign(op, temp));
                Operand::Var(temp)
            }
            other => other,
        }
    }

    /// Literals are encoded as sign-extended 32-bit immediates.
    pub(crate) fn literal(&self, value: i64) -> Result<i32> {
        i32::try_from(value).map_err(|_| CompileError::LiteralOutOfRange(value))
    }
}

fn contains_assignment(node: &AstNode) -> bool {
    matches!(node.kind, NodeKind::Operator(Operator::Eq))
        || node.left().is_some_and(contains_assignment)
        || node.right().is_some_and(contains_assignment)
}

/// Opcode of a non-assignment operator.
pub(crate) fn binary_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::Add,
        Operator::Sub => Opcode::Sub,
        Operator::Mul => Opcode::Mul,
        Operator::Div => Opcode::Div,
        Operator::Equal => Opcode::CmpEq,
        Operator::NotEqual => Opcode::CmpNe,
        Operator::Less => Opcode::CmpLt,
        Operator::Greater => Opcode::CmpGt,
        Operator::LessEq => Opcode::CmpLe,
        Operator::GreaterEq => Opcode::CmpGe,
        Operator::Eq => Opcode::Eq,
    }
}
