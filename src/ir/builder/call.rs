use tracing::debug;

use super::FunctionBuilder;
use crate::ast::navigate;
use crate::ast::AstNode;
use crate::error::{CompileError, Result};
use crate::ir::{Command, FuncId, Operand, Storage};

impl FunctionBuilder<'_> {
    /// `CALL` in expression position: the result is a register temporary.
    pub(crate) fn lower_call(&mut self, node: &AstNode) -> Result<Operand> {
        let callee = self.lower_call_args(node)?;
        let dest = self.func.add_temp(Storage::Register);
        self.push(Command::call(callee, Some(dest)));
        Ok(Operand::Var(dest))
    }

    /// `CALL` as a statement: no destination, nothing left on the stack.
    pub(crate) fn lower_call_discarded(&mut self, node: &AstNode) -> Result<()> {
        let callee = self.lower_call_args(node)?;
        debug!(function = %self.func.name, "call result discarded");
        self.push(Command::call(callee, None));
        Ok(())
    }

    /// Resolve the callee and push every argument, left to right.
    fn lower_call_args(&mut self, node: &AstNode) -> Result<FuncId> {
        let site = navigate::call_site(node)?;
        let sig = *self
            .signatures
            .get(site.callee)
            .ok_or_else(|| CompileError::UndefinedFunction(site.callee.to_string()))?;
        if sig.arity != site.args.len() {
            return Err(CompileError::ArityMismatch {
                name: site.callee.to_string(),
                expected: sig.arity,
                found: site.args.len(),
            });
        }

        for arg in site.args {
            let value = self.lower_expr(arg)?;
            self.push(Command::param_in(value));
        }
        Ok(sig.id)
    }
}
