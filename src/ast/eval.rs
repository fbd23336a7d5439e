//! Reference interpreter: executes the AST directly with the semantics the
//! compiled code has. Used as the oracle for compiled programs and by
//! `tacjit --interpret`.

use std::collections::{HashMap, VecDeque};

use super::navigate::{self, FunctionDef};
use super::{AstNode, Builtin, NodeKind, Operator};
use crate::error::{CompileError, Result};

/// Default recursion limit for [`Interpreter::call`].
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

enum Flow {
    Next,
    Return(i64),
}

pub struct Interpreter<'a> {
    functions: HashMap<&'a str, FunctionDef<'a>>,
    input: VecDeque<i64>,
    output: Vec<i64>,
    /// Locals of the most recent top-level call.
    last_frame: HashMap<String, i64>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a AstNode) -> Result<Self> {
        let mut functions = HashMap::new();
        for def in navigate::functions(program)? {
            if functions.contains_key(def.name) {
                return Err(CompileError::DuplicateFunction(def.name.to_string()));
            }
            functions.insert(def.name, def);
        }
        Ok(Self {
            functions,
            input: VecDeque::new(),
            output: Vec::new(),
            last_frame: HashMap::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    /// Values returned by `IN`, in order; exhausted input reads 0.
    pub fn with_input(mut self, input: impl IntoIterator<Item = i64>) -> Self {
        self.input = input.into_iter().collect();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Values written by `OUT` so far.
    pub fn output(&self) -> &[i64] {
        &self.output
    }

    /// Value of a local of the last top-level call (0 when never assigned).
    pub fn local(&self, name: &str) -> i64 {
        self.last_frame.get(name).copied().unwrap_or(0)
    }

    /// Call `name` with `args` and return its result.
    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<i64> {
        let (value, frame) = self.invoke(name, args)?;
        self.last_frame = frame;
        Ok(value)
    }

    fn invoke(&mut self, name: &str, args: &[i64]) -> Result<(i64, HashMap<String, i64>)> {
        let def = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UndefinedFunction(name.to_string()))?;
        if def.params.len() != args.len() {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected: def.params.len(),
                found: args.len(),
            });
        }
        if self.depth >= self.max_depth {
            return Err(CompileError::CallDepthExceeded(self.max_depth));
        }

        let mut env: HashMap<String, i64> = def
            .params
            .iter()
            .map(|p| p.to_string())
            .zip(args.iter().copied())
            .collect();

        self.depth += 1;
        let flow = self.exec_chain(Some(def.body), &mut env);
        self.depth -= 1;

        let value = match flow? {
            Flow::Return(v) => v,
            Flow::Next => 0,
        };
        Ok((value, env))
    }

    fn exec_chain(&mut self, link: Option<&AstNode>, env: &mut HashMap<String, i64>) -> Result<Flow> {
        for stmt in navigate::chain_items(link) {
            if let Flow::Return(v) = self.exec_stmt(stmt, env)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &AstNode, env: &mut HashMap<String, i64>) -> Result<Flow> {
        match &stmt.kind {
            NodeKind::Keyword(k) => match k.as_str() {
                "ST" => self.exec_chain(Some(stmt), env),
                "RET" => {
                    let value = stmt.left().ok_or(CompileError::MissingChild {
                        context: "RET",
                        child: "value",
                    })?;
                    Ok(Flow::Return(self.eval(value, env)?))
                }
                "IF" => {
                    let parts = navigate::if_parts(stmt)?;
                    let arm = if self.eval(parts.cond, env)? != 0 {
                        parts.then
                    } else {
                        parts.otherwise
                    };
                    self.exec_chain(arm, env)
                }
                "VAR" => {
                    let (target, init) = navigate::declaration(stmt)?;
                    let value = self.eval(init, env)?;
                    env.insert(target.to_string(), value);
                    Ok(Flow::Next)
                }
                _ => Err(CompileError::UnknownKeyword(k.clone())),
            },
            NodeKind::Builtin(Builtin::Out) => {
                let name = navigate::builtin_target(stmt, "OUT")?;
                let value = env.get(name).copied().unwrap_or(0);
                self.output.push(value);
                Ok(Flow::Next)
            }
            NodeKind::Builtin(Builtin::In) => {
                let name = navigate::builtin_target(stmt, "IN")?;
                let value = self.input.pop_front().unwrap_or(0);
                env.insert(name.to_string(), value);
                Ok(Flow::Next)
            }
            _ => {
                self.eval(stmt, env)?;
                Ok(Flow::Next)
            }
        }
    }

    fn eval(&mut self, node: &AstNode, env: &mut HashMap<String, i64>) -> Result<i64> {
        match &node.kind {
            NodeKind::Number(n) => Ok(*n),
            NodeKind::Variable(name) => Ok(env.get(name).copied().unwrap_or(0)),
            NodeKind::Operator(Operator::Eq) => {
                let (lhs, rhs) = navigate::operands(node)?;
                let value = self.eval(rhs, env)?;
                let target = navigate::variable_name(lhs)
                    .ok_or_else(|| CompileError::InvalidAssignTarget(lhs.kind.to_string()))?;
                env.insert(target.to_string(), value);
                Ok(value)
            }
            NodeKind::Operator(op) => {
                let (lhs, rhs) = navigate::operands(node)?;
                let a = self.eval(lhs, env)?;
                let b = self.eval(rhs, env)?;
                apply(*op, a, b)
            }
            NodeKind::Function(f) if f == "CALL" => {
                let site = navigate::call_site(node)?;
                let mut args = Vec::with_capacity(site.args.len());
                for arg in site.args {
                    args.push(self.eval(arg, env)?);
                }
                Ok(self.invoke(site.callee, &args)?.0)
            }
            other => Err(CompileError::UnexpectedNode {
                found: other.to_string(),
                context: "expression",
            }),
        }
    }
}

/// Evaluate a binary operator the way the emitted x86-64 code does.
pub fn apply(op: Operator, a: i64, b: i64) -> Result<i64> {
    let value = match op {
        Operator::Add => a.wrapping_add(b),
        Operator::Sub => a.wrapping_sub(b),
        Operator::Mul => a.wrapping_mul(b),
        // idiv faults on both of these.
        Operator::Div => match (a, b) {
            (_, 0) => return Err(CompileError::DivisionByZero),
            (i64::MIN, -1) => return Err(CompileError::DivisionOverflow(a)),
            _ => a / b,
        },
        Operator::Eq => b,
        Operator::Equal => (a == b) as i64,
        Operator::NotEqual => (a != b) as i64,
        Operator::Less => (a < b) as i64,
        Operator::Greater => (a > b) as i64,
        Operator::LessEq => (a <= b) as i64,
        Operator::GreaterEq => (a >= b) as i64,
    };
    Ok(value)
}
