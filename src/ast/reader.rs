//! Reads the serialized AST (JSON, externally tagged node kinds).

use std::path::Path;

use serde::Deserialize;

use super::AstNode;
use crate::error::{CompileError, Result};
use crate::span::Span;

/// Parse an AST from JSON text. Syntax and shape errors carry a span into
/// `source` for rendering.
///
/// Statement lists nest one level per statement, so the nesting limit is
/// lifted and the parser grows its stack on demand instead.
pub fn parse_ast(source: &str) -> Result<AstNode> {
    let mut de = serde_json::Deserializer::from_str(source);
    de.disable_recursion_limit();
    let stacked = serde_stacker::Deserializer::new(&mut de);
    AstNode::deserialize(stacked)
        .and_then(|ast| de.end().map(|()| ast))
        .map_err(|e| CompileError::AstSyntax {
            message: e.to_string(),
            span: Span::at_line_col(source, e.line(), e.column()),
        })
}

/// Read and parse an AST file, returning the source text alongside the
/// tree so callers can render diagnostics against it.
pub fn read_ast(path: &Path) -> Result<(String, AstNode)> {
    let source = std::fs::read_to_string(path)?;
    let ast = parse_ast(&source)?;
    Ok((source, ast))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Builtin, NodeKind, Operator};

    #[test]
    fn test_parse_tagged_kinds() {
        let src = r#"{
            "kind": {"operator": "less_eq"},
            "left": {"kind": {"variable": "a"}},
            "right": {"kind": {"number": -3}}
        }"#;
        let ast = parse_ast(src).unwrap();
        assert_eq!(ast.kind, NodeKind::Operator(Operator::LessEq));
        assert_eq!(ast.left().unwrap().kind, NodeKind::Variable("a".into()));
        assert_eq!(ast.right().unwrap().kind, NodeKind::Number(-3));
    }

    #[test]
    fn test_parse_unit_and_builtin() {
        let ast = parse_ast(r#"{"kind": "pointer"}"#).unwrap();
        assert_eq!(ast.kind, NodeKind::Pointer);
        let ast = parse_ast(r#"{"kind": {"builtin": "out"}}"#).unwrap();
        assert_eq!(ast.kind, NodeKind::Builtin(Builtin::Out));
    }

    #[test]
    fn test_constructors_round_trip_through_json() {
        let prog = AstNode::program(vec![AstNode::func(
            "main",
            &[],
            vec![AstNode::ret(AstNode::call("f", vec![AstNode::number(4)]))],
        )]);
        let json = serde_json::to_string(&prog).unwrap();
        assert_eq!(parse_ast(&json).unwrap(), prog);
    }

    #[test]
    fn test_syntax_error_points_into_source() {
        let src = "{\n  \"kind\": {\"keyword\": \"IF\"},\n  \"left\": oops\n}";
        match parse_ast(src) {
            Err(CompileError::AstSyntax { span, .. }) => {
                let line = src[..span.start as usize].matches('\n').count() + 1;
                assert_eq!(line, 3);
            }
            other => panic!("expected AstSyntax, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = parse_ast(r#"{"kind": {"loop": 1}}"#).unwrap_err();
        assert!(matches!(err, CompileError::AstSyntax { .. }));
    }

    #[test]
    fn test_long_statement_list() {
        let body = (0..600)
            .map(|i| AstNode::assign("x", AstNode::number(i)))
            .chain([AstNode::ret(AstNode::var("x"))])
            .collect();
        let prog = AstNode::program(vec![AstNode::func("main", &[], body)]);
        let json = serde_json::to_string(&prog).unwrap();
        let ast = parse_ast(&json).unwrap();
        assert_eq!(ast, prog);
        let value = crate::ast::eval::Interpreter::new(&ast)
            .unwrap()
            .call("main", &[])
            .unwrap();
        assert_eq!(value, 599);
    }

    #[test]
    fn test_trailing_text_is_rejected() {
        let err = parse_ast(r#"{"kind": "pointer"} {"#).unwrap_err();
        assert!(matches!(err, CompileError::AstSyntax { .. }));
    }

    #[test]
    fn test_read_ast_missing_file() {
        let err = read_ast(Path::new("/nonexistent/prog.json")).unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }
}
