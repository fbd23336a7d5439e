use std::ops::Range;

use crate::error::CompileError;
use crate::span::Span;

/// A user-facing report built from a [`CompileError`] (or a warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Option<Span>) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, span: Option<Span>) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne. `source` is the AST
    /// file text; errors without a span are reported without a label.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let offset = self.span.map(|s| s.start as usize).unwrap_or(0);
        let mut report = Report::<(&str, Range<usize>)>::build(kind, filename, offset)
            .with_message(&self.message);

        if let Some(span) = self.span {
            report = report.with_label(
                Label::new((filename, span.range()))
                    .with_message(&self.message)
                    .with_color(color),
            );
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        let _ = report
            .finish()
            .eprint((filename, Source::from(source)));
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        let diag = Diagnostic::error(err.to_string(), err.span());
        match err {
            CompileError::UnknownKeyword(_) => diag.with_help(
                "statements are ST, RET, IF, ELSE, VAR or a CALL/OUT/IN node".to_string(),
            ),
            CompileError::ArityMismatch { .. } => diag
                .with_note("arguments are passed on the stack and popped by the callee".to_string()),
            CompileError::LiteralOutOfRange(_) => {
                diag.with_note("literals are encoded as sign-extended imm32".to_string())
            }
            CompileError::UndefinedSymbol(name) if name == "main" => {
                diag.with_help("executables start at a function named `main`".to_string())
            }
            CompileError::DanglingTemporary { .. } => diag.with_note(
                "temporaries must be consumed by the statement that produced them".to_string(),
            ),
            err if !err.is_user_error() => {
                diag.with_note("this is a compiler bug, not a problem with the input".to_string())
            }
            _ => diag,
        }
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let d = Diagnostic::error("unknown keyword".to_string(), Some(Span::new(10, 15)));
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "unknown keyword");
        assert_eq!(d.span, Some(Span::new(10, 15)));
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::warning("unused result".to_string(), None)
            .with_note("note 1".to_string())
            .with_help("help text".to_string())
            .with_note("note 2".to_string());
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.notes.len(), 2);
        assert!(d.help.is_some());
    }

    #[test]
    fn test_from_compile_error() {
        let err = CompileError::UnknownKeyword("LOOP".to_string());
        let d = Diagnostic::from(&err);
        assert_eq!(d.message, "unknown keyword `LOOP`");
        assert!(d.help.is_some());
        assert!(d.span.is_none());

        let err = CompileError::AstSyntax {
            message: "EOF while parsing".to_string(),
            span: Span::new(2, 3),
        };
        assert_eq!(Diagnostic::from(&err).span, Some(Span::new(2, 3)));
    }

    #[test]
    fn test_internal_error_gets_note() {
        let err = CompileError::LayoutMismatch {
            block: "IF0".to_string(),
            expected: 32,
            actual: 40,
        };
        let d = Diagnostic::from(&err);
        assert_eq!(d.notes.len(), 1);
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "{\"kind\": {\"keyword\": \"LOOP\"}}";
        let d = Diagnostic::error("unknown keyword".to_string(), Some(Span::new(10, 27)));
        d.render("prog.ast.json", source);
        Diagnostic::error("no span".to_string(), None).render("prog.ast.json", source);
    }

    #[test]
    fn test_render_diagnostics_multiple() {
        let source = "{}";
        let diagnostics = vec![
            Diagnostic::warning("first".to_string(), None),
            Diagnostic::error("second".to_string(), Some(Span::new(0, 1))),
        ];
        render_diagnostics(&diagnostics, "prog.ast.json", source);
    }
}
