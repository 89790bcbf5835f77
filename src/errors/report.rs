// src/errors/report.rs
//! Plain-text rendering of diagnostics for logs.

use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, ThemeCharacters, ThemeStyles};

/// Render `report` with its code and help, ASCII only and without colors.
pub fn render_to_string(report: &dyn Diagnostic) -> String {
    let handler = GraphicalReportHandler::new_themed(GraphicalTheme {
        characters: ThemeCharacters::ascii(),
        styles: ThemeStyles::none(),
    });
    let mut output = String::new();
    if handler.render_report(&mut output, report).is_err() {
        return report.to_string();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OffloadError;
    use offload_jit::{CompileError, JitError, NodeId};
    use offload_runtime::RuntimeTypeError;

    #[test]
    fn render_arity_error() {
        let err = OffloadError::from(RuntimeTypeError::UnsupportedArity { arity: 6 });
        let output = render_to_string(&err);
        assert!(output.contains("E4002"), "should contain error code");
        assert!(output.contains("tuple arity 6"), "should contain message");
        assert!(output.contains("at most 4"), "should contain help");
    }

    #[test]
    fn render_compile_error_with_help() {
        let err = JitError::from(CompileError::InterpreterOnly {
            node: NodeId::new(3),
            op: "frame-state",
        });
        let output = render_to_string(&err);
        assert!(output.contains("E5001"));
        assert!(output.contains("shaping passes"));
        assert!(output.is_ascii());
    }

    #[test]
    fn render_unknown_composition() {
        let err = OffloadError::UnknownComposition { handle: 3 };
        let output = render_to_string(&err);
        assert!(output.contains("E6002"));
    }
}
