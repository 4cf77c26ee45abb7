//! Plain-text rendering of trace trees.
//!
//! ```text
//! FAIL attempt 1 (12.40ms)
//!   PASS required_fields (0.02ms)
//!   FAIL citation (0.31ms)
//!        error: 1 of 2 citation(s) not found in the reference texts (min score 80)
//!        hint: Quote citations verbatim from the reference texts
//! PASS attempt 2 (9.87ms)
//! ```

use std::fmt::Write;

use super::ValidationTrace;

const INDENT: &str = "  ";

/// Render traces depth-first, preserving insertion order at every level.
///
/// With `timing` off the output depends only on names and results, which
/// makes it stable across runs.
pub fn render_traces(traces: &[ValidationTrace], timing: bool) -> String {
    let mut out = String::new();
    for trace in traces {
        render_node(&mut out, trace, 0, timing);
    }
    out
}

fn status(trace: &ValidationTrace) -> &'static str {
    match &trace.result {
        Some(result) if result.is_valid() => "PASS",
        Some(_) => "FAIL",
        None => "OPEN",
    }
}

fn render_node(out: &mut String, trace: &ValidationTrace, depth: usize, timing: bool) {
    let pad = INDENT.repeat(depth);
    let _ = write!(out, "{pad}{} {}", status(trace), trace.strategy_name);
    if timing {
        if let Some(ms) = trace.duration_ms {
            let _ = write!(out, " ({ms:.2}ms)");
        }
    }
    out.push('\n');

    if let Some(result) = &trace.result {
        let detail_pad = format!("{pad}     ");
        if let Some(error) = result.error() {
            let _ = writeln!(out, "{detail_pad}error: {error}");
        }
        // Suggestions only on leaves; parents repeat their children otherwise
        if trace.children.is_empty() {
            for hint in result.suggestions() {
                let _ = writeln!(out, "{detail_pad}hint: {hint}");
            }
        }
    }

    for child in &trace.children {
        render_node(out, child, depth + 1, timing);
    }
}

#[cfg(test)]
mod tests {
    use super::super::DebugTracer;
    use super::*;
    use crate::result::ValidationResult;
    use std::collections::BTreeMap;

    #[test]
    fn test_render_without_timing() {
        let mut tracer = DebugTracer::new();
        let attempt = tracer.start_trace("attempt 1", BTreeMap::new());
        let a = tracer.start_trace("required_fields", BTreeMap::new());
        tracer.end_trace(a, ValidationResult::pass()).unwrap();
        let b = tracer.start_trace("citation", BTreeMap::new());
        tracer
            .end_trace(
                b,
                ValidationResult::fail("no citations provided").with_suggestion("Include citations"),
            )
            .unwrap();
        tracer
            .end_trace(attempt, ValidationResult::fail("1 strategy failed"))
            .unwrap();
        tracer.start_trace("attempt 2", BTreeMap::new());

        let expected = "\
FAIL attempt 1
     error: 1 strategy failed
  PASS required_fields
  FAIL citation
       error: no citations provided
       hint: Include citations
OPEN attempt 2
";
        assert_eq!(render_traces(&tracer.export(), false), expected);
    }

    #[test]
    fn test_render_with_timing_has_durations() {
        let mut tracer = DebugTracer::new();
        let h = tracer.start_trace("attempt 1", BTreeMap::new());
        tracer.end_trace(h, ValidationResult::pass()).unwrap();

        let rendered = tracer.render_summary();
        assert!(rendered.starts_with("PASS attempt 1 ("));
        assert!(rendered.trim_end().ends_with("ms)"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_traces(&[], true), "");
    }
}
