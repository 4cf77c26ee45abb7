//! Prompt text used around model calls.
//!
//! Everything here is deterministic: the same failing results always
//! produce the same feedback, so retries are reproducible in tests.

use std::fmt::Write;

use attest_core::PipelineResult;

use crate::providers::ResponseSchema;

/// System instruction prepended by [`ProviderClient`](crate::providers::ProviderClient).
pub const SCHEMA_INSTRUCTION_PROMPT: &str = r#"
You produce structured data.

Reply with a single JSON value that conforms to the schema below.
Do not wrap it in prose. Do not add fields the schema does not define.
If a value is unknown, use null rather than inventing one.
"#;

/// Opening line of corrective feedback.
pub const FEEDBACK_HEADER: &str =
    "Your previous response failed validation. Fix every problem below and reply with the complete corrected JSON only.";

/// Schema instruction for one response schema.
pub fn schema_instruction(schema: &ResponseSchema) -> String {
    let body = serde_json::to_string_pretty(&schema.schema).unwrap_or_else(|_| schema.schema.to_string());
    format!(
        "{}\nSchema name: {}\n\n```json\n{}\n```\n",
        SCHEMA_INSTRUCTION_PROMPT.trim_start(),
        schema.name,
        body
    )
}

/// Corrective feedback listing every failing strategy, in pipeline order.
///
/// ```text
/// Your previous response failed validation. ...
///
/// 1. [citation] 1 of 2 citation(s) not found in the reference texts (min score 80)
///    - Quote citations verbatim from the reference texts
/// 2. [required_fields] missing required fields: title
///    - Include the 'title' field in the response
/// ```
pub fn build_feedback(result: &PipelineResult) -> String {
    let mut out = String::from(FEEDBACK_HEADER);
    out.push('\n');

    for (index, outcome) in result.failures().enumerate() {
        let error = outcome.result.error().unwrap_or("validation failed");
        let _ = write!(out, "\n{}. [{}] {}", index + 1, outcome.strategy_name, error);
        for suggestion in outcome.result.suggestions() {
            let _ = write!(out, "\n   - {suggestion}");
        }
    }

    out
}
