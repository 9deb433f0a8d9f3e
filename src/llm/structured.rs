//! Structured-output parsing for collaborator responses.
//!
//! Models answer elicitation questions in JSON, usually wrapped in prose or
//! markdown fences. The pipeline here is: pull out the JSON candidate,
//! lowercase it (keys and values; downstream code matches on lowercase
//! strings), parse, and if the text is syntactically broken, send it back
//! to the model with the parse error for up to [`REPAIR_ROUNDS`] repair
//! round-trips before failing.
//!
//! Two retry layers compose. The repair loop above fixes malformed JSON in
//! place. [`with_retry`] is the outer layer: it re-asks the whole question
//! when the parsed JSON does not carry the expected fields, because no
//! amount of syntax repair puts a missing key back.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::backend::{BackendSpec, LanguageBackend};

/// Repair round-trips before a parse failure becomes fatal.
pub const REPAIR_ROUNDS: usize = 3;

/// Re-ask attempts for calls whose answers must carry specific fields.
pub const ASK_ATTEMPTS: usize = 5;

/// Prompt sent with broken JSON on a repair round-trip.
const REPAIR_PROMPT: &str = r#"The following JSON is invalid:

{json}

It fails to parse with this error: {error}

Fix all errors and return the corrected JSON. Return only the JSON, with no commentary."#;

/// Pull a JSON candidate out of a response that may wrap it in prose or
/// markdown fences. Returns `None` when nothing bracket-balanced is found.
pub fn extract_json(content: &str) -> Option<String> {
    let trimmed = content.trim();

    // Fenced blocks first; models that fence at all put the payload there.
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let body = &trimmed[start + fence.len()..];
            if let Some(end) = body.find("```") {
                if let Some(candidate) = first_balanced(&body[..end]) {
                    return Some(candidate);
                }
            }
        }
    }

    first_balanced(trimmed)
}

/// Find the first balanced JSON object or array in `text`, honoring string
/// literals and escapes so braces inside quoted values do not count.
fn first_balanced(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let (open, close) = match text[start..].chars().next()? {
        '{' => ('{', '}'),
        _ => ('[', ']'),
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a collaborator response into `T`.
///
/// The raw text is lowercased before parsing, so expected field names are
/// always lowercase and string values come back lowercased too. Broken
/// JSON goes back through the backend for repair up to [`REPAIR_ROUNDS`]
/// times; JSON that parses but lacks the fields `T` expects fails
/// immediately (the caller's [`with_retry`] re-asks the question instead).
pub async fn parse_structured<T: DeserializeOwned>(
    backend: &dyn LanguageBackend,
    spec: &BackendSpec,
    raw: &str,
) -> Result<T, LlmError> {
    let mut current = raw.to_string();

    for round in 0..=REPAIR_ROUNDS {
        let candidate = extract_json(&current).unwrap_or_else(|| current.trim().to_string());
        let lowered = candidate.to_lowercase();

        match serde_json::from_str::<serde_json::Value>(&lowered) {
            Ok(value) => {
                return serde_json::from_value::<T>(value).map_err(|e| {
                    LlmError::ParseError(format!("response shape mismatch: {e}; got: {lowered}"))
                });
            }
            Err(parse_err) if round < REPAIR_ROUNDS => {
                debug!(round = round + 1, error = %parse_err, "repairing malformed JSON");
                let prompt = REPAIR_PROMPT
                    .replace("{json}", &candidate)
                    .replace(
                        "{error}",
                        &format!(
                            "{} at line {} column {}",
                            parse_err,
                            parse_err.line(),
                            parse_err.column()
                        ),
                    );
                current = backend.generate(spec.request(prompt)).await?.content;
            }
            Err(parse_err) => {
                return Err(LlmError::ParseError(format!(
                    "invalid JSON after {REPAIR_ROUNDS} repair rounds: {parse_err}"
                )));
            }
        }
    }

    unreachable!("repair loop returns on every path")
}

/// Ask one structured question: build the request from `spec`, generate,
/// and parse the answer into `T` with the repair loop.
pub async fn ask_structured<T: DeserializeOwned>(
    backend: &dyn LanguageBackend,
    spec: &BackendSpec,
    prompt: &str,
) -> Result<T, LlmError> {
    let response = backend.generate(spec.request(prompt)).await?;
    parse_structured(backend, spec, &response.content).await
}

/// Run `op` up to `attempts` times, retrying only on parse errors.
///
/// Transport and configuration errors surface on the first occurrence; a
/// parse error means the model answered in the wrong shape and asking
/// again is the only recourse.
pub async fn with_retry<T, F, Fut>(attempts: usize, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
{
    debug_assert!(attempts > 0);
    for attempt in 1..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                warn!(attempt, error = %err, "structured call failed; asking again");
            }
            Err(err) => return Err(err),
        }
    }
    op().await
}

// =============================================================================
// Lenient field deserializers
// =============================================================================

// Models asked for quoted values still answer `{"answer": 7}` often enough
// that reply structs use these in place of plain `String` fields.

/// Deserialize a string field, accepting a bare JSON number or bool.
pub fn de_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_string(&value))
}

/// Deserialize a list of strings, accepting bare JSON numbers or bools as
/// elements.
pub fn de_string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(values.iter().map(value_to_string).collect())
}

/// Deserialize a string-to-string map, accepting bare JSON numbers or
/// bools as values.
pub fn de_string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let values = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .map(|(key, value)| (key, value_to_string(&value)))
        .collect())
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
