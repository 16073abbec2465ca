use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::daemon::storage::entities::{ActivityRecord, Confidence};

pub const DEFAULT_ANALYSIS_PROMPT: &str = "\
Describe what the user is doing in this screenshot. Mention:

1. Which application or website is in use
2. The kind of activity (programming, browsing, writing a document, watching a video, ...)
3. The concrete content being worked on, if it is visible

Summarize the current activity in one or two sentences. On the last line write \
`Confidence: high`, `Confidence: medium` or `Confidence: low` depending on how certain you are.";

pub const DEFAULT_SUMMARY_QUERY: &str = "Summarize the activities in this time range.";

/// Described records that make up the context of an analysis.
pub const CONTEXT_RECORDS: usize = 3;

pub fn with_context(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.is_empty() => {
            format!("{prompt}\n\nAdditional context: {context}")
        }
        _ => prompt.to_string(),
    }
}

/// Context from recent records, newest first. Records without a description are skipped.
pub fn recent_context(recent: &[ActivityRecord]) -> Option<String> {
    let parts = recent
        .iter()
        .filter_map(|v| {
            v.description
                .as_deref()
                .map(|description| format!("{}: {description}", v.timestamp.to_rfc3339()))
        })
        .take(CONTEXT_RECORDS)
        .collect::<Vec<_>>();

    if parts.is_empty() {
        None
    } else {
        Some(format!("Recent activities: {}", parts.join("; ")))
    }
}

/// Prompt for the text model summarizing `records` between `start` and `end`.
pub fn summary_prompt(
    query: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    records: &[ActivityRecord],
) -> String {
    let mut prompt = format!(
        "{query}\n\nTime range: {} to {}\n\nActivity records:\n",
        start.to_rfc3339(),
        end.to_rfc3339()
    );
    for record in records {
        let _ = writeln!(
            prompt,
            "- {}: {}",
            record.timestamp.to_rfc3339(),
            record.description.as_deref().unwrap_or("no description")
        );
    }
    prompt
}

/// Splits a trailing `Confidence: <label>` line off the model's answer. Answers without one are
/// treated as high confidence.
pub fn extract_confidence(answer: &str) -> (String, Confidence) {
    let trimmed = answer.trim();
    let (body, last_line) = match trimmed.rsplit_once('\n') {
        Some((body, last)) => (body, last),
        None => ("", trimmed),
    };

    // Models like to decorate the label with markdown.
    let strip = |v: &str| {
        v.trim_matches(|c: char| matches!(c, '*' | '`' | '.') || c.is_whitespace())
            .to_string()
    };
    let label = strip(last_line)
        .split_once(':')
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("confidence"))
        .and_then(|(_, value)| Confidence::parse(&strip(value)));

    match label {
        Some(confidence) if !body.trim().is_empty() => (body.trim().to_string(), confidence),
        _ => (trimmed.to_string(), Confidence::High),
    }
}
