//! Request provenance.
//!
//! Every request issued to the backend, whether it produced a stage output
//! or condensed a chunk on the way there, is captured as a
//! [`RequestRecord`]. Stage records keep them alongside each output, and
//! [`render_markdown`] turns a list of them into a reviewable transcript.

use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Why a request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// The request that produced the caller's output.
    Generate,
    /// A chunk transform issued while reducing an oversized query.
    Condense,
}

/// One request sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub purpose: Purpose,
    pub tier: Tier,
    pub model: String,
    /// Tokens charged against the tier quota for this request.
    pub tokens: usize,
    /// Instructions, framing and query as sent.
    pub prompt: String,
    /// Times the request was re-issued after a rate-limit wait.
    #[serde(default)]
    pub rate_limit_waits: u32,
}

/// Format the full prompt of a request for logs and transcripts.
pub fn format_prompt(instructions: &str, framing: &str, query: &str) -> String {
    format!(
        "System prompt:\n{}\nHuman prompt:\n{}\nQuery:\n{}\n",
        instructions, framing, query
    )
}

/// Render records as a markdown transcript under `title`.
pub fn render_markdown(title: &str, records: &[RequestRecord]) -> String {
    let mut out = format!("# {}\n\n", title);
    for (i, record) in records.iter().enumerate() {
        let _ = writeln!(
            out,
            "## Request {} ({:?}, {} tier, {}, {} tokens)\n",
            i + 1,
            record.purpose,
            record.tier,
            record.model,
            record.tokens
        );
        if record.rate_limit_waits > 0 {
            let _ = writeln!(out, "_Rate-limited {} time(s)._\n", record.rate_limit_waits);
        }
        out.push_str(&record.prompt);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(purpose: Purpose, tokens: usize) -> RequestRecord {
        RequestRecord {
            purpose,
            tier: Tier::Cheap,
            model: "gpt-4".into(),
            tokens,
            prompt: format_prompt("Be precise.", "Brief this:\n{query}", "Case text"),
            rate_limit_waits: 0,
        }
    }

    #[test]
    fn test_format_prompt_sections() {
        let prompt = format_prompt("sys", "human", "query");
        assert_eq!(prompt, "System prompt:\nsys\nHuman prompt:\nhuman\nQuery:\nquery\n");
    }

    #[test]
    fn test_render_markdown() {
        let mut waited = record(Purpose::Generate, 120);
        waited.rate_limit_waits = 2;
        let md = render_markdown("Brief prompts", &[record(Purpose::Condense, 40), waited]);
        assert!(md.starts_with("# Brief prompts\n\n"));
        assert!(md.contains("## Request 1 (Condense, cheap tier, gpt-4, 40 tokens)"));
        assert!(md.contains("## Request 2 (Generate, cheap tier, gpt-4, 120 tokens)"));
        assert!(md.contains("_Rate-limited 2 time(s)._"));
        assert_eq!(md.matches("Case text").count(), 2);
    }

    #[test]
    fn test_record_serde() {
        let json = serde_json::to_string(&record(Purpose::Condense, 1)).unwrap();
        assert!(json.contains("\"purpose\":\"condense\""));
        let back: RequestRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record(Purpose::Condense, 1));
    }
}
