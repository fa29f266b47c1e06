//! Prompt assembly
//!
//! Renders the injectable context blocks (current time, long-term
//! preferences, rolling history, retrieval notes) and stitches them onto a
//! persona's prompt template. Personas demand plain text, so every block is
//! plain text too.

use serde_json::Value;

use crate::memory::store::{ChatTurn, RetrievalHit};
use crate::skills::now_with_zone;

pub fn time_block(promoted: &serde_json::Map<String, Value>) -> String {
    let (now, label) = now_with_zone(promoted);
    format!(
        "Current server time: {} ({}).",
        now.format("%Y-%m-%d %H:%M:%S"),
        label
    )
}

/// Long-term preference lines. The tech-stack field is clamped so a pasted
/// dependency dump cannot bloat every prompt.
pub fn preference_block(promoted: &serde_json::Map<String, Value>) -> String {
    let get = |key: &str| {
        promoted
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let mut lines: Vec<String> = Vec::new();
    if let Some(tz) = get("timezone") {
        lines.push(format!("User timezone: {}.", tz));
    }
    if let Some(location) = get("location") {
        lines.push(format!("User location: {}.", location));
    }
    if let Some(units) = get("preferred_units") {
        lines.push(format!("Preferred units: {}.", units));
    }
    if let Some(rules) = get("working_rules") {
        lines.push(format!("Working rules: {}", rules));
    }
    if let Some(stack) = get("tech_stack") {
        let mut stack = stack.to_string();
        if stack.chars().count() > 1400 {
            stack = stack.chars().take(1400).collect::<String>() + "...[TRUNCATED]";
        }
        lines.push(format!("Tech stack: {}", stack));
    }
    lines.join("\n")
}

pub fn chat_block(summary: &str, turns: &[ChatTurn]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !summary.is_empty() {
        parts.push(format!("Earlier context: {}", summary));
    }
    if !turns.is_empty() {
        parts.push("Recent turns:".to_string());
        for turn in turns {
            let content = turn.content.trim();
            if content.is_empty() {
                continue;
            }
            if turn.role == "user" {
                parts.push(format!("User: {}", content));
            } else {
                parts.push(format!("Assistant: {}", content));
            }
        }
    }
    parts.join("\n")
}

/// Retrieval notes with a hard character budget. Hits are appended until the
/// budget runs out; the block is then closed with a truncation marker so a
/// partial document is never mistaken for a full one.
pub fn retrieval_block(query: &str, hits: &[RetrievalHit], max_chars: usize) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let budget = max_chars.max(500);
    let mut lines: Vec<String> = vec![
        "BEGIN_RETRIEVED_NOTES".to_string(),
        "Non-authoritative. May be stale. Verify against live state.".to_string(),
        format!("Query: {:?}", query.trim()),
        format!("Returned: {} docs", hits.len()),
    ];
    let mut used: usize = lines.iter().map(|l| l.chars().count() + 1).sum();
    let mut truncated = false;

    fn append(
        line: String,
        budget: usize,
        used: &mut usize,
        truncated: &mut bool,
        lines: &mut Vec<String>,
    ) {
        if *truncated {
            return;
        }
        let len = line.chars().count();
        if *used + len + 1 <= budget {
            *used += len + 1;
            lines.push(line);
        } else {
            let remaining = budget.saturating_sub(*used);
            let marker = "...[TRUNCATED]";
            if remaining <= marker.len() {
                lines.push(marker.to_string());
            } else {
                let clipped: String = line.chars().take(remaining - marker.len()).collect();
                lines.push(clipped + marker);
            }
            *truncated = true;
        }
    }

    for hit in hits {
        if truncated {
            break;
        }
        let updated = hit
            .updated_at
            .map(|ts| format!("{}", ts as i64))
            .unwrap_or_else(|| "unknown".to_string());
        append(
            format!("DOC {} (score={:.3}, updated={}):", hit.doc_id, hit.score, updated),
            budget,
            &mut used,
            &mut truncated,
            &mut lines,
        );
        let content = hit.content.trim();
        append(
            if content.is_empty() {
                "(empty)".to_string()
            } else {
                content.to_string()
            },
            budget,
            &mut used,
            &mut truncated,
            &mut lines,
        );
        append("---".to_string(), budget, &mut used, &mut truncated, &mut lines);
    }

    lines.push("END_RETRIEVED_NOTES".to_string());
    lines.join("\n")
}

/// Final system prompt: persona template plus any non-empty context blocks.
pub fn assemble(template: &str, blocks: &[String]) -> String {
    let extra: Vec<&str> = blocks
        .iter()
        .map(String::as_str)
        .filter(|b| !b.is_empty())
        .collect();
    if extra.is_empty() {
        template.to_string()
    } else {
        format!("{}\n\n{}", template, extra.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preference_block_lines() {
        let mut promoted = serde_json::Map::new();
        promoted.insert("timezone".to_string(), json!("America/Chicago"));
        promoted.insert("preferred_units".to_string(), json!("imperial"));
        let block = preference_block(&promoted);
        assert!(block.contains("User timezone: America/Chicago."));
        assert!(block.contains("Preferred units: imperial."));
        assert!(!block.contains("location"));
    }

    #[test]
    fn test_preference_block_clamps_tech_stack() {
        let mut promoted = serde_json::Map::new();
        promoted.insert("tech_stack".to_string(), json!("x".repeat(5000)));
        let block = preference_block(&promoted);
        assert!(block.contains("...[TRUNCATED]"));
        assert!(block.chars().count() < 1500);
    }

    #[test]
    fn test_chat_block_renders_roles() {
        let turns = vec![
            ChatTurn {
                role: "user".to_string(),
                content: "hello".to_string(),
            },
            ChatTurn {
                role: "assistant".to_string(),
                content: "hi there".to_string(),
            },
        ];
        let block = chat_block("old digest", &turns);
        assert_eq!(
            block,
            "Earlier context: old digest\nRecent turns:\nUser: hello\nAssistant: hi there"
        );
    }

    #[test]
    fn test_retrieval_block_respects_budget() {
        let hits = vec![RetrievalHit {
            doc_id: "doc1".to_string(),
            title: "t".to_string(),
            content: "c".repeat(2000),
            tags: String::new(),
            score: -1.5,
            updated_at: Some(1_700_000_000.0),
        }];
        let block = retrieval_block("question", &hits, 600);
        assert!(block.starts_with("BEGIN_RETRIEVED_NOTES"));
        assert!(block.ends_with("END_RETRIEVED_NOTES"));
        assert!(block.contains("...[TRUNCATED]"));
        assert!(block.chars().count() < 700);
    }

    #[test]
    fn test_assemble_skips_empty_blocks() {
        let out = assemble("base", &[String::new(), "extra".to_string()]);
        assert_eq!(out, "base\n\nextra");
        assert_eq!(assemble("base", &[String::new()]), "base");
    }
}
