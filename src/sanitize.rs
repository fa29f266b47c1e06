//! Reply cleanup heuristics
//!
//! Everything here is a pure function from model output to display text:
//! action-block extraction, diagnostic-echo truncation, think-block and
//! markdown stripping, and emotional-tone tagging. The diagnostic detection
//! is a fixed marker list and intentionally best-effort.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::actions::Action;

static ACTIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<actions>\s*(\[.*?\])\s*</actions>").unwrap());
static THINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").unwrap());
static MARKDOWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|\*|__|_|`").unwrap());
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-•]\s+").unwrap());

/// Lines echoing injected context back at the user are cut at the marker.
/// Some backends occasionally repeat system context verbatim; these should
/// never be user-facing.
const DEBUG_MARKERS: &[&str] = &["context: user=", "noise_level=", "noiselevel="];

/// Emotion tags a reply may carry, e.g. "(joyful) Happy to help."
const EMOTION_TAGS: &[&str] = &[
    "joyful",
    "sad",
    "angry",
    "excited",
    "surprised",
    "scared",
    "whisper",
];

/// Pull the `<actions>[...]</actions>` JSON out of a raw reply.
/// On parse failure the actions are dropped and the text returned unchanged.
pub fn extract_actions(text: &str) -> (String, Vec<Action>) {
    let Some(caps) = ACTIONS_RE.captures(text) else {
        return (text.to_string(), Vec::new());
    };

    let blob = caps.get(1).map(|m| m.as_str()).unwrap_or("[]");
    let actions = match serde_json::from_str::<serde_json::Value>(blob) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(single) => vec![single],
        Err(e) => {
            warn!("Failed to parse actions block: {}", e);
            return (text.to_string(), Vec::new());
        }
    };

    let actions: Vec<Action> = match actions
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()
    {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Failed to parse actions block: {}", e);
            return (text.to_string(), Vec::new());
        }
    };

    let cleaned = ACTIONS_RE.replace_all(text, "").trim().to_string();
    (cleaned, actions)
}

/// Clean model output for display and TTS:
/// cut diagnostic context echoes, drop `<think>` blocks, remove markdown
/// decoration and bullet prefixes, and collapse everything to one paragraph
/// so synthesis doesn't read a grocery list.
pub fn clean_reply_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut kept_lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let lower = line.to_lowercase();
        let cut_idx = DEBUG_MARKERS
            .iter()
            .filter_map(|marker| lower.find(marker))
            .filter(|idx| line.is_char_boundary(*idx))
            .min();
        match cut_idx {
            Some(idx) => {
                let removed = line[idx..].trim();
                if !removed.is_empty() {
                    let preview: String = removed.chars().take(400).collect();
                    info!("Stripped debug context from reply: {}", preview);
                }
                kept_lines.push(line[..idx].trim_end().to_string());
            }
            None => kept_lines.push(line.to_string()),
        }
    }
    let text = kept_lines.join("\n");

    let text = THINK_RE.replace_all(&text, "");
    let text = MARKDOWN_RE.replace_all(&text, "");

    let mut paragraphs: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = BULLET_RE.replace(line, "");
        let line = line.trim();
        if !line.is_empty() {
            paragraphs.push(line.to_string());
        }
    }
    paragraphs.join(" ")
}

/// First emotion tag present in the text, if any.
pub fn tone_tag(text: &str) -> Option<String> {
    EMOTION_TAGS
        .iter()
        .filter_map(|tag| {
            let needle = format!("({})", tag);
            text.find(&needle).map(|pos| (pos, tag.to_string()))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, tag)| tag)
}
