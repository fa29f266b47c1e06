//! Local skills
//!
//! Fixed, deterministic query kinds that bypass the generation backends and
//! answer from local computation. Currently: clock questions. Detection is a
//! pure classifier so it stays independently testable.

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(what\s*'?s\s+the\s+time|what\s+time\s+is\s+it|current\s+time|time\s+now|tell\s+me\s+the\s+time)\b",
    )
    .unwrap()
});

pub fn is_clock_question(text: &str) -> bool {
    CLOCK_RE.is_match(text)
}

/// Current local time plus a display label for the zone. The preference
/// document may carry an IANA timezone name; the hub clock itself runs in
/// server-local time, so the name is used as a label only.
pub fn now_with_zone(promoted: &serde_json::Map<String, Value>) -> (chrono::DateTime<Local>, String) {
    let now = Local::now();
    let label = promoted
        .get("timezone")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| now.format("%:z").to_string());
    (now, label)
}

pub fn clock_reply(promoted: &serde_json::Map<String, Value>) -> String {
    let (now, label) = now_with_zone(promoted);
    format!(
        "Current time: {} ({}).",
        now.format("%Y-%m-%d %H:%M:%S"),
        label
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clock_question_variants() {
        assert!(is_clock_question("what time is it"));
        assert!(is_clock_question("hey, what's the time?"));
        assert!(is_clock_question("tell me the time please"));
        assert!(is_clock_question("Current Time now?"));
    }

    #[test]
    fn test_non_clock_questions() {
        assert!(!is_clock_question("set a timer for ten minutes"));
        assert!(!is_clock_question("how long until sunset"));
        assert!(!is_clock_question(""));
    }

    #[test]
    fn test_clock_reply_uses_promoted_zone_label() {
        let mut promoted = serde_json::Map::new();
        promoted.insert("timezone".to_string(), json!("America/Chicago"));
        let reply = clock_reply(&promoted);
        assert!(reply.starts_with("Current time: "));
        assert!(reply.contains("America/Chicago"));
    }

    #[test]
    fn test_clock_reply_without_zone_uses_offset() {
        let promoted = serde_json::Map::new();
        let reply = clock_reply(&promoted);
        assert!(reply.starts_with("Current time: "));
    }
}
