//! Promoted-state inference
//!
//! Pure heuristics over the user's utterance that catch explicit
//! clarifications worth remembering long-term: location, timezone, preferred
//! units, and per-persona TTS provider choices. The caller decides whether a
//! detected patch is applied or merely suggested.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:i\s*am|i'm|im)\s+in\s+([a-zA-Z][\w .,'-]{1,80})\b").unwrap()
});

/// Common US zone phrases mapped to IANA names.
const ZONE_PHRASES: &[(&str, &str)] = &[
    ("central", "America/Chicago"),
    ("eastern", "America/New_York"),
    ("mountain", "America/Denver"),
    ("pacific", "America/Los_Angeles"),
    ("utc", "UTC"),
    ("gmt", "UTC"),
];

static ZONE_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(central|eastern|mountain|pacific|utc|gmt)\s+time\b").unwrap()
});

static ZONE_ABBREV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(cst|cdt|est|edt|pst|pdt)\b").unwrap());

static METRIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmetric\b").unwrap());
static IMPERIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(imperial|us\s+customary)\b").unwrap());

const PROVIDER_WORDS: &[(&str, &str)] = &[
    ("eleven labs", "elevenlabs"),
    ("elevenlabs", "elevenlabs"),
    ("fish", "fish"),
    ("browser", "browser"),
    ("disabled", "off"),
    ("disable", "off"),
    ("off", "off"),
];

/// Scan an utterance for promotable preferences. Returns the patch plus one
/// human-readable reason per detection (shown to the user when the patch is
/// suggested rather than applied).
pub fn infer_patch(text: &str, personas: &[String]) -> (Map<String, Value>, Vec<String>) {
    let text = text.trim();
    if text.is_empty() {
        return (Map::new(), Vec::new());
    }

    let mut patch = Map::new();
    let mut reasons = Vec::new();
    let lowered = text.to_lowercase();

    // Location, stored verbatim.
    if let Some(caps) = LOCATION_RE.captures(text) {
        let loc = caps[1].trim().trim_end_matches('.').to_string();
        if !loc.is_empty() {
            reasons.push(format!("Detected location: {}", loc));
            patch.insert("location".to_string(), json!(loc));
        }
    }

    // Timezone phrases ("central time"), then bare abbreviations.
    if let Some(caps) = ZONE_PHRASE_RE.captures(&lowered) {
        let phrase = &caps[1];
        if let Some((_, iana)) = ZONE_PHRASES.iter().find(|(p, _)| *p == phrase) {
            reasons.push(format!("Detected timezone: {} time -> {}", phrase, iana));
            patch.insert("timezone".to_string(), json!(iana));
        }
    }
    if !patch.contains_key("timezone") {
        if let Some(caps) = ZONE_ABBREV_RE.captures(&lowered) {
            let iana = match &caps[1] {
                "cst" | "cdt" => "America/Chicago",
                "est" | "edt" => "America/New_York",
                _ => "America/Los_Angeles",
            };
            reasons.push(format!("Detected timezone: {}", iana));
            patch.insert("timezone".to_string(), json!(iana));
        }
    }

    // Units.
    if METRIC_RE.is_match(&lowered) {
        reasons.push("Detected preferred units: metric".to_string());
        patch.insert("preferred_units".to_string(), json!("metric"));
    } else if IMPERIAL_RE.is_match(&lowered) {
        reasons.push("Detected preferred units: imperial".to_string());
        patch.insert("preferred_units".to_string(), json!("imperial"));
    }

    // Per-persona TTS overrides ("use fish for domino").
    for persona in personas {
        let name = regex::escape(persona);
        let patterns = [
            format!(r"\buse\s+([a-z ]+)\s+for\s+{}\b", name),
            format!(r"\bturn\s+([a-z ]+)\s+(?:tts\s+)?for\s+{}\b", name),
            format!(r"\b{}\b[^\n\r]*\b(?:use|tts)\b[^\n\r]*?\b([a-z ]+)\b", name),
        ];

        let candidate = patterns.iter().find_map(|pattern| {
            Regex::new(pattern)
                .ok()
                .and_then(|re| re.captures(&lowered))
                .map(|caps| caps[1].trim().to_string())
        });
        let Some(candidate) = candidate else { continue };

        let chosen = PROVIDER_WORDS
            .iter()
            .find(|(word, _)| candidate.contains(word))
            .map(|(_, provider)| *provider);
        if let Some(provider) = chosen {
            reasons.push(format!("Detected TTS override: {} -> {}", persona, provider));
            patch
                .entry("tts_overrides".to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .expect("tts_overrides is an object")
                .insert(persona.clone(), json!(provider));
        }
    }

    (patch, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn personas() -> Vec<String> {
        vec!["domino".to_string(), "penny".to_string(), "jimmy".to_string()]
    }

    #[test]
    fn test_detects_location() {
        let (patch, reasons) = infer_patch("by the way, I'm in Austin, Texas", &personas());
        assert_eq!(patch["location"], "Austin, Texas");
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn test_detects_zone_phrase() {
        let (patch, _) = infer_patch("we're on central time here", &personas());
        assert_eq!(patch["timezone"], "America/Chicago");
    }

    #[test]
    fn test_detects_zone_abbreviation() {
        let (patch, _) = infer_patch("switch the clock to PST", &personas());
        assert_eq!(patch["timezone"], "America/Los_Angeles");
    }

    #[test]
    fn test_detects_units() {
        let (patch, _) = infer_patch("give me metric from now on", &personas());
        assert_eq!(patch["preferred_units"], "metric");
    }

    #[test]
    fn test_detects_tts_override() {
        let (patch, reasons) = infer_patch("use fish for domino please", &personas());
        assert_eq!(patch["tts_overrides"]["domino"], "fish");
        assert!(reasons.iter().any(|r| r.contains("domino")));
    }

    #[test]
    fn test_no_signal_yields_empty_patch() {
        let (patch, reasons) = infer_patch("what's the weather like", &personas());
        assert!(patch.is_empty());
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_empty_text() {
        let (patch, reasons) = infer_patch("   ", &personas());
        assert!(patch.is_empty());
        assert!(reasons.is_empty());
    }
}
