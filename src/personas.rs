//! Persona registry
//!
//! Each persona is a named responder identity: a generation backend kind plus
//! a prompt template, with an optional extension map for forward-compatible
//! fields. The registry also owns the compiled matchers used by persona
//! resolution (callout, mention, collective keyword).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which generation backend answers for a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI-compatible endpoint on the local network (LM Studio etc.)
    Local,
    /// Hosted OpenAI chat completions
    OpenAi,
    /// Google Gemini generateContent
    Gemini,
}

#[derive(Debug, Clone)]
pub struct PersonaConfig {
    pub name: String,
    pub backend: BackendKind,
    pub system_prompt: String,
    /// Forward-compatible extras (voice hints, UI color, ...). Absent for the
    /// built-in personas.
    pub extensions: Option<HashMap<String, String>>,
}

pub struct PersonaRegistry {
    personas: Vec<PersonaConfig>,
    default: String,
    callout_re: Regex,
    mention_res: Vec<(String, Regex)>,
}

/// Matches "collective" / "the collective" anywhere in the text.
static COLLECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:the\s+)?collective\b").unwrap());

impl PersonaRegistry {
    pub fn new(personas: Vec<PersonaConfig>, default: &str) -> Self {
        let alternation = personas
            .iter()
            .map(|p| regex::escape(&p.name))
            .collect::<Vec<_>>()
            .join("|");
        // Allow "Penny, ...", "Penny: ...", "Penny ..." and a wake-word style
        // greeting prefix like "hey Penny, ...".
        let callout_re = Regex::new(&format!(
            r"(?i)^\s*(?:(?:hey|hi|yo|ok|okay)[\s,]+)?({alternation})\b(?:\s*[:,;—–-]\s*|\s+)"
        ))
        .unwrap();
        let mention_res = personas
            .iter()
            .map(|p| {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&p.name))).unwrap();
                (p.name.clone(), re)
            })
            .collect();
        Self {
            personas,
            default: default.to_string(),
            callout_re,
            mention_res,
        }
    }

    /// The built-in trio. The default persona is validated against the set;
    /// an unknown configured default falls back to the first persona.
    pub fn builtin(default: &str) -> Self {
        let personas = vec![
            PersonaConfig {
                name: "domino".to_string(),
                backend: BackendKind::Local,
                system_prompt: DOMINO_PROMPT.to_string(),
                extensions: None,
            },
            PersonaConfig {
                name: "penny".to_string(),
                backend: BackendKind::OpenAi,
                system_prompt: PENNY_PROMPT.to_string(),
                extensions: None,
            },
            PersonaConfig {
                name: "jimmy".to_string(),
                backend: BackendKind::Gemini,
                system_prompt: JIMMY_PROMPT.to_string(),
                extensions: None,
            },
        ];
        let default = if personas.iter().any(|p| p.name == default) {
            default.to_string()
        } else {
            personas[0].name.clone()
        };
        Self::new(personas, &default)
    }

    pub fn get(&self, name: &str) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.name.clone()).collect()
    }

    pub fn default_persona(&self) -> &str {
        &self.default
    }

    /// Leading persona callout: returns (persona, remainder) when the text
    /// starts with a known name followed by a separator or whitespace.
    pub fn match_callout<'t>(&self, text: &'t str) -> Option<(String, &'t str)> {
        let caps = self.callout_re.captures(text)?;
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str().to_lowercase();
        Some((name, &text[whole.end()..]))
    }

    /// Distinct known personas mentioned anywhere in the text, ordered by
    /// first appearance.
    pub fn mentioned_in_order(&self, text: &str) -> Vec<String> {
        let mut hits: Vec<(usize, &str)> = Vec::new();
        for (name, re) in &self.mention_res {
            if let Some(m) = re.find(text) {
                hits.push((m.start(), name));
            }
        }
        hits.sort_by_key(|(pos, _)| *pos);
        hits.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    pub fn has_collective_keyword(&self, text: &str) -> bool {
        COLLECTIVE_RE.is_match(text)
    }
}

// ============================================================================
// Built-in prompt templates
// ============================================================================

const PLAIN_TEXT_RULES: &str = "Always answer in plain text only: no markdown, no bullet lists, \
no numbered lists, no headings, and no code fences. Do not show your reasoning or planning, and \
never include <think> blocks or any tags except the actions block when one is required. \
Unless asked for more detail, keep answers to one to three sentences.";

static DOMINO_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        "You are Domino, the household's smart-home and general-purpose assistant. \
You are witty, playful, and very direct, and you speak to the user in the second person. \
When the user clearly asks you to control the home (lights, climate, media, scenes), you MUST \
append a machine-readable actions block at the very end of your response, formatted as \
<actions>[{{...}}]</actions> with valid JSON inside. Each action has \"type\": \
\"ha_call_service\" and \"data\" with \"service\" (like \"light.turn_on\"), \"entity_id\", and \
optional \"service_data\". Do not mention the actions block in your spoken reply; just talk as \
if you are doing the thing. {PLAIN_TEXT_RULES}"
    )
});

static PENNY_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        "You are Penny, a warm, clever, conversational assistant. You help with planning, \
design, coding, and explanations, and you prioritize clarity and usefulness. \
{PLAIN_TEXT_RULES}"
    )
});

static JIMMY_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        "You are Jimmy, a polite research butler. Your tone is precise and respectful, and you \
push back when something is unsafe or does not make sense. {PLAIN_TEXT_RULES}"
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_three_personas() {
        let reg = PersonaRegistry::builtin("domino");
        assert_eq!(reg.names(), vec!["domino", "penny", "jimmy"]);
        assert_eq!(reg.default_persona(), "domino");
        assert!(reg.contains("penny"));
        assert!(!reg.contains("nobody"));
    }

    #[test]
    fn test_unknown_default_falls_back_to_first() {
        let reg = PersonaRegistry::builtin("nobody");
        assert_eq!(reg.default_persona(), "domino");
    }

    #[test]
    fn test_callout_with_punctuation() {
        let reg = PersonaRegistry::builtin("domino");
        let (name, rest) = reg.match_callout("Penny, when was the Alamo built").unwrap();
        assert_eq!(name, "penny");
        assert_eq!(rest, "when was the Alamo built");
    }

    #[test]
    fn test_callout_with_greeting_prefix() {
        let reg = PersonaRegistry::builtin("domino");
        let (name, rest) = reg.match_callout("hey domino, lights on").unwrap();
        assert_eq!(name, "domino");
        assert_eq!(rest, "lights on");
    }

    #[test]
    fn test_no_callout_mid_sentence() {
        let reg = PersonaRegistry::builtin("domino");
        assert!(reg.match_callout("tell penny I said hi").is_none());
    }

    #[test]
    fn test_mentions_in_first_appearance_order() {
        let reg = PersonaRegistry::builtin("domino");
        let order = reg.mentioned_in_order("jimmy, ask domino about penny");
        assert_eq!(order, vec!["jimmy", "domino", "penny"]);
    }

    #[test]
    fn test_collective_keyword() {
        let reg = PersonaRegistry::builtin("domino");
        assert!(reg.has_collective_keyword("hey, the collective: sound off"));
        assert!(reg.has_collective_keyword("collective, who's awake"));
        assert!(!reg.has_collective_keyword("collect the laundry"));
    }
}
