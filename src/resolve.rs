//! Persona resolution
//!
//! Pure decision logic: given the raw utterance and an explicit target
//! selector, decide which persona(s) answer and what text each receives.
//! No I/O here; the registry supplies the compiled matchers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::HubError;
use crate::personas::PersonaRegistry;

/// Outcome of target resolution for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Single { persona: String, text: String },
    FanOut { targets: Vec<String>, text: String },
}

impl Resolution {
    pub fn targets(&self) -> Vec<String> {
        match self {
            Self::Single { persona, .. } => vec![persona.clone()],
            Self::FanOut { targets, .. } => targets.clone(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Single { text, .. } | Self::FanOut { text, .. } => text,
        }
    }

    /// Top-level persona label for responses and stream metadata.
    pub fn label(&self) -> &str {
        match self {
            Self::Single { persona, .. } => persona,
            Self::FanOut { .. } => "collective",
        }
    }
}

/// Resolve the target persona set for an utterance.
///
/// An explicit known selector wins outright. Under "auto", fan-out detection
/// (collective keyword, or two-plus distinct mentions) runs before the
/// leading-callout rule so that "domino and penny, ..." addresses both rather
/// than reading as a callout to the first name. An unrecognized explicit
/// selector is a client error, never a fallback.
pub fn resolve(
    registry: &PersonaRegistry,
    selector: &str,
    text: &str,
) -> Result<Resolution, HubError> {
    let selector = selector.trim().to_lowercase();

    if selector != "auto" {
        if !registry.contains(&selector) {
            return Err(HubError::UnknownPersona(selector));
        }
        return Ok(Resolution::Single {
            persona: selector,
            text: text.to_string(),
        });
    }

    let collective = registry.has_collective_keyword(text);
    let mentioned = registry.mentioned_in_order(text);

    if collective || mentioned.len() >= 2 {
        let targets = if collective {
            registry.names()
        } else {
            mentioned
        };
        let stripped = strip_addressing(registry, text);
        // Fan-out with no concrete names should not normally occur; fall back
        // to the default persona as a single target.
        if targets.is_empty() {
            return Ok(Resolution::Single {
                persona: registry.default_persona().to_string(),
                text: stripped,
            });
        }
        return Ok(Resolution::FanOut {
            targets,
            text: stripped,
        });
    }

    if let Some((persona, rest)) = registry.match_callout(text) {
        return Ok(Resolution::Single {
            persona,
            text: rest.to_string(),
        });
    }

    Ok(Resolution::Single {
        persona: registry.default_persona().to_string(),
        text: text.to_string(),
    })
}

static GREETING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:hey|hi|yo|ok|okay)\b[\s,]*").unwrap());
static COLLECTIVE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:the\s+)?collective\b").unwrap());
static JOINER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(?:and|&|\+)\b\s*").unwrap());
static PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:,|:|;|—|–|-|\.{3,}|…|\.)\s*").unwrap());

/// Strip leading addressing (greeting, names in any order, the collective
/// keyword, joiners, punctuation) so generation backends are not fed the
/// instruction to talk to everyone.
pub fn strip_addressing(registry: &PersonaRegistry, text: &str) -> String {
    let mut s = text.trim().to_string();
    s = GREETING_RE.replace(&s, "").into_owned();
    loop {
        let before = s.clone();
        s = COLLECTIVE_PREFIX_RE.replace(&s, "").into_owned();
        if let Some((_, rest)) = leading_name(registry, &s) {
            s = rest;
        }
        s = JOINER_RE.replace(&s, "").into_owned();
        s = PUNCT_RE.replace(&s, "").into_owned();
        s = s.trim_start().to_string();
        if s == before {
            break;
        }
    }
    s
}

/// A known persona name at the very start of the text (no separator needed).
fn leading_name(registry: &PersonaRegistry, text: &str) -> Option<(String, String)> {
    let trimmed = text.trim_start();
    for name in registry.names() {
        if trimmed.len() >= name.len()
            && trimmed.is_char_boundary(name.len())
            && trimmed[..name.len()].eq_ignore_ascii_case(&name)
            && trimmed[name.len()..]
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true)
        {
            return Some((name.clone(), trimmed[name.len()..].to_string()));
        }
    }
    None
}
