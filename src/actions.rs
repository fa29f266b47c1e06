//! Side-effect instructions and their executor
//!
//! Replies may embed typed instructions for the home-automation backend.
//! Execution is best-effort: a malformed or failing instruction is logged and
//! skipped, and never blocks sibling instructions or reply delivery.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// Sends `ha_call_service` instructions to Home Assistant.
pub struct ActionExecutor {
    client: reqwest::Client,
    base_url: Option<String>,
    token: String,
}

impl ActionExecutor {
    pub fn new(base_url: &str, token: &str, timeout_secs: u64) -> Self {
        let enabled = !base_url.is_empty() && !token.is_empty();
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: enabled.then(|| base_url.trim_end_matches('/').to_string()),
            token: token.to_string(),
        }
    }

    /// Executor with no backend configured; every execute is a no-op.
    pub fn disabled() -> Self {
        Self::new("", "", 5)
    }

    pub fn enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Run every instruction, skipping malformed ones and logging failures.
    /// Returns Err only when at least one instruction actually failed, so the
    /// caller can surface a target-scoped error without losing the reply.
    pub async fn execute(&self, actions: &[Action]) -> Result<()> {
        let Some(base_url) = &self.base_url else {
            return Ok(());
        };
        if actions.is_empty() {
            return Ok(());
        }

        let mut failed = 0usize;
        for action in actions {
            if action.kind != "ha_call_service" {
                continue;
            }
            let data = &action.data;
            let Some(service) = data.get("service").and_then(Value::as_str) else {
                continue;
            };
            let Some(entity_id) = data.get("entity_id") else {
                continue;
            };

            let Some((domain, service_name)) = service.split_once('.') else {
                warn!("Bad service format: {}", service);
                continue;
            };

            let mut payload = serde_json::Map::new();
            payload.insert("entity_id".to_string(), entity_id.clone());
            if let Some(Value::Object(extra)) = data.get("service_data") {
                for (k, v) in extra {
                    payload.insert(k.clone(), v.clone());
                }
            }

            let url = format!("{}/api/services/{}/{}", base_url, domain, service_name);
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&Value::Object(payload))
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            if let Err(e) = result {
                warn!("Error calling service {} on {}: {}", service, entity_id, e);
                failed += 1;
            }
        }

        if failed > 0 {
            bail!("{} action(s) failed", failed);
        }
        Ok(())
    }
}
