//! Discord webhook notifier
//!
//! Posts failure reports as embeds. Messages longer than one embed
//! description are split on word boundaries.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use super::Notifier;
use crate::core::{CoreError, CoreResult};

/// Environment variable holding the webhook URL
pub const DISCORD_WEBHOOK_ENV: &str = "DISCORD_WEBHOOK_URL";

/// Maximum characters per embed description
pub const DISCORD_MESSAGE_LIMIT: usize = 4000;

const EMBED_TITLE: &str = ":warning: Error found while running the automation :warning:";
const EMBED_COLOR: u32 = 0xE74C3C;

/// Splits `message` into parts of at most `limit` characters.
///
/// Breaks on whitespace when possible, otherwise mid-word.
pub fn split_message(message: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut rest = message.trim();
    while !rest.is_empty() {
        if rest.chars().count() <= limit {
            parts.push(rest.to_string());
            break;
        }
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = rest[..hard_end]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(hard_end);
        parts.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    parts
}

/// [`Notifier`] posting to a Discord webhook
pub struct DiscordNotifier {
    client: reqwest::blocking::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> CoreResult<Self> {
        let webhook_url = webhook_url.into();
        if !webhook_url.starts_with("https://") {
            return Err(CoreError::Config(
                "Discord webhook URL must start with https://".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    /// Builds a notifier from `DISCORD_WEBHOOK_URL`, if set
    pub fn from_env() -> Option<CoreResult<Self>> {
        std::env::var(DISCORD_WEBHOOK_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, message: &str) -> CoreResult<()> {
        let parts = split_message(message, DISCORD_MESSAGE_LIMIT);
        for part in &parts {
            let payload = json!({
                "embeds": [{
                    "title": EMBED_TITLE,
                    "description": part,
                    "color": EMBED_COLOR,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }]
            });
            let response = self
                .client
                .post(&self.webhook_url)
                .json(&payload)
                .send()
                .map_err(|e| CoreError::Collaborator(format!("Discord request failed: {}", e)))?;
            if !response.status().is_success() {
                return Err(CoreError::Collaborator(format!(
                    "Discord webhook returned HTTP {}",
                    response.status()
                )));
            }
        }
        info!("Sent {} Discord notification part(s)", parts.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_on_words() {
        let parts = split_message("alpha beta gamma delta", 11);
        assert_eq!(parts, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_split_message_hard_breaks_long_words() {
        let parts = split_message("abcdefghij", 4);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_split_long_report() {
        let message = "error ".repeat(1500);
        let parts = split_message(&message, DISCORD_MESSAGE_LIMIT);
        assert_eq!(parts.len(), 3);
        assert!(parts
            .iter()
            .all(|p| p.chars().count() <= DISCORD_MESSAGE_LIMIT));
    }

    #[test]
    fn test_webhook_must_be_https() {
        assert!(matches!(
            DiscordNotifier::new("http://discord.example/hook"),
            Err(CoreError::Config(_))
        ));
        assert!(DiscordNotifier::new("https://discord.com/api/webhooks/1/x").is_ok());
    }
}
