use async_trait::async_trait;
use serde_json::json;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::config::TelegramConfig;

/// Notifier
///
/// Outbound channel for operator notifications (logins, logouts). Delivery is
/// best-effort: callers go through `notify_best_effort` and never fail a request
/// because a notification could not be sent.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), String>;
}

pub type NotifierState = Arc<dyn Notifier>;

/// Sends `text` and logs a warning instead of propagating a delivery failure.
pub async fn notify_best_effort(notifier: &NotifierState, text: &str) {
    if let Err(e) = notifier.send(text).await {
        tracing::warn!(error = %e, "notification not delivered");
    }
}

/// TelegramNotifier
///
/// Posts to the Bot API `sendMessage` endpoint of the configured chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("https://api.telegram.org/bot{}/sendMessage", config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            // Drop the URL from the error, it embeds the bot token.
            .map_err(|e| e.without_url().to_string())?;

        if !response.status().is_success() {
            return Err(format!("telegram responded with {}", response.status()));
        }
        tracing::debug!("telegram notification sent");
        Ok(())
    }
}

/// Used when no bot is configured.
#[derive(Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _text: &str) -> Result<(), String> {
        Ok(())
    }
}

/// MockNotifier
///
/// Records every message in memory. With `new_failing` every send is rejected after
/// being recorded.
#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    should_fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(text.to_string());

        if self.should_fail {
            Err("simulated delivery failure".to_string())
        } else {
            Ok(())
        }
    }
}

/// Builds the notifier for the configured environment.
pub fn from_config(telegram: Option<&TelegramConfig>) -> NotifierState {
    match telegram.map(TelegramNotifier::new) {
        Some(Ok(notifier)) => Arc::new(notifier),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "telegram client could not be built, notifications disabled");
            Arc::new(NoopNotifier)
        }
        None => Arc::new(NoopNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_delivery_is_swallowed() {
        let mock = MockNotifier::new_failing();
        let notifier: NotifierState = Arc::new(mock.clone());

        notify_best_effort(&notifier, "User logged in").await;

        assert_eq!(mock.messages(), vec!["User logged in".to_string()]);
    }

    #[tokio::test]
    async fn missing_bot_configuration_disables_notifications() {
        let notifier = from_config(None);
        assert_eq!(notifier.send("User logged in").await, Ok(()));
    }

    #[test]
    fn telegram_notifier_targets_the_configured_chat() {
        let notifier = TelegramNotifier::new(&TelegramConfig {
            bot_token: "123:abc".into(),
            chat_id: "42".into(),
        })
        .unwrap();

        assert_eq!(
            notifier.endpoint,
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(notifier.chat_id, "42");
    }
}
