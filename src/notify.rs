use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

use crate::config::PushoverSettings;
use crate::mailer::Mailer;

const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";

/// Capability contract for telling a human what happened: a short
/// push message per dispatched action, and a formatted reply e-mail
/// per mail-triggered decision. Delivery failures are logged and
/// swallowed; they never fail the action that triggered them.
pub trait Notifier {
    async fn push(&self, message: &str);
    async fn reply(&self, recipient: &str, subject: &str, body: &str);
}

pub struct PushoverClient {
    client: ClientWithMiddleware,
    settings: PushoverSettings,
}

impl PushoverClient {
    pub fn new(settings: PushoverSettings) -> Self {
        // A lost push is a lost doorbell, so transient failures get a
        // few retries with backoff.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self { client, settings }
    }

    pub async fn send(&self, message: &str) {
        let result = self
            .client
            .post(PUSHOVER_API)
            .json(&serde_json::json!({
                "token": self.settings.token_api,
                "user": self.settings.user_key,
                "message": message,
                "sound": self.settings.sound,
            }))
            .send()
            .await;

        match result {
            Ok(res) if !res.status().is_success() => {
                tracing::error!("pushover rejected the message: {}", res.status());
            }
            Ok(_) => tracing::debug!("pushover message sent"),
            Err(e) => tracing::error!("failed to send pushover message: {}", e),
        }
    }
}

/// Production notifier: Pushover for pushes, SMTP for replies. A
/// missing mail section simply means replies go nowhere.
pub struct WardenNotifier {
    pushover: PushoverClient,
    mailer: Option<Mailer>,
}

impl WardenNotifier {
    pub fn new(pushover: PushoverSettings, mailer: Option<Mailer>) -> Self {
        Self {
            pushover: PushoverClient::new(pushover),
            mailer,
        }
    }
}

impl Notifier for WardenNotifier {
    async fn push(&self, message: &str) {
        self.pushover.send(message).await;
    }

    async fn reply(&self, recipient: &str, subject: &str, body: &str) {
        match &self.mailer {
            Some(mailer) => mailer.send(recipient, subject, body).await,
            None => tracing::debug!("no mail configured, dropping reply to {}", recipient),
        }
    }
}
