use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailSettings;

/// Sends the reply e-mails for mail-triggered decisions: SMTP with
/// STARTTLS, one plain-text UTF-8 message per decision. A fresh
/// session per message, so a dropped connection in one reply does not
/// poison the next.
pub struct Mailer {
    settings: MailSettings,
}

impl Mailer {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }

    pub async fn send(&self, recipient: &str, subject: &str, body: &str) {
        let from = match self.settings.sender.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                tracing::error!(
                    "configured sender {:?} is not a mail address: {}",
                    self.settings.sender,
                    e
                );
                return;
            }
        };
        let to = match recipient.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                tracing::error!("recipient {:?} is not a mail address: {}", recipient, e);
                return;
            }
        };

        let message = match Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
        {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("failed to build reply mail: {}", e);
                return;
            }
        };

        let transport =
            match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.settings.server) {
                Ok(builder) => builder
                    .port(self.settings.port)
                    .credentials(Credentials::new(
                        self.settings.login.clone(),
                        self.settings.password.clone(),
                    ))
                    .build(),
                Err(e) => {
                    tracing::error!(
                        "failed to connect to the mail server, bad connection settings? {}",
                        e
                    );
                    return;
                }
            };

        match transport.send(message).await {
            Ok(_) => tracing::debug!("mail sent to {}", recipient),
            Err(e) => tracing::error!("mail server error for {}: {}", recipient, e),
        }
    }
}
