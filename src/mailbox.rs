use std::sync::LazyLock;

use async_native_tls::{TlsConnector, TlsStream};
use futures::TryStreamExt;
use mailparse::MailHeaderMap;
use regex::Regex;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::MailSettings;

const IMAP_TLS_PORT: u16 = 993;

/// Matches the `local@domain` part of a decoded `From` display string.
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").expect("address pattern compiles"));

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("imap error: {0}")]
    Imap(#[from] async_imap::error::Error),

    #[error("tls negotiation failed: {0}")]
    Tls(#[from] async_native_tls::Error),

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One scanned inbox message, reduced to what command matching needs.
/// `sender` is `None` when no address could be extracted from the
/// `From` header; such messages are skipped and left in the mailbox.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub seq: u32,
    pub subject: String,
    pub sender: Option<String>,
}

/// Capability contract over one mailbox folder: scan everything,
/// flag processed messages, commit the deletions once per run.
pub trait MailSource {
    async fn fetch_all(&mut self) -> Result<Vec<InboundMessage>, MailboxError>;
    async fn mark_deleted(&mut self, seq: u32) -> Result<(), MailboxError>;
    async fn expunge(&mut self) -> Result<(), MailboxError>;
}

pub struct ImapMailbox {
    session: async_imap::Session<TlsStream<TcpStream>>,
}

impl ImapMailbox {
    pub async fn connect(settings: &MailSettings) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((settings.server.as_str(), IMAP_TLS_PORT)).await?;
        let tls = TlsConnector::new();
        let tls_stream = tls.connect(settings.server.as_str(), tcp).await?;
        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(&settings.login, &settings.password)
            .await
            .map_err(|(e, _)| e)?;
        Ok(Self { session })
    }

    pub async fn logout(mut self) -> Result<(), MailboxError> {
        self.session.logout().await?;
        Ok(())
    }
}

impl MailSource for ImapMailbox {
    async fn fetch_all(&mut self) -> Result<Vec<InboundMessage>, MailboxError> {
        let mailbox = self.session.select("INBOX").await?;
        let mut messages = Vec::with_capacity(mailbox.exists as usize);

        for seq in 1..=mailbox.exists {
            let fetches: Vec<_> = self
                .session
                .fetch(seq.to_string(), "(RFC822)")
                .await?
                .try_collect()
                .await?;
            for fetch in &fetches {
                let Some(body) = fetch.body() else { continue };
                messages.push(parse_message(seq, body));
            }
        }
        Ok(messages)
    }

    async fn mark_deleted(&mut self, seq: u32) -> Result<(), MailboxError> {
        let _updates: Vec<_> = self
            .session
            .store(seq.to_string(), "+FLAGS (\\Deleted)")
            .await?
            .try_collect()
            .await?;
        Ok(())
    }

    async fn expunge(&mut self) -> Result<(), MailboxError> {
        let _expunged: Vec<_> = self.session.expunge().await?.try_collect().await?;
        Ok(())
    }
}

/// Reduces one RFC822 message to subject and sender address. Header
/// decoding problems degrade to an empty subject or a missing sender,
/// never to an error: a broken message must not stop the scan.
fn parse_message(seq: u32, body: &[u8]) -> InboundMessage {
    match mailparse::parse_mail(body) {
        Ok(parsed) => {
            let subject = parsed
                .headers
                .get_first_value("Subject")
                .unwrap_or_default();
            let sender = parsed
                .headers
                .get_first_value("From")
                .and_then(|from| extract_address(&from));
            InboundMessage {
                seq,
                subject,
                sender,
            }
        }
        Err(e) => {
            tracing::debug!("message {} does not parse: {}", seq, e);
            InboundMessage {
                seq,
                subject: String::new(),
                sender: None,
            }
        }
    }
}

fn extract_address(display: &str) -> Option<String> {
    ADDRESS_RE
        .find(display)
        .map(|found| found.as_str().to_string())
}
