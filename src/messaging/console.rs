//! Stdin/stdout transport for local runs.
//!
//! Input lines look like `chat|author|text`. Replies are printed as
//! `[chat] name: text`.

use crate::error::Result;
use crate::messaging::traits::{InboundStream, Transport};
use crate::{ChatId, InboundMessage};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};

pub struct ConsoleTransport {
    persona: String,
    inbound_seq: Arc<AtomicU64>,
    outbound_seq: AtomicU64,
}

impl ConsoleTransport {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            inbound_seq: Arc::new(AtomicU64::new(0)),
            outbound_seq: AtomicU64::new(0),
        }
    }
}

/// Parse one `chat|author|text` line. Blank or incomplete lines are skipped.
pub fn parse_line(line: &str, id: String, timestamp: DateTime<Utc>) -> Option<InboundMessage> {
    let mut parts = line.splitn(3, '|');
    let chat_id = parts.next()?.trim();
    let author = parts.next()?.trim();
    let content = parts.next()?.trim();
    if chat_id.is_empty() || author.is_empty() || content.is_empty() {
        return None;
    }
    Some(InboundMessage {
        id,
        chat_id: ChatId::from(chat_id),
        author: author.to_string(),
        content: content.to_string(),
        timestamp,
    })
}

impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self) -> Result<InboundStream> {
        let seq = self.inbound_seq.clone();
        let stream = async_stream::stream! {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let id = format!("in-{}", seq.fetch_add(1, Ordering::Relaxed));
                        match parse_line(&line, id, Utc::now()) {
                            Some(message) => yield message,
                            None if line.trim().is_empty() => {}
                            None => tracing::warn!(%line, "expected chat|author|text"),
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::error!(%error, "failed to read stdin");
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<String> {
        let id = format!("out-{}", self.outbound_seq.fetch_add(1, Ordering::Relaxed));
        let line = format!("[{chat_id}] {}: {text}\n", self.persona);
        let mut stdout = tokio::io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(id)
    }
}
