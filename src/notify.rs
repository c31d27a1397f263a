//! Run report delivery. The engine hands over plain lines; chunking to the
//! chat message limit happens here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::config::Config;

/// Telegram rejects messages longer than this.
pub const TELEGRAM_LIMIT: usize = 4096;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, lines: &[String]) -> Result<()>;
}

/// Writes report lines to the log. Used when no chat is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, lines: &[String]) -> Result<()> {
        for line in lines {
            info!(target: "report", "{}", line);
        }
        Ok(())
    }
}

pub struct TelegramNotifier {
    bot: Bot,
    chats: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: &str, chats: &[i64]) -> Self {
        Self {
            bot: Bot::new(token),
            chats: chats.iter().copied().map(ChatId).collect(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, lines: &[String]) -> Result<()> {
        let text = lines.join("\n");
        let chunks = split_message(&text, TELEGRAM_LIMIT);
        for chat in &self.chats {
            for chunk in &chunks {
                self.bot
                    .send_message(*chat, chunk.clone())
                    .await
                    .with_context(|| format!("sending report to chat {}", chat.0))?;
            }
        }
        Ok(())
    }
}

/// Telegram when configured, otherwise the log.
pub fn from_config(cfg: &Config) -> Box<dyn Notifier> {
    match &cfg.telegram {
        Some(tg) if !tg.report_chats.is_empty() => {
            Box::new(TelegramNotifier::new(&tg.bot_token, &tg.report_chats))
        }
        Some(_) => {
            warn!("telegram configured without report chats; reporting to log");
            Box::new(LogNotifier)
        }
        None => Box::new(LogNotifier),
    }
}

/// Split `text` into chunks of at most `limit` characters, preferring
/// paragraph breaks, then line breaks, then hard cuts.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    split_level(text, limit.max(1), 0)
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect()
}

const SEPARATORS: [&str; 2] = ["\n\n", "\n"];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_level(text: &str, limit: usize, level: usize) -> Vec<String> {
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }
    let Some(sep) = SEPARATORS.get(level) else {
        return hard_cut(text, limit);
    };

    let mut out = Vec::new();
    let mut current = String::new();
    for part in text.split(sep) {
        let mut pieces = split_level(part, limit, level + 1);
        if pieces.len() > 1 {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current = pieces.pop().unwrap_or_default();
            out.extend(pieces);
            continue;
        }
        let piece = pieces.pop().unwrap_or_default();
        if current.is_empty() {
            current = piece;
        } else if char_len(&current) + char_len(sep) + char_len(&piece) <= limit {
            current.push_str(sep);
            current.push_str(&piece);
        } else {
            out.push(std::mem::replace(&mut current, piece));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn hard_cut(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}
