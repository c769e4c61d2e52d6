//! An exchange client that replays recorded replies.
//!
//! Each non-empty line of the replay file is one reply. A line holding a
//! JSON string is sent back as that string's contents; any other line is
//! sent back verbatim. Replies are served in order, one per exchange
//! attempt, so a malformed reply followed by a good one exercises the
//! retry path.

use async_trait::async_trait;
use lorekeep_core::{ExchangeClient, ExchangeError};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

pub struct ReplayExchangeClient {
    replies: Mutex<VecDeque<String>>,
}

impl ReplayExchangeClient {
    pub fn new(replies: impl IntoIterator<Item = String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn from_jsonl(content: &str) -> Self {
        let replies = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match serde_json::from_str::<Value>(line) {
                Ok(Value::String(text)) => text,
                _ => line.to_string(),
            });
        Self::new(replies)
    }

    pub fn open(path: &Path) -> Result<Self, std::io::Error> {
        Ok(Self::from_jsonl(&std::fs::read_to_string(path)?))
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ExchangeClient for ReplayExchangeClient {
    fn name(&self) -> &str {
        "replay"
    }

    async fn exchange(&self, chunk: usize, payload: &str) -> Result<String, ExchangeError> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| ExchangeError::Transport("replay queue poisoned".into()))?;
        debug!(chunk, payload_chars = payload.chars().count(), left = replies.len(), "Replaying reply");
        replies
            .pop_front()
            .ok_or_else(|| ExchangeError::Transport(format!("no recorded reply left for chunk {chunk}")))
    }
}
