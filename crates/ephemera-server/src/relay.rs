//! The relay service: validation, normalization, and stamping in front of
//! the channel store.

use std::borrow::Cow;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::{debug, info};

use ephemera_shared::constants::ANONYMOUS_SENDER;
use ephemera_shared::{ChannelClass, ChannelId, ChannelTarget, Message, MessageDraft};
use ephemera_store::ChannelStore;

use crate::error::RelayError;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock milliseconds that never go backwards and never repeat.
///
/// When two stamps land in the same millisecond (or the system clock steps
/// back) the later caller gets `previous + 1`, so `after` cursors never skip
/// a message that shares a timestamp with the last one seen.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Tunables for the relay, lifted from the server config.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub max_body_chars: usize,
    pub sanitize_html: bool,
    /// Class applied when a request omits one. One per deployment.
    pub default_class: ChannelClass,
    pub default_fetch_limit: usize,
}

/// A message submission, already decoded from the wire.
#[derive(Debug, Clone, Default)]
pub struct SendInput {
    pub sender_id: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub body: Option<String>,
    pub channel_class: Option<ChannelClass>,
    pub channel_id: Option<ChannelId>,
}

/// A point-in-time query, already decoded from the wire.
#[derive(Debug, Clone, Default)]
pub struct FetchInput {
    pub channel_class: Option<ChannelClass>,
    pub channel_id: Option<ChannelId>,
    pub after: Option<i64>,
    pub limit: Option<usize>,
}

/// Acknowledgment of a session init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAck {
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct RelayService {
    store: ChannelStore,
    settings: RelaySettings,
    clock: MonotonicClock,
}

impl RelayService {
    pub fn new(store: ChannelStore, settings: RelaySettings) -> Self {
        Self {
            store,
            settings,
            clock: MonotonicClock::new(),
        }
    }

    /// Validate, normalize, stamp, and store a message.
    ///
    /// Checks run in order: body present, body within the length cap,
    /// username present, local channel named. Nothing is stored unless all
    /// pass.
    pub async fn send(&self, input: SendInput) -> Result<Message, RelayError> {
        let body = input
            .body
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| RelayError::Validation("Missing required fields".into()))?;

        if body.chars().count() > self.settings.max_body_chars {
            return Err(RelayError::Validation(format!(
                "Message too long (max {} characters)",
                self.settings.max_body_chars
            )));
        }

        let username = input
            .username
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| RelayError::Validation("Missing required fields".into()))?;

        let class = input.channel_class.unwrap_or(self.settings.default_class);
        let target = ChannelTarget::resolve(class, input.channel_id)?;

        let body = if self.settings.sanitize_html {
            escape_markup(body).into_owned()
        } else {
            body.to_string()
        };

        let draft = MessageDraft {
            sender_id: input
                .sender_id
                .unwrap_or_else(|| ANONYMOUS_SENDER.to_string()),
            display_name: input
                .display_name
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| username.clone()),
            username,
            body,
            target,
        };

        let message = draft.stamp(self.clock.now_millis());
        self.store.append(message.clone()).await;

        debug!(id = %message.id, channel = %message.target(), "Message stored");
        Ok(message)
    }

    /// Messages newer than `after` in the requested channel.
    ///
    /// A local fetch without a channel id is rejected rather than answered
    /// from some other channel. An unknown local channel is simply empty.
    pub async fn fetch(&self, input: FetchInput) -> Result<Vec<Message>, RelayError> {
        let class = input.channel_class.unwrap_or(self.settings.default_class);
        let target = ChannelTarget::resolve(class, input.channel_id)
            .map_err(|_| RelayError::Validation("Invalid channel request".into()))?;

        let after = input.after.unwrap_or(0);
        let limit = input
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(self.settings.default_fetch_limit);

        Ok(self.store.query(&target, after, limit).await)
    }

    /// Acknowledge a client session. Records nothing.
    pub fn init_session(
        &self,
        user_id: Option<&str>,
        username: Option<&str>,
    ) -> Result<SessionAck, RelayError> {
        let (Some(user_id), Some(username)) = (user_id, username) else {
            return Err(RelayError::Validation("Missing userId or username".into()));
        };

        info!(username, "Session init");
        Ok(SessionAck {
            user_id: user_id.to_string(),
        })
    }

    pub fn store(&self) -> &ChannelStore {
        &self.store
    }
}

/// Escape the two characters that open markup.
pub fn escape_markup(input: &str) -> Cow<'_, str> {
    if !input.contains(['<', '>']) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
