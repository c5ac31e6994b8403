//! Message Channel Bus
//!
//! Named FIFO queues of timestamped messages. Channels are created on first
//! reference and live as long as the bus. Posting never blocks. Channels are
//! unbounded unless the bus was built with a capacity, in which case a full
//! channel drops its oldest message.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::execution::current_execution;

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable event record delivered through a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    timestamp: DateTime<Utc>,
    event: String,
    params: Option<String>,
}

impl Message {
    pub fn new(event: impl Into<String>, params: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            params,
        }
    }

    /// Message whose payload is `params` encoded as JSON
    pub fn with_json(event: impl Into<String>, params: &serde_json::Value) -> Self {
        Self::new(event, Some(params.to_string()))
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn params(&self) -> Option<&str> {
        self.params.as_deref()
    }

    /// Payload decoded as JSON, if present and well formed
    pub fn params_json(&self) -> Option<serde_json::Value> {
        self.params
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.to_rfc3339(), self.event)?;
        if let Some(params) = &self.params {
            write!(f, " {}", params)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Channel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChannelQueue {
    messages: Mutex<VecDeque<Message>>,
    available: Condvar,
}

impl ChannelQueue {
    fn wake_all(&self) {
        // Taking the lock orders this wakeup after a waiter's flag check.
        let _messages = self.messages.lock();
        self.available.notify_all();
    }
}

/// A named FIFO queue of messages
pub struct MessageChannel {
    name: String,
    capacity: Option<usize>,
    queue: Arc<ChannelQueue>,
}

impl MessageChannel {
    fn new(name: String, capacity: Option<usize>) -> Self {
        Self {
            name,
            capacity,
            queue: Arc::new(ChannelQueue::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message; never blocks
    pub fn post_message(&self, message: Message) {
        let mut messages = self.queue.messages.lock();
        if let Some(capacity) = self.capacity {
            while messages.len() >= capacity.max(1) {
                if let Some(dropped) = messages.pop_front() {
                    tracing::warn!(
                        channel = %self.name,
                        event = %dropped.event,
                        "Channel full, dropping oldest message"
                    );
                }
            }
        }
        tracing::trace!(channel = %self.name, event = %message.event, "postMessage");
        messages.push_back(message);
        self.queue.available.notify_one();
    }

    /// Remove the oldest message without blocking
    pub fn poll_message(&self) -> Option<Message> {
        tracing::debug!(channel = %self.name, "pollMessage");
        self.queue.messages.lock().pop_front()
    }

    /// Remove the oldest message, waiting up to `timeout` for one to arrive.
    /// A timeout too large to form a deadline waits until a message arrives.
    ///
    /// Returns `None` early when called from a script execution that has been
    /// asked to stop.
    pub fn poll_message_timeout(&self, timeout: Duration) -> Option<Message> {
        tracing::debug!(channel = %self.name, timeout_ms = timeout.as_millis() as u64, "pollMessage");
        let deadline = Instant::now().checked_add(timeout);
        let stop = current_execution().map(|exec| exec.stop_token());

        let _guard = stop.as_ref().map(|token| {
            let queue = Arc::clone(&self.queue);
            token.on_stop(move || queue.wake_all())
        });

        let mut messages = self.queue.messages.lock();
        loop {
            if let Some(message) = messages.pop_front() {
                return Some(message);
            }
            if stop.as_ref().is_some_and(|token| token.is_stopped()) {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .queue
                        .available
                        .wait_until(&mut messages, deadline)
                        .timed_out()
                    {
                        return messages.pop_front();
                    }
                }
                None => self.queue.available.wait(&mut messages),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageChannel")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Name-to-channel mapping shared by producers and consumers
#[derive(Debug, Default)]
pub struct ChannelBus {
    channels: DashMap<String, Arc<MessageChannel>>,
    capacity: Option<usize>,
}

impl ChannelBus {
    /// Bus whose channels are unbounded
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose channels hold at most `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: Some(capacity),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Get or create the channel called `name`
    pub fn get_channel(&self, name: &str) -> Arc<MessageChannel> {
        if let Some(channel) = self.channels.get(name) {
            return Arc::clone(channel.value());
        }
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MessageChannel::new(name.to_string(), self.capacity)))
            .value()
            .clone()
    }

    pub fn post_message(&self, channel: &str, message: Message) {
        self.get_channel(channel).post_message(message);
    }

    /// Names of every channel created so far
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
