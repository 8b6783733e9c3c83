//! Cross-tab publish/subscribe.
//!
//! Every tab of the same origin holds a [`TabSync`] attached to one shared
//! [`BroadcastHub`]. Messages carry no sequence number: receivers apply
//! them in arrival order and the latest message for a key wins.

use crate::listeners::{KeyedListeners, Listeners, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_types::{Clock, TabId, Timestamp};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default number of messages buffered per receiving tab.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Kind of cross-tab message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// The signed-in identity changed. Not keyed.
    AuthStateChange,
    /// Cached data for a key is no longer valid.
    CacheInvalidate,
    /// New data for a key.
    DataUpdate,
}

/// A message exchanged between tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabMessage {
    /// Sending tab.
    pub origin: TabId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: Timestamp,
}

/// The shared transport all tabs attach to.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<TabMessage>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Opens a new receiver that sees every message sent from now on.
    pub fn receiver(&self) -> broadcast::Receiver<TabMessage> {
        self.sender.subscribe()
    }

    fn publish(&self, message: TabMessage) -> usize {
        // Sending with no tab listening is not an error.
        self.sender.send(message).unwrap_or(0)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

/// One tab's endpoint on the hub.
pub struct TabSync {
    tab_id: TabId,
    hub: BroadcastHub,
    clock: Arc<dyn Clock>,
    keyed: KeyedListeners<TabMessage>,
    auth: Listeners<TabMessage>,
}

impl TabSync {
    pub fn new(hub: BroadcastHub, clock: Arc<dyn Clock>) -> Self {
        Self {
            tab_id: TabId::new(),
            hub,
            clock,
            keyed: KeyedListeners::new(),
            auth: Listeners::new(),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Sends a message to every other tab. Returns the number of receivers.
    pub fn broadcast(&self, kind: MessageKind, key: Option<&str>, data: Option<Value>) -> usize {
        let message = TabMessage {
            origin: self.tab_id,
            kind,
            key: key.map(str::to_string),
            data,
            timestamp: self.clock.now(),
        };
        debug!("Tab {} broadcasting {:?} for {:?}", self.tab_id, kind, message.key);
        self.hub.publish(message)
    }

    /// Observes `CACHE_INVALIDATE` and `DATA_UPDATE` messages for `key`.
    pub fn subscribe(
        &self,
        key: &str,
        callback: impl Fn(&TabMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.keyed.subscribe(key, callback)
    }

    /// Observes `AUTH_STATE_CHANGE` messages.
    pub fn subscribe_auth(
        &self,
        callback: impl Fn(&TabMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.auth.subscribe(callback)
    }

    /// Whether anything listens on `key`.
    pub fn has_listeners(&self, key: &str) -> bool {
        self.keyed.has_key(key)
    }

    /// Dispatches a received message to the matching listeners.
    ///
    /// Messages from this tab itself are ignored.
    pub fn deliver(&self, message: &TabMessage) {
        if message.origin == self.tab_id {
            return;
        }
        match message.kind {
            MessageKind::AuthStateChange => self.auth.notify(message),
            MessageKind::CacheInvalidate | MessageKind::DataUpdate => {
                if let Some(key) = &message.key {
                    self.keyed.notify(key, message);
                }
            }
        }
    }

    /// Receives messages from the hub until it closes.
    pub fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.hub.receiver();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => self.deliver(&message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Tab {} missed {skipped} cross-tab messages", self.tab_id);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
