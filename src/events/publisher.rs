//! # Lifecycle Event Publisher
//!
//! Broadcasts saga and step lifecycle events to any number of subscribers.
//!
//! ```rust
//! use saga_core::events::EventPublisher;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! publisher
//!     .publish_named("saga.created", Uuid::new_v4(), "order-42", json!({ "step_count": 3 }))
//!     .await
//!     .unwrap();
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.name, "saga.created");
//! assert_eq!(event.correlation_id, "order-42");
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::EventsConfig;

/// A saga or step lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub name: String,
    pub saga_id: Uuid,
    pub correlation_id: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        name: impl Into<String>,
        saga_id: Uuid,
        correlation_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            name: name.into(),
            saga_id,
            correlation_id: correlation_id.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

/// Counters for published and dropped events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventPublisherStats {
    pub published: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

/// Broadcast publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<LifecycleEvent>,
    enabled: bool,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            enabled: true,
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        let mut publisher = Self::new(config.channel_capacity);
        publisher.enabled = config.enabled;
        publisher
    }

    /// A publisher that drops everything
    pub fn disabled() -> Self {
        let mut publisher = Self::new(1);
        publisher.enabled = false;
        publisher
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Publish an event; having no subscribers is not an error
    pub async fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError> {
        if !self.enabled {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.sender.send(event) {
            Ok(_) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(broadcast::error::SendError(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Build and publish an event from its parts
    pub async fn publish_named(
        &self,
        name: &str,
        saga_id: Uuid,
        correlation_id: &str,
        payload: Value,
    ) -> Result<(), PublishError> {
        self.publish(LifecycleEvent::new(name, saga_id, correlation_id, payload))
            .await
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::from_config(&EventsConfig::default())
    }
}
