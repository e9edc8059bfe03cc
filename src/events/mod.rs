//! # Lifecycle Events
//!
//! Best-effort notification of saga and step lifecycle transitions over a
//! broadcast channel. Event names live in [`crate::constants::events`].

pub mod publisher;

pub use publisher::{EventPublisher, EventPublisherStats, LifecycleEvent, PublishError};
