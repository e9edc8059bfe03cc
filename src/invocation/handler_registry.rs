//! # In-Process Handler Registry
//!
//! Named, strongly-typed handlers keyed by `(service, action)`, registered up
//! front so unknown keys are rejected when a saga is created rather than when a
//! step runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Parameters and results exchanged with handlers
pub type ActionPayload = HashMap<String, Value>;

/// A locally executed forward or compensating action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, parameters: ActionPayload) -> anyhow::Result<ActionPayload>;
}

/// Adapter turning an async closure into an [`ActionHandler`]
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(ActionPayload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ActionPayload>> + Send,
{
    async fn handle(&self, parameters: ActionPayload) -> anyhow::Result<ActionPayload> {
        (self.func)(parameters).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn ActionHandler>
where
    F: Fn(ActionPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ActionPayload>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandlerKey {
    service: String,
    action: String,
}

/// Registry of in-process handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<HandlerKey, Arc<dyn ActionHandler>>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .field("services", &self.services())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `service.action`, replacing any previous one
    pub fn register(
        &self,
        service: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        let key = HandlerKey {
            service: service.into(),
            action: action.into(),
        };

        let mut handlers = self.handlers.write();
        if handlers.contains_key(&key) {
            warn!(
                service = %key.service,
                action = %key.action,
                "Handler already registered, replacing"
            );
        }
        info!(service = %key.service, action = %key.action, "Registering action handler");
        handlers.insert(key, handler);
    }

    pub fn get(&self, service: &str, action: &str) -> Option<Arc<dyn ActionHandler>> {
        let key = HandlerKey {
            service: service.to_string(),
            action: action.to_string(),
        };
        self.handlers.read().get(&key).cloned()
    }

    pub fn contains(&self, service: &str, action: &str) -> bool {
        self.get(service, action).is_some()
    }

    /// Whether any action is registered for `service`
    pub fn has_service(&self, service: &str) -> bool {
        self.handlers
            .read()
            .keys()
            .any(|key| key.service == service)
    }

    pub fn services(&self) -> Vec<String> {
        self.handlers
            .read()
            .keys()
            .map(|key| key.service.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_invoke_closure_handler() {
        let registry = HandlerRegistry::new();
        registry.register(
            "inventory",
            "reserveItems",
            handler_fn(|params| async move {
                let sku = params.get("sku").cloned().unwrap_or(Value::Null);
                Ok(HashMap::from([("reserved".to_string(), sku)]))
            }),
        );

        assert!(registry.has_service("inventory"));
        assert!(registry.contains("inventory", "reserveItems"));
        assert!(!registry.contains("inventory", "releaseItems"));

        let handler = registry.get("inventory", "reserveItems").unwrap();
        let result = handler
            .handle(HashMap::from([("sku".to_string(), json!("sku-1"))]))
            .await
            .unwrap();
        assert_eq!(result["reserved"], json!("sku-1"));
    }

    #[test]
    fn test_services_are_deduplicated_and_sorted() {
        let registry = HandlerRegistry::new();
        let noop = handler_fn(|_| async { Ok(HashMap::new()) });
        registry.register("payments", "charge", noop.clone());
        registry.register("payments", "refund", noop.clone());
        registry.register("inventory", "reserve", noop);

        assert_eq!(registry.services(), vec!["inventory", "payments"]);
        assert_eq!(registry.len(), 3);
    }
}
