//! # Service Invoker
//!
//! Resolves a `(service, action)` pair to an in-process handler or a remote
//! call and always answers with a [`ServiceInvocationResult`]. Nothing here
//! returns an error for a failed call: an unknown service, a failing handler
//! and a 500 from a remote service all come back as failure results.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::handler_registry::{ActionPayload, HandlerRegistry};
use super::service_registry::{append_path, RouteResolver, ServiceRegistry};
use super::transport::{HttpTransport, RemoteRequest, RemoteTransport};
use crate::config::InvokerConfig;
use crate::error::{InvocationError, SagaResult};
use crate::models::ServiceInvocationResult;

/// The single seam through which forward and compensating actions reach services
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        service: &str,
        action: &str,
        parameters: ActionPayload,
    ) -> ServiceInvocationResult;

    /// Best-effort probe; never errors
    async fn is_service_healthy(&self, service: &str) -> bool;

    /// Best-effort connection test reported as an invocation result
    async fn test_service_connection(&self, service: &str) -> ServiceInvocationResult;

    /// Whether `service` resolves to a handler set or a registered endpoint
    fn can_resolve(&self, service: &str) -> bool;

    /// Whether `service.action` can be dispatched at all
    fn can_resolve_action(&self, service: &str, _action: &str) -> bool {
        self.can_resolve(service)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceKind {
    InProcess,
    Remote(Url),
    Unknown,
}

/// Default [`Invoker`]: in-process handlers first, then the remote registry
pub struct ServiceInvoker {
    handlers: Arc<HandlerRegistry>,
    services: ServiceRegistry,
    routes: RouteResolver,
    transport: Arc<dyn RemoteTransport>,
    health_path: String,
}

impl std::fmt::Debug for ServiceInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInvoker")
            .field("handlers", &self.handlers)
            .field("remote_services", &self.services.len())
            .field("health_path", &self.health_path)
            .finish()
    }
}

impl ServiceInvoker {
    /// Build with an HTTP transport and the registry from `[invoker]`
    pub fn new(handlers: Arc<HandlerRegistry>, config: &InvokerConfig) -> SagaResult<Self> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(
            handlers,
            ServiceRegistry::from_config(config),
            Arc::new(transport),
        )
        .with_health_path(config.health_path.clone()))
    }

    pub fn with_transport(
        handlers: Arc<HandlerRegistry>,
        services: ServiceRegistry,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            handlers,
            services,
            routes: RouteResolver,
            transport,
            health_path: "/health".to_string(),
        }
    }

    pub fn with_health_path(mut self, health_path: impl Into<String>) -> Self {
        self.health_path = health_path.into();
        self
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    fn classify(&self, service: &str) -> ServiceKind {
        if self.handlers.has_service(service) {
            ServiceKind::InProcess
        } else if let Some(url) = self.services.resolve(service) {
            ServiceKind::Remote(url.clone())
        } else {
            ServiceKind::Unknown
        }
    }

    async fn invoke_in_process(
        &self,
        service: &str,
        action: &str,
        parameters: ActionPayload,
        started: Instant,
    ) -> ServiceInvocationResult {
        let Some(handler) = self.handlers.get(service, action) else {
            let error = InvocationError::UnknownService {
                service: format!("{service}.{action}"),
            };
            return ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started));
        };

        match handler.handle(parameters).await {
            Ok(result) => ServiceInvocationResult::success(result, elapsed_ms(started)),
            Err(error) => {
                debug!(service = %service, action = %action, error = %error, "In-process handler failed");
                let error = InvocationError::HandlerFailed {
                    message: format!("{error:#}"),
                };
                ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started))
            }
        }
    }

    async fn invoke_remote(
        &self,
        base: &Url,
        action: &str,
        parameters: ActionPayload,
        started: Instant,
    ) -> ServiceInvocationResult {
        let Some((method, url)) = self.routes.url_for(base, action) else {
            let error = InvocationError::RemoteFailure {
                status_code: None,
                message: format!("cannot build a route for action '{action}' on {base}"),
            };
            return ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started));
        };

        let request = RemoteRequest {
            method,
            url,
            body: parameters,
        };
        match self.transport.send(request).await {
            Ok(response) => ServiceInvocationResult::success(response.body, elapsed_ms(started))
                .with_status_code(response.status_code),
            Err(error) => {
                ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started))
            }
        }
    }

    fn health_url(&self, base: &Url) -> Option<Url> {
        append_path(base, &self.health_path)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl Invoker for ServiceInvoker {
    async fn invoke(
        &self,
        service: &str,
        action: &str,
        parameters: ActionPayload,
    ) -> ServiceInvocationResult {
        let started = Instant::now();
        match self.classify(service) {
            ServiceKind::InProcess => {
                self.invoke_in_process(service, action, parameters, started)
                    .await
            }
            ServiceKind::Remote(base) => {
                self.invoke_remote(&base, action, parameters, started)
                    .await
            }
            ServiceKind::Unknown => {
                warn!(service = %service, action = %action, "Invocation against unknown service");
                let error = InvocationError::UnknownService {
                    service: service.to_string(),
                };
                ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started))
            }
        }
    }

    async fn is_service_healthy(&self, service: &str) -> bool {
        match self.classify(service) {
            ServiceKind::InProcess => true,
            ServiceKind::Remote(base) => match self.health_url(&base) {
                Some(url) => matches!(
                    self.transport.probe(url).await,
                    Ok(status) if (200..300).contains(&status)
                ),
                None => false,
            },
            ServiceKind::Unknown => false,
        }
    }

    async fn test_service_connection(&self, service: &str) -> ServiceInvocationResult {
        let started = Instant::now();
        match self.classify(service) {
            ServiceKind::InProcess => ServiceInvocationResult::success(
                ActionPayload::from([
                    ("service".to_string(), json!(service)),
                    ("mode".to_string(), json!("in_process")),
                ]),
                elapsed_ms(started),
            ),
            ServiceKind::Remote(base) => {
                let Some(url) = self.health_url(&base) else {
                    return ServiceInvocationResult::failure(
                        format!("invalid health path '{}'", self.health_path),
                        elapsed_ms(started),
                    );
                };
                match self.transport.probe(url).await {
                    Ok(status) if (200..300).contains(&status) => {
                        ServiceInvocationResult::success(
                            ActionPayload::from([
                                ("service".to_string(), json!(service)),
                                ("mode".to_string(), json!("remote")),
                            ]),
                            elapsed_ms(started),
                        )
                        .with_status_code(status)
                    }
                    Ok(status) => {
                        let error = InvocationError::RemoteFailure {
                            status_code: Some(status),
                            message: format!("health probe returned {status}"),
                        };
                        ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started))
                    }
                    Err(error) => {
                        ServiceInvocationResult::from_invocation_error(&error, elapsed_ms(started))
                    }
                }
            }
            ServiceKind::Unknown => ServiceInvocationResult::from_invocation_error(
                &InvocationError::UnknownService {
                    service: service.to_string(),
                },
                elapsed_ms(started),
            ),
        }
    }

    fn can_resolve(&self, service: &str) -> bool {
        self.classify(service) != ServiceKind::Unknown
    }

    fn can_resolve_action(&self, service: &str, action: &str) -> bool {
        match self.classify(service) {
            ServiceKind::InProcess => self.handlers.contains(service, action),
            ServiceKind::Remote(_) => true,
            ServiceKind::Unknown => false,
        }
    }
}
