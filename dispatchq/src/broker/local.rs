//! In-process broker
//!
//! Routes calls to services registered in the same process and fans emitted
//! events out to in-process listeners.

use super::{Broker, CallOptions, Context, EmitOptions};
use crate::service::ServiceSchema;
use crate::storage::ConnectionConfig;
use crate::{config, Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Event published through a [`LocalBroker`]
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    /// Event name
    pub name: String,
    /// Event payload
    pub payload: Option<Value>,
    /// Emit options
    pub opts: EmitOptions,
}

/// In-process broker
pub struct LocalBroker {
    services: RwLock<HashMap<String, Arc<ServiceSchema>>>,
    events: broadcast::Sender<EmittedEvent>,
    cacher: Option<ConnectionConfig>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    /// Create a broker without a cache store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(config::get_config().event_capacity.max(1));
        Self {
            services: RwLock::new(HashMap::new()),
            events,
            cacher: None,
        }
    }

    /// Declare the connection of the broker's cache store
    #[must_use]
    pub fn with_cacher(mut self, connection: ConnectionConfig) -> Self {
        self.cacher = Some(connection);
        self
    }

    /// Register a service, replacing any service of the same name
    pub async fn register(&self, schema: ServiceSchema) {
        let name = schema.name().to_string();
        self.services.write().await.insert(name.clone(), Arc::new(schema));
        tracing::info!("Service '{}' registered", name);
    }

    /// Remove a service
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.services.write().await.remove(name).is_some();
        if removed {
            tracing::info!("Service '{}' unregistered", name);
        }
        removed
    }

    /// Names of the registered services
    pub async fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Listen to every event emitted from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<EmittedEvent> {
        self.events.subscribe()
    }

    async fn lookup(&self, action: &str) -> Result<(Arc<ServiceSchema>, String)> {
        let (service, name) = action
            .rsplit_once('.')
            .ok_or_else(|| Error::ActionNotFound(action.to_string()))?;
        let schema = self
            .services
            .read()
            .await
            .get(service)
            .cloned()
            .ok_or_else(|| Error::ActionNotFound(action.to_string()))?;
        Ok((schema, name.to_string()))
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn call(&self, action: &str, params: Value, opts: CallOptions) -> Result<Value> {
        let (schema, name) = self.lookup(action).await?;
        let handler = schema
            .find(&name)
            .map(|def| def.handler())
            .ok_or_else(|| Error::ActionNotFound(action.to_string()))?;

        let mut ctx = Context::for_call(action, params, opts.meta, opts.parent_span.as_ref());
        schema.hooks().before(&mut ctx).await?;

        let call = handler.handle(ctx.clone());
        let result = match opts.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::handler(format!(
                    "Request timed out after {:?}: {}",
                    timeout, action
                ))),
            },
            None => call.await,
        };

        schema.hooks().after(&ctx, &result).await?;
        result
    }

    async fn emit(&self, event: &str, payload: Option<Value>, opts: EmitOptions) -> Result<()> {
        tracing::debug!("Event emitted: {} (groups: {:?})", event, opts.groups);
        // No listeners is fine
        let _ = self.events.send(EmittedEvent {
            name: event.to_string(),
            payload,
            opts,
        });
        Ok(())
    }

    fn cacher_connection(&self) -> Option<ConnectionConfig> {
        self.cacher.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ParentSpan;
    use crate::service::{handler_fn, ActionDef};
    use serde_json::json;
    use std::time::Duration;

    fn math() -> ServiceSchema {
        ServiceSchema::new("math")
            .action(ActionDef::new(
                "add",
                handler_fn(|ctx: Context| async move {
                    let a = ctx.params["a"].as_i64().unwrap_or(0);
                    let b = ctx.params["b"].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                }),
            ))
            .action(ActionDef::new(
                "whoami",
                handler_fn(|ctx: Context| async move {
                    Ok(json!({
                        "request": ctx.request_id,
                        "parent": ctx.parent_id,
                        "tracing": ctx.tracing,
                        "meta": ctx.meta,
                    }))
                }),
            ))
            .action(ActionDef::new(
                "slow",
                handler_fn(|_ctx: Context| async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!(null))
                }),
            ))
    }

    #[tokio::test]
    async fn test_call_routes_to_handler() {
        let broker = LocalBroker::new();
        broker.register(math()).await;

        let sum = broker
            .call("math.add", json!({"a": 2, "b": 3}), CallOptions::new())
            .await
            .unwrap();
        assert_eq!(sum, json!(5));

        let err = broker.call("math.nope", json!({}), CallOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::ActionNotFound(_)));
        let err = broker.call("nope.add", json!({}), CallOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::ActionNotFound(_)));
    }

    #[tokio::test]
    async fn test_call_restores_parent_span() {
        let broker = LocalBroker::new();
        broker.register(math()).await;

        let mut meta = serde_json::Map::new();
        meta.insert("user".into(), json!("u-1"));
        let span = ParentSpan {
            id: Some("p-1".into()),
            trace_id: Some("r-1".into()),
            sampled: true,
        };
        let seen = broker
            .call("math.whoami", json!({}), CallOptions::new().meta(meta).parent_span(span))
            .await
            .unwrap();
        assert_eq!(
            seen,
            json!({"request": "r-1", "parent": "p-1", "tracing": true, "meta": {"user": "u-1"}})
        );
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let broker = LocalBroker::new();
        broker.register(math()).await;
        let result = broker
            .call("math.slow", json!({}), CallOptions::new().timeout(Duration::from_millis(10)))
            .await;
        assert!(result.is_err());
        assert!(broker.call("math.slow", json!({}), CallOptions::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_emit_reaches_listeners() {
        let broker = LocalBroker::new();
        let mut rx = broker.subscribe_events();
        broker
            .emit("images.resize.completed", Some(json!({"id": "1"})), EmitOptions::default())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "images.resize.completed");
        assert_eq!(event.payload, Some(json!({"id": "1"})));
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let broker = LocalBroker::new().with_cacher(ConnectionConfig::default());
        assert!(broker.cacher_connection().is_some());
        broker.register(math()).await;
        assert_eq!(broker.services().await, vec!["math"]);
        assert!(broker.unregister("math").await);
        assert!(!broker.unregister("math").await);
    }
}
