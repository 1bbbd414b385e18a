//! Tool registry
//!
//! Dynamic dispatch by name. No inheritance anywhere: extension is by
//! registration, removal by name.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;

use super::types::ToolSchema;

/// One callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn schema(&self) -> &ToolSchema;

    /// Params arrive already validated against [`ToolHandler::schema`].
    async fn call(&self, params: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a handler under its schema name.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.schema().name.to_string();
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, handler);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|entry| Arc::clone(&entry))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declared schemas, ordered by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .iter()
            .map(|entry| entry.schema().clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(b.name));
        schemas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo {
        schema: ToolSchema,
    }

    #[async_trait]
    impl ToolHandler for Echo {
        fn schema(&self) -> &ToolSchema {
            &self.schema
        }

        async fn call(&self, params: Value) -> Result<Value> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn register_get_remove() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo {
            schema: ToolSchema::new("echo", "returns its params"),
        }));

        let handler = registry.get("echo").unwrap();
        assert_eq!(handler.call(json!({"a": 1})).await.unwrap(), json!({"a": 1}));
        assert_eq!(registry.schemas()[0].name, "echo");

        assert!(registry.remove("echo"));
        assert!(!registry.remove("echo"));
        assert!(registry.get("echo").is_none());
    }
}
