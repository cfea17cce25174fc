//! Tool trait, registry and dispatcher
//!
//! A tool is a named async operation the model can request by emitting a
//! `tool_calls` envelope. Tools validate their own arguments and return a
//! JSON value; failures are reported back into the conversation rather than
//! aborting the turn.

pub mod trading;

use crate::error::AssistantError;
use crate::models::{ToolCall, ToolResult};
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Trait for a single tool invokable from the chat loop.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema fragment describing the expected arguments.
    fn parameter_schema(&self) -> Value;
    async fn execute(&self, cancel: &CancellationToken, args: Value) -> Result<Value>;
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Closure-backed tool, for wiring small operations without a struct each.
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    handler: Box<dyn Fn(CancellationToken, Value) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F, Fut>(name: &str, description: &str, schema: Value, handler: F) -> Self
    where
        F: Fn(CancellationToken, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            handler: Box::new(move |cancel, args| Box::pin(handler(cancel, args))),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, cancel: &CancellationToken, args: Value) -> Result<Value> {
        (self.handler)(cancel.clone(), args).await
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of available tools. Re-registering a name replaces the previous
/// tool.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "Replacing previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog text injected into the system prompt so the model knows what
    /// it can call.
    pub fn catalog(&self) -> String {
        let mut names = self.names();
        names.sort();
        let mut out = String::new();
        for name in names {
            if let Some(tool) = self.tools.get(&name) {
                out.push_str(&format!(
                    "- {}: {}\n  parameters: {}\n",
                    tool.name(),
                    tool.description(),
                    tool.parameter_schema()
                ));
            }
        }
        out
    }

    /// Looks up every call's tool in one pass. Callers that guard the
    /// registry with a lock resolve under it and execute after releasing it.
    pub fn resolve(&self, calls: &[ToolCall]) -> Vec<Option<Arc<dyn Tool>>> {
        calls.iter().map(|call| self.get(&call.name)).collect()
    }

    /// Resolves and executes a batch of calls sequentially, in order.
    pub async fn execute_batch(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
    ) -> Vec<ToolResult> {
        execute_resolved(cancel, calls, self.resolve(calls)).await
    }
}

/// Executes pre-resolved calls sequentially, in request order. An unknown
/// name or a failing tool yields an error result for that call; the rest
/// still run.
pub async fn execute_resolved(
    cancel: &CancellationToken,
    calls: &[ToolCall],
    tools: Vec<Option<Arc<dyn Tool>>>,
) -> Vec<ToolResult> {
    let mut results = Vec::with_capacity(calls.len());
    for (call, tool) in calls.iter().zip(tools) {
        let result = match tool {
            Some(tool) => match tool.execute(cancel, call.arguments.clone()).await {
                Ok(value) => ToolResult::ok(&call.name, value),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    ToolResult::err(&call.name, e.to_string())
                }
            },
            None => {
                warn!(tool = %call.name, "Unknown tool requested");
                ToolResult::err(&call.name, format!("unknown tool: {}", call.name))
            }
        };
        results.push(result);
    }
    results
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes typed arguments from a raw JSON value, mapping decode failures to
/// an invalid-arguments error that flows back into the conversation.
pub fn decode_args<T: serde::de::DeserializeOwned>(name: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| AssistantError::InvalidArguments(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool(name: &str, reply: &'static str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            name,
            "echoes a fixed reply",
            json!({"type": "object"}),
            move |_cancel, _args| async move { Ok(json!({ "reply": reply })) },
        ))
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("ping", "pong"));

        let cancel = CancellationToken::new();
        let results = registry
            .execute_batch(
                &cancel,
                &[ToolCall {
                    name: "ping".to_string(),
                    arguments: json!({}),
                }],
            )
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_err());
        assert_eq!(results[0].result.as_ref().unwrap()["reply"], "pong");
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("status", "first"));
        registry.register(echo_tool("status", "second"));
        assert_eq!(registry.len(), 1);

        let cancel = CancellationToken::new();
        let results = registry
            .execute_batch(
                &cancel,
                &[ToolCall {
                    name: "status".to_string(),
                    arguments: json!({}),
                }],
            )
            .await;
        assert_eq!(results[0].result.as_ref().unwrap()["reply"], "second");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_fatal() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("known", "ok"));

        let cancel = CancellationToken::new();
        let calls = vec![
            ToolCall {
                name: "missing".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                name: "known".to_string(),
                arguments: json!({}),
            },
        ];
        let results = registry.execute_batch(&cancel, &calls).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(results[0].error.as_ref().unwrap().contains("unknown tool"));
        assert!(!results[1].is_err());
    }

    #[test]
    fn test_catalog_lists_all_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("alpha", "a"));
        registry.register(echo_tool("beta", "b"));
        let catalog = registry.catalog();
        assert!(catalog.contains("- alpha"));
        assert!(catalog.contains("- beta"));
    }

    #[test]
    fn test_decode_args_reports_tool_name() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            #[allow(dead_code)]
            symbol: String,
        }
        let err = decode_args::<Args>("get_market_price", json!({"symbol": 42})).unwrap_err();
        assert!(err.to_string().contains("get_market_price"));
    }
}
