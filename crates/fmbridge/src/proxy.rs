//! Proxy tools: the engine calls them, the host runs the real tool later.
//!
//! A proxy never waits for the real result. Waiting would deadlock whenever the
//! host can only run the tool after the engine's call returns. Instead it
//! notifies the executor, records the call in the turn's collector and hands
//! the engine a fixed placeholder so generation can finish. The recorded calls
//! are reported to the caller alongside the reply.
use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::collector::ToolCallCollector;
use crate::engine::EngineTool;
use crate::errors::{BridgeError, BridgeResult};
use crate::models::schema::CompiledSchema;
use crate::models::tool::ToolDefinition;

/// What a proxy returns to the engine in place of a real result
pub const DEFAULT_PLACEHOLDER: &str = "Tool call received. The result will be provided later.";

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

/// Replace characters engines reject in tool names with `_`
pub fn sanitize_tool_name(name: &str) -> String {
    let sanitized = INVALID_NAME_CHARS.replace_all(name, "_").to_string();
    if sanitized.is_empty() {
        "tool".to_string()
    } else {
        sanitized
    }
}

/// Receives tool invocations on the host side.
///
/// `notify` must return promptly; the host decides when, or whether, to
/// actually run the tool.
pub trait ToolExecutor: Send + Sync {
    fn notify(&self, id: u64, arguments: &str);
}

impl<F> ToolExecutor for F
where
    F: Fn(u64, &str) + Send + Sync,
{
    fn notify(&self, id: u64, arguments: &str) {
        self(id, arguments)
    }
}

/// A tool invocation forwarded to the host
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: u64,
    /// JSON object text
    pub arguments: String,
}

/// Forwards invocations over an unbounded channel, so notifying never blocks
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<ToolInvocation>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ToolInvocation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ToolExecutor for ChannelExecutor {
    fn notify(&self, id: u64, arguments: &str) {
        let invocation = ToolInvocation {
            id,
            arguments: arguments.to_string(),
        };
        if self.tx.send(invocation).is_err() {
            tracing::warn!(id, "Tool executor receiver dropped, invocation not delivered");
        }
    }
}

/// An executor that ignores every invocation; the calls are still collected
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedExecutor;

impl ToolExecutor for DetachedExecutor {
    fn notify(&self, _id: u64, _arguments: &str) {}
}

pub struct ProxyTool {
    definition: ToolDefinition,
    engine_name: String,
    executor: Arc<dyn ToolExecutor>,
    collector: Arc<ToolCallCollector>,
    placeholder: String,
}

impl ProxyTool {
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Handle one invocation from the engine, returning the placeholder
    pub fn invoke(&self, arguments: Value) -> BridgeResult<String> {
        let arguments = match arguments {
            Value::Object(arguments) => arguments,
            Value::Null => Map::new(),
            // Non-object root schemas: keep the value under a single key
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), other);
                wrapped
            }
        };

        let json = serde_json::to_string(&arguments)
            .map_err(|e| BridgeError::invalid_input(format!("tool arguments: {}", e)))?;
        self.executor.notify(self.definition.id, &json);
        let call_id = self
            .collector
            .append(self.definition.id, &self.definition.name, arguments);

        tracing::debug!(
            tool = %self.definition.name,
            id = self.definition.id,
            call_id = %call_id,
            "proxied tool call"
        );
        Ok(self.placeholder.clone())
    }
}

#[async_trait]
impl EngineTool for ProxyTool {
    fn name(&self) -> &str {
        &self.engine_name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn parameters(&self) -> &CompiledSchema {
        &self.definition.schema
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        Ok(self.invoke(arguments)?)
    }
}

/// Build one proxy per definition, all recording into `collector`
pub fn register(
    definitions: Vec<ToolDefinition>,
    executor: Arc<dyn ToolExecutor>,
    collector: Arc<ToolCallCollector>,
    placeholder: &str,
) -> BridgeResult<Vec<Arc<ProxyTool>>> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    let mut proxies = Vec::with_capacity(definitions.len());

    for definition in definitions {
        if !ids.insert(definition.id) {
            return Err(BridgeError::invalid_input(format!(
                "Duplicate tool id: {}",
                definition.id
            )));
        }

        let engine_name = sanitize_tool_name(&definition.name);
        if !names.insert(engine_name.clone()) {
            return Err(BridgeError::invalid_input(format!(
                "Duplicate tool name: {}",
                engine_name
            )));
        }

        proxies.push(Arc::new(ProxyTool {
            definition,
            engine_name,
            executor: Arc::clone(&executor),
            collector: Arc::clone(&collector),
            placeholder: placeholder.to_string(),
        }));
    }

    Ok(proxies)
}
