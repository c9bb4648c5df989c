use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::models::schema::CompiledSchema;
use crate::models::transcript::TranscriptEntry;

pub mod mock;

/// Whether the engine can be used at all on this host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Availability {
    Available,
    Unavailable { reason: String },
}

/// Sampling options. `None` means the engine picks its own default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    /// Build from the boundary's numeric convention: a temperature of 0 and a
    /// non-positive token limit both mean "use the engine default"
    pub fn from_raw(temperature: f64, max_tokens: i64) -> Self {
        GenerationOptions {
            temperature: (temperature != 0.0 && temperature.is_finite()).then_some(temperature),
            max_tokens: (max_tokens > 0).then(|| u32::try_from(max_tokens).unwrap_or(u32::MAX)),
        }
    }

    /// Fill unset options from `defaults`
    pub fn or(self, defaults: GenerationOptions) -> Self {
        GenerationOptions {
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
        }
    }
}

/// A tool the engine may call while generating
#[async_trait]
pub trait EngineTool: Send + Sync {
    /// The name the model sees
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Shape of the arguments the engine must produce
    fn parameters(&self) -> &CompiledSchema;

    /// Run the tool with arguments conforming to [`EngineTool::parameters`];
    /// the returned text is fed back into generation
    async fn call(&self, arguments: Value) -> Result<String>;
}

/// Everything needed to open a session for one turn
#[derive(Clone)]
pub struct SessionConfig {
    /// Prior conversation, instructions first
    pub transcript: Vec<TranscriptEntry>,
    pub tools: Vec<Arc<dyn EngineTool>>,
    /// Ask the engine to relax its built-in content guardrails, if it offers that
    pub permissive_guardrails: bool,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("transcript", &self.transcript)
            .field(
                "tools",
                &self.tools.iter().map(|tool| tool.name()).collect::<Vec<_>>(),
            )
            .field("permissive_guardrails", &self.permissive_guardrails)
            .finish()
    }
}

/// The cumulative output so far, one item per update
pub type SnapshotStream = BoxStream<'static, Result<String>>;

/// A live conversation with the engine
#[async_trait]
pub trait EngineSession: Send {
    /// Generate a complete reply to `prompt`
    async fn respond(&mut self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Generate a value shaped by `schema`
    async fn respond_structured(
        &mut self,
        prompt: &str,
        schema: &CompiledSchema,
        options: &GenerationOptions,
    ) -> Result<Value>;

    /// Stream a reply. Each item is the whole text generated so far, not a delta.
    fn stream(
        self: Box<Self>,
        prompt: String,
        schema: Option<CompiledSchema>,
        options: GenerationOptions,
    ) -> SnapshotStream;
}

/// The generation capability the bridge drives
#[async_trait]
pub trait Engine: Send + Sync {
    async fn availability(&self) -> Availability;

    async fn open_session(&self, config: SessionConfig) -> Result<Box<dyn EngineSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_raw() {
        assert_eq!(GenerationOptions::from_raw(0.0, 0), GenerationOptions::default());
        assert_eq!(GenerationOptions::from_raw(0.0, -5), GenerationOptions::default());
        assert_eq!(
            GenerationOptions::from_raw(0.7, 256),
            GenerationOptions {
                temperature: Some(0.7),
                max_tokens: Some(256)
            }
        );
        assert_eq!(GenerationOptions::from_raw(f64::NAN, 1).temperature, None);
    }

    #[test]
    fn test_options_or_defaults() {
        let defaults = GenerationOptions {
            temperature: Some(0.2),
            max_tokens: Some(100),
        };
        let options = GenerationOptions {
            temperature: Some(0.9),
            max_tokens: None,
        };
        assert_eq!(
            options.or(defaults),
            GenerationOptions {
                temperature: Some(0.9),
                max_tokens: Some(100)
            }
        );
    }

    #[test]
    fn test_availability_serialization() {
        let unavailable = Availability::Unavailable {
            reason: "model not downloaded".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&unavailable).unwrap(),
            serde_json::json!({"status": "unavailable", "reason": "model not downloaded"})
        );
    }
}
