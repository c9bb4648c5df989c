//! A scripted engine that replays pre-configured turns.
//!
//! Each call to a session consumes the next [`Script`]: it invokes the listed
//! tools through whatever tools the session was opened with, then produces the
//! scripted output. Every opened session and prompt is recorded for assertions.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::{
    Availability, Engine, EngineSession, EngineTool, GenerationOptions, SessionConfig,
    SnapshotStream,
};
use crate::models::schema::CompiledSchema;
use crate::models::transcript::TranscriptEntry;

/// One scripted turn
#[derive(Debug, Clone, Default)]
pub struct Script {
    snapshots: Vec<String>,
    tool_calls: Vec<(String, Value)>,
    failure: Option<String>,
    object: Option<Value>,
}

impl Script {
    /// A turn that produces `text` in a single update
    pub fn text<S: Into<String>>(text: S) -> Self {
        Script {
            snapshots: vec![text.into()],
            ..Default::default()
        }
    }

    /// A turn that streams these cumulative snapshots
    pub fn snapshots<I, S>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script {
            snapshots: snapshots.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// A structured turn producing `object`
    pub fn object(object: Value) -> Self {
        Script {
            snapshots: vec![object.to_string()],
            object: Some(object),
            ..Default::default()
        }
    }

    /// Call the named tool before producing any output
    pub fn with_tool_call<S: Into<String>>(mut self, name: S, arguments: Value) -> Self {
        self.tool_calls.push((name.into(), arguments));
        self
    }

    /// Fail once the scripted snapshots have been produced
    pub fn failing_with<S: Into<String>>(mut self, message: S) -> Self {
        self.failure = Some(message.into());
        self
    }
}

/// What the engine saw during one generation
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub transcript: Vec<TranscriptEntry>,
    pub tool_names: Vec<String>,
    pub permissive_guardrails: bool,
    pub prompt: String,
    pub schema: Option<CompiledSchema>,
    pub options: GenerationOptions,
    /// What each scripted tool call returned to the engine
    pub tool_results: Vec<String>,
}

#[derive(Clone)]
pub struct ScriptedEngine {
    availability: Availability,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    observed: Arc<Mutex<Vec<Observed>>>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            availability: Availability::Available,
            scripts: Arc::new(Mutex::new(scripts.into())),
            observed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self {
            availability: Availability::Unavailable {
                reason: reason.into(),
            },
            ..Self::new(Vec::new())
        }
    }

    /// Every generation seen so far, oldest first
    pub fn observed(&self) -> Vec<Observed> {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn availability(&self) -> Availability {
        self.availability.clone()
    }

    async fn open_session(&self, config: SessionConfig) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(ScriptedSession {
            config,
            scripts: Arc::clone(&self.scripts),
            observed: Arc::clone(&self.observed),
        }))
    }
}

struct ScriptedSession {
    config: SessionConfig,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    observed: Arc<Mutex<Vec<Observed>>>,
}

impl ScriptedSession {
    fn next_script(&self) -> Script {
        // Running out of scripts behaves like an engine with nothing to say
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Script::text(""))
    }

    async fn run_tools(&self, script: &Script) -> Result<Vec<String>> {
        let mut results = Vec::new();
        for (name, arguments) in &script.tool_calls {
            let tool = find_tool(&self.config.tools, name)?;
            results.push(tool.call(arguments.clone()).await?);
        }
        Ok(results)
    }

    fn record(
        &self,
        prompt: &str,
        schema: Option<&CompiledSchema>,
        options: &GenerationOptions,
        tool_results: Vec<String>,
    ) {
        let observed = Observed {
            transcript: self.config.transcript.clone(),
            tool_names: self
                .config
                .tools
                .iter()
                .map(|tool| tool.name().to_string())
                .collect(),
            permissive_guardrails: self.config.permissive_guardrails,
            prompt: prompt.to_string(),
            schema: schema.cloned(),
            options: *options,
            tool_results,
        };
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observed);
    }
}

fn find_tool(tools: &[Arc<dyn EngineTool>], name: &str) -> Result<Arc<dyn EngineTool>> {
    tools
        .iter()
        .find(|tool| tool.name() == name)
        .cloned()
        .ok_or_else(|| anyhow!("Tool not found: {}", name))
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn respond(&mut self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let script = self.next_script();
        let tool_results = self.run_tools(&script).await?;
        self.record(prompt, None, options, tool_results);

        if let Some(failure) = script.failure {
            return Err(anyhow!(failure));
        }
        Ok(script.snapshots.last().cloned().unwrap_or_default())
    }

    async fn respond_structured(
        &mut self,
        prompt: &str,
        schema: &CompiledSchema,
        options: &GenerationOptions,
    ) -> Result<Value> {
        let script = self.next_script();
        let tool_results = self.run_tools(&script).await?;
        self.record(prompt, Some(schema), options, tool_results);

        if let Some(failure) = script.failure {
            return Err(anyhow!(failure));
        }
        match script.object {
            Some(object) => Ok(object),
            None => {
                let text = script.snapshots.last().cloned().unwrap_or_default();
                Ok(serde_json::from_str(&text)?)
            }
        }
    }

    fn stream(
        self: Box<Self>,
        prompt: String,
        schema: Option<CompiledSchema>,
        options: GenerationOptions,
    ) -> SnapshotStream {
        Box::pin(async_stream::try_stream! {
            let script = self.next_script();
            let tool_results = self.run_tools(&script).await?;
            self.record(&prompt, schema.as_ref(), &options, tool_results);

            for snapshot in script.snapshots {
                yield snapshot;
                tokio::task::yield_now().await;
            }

            if let Some(failure) = script.failure {
                Err::<(), _>(anyhow!(failure))?;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn config() -> SessionConfig {
        SessionConfig {
            transcript: vec![TranscriptEntry::prompt("earlier")],
            tools: Vec::new(),
            permissive_guardrails: false,
        }
    }

    #[tokio::test]
    async fn test_respond_replays_scripts_in_order() -> Result<()> {
        let engine = ScriptedEngine::new(vec![Script::text("one"), Script::text("two")]);
        let mut session = engine.open_session(config()).await?;

        let options = GenerationOptions::default();
        assert_eq!(session.respond("a", &options).await?, "one");
        assert_eq!(session.respond("b", &options).await?, "two");
        assert_eq!(session.respond("c", &options).await?, "");

        let observed = engine.observed();
        assert_eq!(observed.len(), 3);
        assert_eq!(observed[1].prompt, "b");
        assert_eq!(observed[0].transcript, vec![TranscriptEntry::prompt("earlier")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_yields_snapshots_then_fails() -> Result<()> {
        let engine = ScriptedEngine::new(vec![
            Script::snapshots(["a", "ab"]).failing_with("boom")
        ]);
        let session = engine.open_session(config()).await?;

        let items: Vec<_> = session
            .stream("p".to_string(), None, GenerationOptions::default())
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert_eq!(items[1].as_ref().unwrap(), "ab");
        assert_eq!(items[2].as_ref().unwrap_err().to_string(), "boom");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_error() -> Result<()> {
        let engine = ScriptedEngine::new(vec![
            Script::text("x").with_tool_call("nope", serde_json::json!({}))
        ]);
        let mut session = engine.open_session(config()).await?;
        let err = session
            .respond("p", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Tool not found"));
        Ok(())
    }
}
