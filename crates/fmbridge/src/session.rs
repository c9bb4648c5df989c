use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;

use crate::collector::{ToolCallCollector, Turn};
use crate::engine::{Availability, Engine, EngineSession, EngineTool, GenerationOptions, SessionConfig};
use crate::errors::{BridgeError, BridgeResult};
use crate::models::chunk::StreamChunk;
use crate::models::message::Message;
use crate::models::schema::CompiledSchema;
use crate::models::tool::{ChatReply, StructuredReply, ToolCallRecord, ToolDeclaration};
use crate::normalize::normalize;
use crate::proxy::{self, DetachedExecutor, ToolExecutor};
use crate::schema;
use crate::settings::Settings;
use crate::stream::{deltas, spawn_channel};
use crate::transcript;

/// One caller turn: the flat history, tools the model may call, and options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
    /// JSON-Schema-like shape the output must follow
    pub schema: Option<Value>,
    pub options: GenerationOptions,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        ChatRequest {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Marks the session busy until dropped
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> BridgeResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::Busy)?;
        Ok(InFlight(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything a turn needs once its inputs have been validated
struct PreparedTurn {
    session: Box<dyn EngineSession>,
    prompt: String,
    schema: Option<CompiledSchema>,
    options: GenerationOptions,
    turn: Turn,
    guard: InFlight,
}

/// A streamed reply. Yields deltas, then `Done` or `Error`.
///
/// The session stays busy until both the engine stream has finished and this
/// value is dropped, so [`ChatStream::tool_calls`] and [`ChatStream::reply`]
/// can be read after the terminal chunk without racing the next turn.
pub struct ChatStream {
    chunks: ReceiverStream<StreamChunk>,
    collector: Arc<ToolCallCollector>,
    turn: Turn,
    text: String,
    tool_call_text: String,
    _guard: Arc<InFlight>,
}

impl ChatStream {
    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.collector.drain(&self.turn)
    }

    /// The `{text, toolCalls}` report for everything streamed so far
    pub fn reply(&self) -> ChatReply {
        report(self.text.clone(), self.tool_calls(), &self.tool_call_text)
    }
}

impl Stream for ChatStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.chunks).poll_next(cx);
        if let Poll::Ready(Some(StreamChunk::Delta(delta))) = &polled {
            self.text.push_str(delta);
        }
        polled
    }
}

/// Build the caller's reply. Tool calls replace the engine's text.
fn report(text: String, records: Vec<ToolCallRecord>, tool_call_text: &str) -> ChatReply {
    if records.is_empty() {
        return ChatReply {
            text,
            tool_calls: None,
        };
    }

    tracing::debug!(calls = records.len(), "turn ended with tool calls");
    ChatReply {
        text: tool_call_text.to_string(),
        tool_calls: Some(records.iter().map(ToolCallRecord::to_function_call).collect()),
    }
}

/// A conversation bridged onto a session-based engine.
///
/// Each turn rebuilds the engine session from the caller's history. Only one
/// turn may be in flight at a time; the session's tool-call collector is reset
/// at the start of every turn.
pub struct ChatSession {
    engine: Arc<dyn Engine>,
    pub(crate) executor: Arc<dyn ToolExecutor>,
    collector: Arc<ToolCallCollector>,
    settings: Settings,
    in_flight: Arc<AtomicBool>,
}

impl ChatSession {
    /// Create a session whose tool calls are collected but not forwarded anywhere
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            executor: Arc::new(DetachedExecutor),
            collector: Arc::new(ToolCallCollector::new()),
            settings: Settings::default(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn availability(&self) -> Availability {
        self.engine.availability().await
    }

    /// Validate inputs, build the transcript and open the engine session
    async fn prepare(&self, request: ChatRequest) -> BridgeResult<PreparedTurn> {
        let guard = InFlight::acquire(&self.in_flight)?;

        if let Availability::Unavailable { reason } = self.engine.availability().await {
            tracing::error!("Generation engine unavailable: {}", reason);
            return Err(BridgeError::EngineUnavailable { reason });
        }

        let (history, prompt) = normalize(&request.messages)?;

        let definitions = request
            .tools
            .iter()
            .map(ToolDeclaration::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let schema = request.schema.as_ref().map(schema::compile).transpose()?;

        let built = transcript::build_with_report(&history);
        if !built.dropped.is_empty() {
            tracing::warn!(
                dropped = built.dropped.len(),
                "Some history messages could not be reconstructed"
            );
        }
        let transcript = transcript::assemble(built.entries, &definitions);

        let proxies = proxy::register(
            definitions,
            Arc::clone(&self.executor),
            Arc::clone(&self.collector),
            &self.settings.tools.placeholder,
        )?;
        let tools: Vec<Arc<dyn EngineTool>> = proxies
            .into_iter()
            .map(|proxy| proxy as Arc<dyn EngineTool>)
            .collect();

        tracing::debug!(
            entries = transcript.len(),
            tools = tools.len(),
            prompt_len = prompt.len(),
            "opening engine session"
        );
        let session = self
            .engine
            .open_session(SessionConfig {
                transcript,
                tools,
                permissive_guardrails: self.settings.permissive_guardrails,
            })
            .await
            .map_err(|e| BridgeError::generation(e.to_string()))?;

        let options = request.options.or(self.settings.generation.options());
        let turn = self.collector.reset();

        Ok(PreparedTurn {
            session,
            prompt,
            schema,
            options,
            turn,
            guard,
        })
    }

    /// Run a turn to completion.
    ///
    /// If any proxy tool fired, the reply carries the calls and a fixed text
    /// instead of what the engine wrote around them.
    pub async fn respond(&self, request: ChatRequest) -> BridgeResult<ChatReply> {
        let PreparedTurn {
            mut session,
            prompt,
            schema,
            options,
            turn,
            guard: _guard,
        } = self.prepare(request).await?;

        let text = match &schema {
            Some(schema) => session
                .respond_structured(&prompt, schema, &options)
                .await
                .map(|object| object.to_string()),
            None => session.respond(&prompt, &options).await,
        }
        .map_err(|e| {
            tracing::error!("Generation failed: {}", e);
            BridgeError::generation(e.to_string())
        })?;

        let records = self.collector.drain(&turn);
        Ok(report(text, records, &self.settings.tools.tool_call_text))
    }

    /// Generate a value following the request's schema
    pub async fn generate_object(&self, request: ChatRequest) -> BridgeResult<StructuredReply> {
        if request.schema.is_none() {
            return Err(BridgeError::invalid_input("structured generation needs a schema"));
        }

        let PreparedTurn {
            mut session,
            prompt,
            schema,
            options,
            guard: _guard,
            ..
        } = self.prepare(request).await?;
        let schema = schema.ok_or_else(|| BridgeError::invalid_input("missing schema"))?;

        let object = session
            .respond_structured(&prompt, &schema, &options)
            .await
            .map_err(|e| {
                tracing::error!("Structured generation failed: {}", e);
                BridgeError::generation(e.to_string())
            })?;

        Ok(StructuredReply {
            text: object.to_string(),
            object,
        })
    }

    /// Start a streamed turn.
    ///
    /// Input problems are returned as errors before anything is streamed;
    /// engine failures arrive as a terminal [`StreamChunk::Error`].
    pub async fn stream(&self, request: ChatRequest) -> BridgeResult<ChatStream> {
        let PreparedTurn {
            session,
            prompt,
            schema,
            options,
            turn,
            guard,
        } = self.prepare(request).await?;

        let guard = Arc::new(guard);
        let task_guard = Arc::clone(&guard);
        let snapshots = session.stream(prompt, schema, options);
        let chunks = async_stream::stream! {
            // Proxies may still fire until the engine stream is dropped
            let _guard = task_guard;
            let mut chunks = deltas(snapshots);
            while let Some(chunk) = chunks.next().await {
                yield chunk;
            }
        };

        Ok(ChatStream {
            chunks: spawn_channel(chunks, self.settings.stream.channel_capacity),
            collector: Arc::clone(&self.collector),
            turn,
            text: String::new(),
            tool_call_text: self.settings.tools.tool_call_text.clone(),
            _guard: guard,
        })
    }
}
