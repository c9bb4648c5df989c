//! The JSON-string surface a native caller sees.
//!
//! Every call takes and returns plain strings and blocks until the inner
//! asynchronous work is done. Streaming pushes chunks into a callback: `Some`
//! for text, `None` once the reply is complete. Error chunks are text whose
//! first character is the 0x02 control byte.
//!
//! A [`Bridge`] parks its caller on a private runtime. Calling it again from
//! inside one of its own callbacks fails with [`BridgeError::Busy`], and
//! calling it from async code fails with [`BridgeError::AsyncContext`]; async
//! hosts drive a [`ChatSession`] directly.
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::engine::{Engine, GenerationOptions};
use crate::errors::{BridgeError, BridgeResult};
use crate::models::chunk::StreamChunk;
use crate::models::tool::ToolDeclaration;
use crate::normalize::parse_messages;
use crate::proxy::ToolExecutor;
use crate::session::{ChatRequest, ChatSession};
use crate::settings::Settings;

pub struct Bridge {
    session: ChatSession,
    runtime: Option<Runtime>,
    parked: AtomicBool,
}

struct Parked<'a>(&'a AtomicBool);

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Bridge {
    pub fn new(engine: Arc<dyn Engine>) -> BridgeResult<Self> {
        Self::with_session(ChatSession::new(engine))
    }

    /// A bridge configured from `FMBRIDGE_*` environment variables
    pub fn from_env(engine: Arc<dyn Engine>) -> BridgeResult<Self> {
        let settings = Settings::new()?;
        Self::with_session(ChatSession::new(engine).with_settings(settings))
    }

    pub fn with_session(session: ChatSession) -> BridgeResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::EngineUnavailable {
                reason: format!("could not start the bridge runtime: {}", e),
            })?;

        Ok(Self {
            session,
            runtime: Some(runtime),
            parked: AtomicBool::new(false),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.session.executor = executor;
        self
    }

    /// Block on `future`, refusing to nest inside another parked call or to
    /// block a thread that is already driving an async runtime
    fn park<F: Future>(&self, future: F) -> BridgeResult<F::Output> {
        self.parked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::Busy)?;
        let _parked = Parked(&self.parked);

        if Handle::try_current().is_ok() {
            tracing::warn!("Refusing to block inside an async runtime");
            return Err(BridgeError::AsyncContext);
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BridgeError::EngineUnavailable {
                reason: "the bridge runtime has shut down".to_string(),
            })?;
        Ok(runtime.block_on(future))
    }

    /// `{"status": "available"}` or `{"status": "unavailable", "reason": ...}`
    pub fn availability_json(&self) -> BridgeResult<String> {
        let availability = self.park(self.session.availability())?;
        to_json(&availability)
    }

    /// Run one turn and return the `{"text", "toolCalls"?}` report
    pub fn respond_json(
        &self,
        messages_json: &str,
        tools_json: Option<&str>,
        temperature: f64,
        max_tokens: i64,
    ) -> BridgeResult<String> {
        let request = request(messages_json, tools_json, None, temperature, max_tokens)?;
        let reply = self.park(self.session.respond(request))??;
        to_json(&reply)
    }

    /// Generate an object following `schema_json`, returning `{"text", "object"}`
    pub fn generate_json(
        &self,
        messages_json: &str,
        schema_json: &str,
        temperature: f64,
        max_tokens: i64,
    ) -> BridgeResult<String> {
        let request = request(messages_json, None, Some(schema_json), temperature, max_tokens)?;
        let reply = self.park(self.session.generate_object(request))??;
        to_json(&reply)
    }

    /// Stream one turn into `on_chunk`, then return the turn's
    /// `{"text", "toolCalls"?}` report.
    ///
    /// `on_chunk` always sees exactly one terminal chunk. A failure before
    /// streaming starts is pushed as a single error chunk; a failure while
    /// streaming ends the stream with its error chunk. Both are also returned.
    pub fn stream_json<F>(
        &self,
        messages_json: &str,
        tools_json: Option<&str>,
        schema_json: Option<&str>,
        temperature: f64,
        max_tokens: i64,
        mut on_chunk: F,
    ) -> BridgeResult<String>
    where
        F: FnMut(Option<&str>),
    {
        let mut terminal_sent = false;
        let outcome = request(messages_json, tools_json, schema_json, temperature, max_tokens)
            .and_then(|request| {
                self.park(async {
                    let mut stream = self.session.stream(request).await?;
                    let mut failure = None;
                    while let Some(chunk) = stream.next().await {
                        if let StreamChunk::Error(detail) = &chunk {
                            failure = Some(detail.clone());
                        }
                        let terminal = chunk.is_terminal();
                        on_chunk(chunk.to_wire().as_deref());
                        if terminal {
                            terminal_sent = true;
                            break;
                        }
                    }
                    match failure {
                        Some(detail) => Err(BridgeError::generation(detail)),
                        None => Ok(stream.reply()),
                    }
                })?
            });

        match outcome {
            Ok(reply) => to_json(&reply),
            Err(e) => {
                if !terminal_sent {
                    let chunk = StreamChunk::Error(e.to_string()).to_wire();
                    on_chunk(chunk.as_deref());
                }
                Err(e)
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Plain drop blocks, which panics when the host drops us from async code
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn parse<T: DeserializeOwned>(raw: &str, what: &str) -> BridgeResult<T> {
    serde_json::from_str(raw).map_err(|e| BridgeError::invalid_input(format!("{}: {}", what, e)))
}

fn to_json<T: Serialize>(value: &T) -> BridgeResult<String> {
    serde_json::to_string(value).map_err(|e| BridgeError::generation(e.to_string()))
}

fn request(
    messages_json: &str,
    tools_json: Option<&str>,
    schema_json: Option<&str>,
    temperature: f64,
    max_tokens: i64,
) -> BridgeResult<ChatRequest> {
    let mut request = ChatRequest::new(parse_messages(messages_json)?)
        .with_options(GenerationOptions::from_raw(temperature, max_tokens));

    if let Some(raw) = tools_json.filter(|raw| !raw.trim().is_empty()) {
        request = request.with_tools(parse::<Vec<ToolDeclaration>>(raw, "tools")?);
    }
    if let Some(raw) = schema_json {
        request = request.with_schema(parse(raw, "schema")?);
    }
    Ok(request)
}
