use serde::{Deserialize, Serialize};

/// Marks an error chunk on a plain text channel. Generated text never starts with it.
pub const ERROR_PREFIX: char = '\u{2}';

/// One unit of a streamed reply. `Done` and `Error` are always terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "camelCase")]
pub enum StreamChunk {
    Delta(String),
    Error(String),
    Done,
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Error(_) | StreamChunk::Done)
    }

    /// Encode for an unframed text channel: `None` is the completion marker
    pub fn to_wire(&self) -> Option<String> {
        match self {
            StreamChunk::Delta(text) => Some(text.clone()),
            StreamChunk::Error(message) => Some(format!("{}{}", ERROR_PREFIX, message)),
            StreamChunk::Done => None,
        }
    }

    /// Decode a chunk received over an unframed text channel
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            None => StreamChunk::Done,
            Some(text) => match text.strip_prefix(ERROR_PREFIX) {
                Some(message) => StreamChunk::Error(message.to_string()),
                None => StreamChunk::Delta(text.to_string()),
            },
        }
    }
}
