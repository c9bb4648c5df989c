use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::CompiledSchema;
use super::tool::ToolDefinition;

/// A tool signature attached to the instructions entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    pub parameters: CompiledSchema,
}

impl From<&ToolDefinition> for ToolSignature {
    fn from(definition: &ToolDefinition) -> Self {
        ToolSignature {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: definition.schema.clone(),
        }
    }
}

/// A tool call the model made in an earlier turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub arguments: Value,
}

/// One entry of the engine's ordered transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TranscriptEntry {
    #[serde(rename_all = "camelCase")]
    Instructions {
        text: String,
        tool_defs: Vec<ToolSignature>,
    },
    Prompt {
        text: String,
    },
    Response {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutput {
        id: String,
        tool_name: String,
        text: String,
    },
    ToolCalls {
        calls: Vec<ToolCallSummary>,
    },
}

impl TranscriptEntry {
    pub fn instructions<S: Into<String>>(text: S) -> Self {
        TranscriptEntry::Instructions {
            text: text.into(),
            tool_defs: Vec::new(),
        }
    }

    pub fn prompt<S: Into<String>>(text: S) -> Self {
        TranscriptEntry::Prompt { text: text.into() }
    }

    pub fn response<S: Into<String>>(text: S) -> Self {
        TranscriptEntry::Response { text: text.into() }
    }

    pub fn is_instructions(&self) -> bool {
        matches!(self, TranscriptEntry::Instructions { .. })
    }
}
