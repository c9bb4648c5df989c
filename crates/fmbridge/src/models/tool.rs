use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;

use super::schema::CompiledSchema;
use crate::errors::SchemaError;
use crate::schema;

/// A tool as the caller declares it, with a JSON-Schema-like parameter document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDeclaration {
    /// Caller-assigned identifier, unique within one generation call
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDeclaration {
    pub fn new<N, D>(id: u64, name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolDeclaration {
            id,
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Compile the parameter document into the engine's schema graph
    pub fn compile(&self) -> Result<ToolDefinition, SchemaError> {
        let schema = schema::compile_with_hint(&self.parameters, &self.name)?;
        Ok(ToolDefinition {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            schema,
        })
    }
}

/// A declared tool whose parameters have been compiled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub schema: CompiledSchema,
}

/// One proxy invocation observed during a turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Echoes the [`ToolDefinition`] id
    pub id: u64,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub call_id: String,
}

impl ToolCallRecord {
    /// Render in the OpenAI function-call shape used in tool-call reports
    pub fn to_function_call(&self) -> FunctionToolCall {
        FunctionToolCall {
            id: self.call_id.clone(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: self.name.clone(),
                arguments: Value::String(Value::Object(self.arguments.clone()).to_string()),
            },
        }
    }
}

/// `{"name": ..., "arguments": ...}` where arguments is usually a JSON-encoded string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl FunctionCall {
    /// The arguments as a JSON value, decoding them first when they arrived as a string
    pub fn arguments_value(&self) -> Value {
        match &self.arguments {
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
            Value::String(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        }
    }
}

/// An OpenAI-style tool call, both as read from history and as reported back
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

/// The reply to a non-streaming turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<FunctionToolCall>>,
}

/// The reply to a structured generation: a text rendering plus the object itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredReply {
    pub text: String,
    pub object: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declaration_defaults() {
        let decl: ToolDeclaration =
            serde_json::from_value(json!({"id": 7, "name": "ping"})).unwrap();
        assert_eq!(decl.id, 7);
        assert_eq!(decl.description, "");
        assert_eq!(decl.parameters["type"], "object");
    }

    #[test]
    fn test_record_to_function_call() {
        let mut arguments = Map::new();
        arguments.insert("a".to_string(), json!(10));
        let record = ToolCallRecord {
            id: 1,
            name: "add".to_string(),
            arguments,
            call_id: "call_abc".to_string(),
        };

        let call = serde_json::to_value(record.to_function_call()).unwrap();
        assert_eq!(
            call,
            json!({
                "id": "call_abc",
                "type": "function",
                "function": {"name": "add", "arguments": "{\"a\":10}"}
            })
        );
    }

    #[test]
    fn test_reply_omits_empty_tool_calls() {
        let reply = ChatReply {
            text: "hi".to_string(),
            tool_calls: None,
        };
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!({"text": "hi"}));
    }

    #[test]
    fn test_arguments_value() {
        let call = FunctionCall {
            name: "f".to_string(),
            arguments: json!("{\"x\": \"y\"}"),
        };
        assert_eq!(call.arguments_value(), json!({"x": "y"}));

        let call = FunctionCall {
            name: "f".to_string(),
            arguments: json!({"x": 1}),
        };
        assert_eq!(call.arguments_value(), json!({"x": 1}));

        let call = FunctionCall {
            name: "f".to_string(),
            arguments: json!("not json"),
        };
        assert_eq!(call.arguments_value(), json!("not json"));
    }
}
