use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use super::tool::FunctionToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message in the caller's flat chat history
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Kept as raw JSON so a malformed payload never fails the whole history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system<S: Into<String>>(text: S) -> Self {
        Message::new(Role::System).with_text(text)
    }

    pub fn user<S: Into<String>>(text: S) -> Self {
        Message::new(Role::User).with_text(text)
    }

    pub fn assistant<S: Into<String>>(text: S) -> Self {
        Message::new(Role::Assistant).with_text(text)
    }

    pub fn tool<S: Into<String>>(text: S) -> Self {
        Message::new(Role::Tool).with_text(text)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_call_id<S: Into<String>>(mut self, id: S) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Value) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    /// The message text, or an empty string when there is none
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Decode the structured `tool_calls` field.
    ///
    /// Anything that isn't an array of function calls degrades to an empty list
    /// rather than an error, so one bad assistant turn can't sink the history.
    pub fn function_tool_calls(&self) -> Vec<FunctionToolCall> {
        match &self.tool_calls {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => match serde_json::from_value::<Vec<FunctionToolCall>>(raw.clone()) {
                Ok(calls) => calls,
                Err(e) => {
                    tracing::warn!("Ignoring malformed tool_calls on {} message: {}", self.role, e);
                    Vec::new()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_deserialization() {
        let message: Message = serde_json::from_value(json!({
            "role": "tool",
            "content": "{}",
            "tool_call_id": "call_1",
            "name": "add"
        }))
        .unwrap();

        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.text(), "{}");
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.name.as_deref(), Some("add"));
        assert!(message.tool_calls.is_none());
    }

    #[test]
    fn test_missing_content_is_empty_text() {
        let message: Message = serde_json::from_value(json!({"role": "assistant"})).unwrap();
        assert_eq!(message.text(), "");
    }

    #[test]
    fn test_function_tool_calls() {
        let message = Message::assistant("").with_tool_calls(json!([{
            "id": "call_1",
            "type": "function",
            "function": {"name": "add", "arguments": "{\"a\":1}"}
        }]));

        let calls = message.function_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "add");
        assert_eq!(calls[0].function.arguments_value(), json!({"a": 1}));
    }

    #[test]
    fn test_malformed_tool_calls_degrade_to_empty() {
        let message = Message::assistant("").with_tool_calls(json!({"not": "an array"}));
        assert!(message.function_tool_calls().is_empty());

        let message = Message::assistant("").with_tool_calls(json!([{"id": 3}]));
        assert!(message.function_tool_calls().is_empty());
    }
}
