//! Rebuilds the engine's ordered transcript from the caller's flat history.
//!
//! Reconstruction is lenient: a `tool` message whose body isn't in the
//! expected shape is dropped, and an assistant message whose content isn't a
//! tool-call array is kept as plain text. Dropped messages are logged and
//! listed in the [`BuildReport`] so callers can tell them apart from parsed ones.
use serde_json::Value;

use crate::models::content::ToolOutputContent;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{FunctionToolCall, ToolDefinition};
use crate::models::transcript::{ToolCallSummary, ToolSignature, TranscriptEntry};

/// A history message that contributed nothing to the transcript
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedMessage {
    /// Position in the history slice
    pub index: usize,
    pub role: Role,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub entries: Vec<TranscriptEntry>,
    pub dropped: Vec<DroppedMessage>,
}

/// Build transcript entries from history, in message order
pub fn build(history: &[Message]) -> Vec<TranscriptEntry> {
    build_with_report(history).entries
}

pub fn build_with_report(history: &[Message]) -> BuildReport {
    let mut report = BuildReport::default();

    for (index, message) in history.iter().enumerate() {
        match message.role {
            Role::System => report
                .entries
                .push(TranscriptEntry::instructions(message.text())),
            Role::Assistant => report.entries.extend(assistant_entries(message)),
            Role::Tool => match serde_json::from_str::<ToolOutputContent>(message.text()) {
                Ok(content) => {
                    report
                        .entries
                        .extend(content.tool_calls.iter().map(|output| {
                            TranscriptEntry::ToolOutput {
                                id: output.id.clone(),
                                tool_name: output.tool_name.clone(),
                                text: output.text(),
                            }
                        }));
                }
                Err(e) => {
                    tracing::warn!(index, "Dropping tool message that could not be parsed: {}", e);
                    report.dropped.push(DroppedMessage {
                        index,
                        role: message.role,
                        reason: e.to_string(),
                    });
                }
            },
            Role::User | Role::Other => {
                report.entries.push(TranscriptEntry::prompt(message.text()))
            }
        }
    }

    report
}

fn assistant_entries(message: &Message) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();

    let calls = message.function_tool_calls();
    // Content that only echoes the structured calls adds nothing
    let text = match serde_json::from_str::<Vec<FunctionToolCall>>(message.text()) {
        Ok(echoed) if !echoed.is_empty() && !calls.is_empty() => String::new(),
        Ok(echoed) if !echoed.is_empty() => summarize_tool_calls(&echoed),
        _ => message.text().to_string(),
    };

    if !text.is_empty() || calls.is_empty() {
        entries.push(TranscriptEntry::response(text));
    }
    if !calls.is_empty() {
        entries.push(TranscriptEntry::ToolCalls {
            calls: calls
                .iter()
                .map(|call| ToolCallSummary {
                    name: call.function.name.clone(),
                    arguments: call.function.arguments_value(),
                })
                .collect(),
        });
    }

    entries
}

/// Render tool calls as `name(arg=val, ...)`, comma separated
pub fn summarize_tool_calls(calls: &[FunctionToolCall]) -> String {
    calls
        .iter()
        .map(|call| {
            let arguments = match call.function.arguments_value() {
                Value::Object(arguments) => arguments
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, render_value(value)))
                    .collect::<Vec<_>>()
                    .join(", "),
                Value::Null => String::new(),
                other => render_value(&other),
            };
            format!("{}({})", call.function.name, arguments)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Put the standing instructions first and attach the tool signatures.
///
/// Several system messages merge into one entry. When tools are present but
/// no system message was, an empty instructions entry is created to carry them.
pub fn assemble(entries: Vec<TranscriptEntry>, tools: &[ToolDefinition]) -> Vec<TranscriptEntry> {
    let (instructions, mut rest): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(TranscriptEntry::is_instructions);

    if instructions.is_empty() && tools.is_empty() {
        return rest;
    }

    let text = instructions
        .into_iter()
        .filter_map(|entry| match entry {
            TranscriptEntry::Instructions { text, .. } if !text.is_empty() => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut assembled = Vec::with_capacity(rest.len() + 1);
    assembled.push(TranscriptEntry::Instructions {
        text,
        tool_defs: tools.iter().map(ToolSignature::from).collect(),
    });
    assembled.append(&mut rest);
    assembled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::{CompiledSchema, SchemaNode};
    use serde_json::json;

    fn tool_message(content: Value) -> Message {
        Message::tool(content.to_string())
    }

    #[test]
    fn test_system_and_user() {
        let entries = build(&[Message::system("Be terse."), Message::user("hello")]);
        assert_eq!(
            entries,
            vec![
                TranscriptEntry::instructions("Be terse."),
                TranscriptEntry::prompt("hello")
            ]
        );
    }

    #[test]
    fn test_assistant_plain_text() {
        let entries = build(&[Message::assistant("[not, json")]);
        assert_eq!(entries, vec![TranscriptEntry::response("[not, json")]);
    }

    #[test]
    fn test_assistant_tool_call_summary() {
        let content = json!([
            {"id": "1", "type": "function", "function": {"name": "add", "arguments": "{\"a\":10,\"b\":15}"}},
            {"id": "2", "type": "function", "function": {"name": "weather", "arguments": {"city": "Paris"}}}
        ]);
        let entries = build(&[Message::assistant(content.to_string())]);
        assert_eq!(
            entries,
            vec![TranscriptEntry::response("add(a=10, b=15), weather(city=Paris)")]
        );
    }

    #[test]
    fn test_assistant_structured_tool_calls() {
        let message = Message::assistant("").with_tool_calls(json!([
            {"id": "1", "type": "function", "function": {"name": "add", "arguments": "{\"a\":1}"}}
        ]));
        let entries = build(&[message]);
        assert_eq!(
            entries,
            vec![TranscriptEntry::ToolCalls {
                calls: vec![ToolCallSummary {
                    name: "add".to_string(),
                    arguments: json!({"a": 1})
                }]
            }]
        );
    }

    #[test]
    fn test_assistant_tool_calls_in_both_fields_are_recorded_once() {
        let calls = json!([
            {"id": "1", "type": "function", "function": {"name": "add", "arguments": "{\"a\":1}"}}
        ]);
        let message = Message::assistant(calls.to_string()).with_tool_calls(calls);
        let entries = build(&[message]);
        assert_eq!(
            entries,
            vec![TranscriptEntry::ToolCalls {
                calls: vec![ToolCallSummary {
                    name: "add".to_string(),
                    arguments: json!({"a": 1})
                }]
            }]
        );
    }

    #[test]
    fn test_tool_outputs() {
        let entries = build(&[tool_message(json!({
            "tool_calls": [
                {"id": "a", "toolName": "add", "segments": [{"type": "text", "text": "25"}]},
                {"id": "b", "toolName": "echo", "segments": [
                    {"type": "text", "text": "he"}, {"type": "text", "text": "llo"}
                ]}
            ]
        }))]);

        assert_eq!(
            entries,
            vec![
                TranscriptEntry::ToolOutput {
                    id: "a".to_string(),
                    tool_name: "add".to_string(),
                    text: "25".to_string()
                },
                TranscriptEntry::ToolOutput {
                    id: "b".to_string(),
                    tool_name: "echo".to_string(),
                    text: "hello".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_malformed_tool_message_is_dropped_and_reported() {
        let history = vec![
            Message::user("hi"),
            Message::tool("plain text result"),
            Message::assistant("ok"),
        ];
        let report = build_with_report(&history);

        assert_eq!(
            report.entries,
            vec![TranscriptEntry::prompt("hi"), TranscriptEntry::response("ok")]
        );
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].index, 1);
        assert_eq!(report.dropped[0].role, Role::Tool);
    }

    #[test]
    fn test_unknown_role_is_prompt() {
        let entries = build(&[Message::user("x").with_role(Role::Other)]);
        assert_eq!(entries, vec![TranscriptEntry::prompt("x")]);
    }

    #[test]
    fn test_assemble_moves_instructions_first() {
        let entries = build(&[
            Message::user("first"),
            Message::system("Be terse."),
            Message::assistant("ok"),
        ]);
        let tool = ToolDefinition {
            id: 1,
            name: "add".to_string(),
            description: "Add numbers".to_string(),
            schema: CompiledSchema::new(SchemaNode::Str),
        };

        let assembled = assemble(entries, &[tool]);
        assert_eq!(assembled.len(), 3);
        match &assembled[0] {
            TranscriptEntry::Instructions { text, tool_defs } => {
                assert_eq!(text, "Be terse.");
                assert_eq!(tool_defs.len(), 1);
                assert_eq!(tool_defs[0].name, "add");
            }
            other => panic!("Expected instructions, got {:?}", other),
        }
        assert_eq!(assembled[1], TranscriptEntry::prompt("first"));
    }

    #[test]
    fn test_assemble_without_tools_or_system() {
        let entries = build(&[Message::user("hi")]);
        assert_eq!(assemble(entries.clone(), &[]), entries);
    }

    #[test]
    fn test_assemble_creates_instructions_for_tools() {
        let tool = ToolDefinition {
            id: 1,
            name: "noop".to_string(),
            description: String::new(),
            schema: CompiledSchema::new(SchemaNode::Str),
        };
        let assembled = assemble(Vec::new(), &[tool]);
        assert!(matches!(
            &assembled[..],
            [TranscriptEntry::Instructions { text, tool_defs }] if text.is_empty() && tool_defs.len() == 1
        ));
    }
}
