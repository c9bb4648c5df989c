use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSegment {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// One piece of a tool's output as reported back by the host
pub enum Segment {
    Text(TextSegment),
    /// Images, structured payloads and anything else we can't render as text
    #[serde(other)]
    Unsupported,
}

impl Segment {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Segment::Text(TextSegment { text: text.into() })
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(text) => Some(&text.text),
            Segment::Unsupported => None,
        }
    }
}

/// The result of a single tool call, as the host reports it in a `tool` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl ToolOutput {
    /// Concatenate every text segment, skipping anything that isn't text
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(Segment::as_text)
            .collect::<Vec<_>>()
            .concat()
    }
}

/// Body of a `tool` message: `{"tool_calls": [{id, toolName, segments}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputContent {
    pub tool_calls: Vec<ToolOutput>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_output_content_parses() {
        let content: ToolOutputContent = serde_json::from_value(json!({
            "tool_calls": [{
                "id": "call_1",
                "toolName": "add",
                "segments": [
                    {"type": "text", "text": "2"},
                    {"type": "image", "data": "..."},
                    {"type": "text", "text": "5"}
                ]
            }]
        }))
        .unwrap();

        assert_eq!(content.tool_calls.len(), 1);
        assert_eq!(content.tool_calls[0].tool_name, "add");
        assert_eq!(content.tool_calls[0].segments[1], Segment::Unsupported);
        assert_eq!(content.tool_calls[0].text(), "25");
    }

    #[test]
    fn test_missing_segments_is_empty_text() {
        let output: ToolOutput =
            serde_json::from_value(json!({"id": "1", "toolName": "noop"})).unwrap();
        assert_eq!(output.text(), "");
    }
}
