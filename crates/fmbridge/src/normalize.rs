use crate::errors::{BridgeError, BridgeResult, NormError};
use crate::models::message::Message;
use crate::models::role::Role;

/// Split a flat message list into prior history and the current prompt.
///
/// The last message decides the turn. If it is a `tool` message the whole list
/// is history and the prompt is empty, so the engine continues from the tool
/// output. Otherwise its content is the prompt and everything before it is
/// history.
pub fn normalize(messages: &[Message]) -> Result<(Vec<Message>, String), NormError> {
    let (last, prior) = messages.split_last().ok_or(NormError::Empty)?;

    if last.role == Role::Tool {
        return Ok((messages.to_vec(), String::new()));
    }

    Ok((prior.to_vec(), last.text().to_string()))
}

/// Parse the JSON array of messages a caller hands across the boundary
pub fn parse_messages(raw: &str) -> BridgeResult<Vec<Message>> {
    serde_json::from_str(raw).map_err(|e| BridgeError::invalid_input(format!("messages: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fails() {
        assert_eq!(normalize(&[]), Err(NormError::Empty));
    }

    #[test]
    fn test_last_user_message_is_prompt() {
        let messages = vec![Message::system("Be terse."), Message::user("2+2?")];
        let (history, prompt) = normalize(&messages).unwrap();
        assert_eq!(history, vec![Message::system("Be terse.")]);
        assert_eq!(prompt, "2+2?");
    }

    #[test]
    fn test_last_tool_message_keeps_everything() {
        let messages = vec![
            Message::user("add 1 and 2"),
            Message::assistant("[]"),
            Message::tool("{\"tool_calls\": []}"),
        ];
        let (history, prompt) = normalize(&messages).unwrap();
        assert_eq!(history, messages);
        assert_eq!(prompt, "");
    }

    #[test]
    fn test_single_assistant_message_is_prompt() {
        let messages = vec![Message::user("x").with_role(Role::Assistant)];
        let (history, prompt) = normalize(&messages).unwrap();
        assert!(history.is_empty());
        assert_eq!(prompt, "x");
    }

    #[test]
    fn test_message_without_content_gives_empty_prompt() {
        let mut message = Message::user("");
        message.content = None;
        let (_, prompt) = normalize(&[message]).unwrap();
        assert_eq!(prompt, "");
    }

    #[test]
    fn test_parse_messages() {
        let messages =
            parse_messages(r#"[{"role": "system", "content": "hi"}, {"role": "user", "content": "yo"}]"#)
                .unwrap();
        let (history, prompt) = normalize(&messages).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(prompt, "yo");

        let empty = parse_messages("[]").unwrap();
        assert_eq!(BridgeError::from(normalize(&empty).unwrap_err()), BridgeError::NoMessages);
        assert!(matches!(
            parse_messages("{\"role\": \"user\"}"),
            Err(BridgeError::InvalidInput { .. })
        ));
    }
}
