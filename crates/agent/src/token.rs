//! Token estimation.
//!
//! A coarse character heuristic used only as a guardrail, never as a billing
//! or context-window budget: the character count of everything the model
//! will read, divided by a configurable divisor, floored.

use triage_core::message::Message;

/// Characters of one message that count towards the estimate.
///
/// Text content, the text-bearing fields of content blocks, tool-result
/// content, and each requested tool call's name plus serialized args.
pub fn message_chars(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|call| call.name.chars().count() + call.args.to_string().chars().count())
        .sum();
    message.content.char_count() + calls
}

/// Estimate the token cost of a message sequence.
///
/// A zero divisor is rejected by config validation; here it degrades to 1.
pub fn estimate_tokens(messages: &[Message], divisor: usize) -> usize {
    let chars: usize = messages.iter().map(message_chars).sum();
    chars / divisor.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use triage_core::message::{Content, ContentBlock, ToolCallRequest};

    #[test]
    fn empty_history_is_zero() {
        assert_eq!(estimate_tokens(&[], 4), 0);
    }

    #[test]
    fn four_hundred_chars_is_one_hundred_tokens() {
        let msgs = vec![Message::user("a".repeat(400))];
        assert_eq!(estimate_tokens(&msgs, 4), 100);
    }

    #[test]
    fn floors_remainder() {
        let msgs = vec![Message::user("hello")];
        assert_eq!(estimate_tokens(&msgs, 4), 1);
    }

    #[test]
    fn counts_blocks_and_tool_results() {
        let blocks = Message::user(Content::Blocks(vec![
            ContentBlock::Text { text: "abcd".into() },
            ContentBlock::ToolResult { tool_use_id: "t1".into(), content: "efgh".into() },
        ]));
        let result = Message::tool_result("t1", "x".repeat(8), false);
        assert_eq!(estimate_tokens(&[blocks, result], 4), 4);
    }

    #[test]
    fn counts_tool_call_name_and_args() {
        let args = json!({"q": "x"});
        let expected = "logs_search".len() + args.to_string().len();
        let msg = Message::assistant_with_tool_calls("", vec![ToolCallRequest::new("c1", "logs_search", args)]);
        assert_eq!(message_chars(&msg), expected);
        assert_eq!(estimate_tokens(&[msg], 1), expected);
    }

    #[test]
    fn deterministic() {
        let msgs = vec![Message::system("prompt"), Message::user("why is checkout slow?")];
        assert_eq!(estimate_tokens(&msgs, 4), estimate_tokens(&msgs, 4));
    }
}
