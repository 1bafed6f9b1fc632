//! Integration tests for token counting and message shortening.

use audit_tokenizer::{count_tokens, count_tokens_with_model, shorten, truncate, Message};

#[test]
fn count_tokens_simple() {
    let text = "Hello, world! This is a test.";
    assert!(count_tokens(text) > 0);
}

#[test]
fn count_tokens_empty_is_zero() {
    assert_eq!(count_tokens(""), 0);
}

#[test]
fn truncate_short_is_noop() {
    let text = "Hello";
    assert_eq!(truncate(text, 100), "Hello");
}

#[test]
fn count_tokens_with_model_known() {
    let result = count_tokens_with_model("Hello, world!", "cl100k_base");
    assert!(result.is_ok_and(|v| v > 0));
}

#[test]
fn count_tokens_with_model_unknown_errors() {
    assert!(count_tokens_with_model("hi", "nonexistent").is_err());
}

#[test]
fn shorten_stops_at_one_message() {
    let messages = vec![Message {
        role: "user".to_string(),
        content: "word ".repeat(5000),
    }];
    let result = shorten(&messages, 1);
    assert_eq!(result.len(), 1);
}

#[test]
fn shorten_keeps_system_messages() {
    let messages = vec![
        Message {
            role: "system".to_string(),
            content: "instructions".to_string(),
        },
        Message {
            role: "user".to_string(),
            content: "word ".repeat(3000),
        },
    ];
    let result = shorten(&messages, 1);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].role, "system");
}
