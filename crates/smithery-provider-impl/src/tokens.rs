use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

use smithery_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use smithery_protocol::openai::create_chat_completions::types::ChatCompletionMessageContent;

static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn bpe_for_model(model: &str) -> Option<&'static CoreBPE> {
    if is_o200k_model(model)
        && let Some(bpe) = O200K.get_or_init(|| o200k_base().ok()).as_ref()
    {
        return Some(bpe);
    }
    CL100K.get_or_init(|| cl100k_base().ok()).as_ref()
}

fn is_o200k_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("gpt-4.1")
        || model.starts_with("gpt-4o")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

/// Estimated token count of `text`. Uses the tokenizer when it loads,
/// otherwise counts word runs and punctuation marks.
pub fn estimate_text_tokens(text: &str, model: &str) -> i64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }
    match bpe_for_model(model) {
        Some(bpe) => bpe.encode_ordinary(text).len() as i64,
        None => heuristic_tokens(text),
    }
}

fn heuristic_tokens(text: &str) -> i64 {
    let mut count = 0i64;
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !ch.is_whitespace() {
                count += 1;
            }
        }
    }
    count.max(1)
}

/// Sum of the plain-string message contents; part arrays are not counted.
pub fn estimate_prompt_tokens(body: &CreateChatCompletionRequestBody) -> i64 {
    body.messages
        .iter()
        .filter_map(|message| match &message.content {
            Some(ChatCompletionMessageContent::Text(text)) => Some(text.as_str()),
            _ => None,
        })
        .map(|text| estimate_text_tokens(text, &body.model))
        .sum()
}
