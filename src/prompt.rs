//! Prompt assembly.
//!
//! Builds the messages sent to the completion service from retrieved
//! records, the optional chat-history string, and the live message.
//!
//! | Mode | Combined layout (default) |
//! |------|---------------------------|
//! | Memory | retrieved records as JSON, a blank line, then the raw message |
//! | Knowledge | `"""`-delimited sections: current data, chat history, question |
//!
//! The combined layout sends everything as one user message, so the model
//! sees no boundary between retrieved text and the question. The
//! [`PromptLayout::Separated`] layout moves retrieved context and history
//! into a system message and sends the question as its own user message.
//!
//! Assembly is pure and never fails. Missing context degrades to a prompt
//! containing only the message.

use crate::models::{Message, Mode, RetrievedRecord};

/// How assembled context is split across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptLayout {
    #[default]
    Combined,
    Separated,
}

impl PromptLayout {
    pub fn from_config(value: &str) -> Self {
        match value {
            "separated" => PromptLayout::Separated,
            _ => PromptLayout::Combined,
        }
    }
}

const DELIM: &str = "\"\"\"";

/// Assemble the single combined user message.
pub fn assemble(
    records: &[RetrievedRecord],
    message: &str,
    mode: Mode,
    history: Option<&str>,
) -> Message {
    let content = match context_block(records, mode, history) {
        None => message.to_string(),
        Some(context) => match mode {
            Mode::Memory => format!("{}\n\n{}", context, message),
            Mode::Knowledge => format!("{}{}", context, section("The user is asking:", message)),
        },
    };
    Message::user(content)
}

/// Assemble the full message list for `layout`.
pub fn assemble_messages(
    records: &[RetrievedRecord],
    message: &str,
    mode: Mode,
    history: Option<&str>,
    layout: PromptLayout,
) -> Vec<Message> {
    match layout {
        PromptLayout::Combined => vec![assemble(records, message, mode, history)],
        PromptLayout::Separated => match context_block(records, mode, history) {
            None => vec![Message::user(message)],
            Some(context) => {
                let preamble = match mode {
                    Mode::Memory => "Earlier exchanges with this user that may be relevant:",
                    Mode::Knowledge => {
                        "Answer the user's question using the reference material below."
                    }
                };
                vec![
                    Message::system(format!("{}\n{}", preamble, context)),
                    Message::user(message),
                ]
            }
        },
    }
}

/// The retrieved-context portion of the prompt, or `None` when there is none.
fn context_block(records: &[RetrievedRecord], mode: Mode, history: Option<&str>) -> Option<String> {
    match mode {
        Mode::Memory => {
            if records.is_empty() {
                return None;
            }
            // Serializing plain strings and floats cannot fail.
            Some(serde_json::to_string(records).unwrap_or_default())
        }
        Mode::Knowledge => {
            let history = history.map(str::trim).filter(|h| !h.is_empty());
            if records.is_empty() && history.is_none() {
                return None;
            }

            let mut block = String::new();
            if !records.is_empty() {
                let contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
                block.push_str(&section("The current data in use:", &contents.join("\n")));
            }
            if let Some(history) = history {
                block.push_str(&section(
                    "Here is the recent chat history for context:",
                    history,
                ));
            }
            Some(block)
        }
    }
}

fn section(title: &str, body: &str) -> String {
    format!("{}\n{}\n{}\n{}\n", title, DELIM, body, DELIM)
}
