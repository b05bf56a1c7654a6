//! Heading-boundary markdown splitter.
//!
//! Splits a markdown document into sections, one per heading, with the
//! heading line kept at the top of its section. Text before the first
//! heading becomes its own section. Lines inside fenced code blocks are
//! never treated as headings.
//!
//! Sections longer than `max_words` whitespace-separated words are split
//! into consecutive word windows. Each piece receives a SHA-256 hash of its
//! text for staleness detection.

use sha2::{Digest, Sha256};

/// A section of a markdown document, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDraft {
    pub index: i64,
    pub heading: Option<String>,
    pub text: String,
    pub hash: String,
}

/// Split markdown into sections with contiguous indices starting at 0.
pub fn split_markdown(text: &str, max_words: usize) -> Vec<SectionDraft> {
    let mut raw: Vec<(Option<String>, String)> = Vec::new();
    let mut heading: Option<String> = None;
    let mut buf = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence && is_heading(line) {
            if !buf.trim().is_empty() {
                raw.push((heading.take(), std::mem::take(&mut buf)));
            }
            buf.clear();
            heading = Some(line.trim_end().to_string());
        }

        buf.push_str(line);
        buf.push('\n');
    }
    if !buf.trim().is_empty() {
        raw.push((heading, buf));
    }

    let mut sections = Vec::new();
    for (heading, body) in raw {
        for (i, piece) in split_words(body.trim(), max_words).into_iter().enumerate() {
            let index = sections.len() as i64;
            // Only the first window of a split section starts with the heading.
            let heading = if i == 0 { heading.clone() } else { None };
            sections.push(make_section(index, heading, &piece));
        }
    }

    sections
}

/// ATX heading: one to six `#` followed by whitespace.
fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(char::is_whitespace)
}

fn split_words(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return vec![text.to_string()];
    }
    words
        .chunks(max_words.max(1))
        .map(|window| window.join(" "))
        .collect()
}

fn make_section(index: i64, heading: Option<String>, text: &str) -> SectionDraft {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    SectionDraft {
        index,
        heading,
        text: text.to_string(),
        hash,
    }
}
