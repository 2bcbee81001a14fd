//! Text preprocessing for ticket embeddings
//!
//! Tickets arrive as HTML- or markdown-flavored text, or as Atlassian
//! Document Format (ADF) JSON trees. Everything is flattened to plain
//! text before embedding.

use regex::Regex;
use serde_json::Value;

/// Remove HTML tags and decode common entities
pub fn clean_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let tag_re = Regex::new(r"<[^>]+>").unwrap();
    let stripped = tag_re.replace_all(text, " ");

    decode_entities(&stripped)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Remove markdown formatting from text
pub fn clean_markdown(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Links: [text](url) -> text
    let link_re = Regex::new(r"\[([^\]]+)\]\([^\)]+\)").unwrap();
    let text = link_re.replace_all(text, "$1");

    // Bold/italic markers
    let bold_re = Regex::new(r"\*\*([^\*]+)\*\*").unwrap();
    let text = bold_re.replace_all(&text, "$1");
    let italic_re = Regex::new(r"\*([^\*]+)\*").unwrap();
    let text = italic_re.replace_all(&text, "$1");

    // Fenced code blocks are dropped, inline code keeps its content
    let fence_re = Regex::new(r"```[^`]+```").unwrap();
    let text = fence_re.replace_all(&text, " ");
    let inline_re = Regex::new(r"`([^`]+)`").unwrap();
    let text = inline_re.replace_all(&text, "$1");

    // Headers
    let header_re = Regex::new(r"(?m)^#+\s+").unwrap();
    header_re.replace_all(&text, "").into_owned()
}

/// Collapse runs of whitespace and trim
pub fn normalize_whitespace(text: &str) -> String {
    let ws_re = Regex::new(r"\s+").unwrap();
    ws_re.replace_all(text, " ").trim().to_string()
}

/// Extract plain text from an Atlassian Document Format tree.
///
/// ADF is a nested JSON structure; only `text` nodes carry content, so
/// the tree is walked depth-first collecting them in document order.
pub fn extract_text_from_adf(adf: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    walk_adf(adf, &mut parts);
    parts.join(" ")
}

fn walk_adf(node: &Value, parts: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(text) = map.get("text").and_then(Value::as_str) {
                    parts.push(text.to_string());
                }
            }
            if let Some(content) = map.get("content") {
                walk_adf(content, parts);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_adf(item, parts);
            }
        }
        _ => {}
    }
}

/// Combine a ticket's summary and description into the text that gets
/// embedded: summary first, then the description flattened to plain text.
pub fn issue_text(summary: &str, description: &str) -> String {
    let combined = format!("{}. {}", summary, description);
    let combined = clean_html(&combined);
    let combined = clean_markdown(&combined);
    normalize_whitespace(&combined)
}

/// Blake3 hex digest of preprocessed text, used to skip re-embedding
/// unchanged tickets.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
