//! Pulling JSON out of free-form LLM replies.
//!
//! Models asked for JSON still wrap it in markdown fences, prepend a sentence
//! of chatter, or stop mid-object when they hit the token limit. The agents
//! run every reply through [`extract_json`] before handing it to serde.
//!
//! If the reply contains a fenced code block only its body is searched;
//! otherwise the whole reply is. The first balanced object or array wins.
//!
//! ```
//! use lingua_forge::utils::json_extraction::extract_json;
//!
//! let reply = "Sure! ```json\n{\"topics\": []}\n```";
//! assert_eq!(extract_json(reply).json(), Some("{\"topics\": []}"));
//! ```

use regex::Regex;
use thiserror::Error;

/// Why no usable JSON came out of a reply.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated ({unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets): {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    #[error("No JSON content found in response starting with '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Outcome of scanning a reply for JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtraction {
    /// A balanced object or array.
    Found(String),
    /// JSON started but never closed.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    NotFound,
}

impl JsonExtraction {
    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtraction::Found(json) => Some(json),
            _ => None,
        }
    }

    /// Converts into a `Result`, using `content` for the not-found preview.
    pub fn into_result(self, content: &str) -> Result<String, JsonExtractionError> {
        match self {
            JsonExtraction::Found(json) => Ok(json),
            JsonExtraction::Truncated {
                partial_json,
                unclosed_braces,
                unclosed_brackets,
            } => Err(JsonExtractionError::Truncated {
                partial_preview: preview(&partial_json, 100),
                unclosed_braces,
                unclosed_brackets,
            }),
            JsonExtraction::NotFound => Err(JsonExtractionError::NotFound {
                content_preview: preview(content.trim(), 50),
            }),
        }
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Open delimiter counts left over after scanning a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonBalance {
    pub unclosed_braces: usize,
    pub unclosed_brackets: usize,
    pub in_string: bool,
}

impl JsonBalance {
    pub fn is_balanced(&self) -> bool {
        self.unclosed_braces == 0 && self.unclosed_brackets == 0 && !self.in_string
    }
}

/// Counts unclosed delimiters, ignoring anything inside string literals.
pub fn analyze_balance(s: &str) -> JsonBalance {
    let mut braces: usize = 0;
    let mut brackets: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces = braces.saturating_sub(1),
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets = brackets.saturating_sub(1),
            _ => {}
        }
    }

    JsonBalance {
        unclosed_braces: braces,
        unclosed_brackets: brackets,
        in_string,
    }
}

/// Byte index of the delimiter closing the one `s` starts with.
///
/// `s` must begin with `{` or `[`. Nested delimiters of either kind and
/// string literals are skipped.
pub fn find_closing_delimiter(s: &str) -> Option<usize> {
    let open = s.chars().next()?;
    if open != '{' && open != '[' {
        return None;
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Body of the first fenced code block, if the reply has one.
pub fn code_block_body(content: &str) -> Option<&str> {
    let re = Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Removes surrounding markdown fences from a reply, leaving other text intact.
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    match code_block_body(trimmed) {
        Some(body) if trimmed.starts_with("```") => body.to_string(),
        _ => trimmed.to_string(),
    }
}

fn balanced_prefix(candidate: &str) -> Option<&str> {
    let end = find_closing_delimiter(candidate)?;
    Some(&candidate[..=end])
}

/// Scans an LLM reply for a JSON object or array.
pub fn extract_json(content: &str) -> JsonExtraction {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return JsonExtraction::NotFound;
    }

    let body = code_block_body(trimmed).unwrap_or(trimmed);

    let Some(start) = body.find(['{', '[']) else {
        return JsonExtraction::NotFound;
    };
    let candidate = &body[start..];

    if let Some(json) = balanced_prefix(candidate) {
        return JsonExtraction::Found(json.to_string());
    }

    let balance = analyze_balance(candidate);
    if balance.unclosed_braces > 0 || balance.unclosed_brackets > 0 {
        return JsonExtraction::Truncated {
            partial_json: candidate.to_string(),
            unclosed_braces: balance.unclosed_braces,
            unclosed_brackets: balance.unclosed_brackets,
        };
    }
    JsonExtraction::NotFound
}
