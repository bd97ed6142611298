//! Shared helpers used across agents.

pub mod json_extraction;

pub use json_extraction::{
    analyze_balance, code_block_body, extract_json, find_closing_delimiter, strip_code_fences,
    JsonBalance, JsonExtraction, JsonExtractionError,
};
