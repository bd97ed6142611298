//! Prompt templates for every LLM step of the pipeline.
//!
//! Templates live in the `prompt_templates` table, keyed by task name and
//! language id. When the database has no row for a task the built-in
//! defaults in [`defaults`] are used instead. Templates use `{name}`
//! placeholders; `{{` and `}}` produce literal braces, so JSON examples can
//! be embedded in a template.
//!
//! ```
//! use lingua_forge::prompts::render_template;
//!
//! let prompt = render_template(
//!     "Write about {topic}. Reply as {{\"text\": ...}}",
//!     &[("topic", "rice terraces")],
//! );
//! assert_eq!(prompt, "Write about rice terraces. Reply as {\"text\": ...}");
//! ```

pub mod defaults;

pub use defaults::default_template;

/// Language id whose templates serve as the fallback for every language.
pub const ENGLISH_LANGUAGE_ID: i64 = 2;

/// Explorer ideation prompt.
pub const EXPLORER_IDEATION: &str = "explorer_ideation";
/// Gatekeeper cultural-fit prompt.
pub const GATEKEEPER_CHECK: &str = "gatekeeper_check";
/// Prose passage prompt.
pub const PROSE_GENERATION: &str = "prose_generation";
/// Title prompt.
pub const TITLE_GENERATION: &str = "title_generation";
/// Topic translation prompt.
pub const TOPIC_TRANSLATION: &str = "topic_translation";
/// Prefix of the per-question-type prompts (`question_inference`, ...).
pub const QUESTION_PREFIX: &str = "question_";

/// Fills `{key}` placeholders from `vars`.
///
/// Unknown placeholders are left untouched so that a database template
/// written for a richer variable set still renders. `{{` and `}}` become
/// single braces.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            let replaced = tail[1..].find('}').and_then(|end| {
                let name = &tail[1..=end];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value, end + 2))
            });
            match replaced {
                Some((value, consumed)) => {
                    out.push_str(value);
                    rest = &tail[consumed..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }

    out.push_str(rest);
    out
}
