//! Built-in prompt templates, used when the database has none for a task.

use super::{
    EXPLORER_IDEATION, GATEKEEPER_CHECK, PROSE_GENERATION, QUESTION_PREFIX, TITLE_GENERATION,
    TOPIC_TRANSLATION,
};

/// Placeholders: `{category}`, `{available_lenses}`, `{num_candidates}`.
pub const EXPLORER_TEMPLATE: &str = r#"You are a curriculum designer brainstorming reading and listening topics for adult language learners.

CATEGORY: {category}

Approach the category through these lenses:
{available_lenses}

Propose {num_candidates} distinct, specific topics. Each topic must:
- be concrete enough to support a 100-900 word passage
- use exactly one of the lenses above
- avoid generic encyclopedia headings ("History of X")
- be appropriate for a global audience

Return ONLY valid JSON in this exact format:
{{
    "candidates": [
        {{
            "concept": "The economic impact of precision farming drones",
            "lens": "economic",
            "keywords": ["automation", "technology", "investment"]
        }}
    ]
}}"#;

/// Placeholders: `{topic_concept}`, `{lens}`, `{target_language}`,
/// `{language_code}`, `{keywords}`.
pub const GATEKEEPER_TEMPLATE: &str = r#"You review topics for a language-learning platform.

TOPIC: {topic_concept}
LENS: {lens}
KEYWORDS: {keywords}
TARGET LANGUAGE: {target_language} ({language_code})

Would a passage on this topic be culturally appropriate, relevant, and natural to write for learners of {target_language}? Reject topics that are offensive, politically sensitive, or meaningless in that culture.

Answer with YES or NO on the first line, followed by one short sentence of justification."#;

/// Placeholders: `{topic_concept}`, `{keywords}`, `{cefr_level}`,
/// `{min_words}`, `{max_words}`, `{language}`, `{language_code}`, `{difficulty}`.
pub const PROSE_TEMPLATE: &str = r#"Generate a natural, engaging prose passage in {language} for language learners.

TOPIC: {topic_concept}
KEYWORDS: {keywords}
TARGET LEVEL: {cefr_level} (CEFR)
DIFFICULTY: {difficulty}/9
WORD COUNT: {min_words}-{max_words} words

Requirements:
- Write ONLY in {language} ({language_code})
- Use vocabulary and grammar appropriate for {cefr_level} level
- Create natural, flowing prose suitable for listening comprehension
- Include clear main ideas with supporting details
- For higher levels, include nuanced expressions and complex structures

Return ONLY the prose text, with no additional commentary or formatting."#;

/// Placeholders: `{prose}`, `{topic_concept}`, `{difficulty}`,
/// `{cefr_level}`, `{language}`, `{language_code}`, `{style_guidance}`.
pub const TITLE_TEMPLATE: &str = r#"Generate a title for this listening comprehension passage in {language}.

PASSAGE:
{prose}

TOPIC: {topic_concept}
DIFFICULTY: {difficulty}/9 ({cefr_level} level)

Requirements:
- Write the title ONLY in {language} ({language_code})
- Make the title {style_guidance}
- Capture the main theme or subject of the passage
- Do NOT include quotation marks, markdown, or additional formatting

Return ONLY the title text, nothing else."#;

/// Placeholders: `{transcript}`, `{language}`, `{previous_questions}`,
/// `{question_type_name}`, `{question_type_instruction}`, `{cognitive_level}`.
pub const QUESTION_TEMPLATE: &str = r#"Generate a multiple-choice comprehension question in {language}.

PASSAGE:
{transcript}

QUESTION TYPE: {question_type_name}
INSTRUCTION: {question_type_instruction}
PREVIOUSLY ASKED QUESTIONS: {previous_questions}

Requirements:
1. Write the question and all options in {language}
2. Create exactly 4 answer options
3. Only one option should be correct
4. Make distractors plausible but clearly incorrect
5. Avoid questions similar to previously asked ones
6. Match the cognitive level ({cognitive_level}/3) in complexity

Return ONLY valid JSON in this exact format:
{{
    "Question": "Your question text here?",
    "Options": ["Option A", "Option B", "Option C", "Option D"],
    "Answer": "The correct option text (must match exactly one of the Options)"
}}"#;

/// Placeholders: `{topic_concept}`, `{keywords}`, `{target_language}`.
pub const TRANSLATION_TEMPLATE: &str = r#"Translate the following topic and keywords to {target_language}.

Topic: {topic_concept}
Keywords: {keywords}

Requirements:
- Translate naturally, not word-for-word
- Keep the meaning and intent clear
- Use appropriate vocabulary for general adult learners

Return ONLY valid JSON in this exact format:
{{
    "topic": "translated topic in {target_language}",
    "keywords": ["keyword1", "keyword2"]
}}"#;

/// Built-in template for a task name, if there is one.
///
/// Every `question_<code>` task shares [`QUESTION_TEMPLATE`]; the type
/// specific guidance is passed in through placeholders.
pub fn default_template(task: &str) -> Option<&'static str> {
    match task {
        EXPLORER_IDEATION => Some(EXPLORER_TEMPLATE),
        GATEKEEPER_CHECK => Some(GATEKEEPER_TEMPLATE),
        PROSE_GENERATION => Some(PROSE_TEMPLATE),
        TITLE_GENERATION => Some(TITLE_TEMPLATE),
        TOPIC_TRANSLATION => Some(TRANSLATION_TEMPLATE),
        t if t.starts_with(QUESTION_PREFIX) => Some(QUESTION_TEMPLATE),
        _ => None,
    }
}
