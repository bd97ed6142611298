//! Structural and near-duplicate checks for generated questions.
//!
//! Purely local; no model calls.

use std::collections::HashSet;

use super::question_generator::{QuestionDraft, OPTIONS_PER_QUESTION};

/// Word-set Jaccard similarity of two strings, case-insensitive.
///
/// Two empty strings score 0.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

/// Questions that passed, plus one message per rejected question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub accepted: Vec<QuestionDraft>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

#[derive(Debug, Clone)]
pub struct QuestionValidator {
    /// Similarity at or above which a question counts as a repeat.
    pub similarity_threshold: f64,
    pub min_question_chars: usize,
}

impl Default for QuestionValidator {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            min_question_chars: 5,
        }
    }
}

impl QuestionValidator {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            ..Self::default()
        }
    }

    /// Checks a single question in isolation.
    pub fn validate_structure(&self, draft: &QuestionDraft) -> Result<(), String> {
        if draft.question_text.trim().chars().count() < self.min_question_chars {
            return Err("Question text is missing or too short".to_string());
        }
        if draft.choices.len() != OPTIONS_PER_QUESTION {
            return Err(format!(
                "Expected {} options, found {}",
                OPTIONS_PER_QUESTION,
                draft.choices.len()
            ));
        }
        if draft.choices.iter().any(|c| c.trim().is_empty()) {
            return Err("Empty answer option".to_string());
        }
        let distinct: HashSet<String> = draft
            .choices
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect();
        if distinct.len() != draft.choices.len() {
            return Err("Duplicate answer options".to_string());
        }
        if !draft.choices.iter().any(|c| c == &draft.answer) {
            return Err("Answer does not match any option".to_string());
        }
        Ok(())
    }

    /// Validates every draft, dropping malformed ones and near-repeats of
    /// questions already accepted.
    pub fn validate_all(&self, drafts: &[QuestionDraft]) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (i, draft) in drafts.iter().enumerate() {
            if let Err(reason) = self.validate_structure(draft) {
                report.errors.push(format!("Q{}: {}", i + 1, reason));
                continue;
            }

            let closest = report
                .accepted
                .iter()
                .map(|kept| jaccard_similarity(&kept.question_text, &draft.question_text))
                .fold(0.0_f64, f64::max);
            if closest >= self.similarity_threshold {
                report.errors.push(format!(
                    "Q{}: Question too similar to existing question (similarity: {:.0}%)",
                    i + 1,
                    closest * 100.0
                ));
                continue;
            }

            report.accepted.push(draft.clone());
        }

        if !report.errors.is_empty() {
            tracing::debug!(
                accepted = report.accepted.len(),
                rejected = report.errors.len(),
                errors = ?report.errors,
                "Question validation dropped questions"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::QuestionType;

    fn draft(text: &str, choices: &[&str], answer: &str) -> QuestionDraft {
        QuestionDraft {
            question_text: text.to_string(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            answer: answer.to_string(),
            question_type: QuestionType::LiteralDetail,
            display_order: 1,
        }
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard_similarity("", ""), 0.0);
        assert_eq!(jaccard_similarity("The Cat", "the cat"), 1.0);
        assert!((jaccard_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_structure_errors() {
        let validator = QuestionValidator::default();
        let abcd = ["a", "b", "c", "d"];
        assert!(validator.validate_structure(&draft("What is it?", &abcd, "a")).is_ok());
        assert!(validator.validate_structure(&draft("Hi", &abcd, "a")).is_err());
        assert!(validator
            .validate_structure(&draft("What is it?", &["a", "b", "c"], "a"))
            .is_err());
        assert!(validator
            .validate_structure(&draft("What is it?", &["a", "A ", "c", "d"], "a"))
            .is_err());
        assert!(validator.validate_structure(&draft("What is it?", &abcd, "e")).is_err());
    }

    #[test]
    fn test_near_duplicate_is_dropped() {
        let abcd = ["a", "b", "c", "d"];
        let drafts = vec![
            draft("What do farmers grow on the terraces?", &abcd, "a"),
            draft("What do farmers grow on the hills?", &abcd, "b"),
            draft("Why were the terraces built?", &abcd, "c"),
            draft("?", &abcd, "d"),
        ];

        let report = QuestionValidator::default().validate_all(&drafts);
        assert_eq!(report.accepted_count(), 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("Q2: Question too similar"));
        assert!(report.errors[1].starts_with("Q4:"));
    }

    #[test]
    fn test_similarity_at_threshold_is_dropped() {
        // 13 shared words out of 20 distinct: exactly 0.65.
        let first = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima mike november oscar papa";
        let second = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima mike quebec romeo sierra tango";
        assert!((jaccard_similarity(first, second) - 0.65).abs() < 1e-9);

        let abcd = ["a", "b", "c", "d"];
        let report = QuestionValidator::default()
            .validate_all(&[draft(first, &abcd, "a"), draft(second, &abcd, "b")]);
        assert_eq!(report.accepted_count(), 1);
        assert!(report.errors[0].starts_with("Q2: Question too similar"));
    }

    #[test]
    fn test_revalidating_accepted_questions_keeps_them_all() {
        let abcd = ["a", "b", "c", "d"];
        let drafts = vec![
            draft("What do farmers grow on the terraces?", &abcd, "a"),
            draft("What do farmers grow on the hills?", &abcd, "b"),
            draft("Why were the terraces built?", &abcd, "c"),
            draft("Who maintains the water channels today?", &abcd, "d"),
            draft("", &abcd, "a"),
        ];
        let validator = QuestionValidator::default();

        let report = validator.validate_all(&drafts);
        assert_eq!(report.accepted_count(), 3);

        let again = validator.validate_all(&report.accepted);
        assert_eq!(again.accepted, report.accepted);
        assert!(again.errors.is_empty());
    }
}
