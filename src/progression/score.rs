use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::content::ModuleKey;

/// Result of grading one quiz submission.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ScoreReport {
    pub correct_count: usize,
    pub wrong_count: usize,
    pub total_questions: usize,
    /// 0 to 100; 0 when the module has no questions.
    pub score_percent: f64,
    pub passed: bool,
}

fn same_answer(submitted: &str, correct: &str) -> bool {
    submitted.trim().to_lowercase() == correct.trim().to_lowercase()
}

/// Grade `submitted` against the answer key. Answers to questions not in the
/// key are ignored and unanswered questions count as wrong. `pass_threshold`
/// is the absolute number of correct answers needed to pass.
pub fn evaluate_submission(
    key: &ModuleKey,
    correct_answers: &BTreeMap<String, String>,
    submitted: &BTreeMap<String, String>,
    pass_threshold: usize,
) -> ScoreReport {
    let total_questions = correct_answers.len();
    let correct_count = correct_answers
        .iter()
        .filter(|(id, correct)| {
            submitted
                .get(*id)
                .is_some_and(|answer| same_answer(answer, correct))
        })
        .count();
    let score_percent = if total_questions == 0 {
        0.0
    } else {
        100.0 * correct_count as f64 / total_questions as f64
    };
    let report = ScoreReport {
        correct_count,
        wrong_count: total_questions - correct_count,
        total_questions,
        score_percent,
        passed: correct_count >= pass_threshold,
    };
    debug!(
        course = %key.course,
        level = %key.level,
        order = key.order,
        correct = report.correct_count,
        total = report.total_questions,
        passed = report.passed,
        "submission evaluated"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn key() -> ModuleKey {
        ModuleKey::new("ingles", "Basic", 1)
    }

    fn ten_questions() -> BTreeMap<String, String> {
        (1..=10).map(|i| (i.to_string(), "b".to_string())).collect()
    }

    #[test]
    fn test_empty_answer_key() {
        let empty = BTreeMap::new();
        let submitted = answers(&[("1", "a")]);
        let report = evaluate_submission(&key(), &empty, &submitted, 0);
        assert_eq!(report.score_percent, 0.0);
        assert_eq!(report.total_questions, 0);
        assert!(report.passed);
        assert!(!evaluate_submission(&key(), &empty, &submitted, 1).passed);
    }

    #[test]
    fn test_eight_of_ten_passes_threshold_seven() {
        let correct = ten_questions();
        let mut submitted: BTreeMap<String, String> =
            (1..=8).map(|i| (i.to_string(), "B".to_string())).collect();
        submitted.insert("9".to_string(), "c".to_string());
        let report = evaluate_submission(&key(), &correct, &submitted, 7);
        assert_eq!(report.correct_count, 8);
        assert_eq!(report.wrong_count, 2);
        assert_eq!(report.score_percent, 80.0);
        assert!(report.passed);
    }

    #[test]
    fn test_five_of_ten_fails_threshold_seven() {
        let correct = ten_questions();
        let submitted: BTreeMap<String, String> =
            (1..=5).map(|i| (i.to_string(), " b ".to_string())).collect();
        let report = evaluate_submission(&key(), &correct, &submitted, 7);
        assert_eq!(report.correct_count, 5);
        assert_eq!(report.score_percent, 50.0);
        assert!(!report.passed);
    }

    #[test]
    fn test_unknown_and_missing_answers() {
        let correct = answers(&[("1", "a"), ("2", "b"), ("3", "c")]);
        let submitted = answers(&[("1", "A"), ("4", "d"), ("pergunta_2", "b")]);
        let report = evaluate_submission(&key(), &correct, &submitted, 1);
        assert_eq!(report.total_questions, 3);
        assert_eq!(report.correct_count, 1);
        assert_eq!(report.wrong_count, 2);
    }

    #[test]
    fn test_counts_add_up_and_grading_is_repeatable() {
        let correct = ten_questions();
        for right in 0..=10 {
            let submitted: BTreeMap<String, String> = (1..=10)
                .map(|i| (i.to_string(), if i <= right { "b" } else { "a" }.to_string()))
                .collect();
            let first = evaluate_submission(&key(), &correct, &submitted, 7);
            let second = evaluate_submission(&key(), &correct, &submitted, 7);
            assert_eq!(first, second);
            assert_eq!(first.correct_count + first.wrong_count, first.total_questions);
            assert_eq!(first.passed, right >= 7);
        }
    }
}
