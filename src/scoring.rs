// Pure helpers for completion percentages and quiz grading.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimum score (percent) to pass a quiz.
pub const PASSING_SCORE: i64 = 70;

/// `round(100 * part / whole)`, with 0 for an empty whole.
pub fn percentage(part: usize, whole: usize) -> i64 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as i64
}

/// Quiz attributes may hold an array directly or a serialized JSON array.
pub fn parse_json_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_index: usize,
    pub user_answer: Value,
    pub correct_answer: Value,
    pub is_correct: bool,
}

#[derive(Debug, Clone)]
pub struct Grade {
    pub correct_count: usize,
    pub score: i64,
    pub passed: bool,
    pub results: Vec<QuestionResult>,
}

/// Exact JSON value equality per index, no coercion: a key stored as a number
/// only matches a numeric answer. Callers check lengths beforehand.
pub fn grade_quiz(answers: &[Value], key: &[Value]) -> Grade {
    let mut correct_count = 0;
    let mut results = Vec::with_capacity(key.len());

    for (index, (answer, expected)) in answers.iter().zip(key.iter()).enumerate() {
        let is_correct = answer == expected;
        if is_correct {
            correct_count += 1;
        }
        results.push(QuestionResult {
            question_index: index,
            user_answer: answer.clone(),
            correct_answer: expected.clone(),
            is_correct,
        });
    }

    let score = percentage(correct_count, key.len());
    Grade {
        correct_count,
        score,
        passed: score >= PASSING_SCORE,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(0, 4), 0);
        assert_eq!(percentage(1, 4), 25);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
    }

    #[test]
    fn percentage_of_empty_whole_is_zero() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(5, 0), 0);
    }

    #[test]
    fn grades_all_correct() {
        let key = vec![json!(1), json!(0), json!(2), json!(1)];
        let grade = grade_quiz(&[json!(1), json!(0), json!(2), json!(1)], &key);
        assert_eq!(grade.correct_count, 4);
        assert_eq!(grade.score, 100);
        assert!(grade.passed);
        assert!(grade.results.iter().all(|r| r.is_correct));
    }

    #[test]
    fn grades_three_of_four() {
        let key = vec![json!(1), json!(0), json!(2), json!(1)];
        let grade = grade_quiz(&[json!(1), json!(1), json!(2), json!(1)], &key);
        assert_eq!(grade.correct_count, 3);
        assert_eq!(grade.score, 75);
        assert!(grade.passed);
        assert!(!grade.results[1].is_correct);
    }

    #[test]
    fn grades_all_wrong() {
        let key = vec![json!(1), json!(0), json!(2), json!(1)];
        let grade = grade_quiz(&[json!(0), json!(1), json!(1), json!(0)], &key);
        assert_eq!(grade.correct_count, 0);
        assert_eq!(grade.score, 0);
        assert!(!grade.passed);
    }

    #[test]
    fn no_type_coercion_between_answer_and_key() {
        let grade = grade_quiz(&[json!("1")], &[json!(1)]);
        assert_eq!(grade.correct_count, 0);
    }

    #[test]
    fn parses_list_from_array_or_serialized_text() {
        assert_eq!(
            parse_json_list(&json!([1, 2])),
            Some(vec![json!(1), json!(2)])
        );
        assert_eq!(
            parse_json_list(&json!("[1, 2]")),
            Some(vec![json!(1), json!(2)])
        );
        assert_eq!(parse_json_list(&json!("not json")), None);
        assert_eq!(parse_json_list(&json!(42)), None);
        assert_eq!(parse_json_list(&json!({"a": 1})), None);
    }
}
