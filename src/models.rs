use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store collection names. The database also hosts `certificates`,
/// `notifications`, `reviews` and `users`, none of which this pipeline
/// touches.
pub mod collections {
    pub const COURSES: &str = "courses";
    pub const LESSONS: &str = "lessons";
    pub const QUIZZES: &str = "quizzes";
    pub const QUIZ_RESULTS: &str = "quiz_results";
    pub const ENROLLMENTS: &str = "enrollments";
    pub const PROGRESS: &str = "progress";
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub instructor_id: Option<String>,
    #[serde(default)]
    pub instructor_name: Option<String>,
    #[serde(default)]
    pub students: i64,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub user_id: String,
    pub course_id: String,
    pub enrolled_at: DateTime<Utc>,
    pub status: EnrollmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One per (userId, courseId); created lazily by whichever of the enrollment
/// or progress paths runs first. `completed_lessons` keeps set semantics over
/// an ordered list.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub user_id: String,
    pub course_id: String,
    #[serde(default)]
    pub completed_lessons: Vec<String>,
    #[serde(default)]
    pub completion_percentage: i64,
    #[serde(default)]
    pub quiz_scores: Vec<String>,
    pub last_accessed: DateTime<Utc>,
}

impl Progress {
    pub fn new(user_id: &str, course_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            completed_lessons: Vec::new(),
            completion_percentage: 0,
            quiz_scores: Vec::new(),
            last_accessed: Utc::now(),
        }
    }
}

/// Read-only input to the completion-percentage calculation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub course_id: String,
    pub title: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
}

/// `questions` and `correct_answers` may be stored either as arrays or as
/// serialized JSON text; see `scoring::parse_json_list`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    #[serde(default)]
    pub course_id: Option<String>,
    pub questions: Value,
    pub correct_answers: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub user_id: String,
    pub course_id: String,
    pub quiz_id: String,
    pub score: i64,
    pub passed: bool,
    /// Per-question breakdown, stored serialized.
    pub results: String,
    pub submitted_at: DateTime<Utc>,
}

// --- request bodies ---
//
// Required fields are modelled as Options so the handlers can answer with the
// contract's "Missing required fields" message instead of a serde error.

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub course_title: Option<String>,
    /// Dollars; accepted as a number or a numeric string.
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub course_description: Option<String>,
    #[serde(default)]
    pub course_thumbnail: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub course_id: Option<String>,
}

/// Anything other than the two recognized actions fails deserialization and
/// surfaces as a validation error.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressAction {
    Complete,
    Uncomplete,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub action: Option<ProgressAction>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuizRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub quiz_id: Option<String>,
    #[serde(default)]
    pub answers: Option<Value>,
}
