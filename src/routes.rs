use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiError;
use crate::gateway::{NewCheckoutSession, PaymentGateway, SessionMetadata};
use crate::models::*;
use crate::scoring;
use crate::store::{Document, DocumentStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/checkout/sessions", post(create_checkout_session))
        .route("/api/checkout/verify", post(verify_payment))
        .route("/api/enrollments", post(enroll_course))
        .route("/api/progress", post(update_progress))
        .route("/api/quiz/submit", post(submit_quiz))
        .with_state(state)
}

type HandlerResult = Result<(StatusCode, Json<Value>), ApiError>;

async fn create_checkout_session(State(state): State<AppState>, body: String) -> HandlerResult {
    let req: CreateCheckoutRequest = parse_body(&body)?;

    let missing = || {
        ApiError::validation("Missing required fields: courseId, courseTitle, price, userId")
    };
    let course_id = required(&req.course_id).ok_or_else(missing)?;
    let course_title = required(&req.course_title).ok_or_else(missing)?;
    let user_id = required(&req.user_id).ok_or_else(missing)?;
    let price_value = req.price.as_ref().ok_or_else(missing)?;
    let price = parse_price(price_value)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ApiError::validation("Price must be a positive number"))?;

    // Enrichment only; a missing or malformed course document is not fatal.
    let course = match state.store.get(collections::COURSES, course_id).await {
        Ok(doc) => match doc.parse::<Course>() {
            Ok(course) => Some(course),
            Err(e) => {
                tracing::warn!(error = %e, %course_id, "course document is malformed, using caller-supplied details");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, %course_id, "could not verify course, using caller-supplied details");
            None
        }
    };

    let description = req
        .course_description
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| course.as_ref().and_then(|c| c.description.clone()))
        .unwrap_or_else(|| "Online course purchase".to_string());
    let image = req
        .course_thumbnail
        .clone()
        .or_else(|| course.as_ref().and_then(|c| c.thumbnail.clone()))
        .filter(|s| !s.is_empty());

    let session = state
        .gateway
        .create_session(NewCheckoutSession {
            product_name: course_title.to_string(),
            product_description: description,
            product_image: image,
            unit_amount: (price * 100.0).round() as i64,
            client_reference_id: user_id.to_string(),
            // {CHECKOUT_SESSION_ID} is substituted by the gateway on redirect.
            success_url: format!(
                "{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}&course_id={}",
                state.config.frontend_url, course_id
            ),
            cancel_url: format!("{}/courses/{}", state.config.frontend_url, course_id),
            metadata: SessionMetadata {
                course_id: Some(course_id.to_string()),
                user_id: Some(user_id.to_string()),
                course_title: Some(course_title.to_string()),
            },
        })
        .await
        .map_err(|e| ApiError::gateway("Failed to create checkout session", e))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "sessionId": session.id,
            "url": session.url,
            "message": "Checkout session created successfully",
        })),
    ))
}

async fn verify_payment(State(state): State<AppState>, body: String) -> HandlerResult {
    let req: VerifyPaymentRequest = parse_body(&body)?;
    let session_id =
        required(&req.session_id).ok_or_else(|| ApiError::validation("Missing session ID"))?;

    let session = state
        .gateway
        .retrieve_session(session_id)
        .await
        .map_err(|e| ApiError::gateway("Failed to verify payment", e))?
        .ok_or_else(|| ApiError::NotFound("Invalid session".to_string()))?;

    // A pending payment is a valid outcome, not an error; the caller polls.
    if !session.is_paid() {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "verified": false,
                "message": "Payment not completed",
            })),
        ));
    }

    let (course_id, user_id) = match (&session.metadata.course_id, &session.metadata.user_id) {
        (Some(course_id), Some(user_id)) if !course_id.is_empty() && !user_id.is_empty() => {
            (course_id.clone(), user_id.clone())
        }
        _ => {
            return Err(ApiError::DataIntegrity(
                "Checkout session is missing courseId or userId metadata".to_string(),
            ))
        }
    };

    // Sole defense against a double enrollment from a re-verified session.
    let existing = state
        .store
        .list(
            collections::ENROLLMENTS,
            &[("userId", &user_id), ("courseId", &course_id)],
        )
        .await
        .map_err(|e| ApiError::store("Failed to verify payment", e))?;
    if !existing.is_empty() {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "verified": true,
                "message": "Already enrolled",
            })),
        ));
    }

    let amount = session.amount_total.map(|total| total as f64 / 100.0);
    let enrollment = create_enrollment_records(
        &state,
        &user_id,
        &course_id,
        session.payment_intent.clone(),
        amount,
    )
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "verified": true,
            "enrollment": enrollment.to_json(),
            "message": "Payment verified successfully",
        })),
    ))
}

async fn enroll_course(State(state): State<AppState>, body: String) -> HandlerResult {
    let req: EnrollRequest = parse_body(&body)?;
    let missing = || ApiError::validation("Missing required fields: userId, courseId");
    let user_id = required(&req.user_id).ok_or_else(missing)?;
    let course_id = required(&req.course_id).ok_or_else(missing)?;

    let existing = state
        .store
        .list(
            collections::ENROLLMENTS,
            &[("userId", user_id), ("courseId", course_id)],
        )
        .await
        .map_err(|e| ApiError::store("Failed to enroll in course", e))?;
    if !existing.is_empty() {
        return Err(ApiError::Conflict(
            "Already enrolled in this course".to_string(),
        ));
    }

    let enrollment = create_enrollment_records(&state, user_id, course_id, None, None).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "enrollment": enrollment.to_json(),
            "message": "Successfully enrolled in course",
        })),
    ))
}

async fn update_progress(State(state): State<AppState>, body: String) -> HandlerResult {
    let req: UpdateProgressRequest = parse_body(&body)?;
    let missing = || ApiError::validation("Missing required fields: userId, courseId, lessonId");
    let user_id = required(&req.user_id).ok_or_else(missing)?;
    let course_id = required(&req.course_id).ok_or_else(missing)?;
    let lesson_id = required(&req.lesson_id).ok_or_else(missing)?;
    let action = req.action.unwrap_or(ProgressAction::Complete);

    let store_err = |e| ApiError::store("Failed to update progress", e);

    let existing = state
        .store
        .list(
            collections::PROGRESS,
            &[("userId", user_id), ("courseId", course_id)],
        )
        .await
        .map_err(store_err)?;
    let doc = match existing.into_iter().next() {
        Some(doc) => doc,
        None => state
            .store
            .create(
                collections::PROGRESS,
                encode(&Progress::new(user_id, course_id))?,
            )
            .await
            .map_err(store_err)?,
    };
    let mut progress: Progress = doc.parse().map_err(store_err)?;

    match action {
        ProgressAction::Complete => {
            if !progress.completed_lessons.iter().any(|l| l == lesson_id) {
                progress.completed_lessons.push(lesson_id.to_string());
            }
        }
        // Unknown lesson ids fall through as a no-op.
        ProgressAction::Uncomplete => progress.completed_lessons.retain(|l| l != lesson_id),
    }

    let lesson_docs = state
        .store
        .list(collections::LESSONS, &[("courseId", course_id)])
        .await
        .map_err(store_err)?;
    let lessons: Vec<Lesson> = lesson_docs
        .iter()
        .map(Document::parse)
        .collect::<Result<_, _>>()
        .map_err(store_err)?;
    let completion_percentage =
        scoring::percentage(progress.completed_lessons.len(), lessons.len());

    let updated = state
        .store
        .update(
            collections::PROGRESS,
            &doc.id,
            json!({
                "completedLessons": progress.completed_lessons,
                "completionPercentage": completion_percentage,
                "lastAccessed": Utc::now(),
            }),
        )
        .await
        .map_err(store_err)?;

    if completion_percentage == 100 {
        match mark_enrollment_completed(state.store.as_ref(), user_id, course_id).await {
            Ok(()) => tracing::info!(%user_id, %course_id, "course completed"),
            Err(e) => {
                tracing::warn!(error = %e, %user_id, %course_id, "could not mark enrollment completed")
            }
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "progress": updated.to_json(),
            "completionPercentage": completion_percentage,
            "message": "Progress updated successfully",
        })),
    ))
}

async fn submit_quiz(State(state): State<AppState>, body: String) -> HandlerResult {
    let req: SubmitQuizRequest = parse_body(&body)?;
    let missing =
        || ApiError::validation("Missing required fields: userId, courseId, quizId, answers");
    let user_id = required(&req.user_id).ok_or_else(missing)?;
    let course_id = required(&req.course_id).ok_or_else(missing)?;
    let quiz_id = required(&req.quiz_id).ok_or_else(missing)?;
    let answers_value = req.answers.clone().filter(|v| !v.is_null()).ok_or_else(missing)?;
    let answers = answers_value
        .as_array()
        .cloned()
        .ok_or_else(|| ApiError::validation("Answers must be an array"))?;

    let doc = match state.store.get(collections::QUIZZES, quiz_id).await {
        Ok(doc) => doc,
        Err(StoreError::NotFound) => {
            return Err(ApiError::NotFound("Quiz not found".to_string()))
        }
        Err(e) => return Err(ApiError::store("Failed to submit quiz", e)),
    };
    let quiz: Quiz = doc
        .parse()
        .map_err(|e| ApiError::store("Failed to submit quiz", e))?;

    let invalid_quiz = || ApiError::DataIntegrity("Invalid quiz format".to_string());
    let questions = scoring::parse_json_list(&quiz.questions).ok_or_else(invalid_quiz)?;
    let key = scoring::parse_json_list(&quiz.correct_answers).ok_or_else(invalid_quiz)?;
    if key.len() != questions.len() {
        return Err(invalid_quiz());
    }

    if answers.len() != questions.len() {
        return Err(ApiError::Validation(format!(
            "Answer count mismatch. Expected {}, got {}",
            questions.len(),
            answers.len()
        )));
    }

    let grade = scoring::grade_quiz(&answers, &key);

    let result = QuizResult {
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
        quiz_id: quiz_id.to_string(),
        score: grade.score,
        passed: grade.passed,
        results: serde_json::to_string(&grade.results)
            .map_err(|_| ApiError::DataIntegrity("Failed to encode quiz results".to_string()))?,
        submitted_at: Utc::now(),
    };
    state
        .store
        .create(collections::QUIZ_RESULTS, encode(&result)?)
        .await
        .map_err(|e| ApiError::store("Failed to submit quiz", e))?;

    // The stored result stands even if the progress append fails.
    if grade.passed {
        if let Err(e) =
            record_passed_quiz(state.store.as_ref(), user_id, course_id, quiz_id).await
        {
            tracing::warn!(error = %e, %user_id, %quiz_id, "could not update progress after passing quiz");
        }
    }

    let message = if grade.passed {
        "Congratulations! You passed the quiz."
    } else {
        "Keep practicing! Try again to improve your score."
    };
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "score": grade.score,
            "passed": grade.passed,
            "correctCount": grade.correct_count,
            "totalQuestions": questions.len(),
            "results": grade.results,
            "message": message,
        })),
    ))
}

// --- shared steps ---

/// Enrollment + progress creation shared by the paid and direct paths, then
/// the best-effort student-counter bump. No rollback on partial failure: an
/// enrollment without progress can be left behind by a crash between the two
/// writes.
async fn create_enrollment_records(
    state: &AppState,
    user_id: &str,
    course_id: &str,
    payment_id: Option<String>,
    amount: Option<f64>,
) -> Result<Document, ApiError> {
    let enrollment = Enrollment {
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
        enrolled_at: Utc::now(),
        status: EnrollmentStatus::Active,
        payment_id,
        amount,
        completed_at: None,
    };
    let doc = state
        .store
        .create(collections::ENROLLMENTS, encode(&enrollment)?)
        .await
        .map_err(|e| ApiError::store("Failed to enroll in course", e))?;

    state
        .store
        .create(
            collections::PROGRESS,
            encode(&Progress::new(user_id, course_id))?,
        )
        .await
        .map_err(|e| ApiError::store("Failed to initialize progress tracking", e))?;

    if let Err(e) = increment_student_count(state.store.as_ref(), course_id).await {
        tracing::warn!(error = %e, %course_id, "could not update course student count");
    }

    Ok(doc)
}

/// Plain read-then-write, not atomic; concurrent enrollments can lose counts.
async fn increment_student_count(
    store: &dyn DocumentStore,
    course_id: &str,
) -> Result<(), StoreError> {
    let doc = store.get(collections::COURSES, course_id).await?;
    let course: Course = doc.parse()?;
    store
        .update(
            collections::COURSES,
            &doc.id,
            json!({ "students": course.students + 1 }),
        )
        .await?;
    Ok(())
}

/// Absence of a matching enrollment is fine; the progress write already stands.
async fn mark_enrollment_completed(
    store: &dyn DocumentStore,
    user_id: &str,
    course_id: &str,
) -> Result<(), StoreError> {
    let enrollments = store
        .list(
            collections::ENROLLMENTS,
            &[("userId", user_id), ("courseId", course_id)],
        )
        .await?;
    if let Some(doc) = enrollments.into_iter().next() {
        store
            .update(
                collections::ENROLLMENTS,
                &doc.id,
                json!({
                    "status": EnrollmentStatus::Completed,
                    "completedAt": Utc::now(),
                }),
            )
            .await?;
    }
    Ok(())
}

/// Appends the quiz to the learner's passed set, once.
async fn record_passed_quiz(
    store: &dyn DocumentStore,
    user_id: &str,
    course_id: &str,
    quiz_id: &str,
) -> Result<(), StoreError> {
    let docs = store
        .list(
            collections::PROGRESS,
            &[("userId", user_id), ("courseId", course_id)],
        )
        .await?;
    let Some(doc) = docs.into_iter().next() else {
        return Ok(());
    };
    let progress: Progress = doc.parse()?;
    if progress.quiz_scores.iter().any(|q| q == quiz_id) {
        return Ok(());
    }
    let mut quiz_scores = progress.quiz_scores;
    quiz_scores.push(quiz_id.to_string());
    store
        .update(
            collections::PROGRESS,
            &doc.id,
            json!({
                "quizScores": quiz_scores,
                "lastAccessed": Utc::now(),
            }),
        )
        .await?;
    Ok(())
}

// --- helpers ---

/// Some invokers deliver the body double-encoded as a JSON string wrapping the
/// real object; accept both. Malformed JSON is a 400.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let text = body.trim();
    if text.is_empty() {
        return Err(ApiError::validation("Missing request body"));
    }
    let mut value: Value = serde_json::from_str(text)
        .map_err(|e| ApiError::Validation(format!("Invalid JSON body: {e}")))?;
    if let Value::String(inner) = value {
        value = serde_json::from_str(&inner)
            .map_err(|e| ApiError::Validation(format!("Invalid JSON body: {e}")))?;
    }
    serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(format!("Invalid request body: {e}")))
}

fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|_| ApiError::DataIntegrity("Failed to encode document".to_string()))
}
