use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::dto::question_dto::QuestionView;
use crate::models::attempt::AttemptStatus;
use crate::models::question::AnswerValue;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    pub selected_answer: Option<AnswerValue>,
    #[validate(range(min = 0))]
    pub time_taken_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: Uuid,
    pub selected_answer: Option<AnswerValue>,
    pub time_taken_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    pub answers: Vec<AnswerSubmission>,
    #[validate(range(min = 0))]
    pub time_taken_seconds: Option<i32>,
}

/// What the client receives when an attempt starts: the served question
/// order (possibly shuffled), with answer keys stripped.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub total_marks: Decimal,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based display position within the full leaderboard.
    pub position: i64,
    pub user_id: Uuid,
    pub attempt_number: i32,
    pub obtained_marks: Decimal,
    pub percentage: i32,
    pub time_taken_seconds: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    pub total_participants: i64,
    pub page: i64,
    pub page_size: i64,
}
