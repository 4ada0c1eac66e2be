use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::question::AnswerValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    TimedOut,
    Abandoned,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::TimedOut => "timed_out",
            AttemptStatus::Abandoned => "abandoned",
        }
    }
}

/// One entry per question served at attempt start, in storage order. A null
/// selection means unanswered; grading fills is_correct/marks_obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptAnswer {
    pub question_id: Uuid,
    pub selected_answer: Option<AnswerValue>,
    pub is_correct: Option<bool>,
    pub marks_obtained: Option<Decimal>,
    pub time_taken_seconds: Option<i32>,
}

impl AttemptAnswer {
    pub fn unanswered(question_id: Uuid) -> Self {
        Self {
            question_id,
            selected_answer: None,
            is_correct: None,
            marks_obtained: None,
            time_taken_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScore {
    pub topic: String,
    pub score: i32,
    pub correct: i32,
    pub total: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub enrollment_id: Uuid,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_taken_seconds: i32,
    pub status: AttemptStatus,
    pub answers: Json<Vec<AttemptAnswer>>,
    pub total_marks: Decimal,
    pub obtained_marks: Decimal,
    pub negative_marks: Decimal,
    pub percentage: i32,
    pub correct_count: i32,
    pub incorrect_count: i32,
    pub unanswered_count: i32,
    pub passed: bool,
    pub rank: Option<i32>,
    pub percentile: Option<i32>,
    pub strength_areas: Json<Vec<TopicScore>>,
    pub weak_areas: Json<Vec<TopicScore>>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_in_progress_is_non_terminal() {
        assert!(!AttemptStatus::InProgress.is_terminal());
        assert!(AttemptStatus::Submitted.is_terminal());
        assert!(AttemptStatus::TimedOut.is_terminal());
        assert!(AttemptStatus::Abandoned.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AttemptStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
        let parsed: AttemptStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(parsed, AttemptStatus::InProgress);
    }
}
