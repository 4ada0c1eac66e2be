use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::test::Test;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTestPayload {
    pub course_id: Uuid,
    pub lesson_id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub passing_marks: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub negative_marking_percentage: f64,
    #[validate(range(min = 0))]
    pub duration_minutes: i32,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_options: bool,
    /// -1 means unlimited; checked by the service.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub cooldown_hours: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_always_available: bool,
}

fn default_max_attempts() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTestPolicyPayload {
    #[validate(length(min = 1))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub passing_marks: Option<f64>,
    /// Negative marking is platform policy; `Some(false)` is overridden back
    /// to enabled.
    pub negative_marking_enabled: Option<bool>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub negative_marking_percentage: Option<f64>,
    #[validate(range(min = 0))]
    pub duration_minutes: Option<i32>,
    pub shuffle_questions: Option<bool>,
    pub shuffle_options: Option<bool>,
    pub max_attempts: Option<i32>,
    #[validate(range(min = 0))]
    pub cooldown_hours: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_always_available: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedTests {
    #[serde(rename = "items")]
    pub tests: Vec<Test>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}
