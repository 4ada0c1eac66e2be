use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::dto::question_dto::CreateQuestionPayload;
use crate::dto::test_dto::{CreateTestPayload, PaginatedTests, UpdateTestPolicyPayload};
use crate::error::{Error, Result};
use crate::external::CourseAccess;
use crate::models::test::Test;
use crate::services::question_service::QuestionService;

#[derive(Clone)]
pub struct TestService {
    pool: PgPool,
    course_access: Arc<dyn CourseAccess>,
    questions: QuestionService,
}

impl TestService {
    pub fn new(
        pool: PgPool,
        course_access: Arc<dyn CourseAccess>,
        questions: QuestionService,
    ) -> Self {
        Self {
            pool,
            course_access,
            questions,
        }
    }

    /// Creates a draft test. The creator must own the course; negative
    /// marking is platform policy and always enabled.
    pub async fn create_test(&self, payload: CreateTestPayload, created_by: Uuid) -> Result<Test> {
        payload.validate()?;
        ensure_valid_max_attempts(payload.max_attempts)?;

        if !self.course_access.course_exists(payload.course_id).await? {
            return Err(Error::NotFound("Course not found".to_string()));
        }
        if !self
            .course_access
            .instructor_owns_course(created_by, payload.course_id)
            .await?
        {
            return Err(Error::Forbidden(
                "Only the course instructor can create tests".to_string(),
            ));
        }

        let passing_marks = Decimal::from_f64(payload.passing_marks)
            .ok_or_else(|| Error::BadRequest("Invalid passing marks".to_string()))?;
        let negative_percentage = Decimal::from_f64(payload.negative_marking_percentage)
            .ok_or_else(|| Error::BadRequest("Invalid negative marking percentage".to_string()))?;

        let test = sqlx::query_as::<_, Test>(
            r#"
            INSERT INTO tests (
                course_id, lesson_id, title, description, instructions,
                passing_marks, negative_marking_enabled, negative_marking_percentage,
                duration_minutes, shuffle_questions, shuffle_options,
                max_attempts, cooldown_hours, start_date, end_date,
                is_always_available, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(payload.course_id)
        .bind(payload.lesson_id)
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.instructions)
        .bind(passing_marks)
        .bind(negative_percentage)
        .bind(payload.duration_minutes)
        .bind(payload.shuffle_questions)
        .bind(payload.shuffle_options)
        .bind(payload.max_attempts)
        .bind(payload.cooldown_hours)
        .bind(payload.start_date)
        .bind(payload.end_date)
        .bind(payload.is_always_available)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(test)
    }

    pub async fn get_test(&self, test_id: Uuid) -> Result<Test> {
        sqlx::query_as::<_, Test>("SELECT * FROM tests WHERE id = $1")
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Test not found".to_string()))
    }

    /// Creates a question owned by this test and appends it to the ordered
    /// question list, refreshing the derived totals.
    pub async fn add_question(
        &self,
        test_id: Uuid,
        mut payload: CreateQuestionPayload,
    ) -> Result<Test> {
        let test = self.get_test(test_id).await?;

        payload.course_id = test.course_id;
        payload.test_id = Some(test_id);
        let question = self.questions.create_question(payload).await?;

        sqlx::query("UPDATE tests SET question_ids = array_append(question_ids, $1), updated_at = NOW() WHERE id = $2")
            .bind(question.id)
            .bind(test_id)
            .execute(&self.pool)
            .await?;
        self.questions.recompute_test_totals(test_id).await?;

        self.get_test(test_id).await
    }

    /// Removes a question from the test and deletes it from the bank.
    pub async fn remove_question(&self, test_id: Uuid, question_id: Uuid) -> Result<Test> {
        let question = self.questions.get_question(question_id).await?;
        if question.test_id != Some(test_id) {
            return Err(Error::NotFound(
                "Question does not belong to this test".to_string(),
            ));
        }

        self.questions.delete_question(question_id).await?;
        self.get_test(test_id).await
    }

    pub async fn publish(&self, test_id: Uuid) -> Result<Test> {
        self.set_published(test_id, true).await
    }

    pub async fn unpublish(&self, test_id: Uuid) -> Result<Test> {
        self.set_published(test_id, false).await
    }

    async fn set_published(&self, test_id: Uuid, published: bool) -> Result<Test> {
        sqlx::query_as::<_, Test>(
            "UPDATE tests SET is_published = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(test_id)
        .bind(published)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Test not found".to_string()))
    }

    /// Partial policy update. `negative_marking_enabled: Some(false)` is
    /// overridden: the flag is platform-mandated and the column is never
    /// written by this path.
    pub async fn update_policy(
        &self,
        test_id: Uuid,
        payload: UpdateTestPolicyPayload,
    ) -> Result<Test> {
        payload.validate()?;
        if let Some(max_attempts) = payload.max_attempts {
            ensure_valid_max_attempts(max_attempts)?;
        }

        if payload.negative_marking_enabled == Some(false) {
            tracing::warn!(
                test_id = %test_id,
                "Ignoring request to disable negative marking; it is mandatory platform policy"
            );
        }

        let passing_marks = payload
            .passing_marks
            .map(|v| {
                Decimal::from_f64(v)
                    .ok_or_else(|| Error::BadRequest("Invalid passing marks".to_string()))
            })
            .transpose()?;
        let negative_percentage = payload
            .negative_marking_percentage
            .map(|v| {
                Decimal::from_f64(v).ok_or_else(|| {
                    Error::BadRequest("Invalid negative marking percentage".to_string())
                })
            })
            .transpose()?;

        let test = sqlx::query_as::<_, Test>(
            r#"
            UPDATE tests
            SET title = COALESCE($1, title),
                description = COALESCE($2, description),
                instructions = COALESCE($3, instructions),
                passing_marks = COALESCE($4, passing_marks),
                negative_marking_percentage = COALESCE($5, negative_marking_percentage),
                duration_minutes = COALESCE($6, duration_minutes),
                shuffle_questions = COALESCE($7, shuffle_questions),
                shuffle_options = COALESCE($8, shuffle_options),
                max_attempts = COALESCE($9, max_attempts),
                cooldown_hours = COALESCE($10, cooldown_hours),
                start_date = COALESCE($11, start_date),
                end_date = COALESCE($12, end_date),
                is_always_available = COALESCE($13, is_always_available),
                updated_at = NOW()
            WHERE id = $14
            RETURNING *
            "#,
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.instructions)
        .bind(passing_marks)
        .bind(negative_percentage)
        .bind(payload.duration_minutes)
        .bind(payload.shuffle_questions)
        .bind(payload.shuffle_options)
        .bind(payload.max_attempts)
        .bind(payload.cooldown_hours)
        .bind(payload.start_date)
        .bind(payload.end_date)
        .bind(payload.is_always_available)
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Test not found".to_string()))?;

        Ok(test)
    }

    /// Cascading delete: attempts, then the test's questions, then the test.
    pub async fn delete_test(&self, test_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attempts WHERE test_id = $1")
            .bind(test_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM questions WHERE test_id = $1")
            .bind(test_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tests WHERE id = $1")
            .bind(test_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Folds a scored submission into the test's aggregate statistics with a
    /// single atomic update.
    pub async fn record_submission_stats(&self, test_id: Uuid, obtained: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tests
            SET total_attempts = total_attempts + 1,
                average_score = (average_score * total_attempts + $2) / (total_attempts + 1),
                highest_score = GREATEST(highest_score, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(test_id)
        .bind(obtained)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Course summary surface: does the course carry at least one test?
    pub async fn has_test_for_course(&self, course_id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tests WHERE course_id = $1)")
                .bind(course_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn has_test_for_lesson(&self, lesson_id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tests WHERE lesson_id = $1)")
                .bind(lesson_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn list_tests(
        &self,
        course_id: Option<Uuid>,
        page: i64,
        per_page: i64,
    ) -> Result<PaginatedTests> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let offset = (page - 1) * per_page;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tests WHERE ($1::uuid IS NULL OR course_id = $1)",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;

        let tests = sqlx::query_as::<_, Test>(
            r#"
            SELECT * FROM tests
            WHERE ($1::uuid IS NULL OR course_id = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(course_id)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_pages = if per_page > 0 {
            ((total as f64) / (per_page as f64)).ceil() as i64
        } else {
            1
        };

        Ok(PaginatedTests {
            tests,
            total,
            page,
            per_page,
            total_pages,
        })
    }
}

fn ensure_valid_max_attempts(max_attempts: i32) -> Result<()> {
    if max_attempts < -1 || max_attempts == 0 {
        return Err(Error::BadRequest(
            "max_attempts must be -1 (unlimited) or a positive count".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_attempts_accepts_unlimited_and_positive_counts() {
        ensure_valid_max_attempts(-1).unwrap();
        ensure_valid_max_attempts(1).unwrap();
        ensure_valid_max_attempts(10).unwrap();
    }

    #[test]
    fn max_attempts_rejects_zero_and_below_minus_one() {
        assert!(ensure_valid_max_attempts(0).is_err());
        assert!(ensure_valid_max_attempts(-2).is_err());
    }
}
