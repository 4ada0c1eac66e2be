use std::collections::HashMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::dto::question_dto::{CreateQuestionPayload, UpdateQuestionPayload};
use crate::error::{Error, Result};
use crate::models::question::{
    validate_question_shape, Difficulty, Question, QuestionOption,
};

#[derive(Clone)]
pub struct QuestionService {
    pool: PgPool,
}

impl QuestionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_question(&self, payload: CreateQuestionPayload) -> Result<Question> {
        payload.validate()?;

        let options: Vec<QuestionOption> = payload
            .options
            .iter()
            .map(|opt| QuestionOption {
                text: opt.text.clone(),
                is_correct: opt.is_correct,
            })
            .collect();
        let marks = Decimal::from_f64(payload.marks)
            .ok_or_else(|| Error::BadRequest("Invalid marks value".to_string()))?;
        validate_question_shape(payload.question_type, &options, &payload.correct_answer, marks)?;

        let question = sqlx::query_as::<_, Question>(
            r#"
            INSERT INTO questions (
                course_id, test_id, question_type, prompt, options, correct_answer,
                marks, difficulty, topic
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(payload.course_id)
        .bind(payload.test_id)
        .bind(payload.question_type)
        .bind(&payload.prompt)
        .bind(Json(&options))
        .bind(Json(&payload.correct_answer))
        .bind(marks)
        .bind(payload.difficulty.unwrap_or(Difficulty::Medium))
        .bind(payload.topic.unwrap_or_default())
        .fetch_one(&self.pool)
        .await?;

        Ok(question)
    }

    pub async fn get_question(&self, question_id: Uuid) -> Result<Question> {
        sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1")
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Question not found".to_string()))
    }

    pub async fn list_questions(
        &self,
        course_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<Question>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT * FROM questions
            WHERE course_id = $1 AND ($2::uuid IS NULL OR test_id = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(course_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(questions)
    }

    /// Fetches the given questions and returns them in the order of `ids`.
    pub async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        let mut by_id: HashMap<Uuid, Question> = rows.into_iter().map(|q| (q.id, q)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn update_question(
        &self,
        question_id: Uuid,
        payload: UpdateQuestionPayload,
    ) -> Result<Question> {
        payload.validate()?;

        let current = self.get_question(question_id).await?;

        let prompt = payload.prompt.unwrap_or(current.prompt);
        let options: Vec<QuestionOption> = match payload.options {
            Some(options) => options
                .into_iter()
                .map(|opt| QuestionOption {
                    text: opt.text,
                    is_correct: opt.is_correct,
                })
                .collect(),
            None => current.options.0,
        };
        let correct_answer = payload.correct_answer.unwrap_or(current.correct_answer.0);
        let marks = match payload.marks {
            Some(marks) => Decimal::from_f64(marks)
                .ok_or_else(|| Error::BadRequest("Invalid marks value".to_string()))?,
            None => current.marks,
        };
        let difficulty = payload.difficulty.unwrap_or(current.difficulty);
        let topic = payload.topic.unwrap_or(current.topic);

        // The merged result must still be a well-formed question.
        validate_question_shape(current.question_type, &options, &correct_answer, marks)?;

        let updated = sqlx::query_as::<_, Question>(
            r#"
            UPDATE questions
            SET prompt = $1, options = $2, correct_answer = $3, marks = $4,
                difficulty = $5, topic = $6, updated_at = NOW()
            WHERE id = $7
            RETURNING *
            "#,
        )
        .bind(&prompt)
        .bind(Json(&options))
        .bind(Json(&correct_answer))
        .bind(marks)
        .bind(difficulty)
        .bind(&topic)
        .bind(question_id)
        .fetch_one(&self.pool)
        .await?;

        if marks != current.marks {
            if let Some(test_id) = updated.test_id {
                self.recompute_test_totals(test_id).await?;
            }
        }

        Ok(updated)
    }

    /// Deletes a question and detaches it from its test, recomputing the
    /// test's derived totals.
    pub async fn delete_question(&self, question_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let question = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1")
            .bind(question_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("Question not found".to_string()))?;

        sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(question_id)
            .execute(&mut *tx)
            .await?;

        if let Some(test_id) = question.test_id {
            sqlx::query("UPDATE tests SET question_ids = array_remove(question_ids, $1) WHERE id = $2")
                .bind(question_id)
                .bind(test_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(RECOMPUTE_TEST_TOTALS_SQL)
                .bind(test_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Refreshes a test's derived `total_questions`/`total_marks` from its
    /// current question list.
    pub async fn recompute_test_totals(&self, test_id: Uuid) -> Result<()> {
        sqlx::query(RECOMPUTE_TEST_TOTALS_SQL)
            .bind(test_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Folds one graded answer into the question's answer statistics with a
    /// single atomic update. Counters only move for answered questions.
    pub async fn record_answer_stats(
        &self,
        question_id: Uuid,
        correct: bool,
        time_taken_seconds: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE questions
            SET times_answered = times_answered + 1,
                times_correct = times_correct + CASE WHEN $2 THEN 1 ELSE 0 END,
                times_incorrect = times_incorrect + CASE WHEN $2 THEN 0 ELSE 1 END,
                average_time_seconds = CASE
                    WHEN $3::float8 IS NULL THEN average_time_seconds
                    ELSE (average_time_seconds * times_answered + $3) / (times_answered + 1)
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(question_id)
        .bind(correct)
        .bind(time_taken_seconds.map(f64::from))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) const RECOMPUTE_TEST_TOTALS_SQL: &str = r#"
    UPDATE tests
    SET total_questions = cardinality(question_ids),
        total_marks = COALESCE(
            (SELECT SUM(q.marks) FROM questions q WHERE q.id = ANY(tests.question_ids)),
            0
        ),
        updated_at = NOW()
    WHERE id = $1
"#;
