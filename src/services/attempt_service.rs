use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::dto::attempt_dto::{AttemptView, SaveAnswerRequest, SubmitAttemptRequest};
use crate::dto::question_dto::QuestionView;
use crate::error::{Error, Result};
use crate::external::{EnrollmentGuard, NotificationSink};
use crate::models::attempt::{Attempt, AttemptAnswer, AttemptStatus};
use crate::models::question::Question;
use crate::models::test::Test;
use crate::services::performance::PerformanceAnalyzer;
use crate::services::question_service::QuestionService;
use crate::services::ranking_service::RankingService;
use crate::services::scoring::{ScoreBreakdown, ScoringService};
use crate::services::test_service::TestService;
use crate::utils::time;

/// Tuning for the stale-attempt sweep.
#[derive(Debug, Clone)]
pub struct SweepPolicy {
    /// Slack on top of the test duration before an attempt is timed out.
    pub overdue_grace: Duration,
    /// Inactivity window after which an in-progress attempt is abandoned.
    pub abandon_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            overdue_grace: Duration::minutes(5),
            abandon_after: Duration::hours(24),
        }
    }
}

impl SweepPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overdue_grace: Duration::minutes(config.overdue_grace_minutes),
            abandon_after: Duration::hours(config.abandon_after_hours),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOutcome {
    pub timed_out: usize,
    pub abandoned: usize,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct PriorAttempt {
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct AttemptService {
    pool: PgPool,
    enrollment: Arc<dyn EnrollmentGuard>,
    notifier: Arc<dyn NotificationSink>,
    questions: QuestionService,
    tests: TestService,
    ranking: RankingService,
}

impl AttemptService {
    pub fn new(
        pool: PgPool,
        enrollment: Arc<dyn EnrollmentGuard>,
        notifier: Arc<dyn NotificationSink>,
        questions: QuestionService,
        tests: TestService,
        ranking: RankingService,
    ) -> Self {
        Self {
            pool,
            enrollment,
            notifier,
            questions,
            tests,
            ranking,
        }
    }

    /// Starts an attempt: availability, enrollment, attempt-limit and
    /// cooldown checks, then the insert. The unique
    /// (user_id, test_id, attempt_number) constraint serializes concurrent
    /// starts; on collision the checks re-run once against fresh state.
    pub async fn start_attempt(&self, user_id: Uuid, test_id: Uuid) -> Result<AttemptView> {
        let test = self.tests.get_test(test_id).await?;
        let now = time::now();

        if !test.is_published {
            return Err(Error::InvalidState("Test is not published".to_string()));
        }
        if !test.is_available(now) {
            return Err(Error::InvalidState(
                "Test is not currently available".to_string(),
            ));
        }

        let enrollment_id = self
            .enrollment
            .active_enrollment(user_id, test.course_id)
            .await?
            .ok_or_else(|| {
                Error::Forbidden("User is not actively enrolled in this course".to_string())
            })?;

        let questions = self.questions.fetch_by_ids(&test.question_ids).await?;
        let seeded: Vec<AttemptAnswer> = questions
            .iter()
            .map(|q| AttemptAnswer::unanswered(q.id))
            .collect();

        for retry in 0..2 {
            let prior = self.prior_attempts(user_id, test_id).await?;
            let attempt_number = ensure_within_limits(&test, &prior, now)?;

            let inserted = sqlx::query_as::<_, Attempt>(
                r#"
                INSERT INTO attempts (
                    user_id, test_id, enrollment_id, attempt_number,
                    started_at, status, answers, total_marks, last_activity_at
                )
                VALUES ($1, $2, $3, $4, $5, 'in_progress', $6, $7, $5)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(test_id)
            .bind(enrollment_id)
            .bind(attempt_number)
            .bind(now)
            .bind(Json(&seeded))
            .bind(test.total_marks)
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(attempt) => {
                    let views = build_display_view(
                        &questions,
                        test.shuffle_questions,
                        test.shuffle_options,
                        &mut rand::thread_rng(),
                    );
                    return Ok(AttemptView {
                        attempt_id: attempt.id,
                        test_id: attempt.test_id,
                        attempt_number: attempt.attempt_number,
                        status: attempt.status,
                        started_at: attempt.started_at,
                        duration_minutes: test.duration_minutes,
                        total_marks: attempt.total_marks,
                        questions: views,
                    });
                }
                Err(err) if is_unique_violation(&err) => {
                    if retry == 0 {
                        tracing::warn!(
                            user_id = %user_id,
                            test_id = %test_id,
                            "Concurrent attempt start detected; re-running limit checks"
                        );
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::InvalidState(
            "Another attempt start for this test is already in flight".to_string(),
        ))
    }

    /// Progressive answer save while the attempt is open. Refreshes the
    /// activity timestamp the sweep watches.
    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        user_id: Uuid,
        req: SaveAnswerRequest,
    ) -> Result<DateTime<Utc>> {
        req.validate()?;

        let attempt = self.get_attempt(attempt_id).await?;
        if attempt.user_id != user_id {
            return Err(Error::Forbidden(
                "Attempt belongs to another user".to_string(),
            ));
        }
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::InvalidState(
                "Attempt is not in progress".to_string(),
            ));
        }

        let mut answers = attempt.answers.0;
        let entry = answers
            .iter_mut()
            .find(|a| a.question_id == req.question_id)
            .ok_or_else(|| Error::NotFound("Question is not part of this attempt".to_string()))?;
        entry.selected_answer = req.selected_answer;
        entry.time_taken_seconds = req.time_taken_seconds;

        let now = time::now();
        let updated = sqlx::query(
            r#"
            UPDATE attempts
            SET answers = $1, last_activity_at = $2, updated_at = $2
            WHERE id = $3 AND status = 'in_progress'
            "#,
        )
        .bind(Json(&answers))
        .bind(now)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::InvalidState(
                "Attempt is not in progress".to_string(),
            ));
        }

        Ok(now)
    }

    /// Scores and finalizes an attempt. The status flip is a conditional
    /// single-writer update: of two racing submits, exactly one wins and the
    /// other observes a terminal status.
    pub async fn submit_attempt(
        &self,
        attempt_id: Uuid,
        user_id: Uuid,
        req: SubmitAttemptRequest,
    ) -> Result<Attempt> {
        req.validate()?;

        let attempt = self.get_attempt(attempt_id).await?;
        if attempt.user_id != user_id {
            return Err(Error::Forbidden(
                "Attempt belongs to another user".to_string(),
            ));
        }
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::InvalidState(
                "Attempt is not in progress".to_string(),
            ));
        }

        let test = self.tests.get_test(attempt.test_id).await?;

        let mut answers = attempt.answers.0;
        merge_answers(&mut answers, &req.answers);

        let question_ids: Vec<Uuid> = answers.iter().map(|a| a.question_id).collect();
        let questions = self.questions.fetch_by_ids(&question_ids).await?;

        let now = time::now();
        let time_taken = req
            .time_taken_seconds
            .unwrap_or_else(|| (now - attempt.started_at).num_seconds().max(0) as i32);

        let breakdown = ScoringService::score_attempt(
            &questions,
            &answers,
            test.negative_marking_percentage,
            test.passing_marks,
        );
        let summary = PerformanceAnalyzer::analyze(&questions, &breakdown.graded);

        let updated = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET status = 'submitted', submitted_at = $2, time_taken_seconds = $3,
                answers = $4, total_marks = $5, obtained_marks = $6,
                negative_marks = $7, percentage = $8, correct_count = $9,
                incorrect_count = $10, unanswered_count = $11, passed = $12,
                strength_areas = $13, weak_areas = $14,
                last_activity_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(now)
        .bind(time_taken)
        .bind(Json(&breakdown.graded))
        .bind(breakdown.total_marks)
        .bind(breakdown.obtained_marks)
        .bind(breakdown.negative_marks)
        .bind(breakdown.percentage)
        .bind(breakdown.correct_count)
        .bind(breakdown.incorrect_count)
        .bind(breakdown.unanswered_count)
        .bind(breakdown.passed)
        .bind(Json(&summary.strength_areas))
        .bind(Json(&summary.weak_areas))
        .fetch_optional(&self.pool)
        .await?;

        let mut attempt = updated.ok_or_else(|| {
            Error::InvalidState("Attempt is not in progress".to_string())
        })?;

        // Rank is frozen against the submissions that exist right now. The
        // score is already durable, so a failure here only costs the rank.
        match self
            .ranking
            .compute_rank(attempt.test_id, attempt.obtained_marks)
            .await
        {
            Ok((rank, percentile)) => {
                if let Err(err) = sqlx::query(
                    "UPDATE attempts SET rank = $2, percentile = $3 WHERE id = $1",
                )
                .bind(attempt_id)
                .bind(rank)
                .bind(percentile)
                .execute(&self.pool)
                .await
                {
                    tracing::error!(error = ?err, attempt_id = %attempt_id, "Failed to persist rank");
                } else {
                    attempt.rank = Some(rank);
                    attempt.percentile = Some(percentile);
                }
            }
            Err(err) => {
                tracing::error!(error = ?err, attempt_id = %attempt_id, "Failed to compute rank");
            }
        }

        self.record_statistics(&test, &breakdown).await;
        self.dispatch_result_notification(&attempt, &test).await;

        Ok(attempt)
    }

    pub async fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        sqlx::query_as::<_, Attempt>("SELECT * FROM attempts WHERE id = $1")
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))
    }

    /// Attempt history for transcript/progress views.
    pub async fn list_user_attempts(&self, user_id: Uuid, test_id: Uuid) -> Result<Vec<Attempt>> {
        let attempts = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE user_id = $1 AND test_id = $2
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    /// Moves stale in-progress attempts to a terminal status. Overdue
    /// attempts on duration-bearing tests are scored from their saved
    /// answers and timed out; attempts idle past the abandonment window are
    /// abandoned with a zero score. Swept attempts never enter the ranking
    /// snapshot and never notify.
    pub async fn sweep_stale_attempts(&self, policy: &SweepPolicy) -> Result<SweepOutcome> {
        let now = time::now();
        let mut outcome = SweepOutcome::default();

        let overdue = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT a.* FROM attempts a
            JOIN tests t ON t.id = a.test_id
            WHERE a.status = 'in_progress'
              AND t.duration_minutes > 0
              AND a.started_at + make_interval(secs => t.duration_minutes * 60 + $2) < $1
            "#,
        )
        .bind(now)
        .bind(policy.overdue_grace.num_seconds() as f64)
        .fetch_all(&self.pool)
        .await?;

        for attempt in overdue {
            match self.finalize_timed_out(attempt, now).await {
                Ok(true) => outcome.timed_out += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(error = ?err, "Failed to time out overdue attempt");
                }
            }
        }

        let abandoned = sqlx::query(
            r#"
            UPDATE attempts
            SET status = 'abandoned', passed = FALSE, updated_at = $1
            WHERE status = 'in_progress'
              AND last_activity_at + make_interval(secs => $2) < $1
            "#,
        )
        .bind(now)
        .bind(policy.abandon_after.num_seconds() as f64)
        .execute(&self.pool)
        .await?;
        outcome.abandoned = abandoned.rows_affected() as usize;

        if outcome.timed_out > 0 || outcome.abandoned > 0 {
            tracing::info!(
                timed_out = outcome.timed_out,
                abandoned = outcome.abandoned,
                "Swept stale attempts"
            );
        }

        Ok(outcome)
    }

    /// Worker loop for embedders to spawn alongside the engine.
    pub async fn run_sweeper(&self, policy: SweepPolicy, interval: std::time::Duration) {
        loop {
            if let Err(err) = self.sweep_stale_attempts(&policy).await {
                tracing::error!(error = ?err, "Attempt sweep error");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn finalize_timed_out(&self, attempt: Attempt, now: DateTime<Utc>) -> Result<bool> {
        let test = match self.tests.get_test(attempt.test_id).await {
            Ok(test) => test,
            Err(Error::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };

        let answers = attempt.answers.0;
        let question_ids: Vec<Uuid> = answers.iter().map(|a| a.question_id).collect();
        let questions = self.questions.fetch_by_ids(&question_ids).await?;
        let breakdown = ScoringService::score_attempt(
            &questions,
            &answers,
            test.negative_marking_percentage,
            test.passing_marks,
        );

        let updated = sqlx::query(
            r#"
            UPDATE attempts
            SET status = 'timed_out', time_taken_seconds = $2,
                answers = $3, total_marks = $4, obtained_marks = $5,
                negative_marks = $6, percentage = $7, correct_count = $8,
                incorrect_count = $9, unanswered_count = $10, passed = $11,
                updated_at = $12
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(attempt.id)
        .bind(test.duration_minutes * 60)
        .bind(Json(&breakdown.graded))
        .bind(breakdown.total_marks)
        .bind(breakdown.obtained_marks)
        .bind(breakdown.negative_marks)
        .bind(breakdown.percentage)
        .bind(breakdown.correct_count)
        .bind(breakdown.incorrect_count)
        .bind(breakdown.unanswered_count)
        .bind(breakdown.passed)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn prior_attempts(&self, user_id: Uuid, test_id: Uuid) -> Result<Vec<PriorAttempt>> {
        let prior = sqlx::query_as::<_, PriorAttempt>(
            r#"
            SELECT attempt_number, started_at, submitted_at
            FROM attempts
            WHERE user_id = $1 AND test_id = $2
            ORDER BY attempt_number DESC
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(prior)
    }

    /// Aggregate statistics are best-effort once the score is durable.
    async fn record_statistics(&self, test: &Test, breakdown: &ScoreBreakdown) {
        for answer in &breakdown.graded {
            let Some(correct) = answer.is_correct else {
                continue;
            };
            if let Err(err) = self
                .questions
                .record_answer_stats(answer.question_id, correct, answer.time_taken_seconds)
                .await
            {
                tracing::error!(
                    error = ?err,
                    question_id = %answer.question_id,
                    "Failed to update question statistics"
                );
            }
        }

        if let Err(err) = self
            .tests
            .record_submission_stats(test.id, breakdown.obtained_marks)
            .await
        {
            tracing::error!(error = ?err, test_id = %test.id, "Failed to update test statistics");
        }
    }

    async fn dispatch_result_notification(&self, attempt: &Attempt, test: &Test) {
        let verdict = if attempt.passed { "passed" } else { "failed" };
        let title = format!("{} results", test.title);
        let message = format!(
            "You scored {}% on {} and {}.",
            attempt.percentage, test.title, verdict
        );
        let data = json!({
            "test_id": test.id,
            "attempt_id": attempt.id,
            "attempt_number": attempt.attempt_number,
            "percentage": attempt.percentage,
            "obtained_marks": attempt.obtained_marks,
            "total_marks": attempt.total_marks,
            "passed": attempt.passed,
        });

        if let Err(err) = self
            .notifier
            .notify(attempt.user_id, "test_result", &title, &message, data)
            .await
        {
            tracing::error!(
                error = ?err,
                attempt_id = %attempt.id,
                "Failed to deliver result notification"
            );
        }
    }
}

/// Attempt-limit and cooldown checks against the user's prior attempts
/// (newest first). Returns the next attempt number on success.
pub(crate) fn ensure_within_limits(
    test: &Test,
    prior: &[PriorAttempt],
    now: DateTime<Utc>,
) -> Result<i32> {
    let count = prior.len() as i32;
    if !test.allows_unlimited_attempts() && count >= test.max_attempts {
        return Err(Error::LimitExceeded(format!(
            "Maximum of {} attempt(s) reached for this test",
            test.max_attempts
        )));
    }

    if test.cooldown_hours > 0 {
        if let Some(last) = prior.first() {
            let anchor = last.submitted_at.unwrap_or(last.started_at);
            let cooldown_end = anchor + Duration::hours(test.cooldown_hours as i64);
            if now < cooldown_end {
                return Err(Error::cooldown(cooldown_end - now));
            }
        }
    }

    Ok(prior.first().map(|p| p.attempt_number + 1).unwrap_or(1))
}

/// Folds submitted answers into the attempt's seeded entries, matching by
/// question id. Submissions for unknown questions are ignored; entries
/// absent from the payload stay unanswered.
pub(crate) fn merge_answers(
    existing: &mut [AttemptAnswer],
    incoming: &[crate::dto::attempt_dto::AnswerSubmission],
) {
    for submission in incoming {
        if let Some(entry) = existing
            .iter_mut()
            .find(|a| a.question_id == submission.question_id)
        {
            entry.selected_answer = submission.selected_answer.clone();
            entry.time_taken_seconds = submission.time_taken_seconds;
        }
    }
}

/// Builds the per-attempt display view. The permutation is not persisted;
/// grading keys strictly by question id, so a later reshuffle is harmless.
pub(crate) fn build_display_view(
    questions: &[Question],
    shuffle_questions: bool,
    shuffle_options: bool,
    rng: &mut impl Rng,
) -> Vec<QuestionView> {
    let mut views: Vec<QuestionView> = questions.iter().map(QuestionView::from_question).collect();
    if shuffle_questions {
        views.shuffle(rng);
    }
    if shuffle_options {
        for view in &mut views {
            view.options.shuffle(rng);
        }
    }
    views
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
