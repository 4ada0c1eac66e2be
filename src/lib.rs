pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod external;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use sqlx::PgPool;

use crate::external::{CourseAccess, EnrollmentGuard, NotificationSink};
use crate::services::{
    attempt_service::AttemptService, question_service::QuestionService,
    ranking_service::RankingService, test_service::TestService,
};

/// The assessment engine, wired against the collaborators the surrounding
/// platform provides (enrollment checks, course ownership, notifications).
#[derive(Clone)]
pub struct Engine {
    pub pool: PgPool,
    pub questions: QuestionService,
    pub tests: TestService,
    pub attempts: AttemptService,
    pub ranking: RankingService,
}

impl Engine {
    pub fn new(
        pool: PgPool,
        course_access: Arc<dyn CourseAccess>,
        enrollment: Arc<dyn EnrollmentGuard>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let questions = QuestionService::new(pool.clone());
        let tests = TestService::new(pool.clone(), course_access, questions.clone());
        let ranking = RankingService::new(pool.clone());
        let attempts = AttemptService::new(
            pool.clone(),
            enrollment,
            notifier,
            questions.clone(),
            tests.clone(),
            ranking.clone(),
        );

        Self {
            pool,
            questions,
            tests,
            attempts,
            ranking,
        }
    }
}

/// Installs the fmt subscriber with env-filter control; embedders that bring
/// their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
