pub mod attempt_service;
pub mod performance;
pub mod question_service;
pub mod ranking_service;
pub mod scoring;
pub mod test_service;
