use std::collections::HashMap;

use uuid::Uuid;

use crate::models::attempt::{AttemptAnswer, TopicScore};
use crate::models::question::Question;

/// Per-topic strength/weak-area split for one graded attempt.
#[derive(Debug, Clone, Default)]
pub struct PerformanceSummary {
    pub strength_areas: Vec<TopicScore>,
    pub weak_areas: Vec<TopicScore>,
}

pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    /// Aggregates correctness per topic over the answered questions. Topics
    /// scoring >= 70 are strengths, < 50 are weak areas (at most 5 each);
    /// the 50-69 band lands in neither list.
    pub fn analyze(questions: &[Question], graded: &[AttemptAnswer]) -> PerformanceSummary {
        let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();

        let mut topics: HashMap<&str, (i32, i32)> = HashMap::new();
        for answer in graded {
            if answer.selected_answer.is_none() {
                continue;
            }
            let Some(question) = by_id.get(&answer.question_id) else {
                continue;
            };
            let topic = question.topic.trim();
            if topic.is_empty() {
                continue;
            }
            let entry = topics.entry(topic).or_insert((0, 0));
            entry.1 += 1;
            if answer.is_correct == Some(true) {
                entry.0 += 1;
            }
        }

        let mut scored: Vec<TopicScore> = topics
            .into_iter()
            .map(|(topic, (correct, total))| TopicScore {
                topic: topic.to_string(),
                score: ((correct as f64 / total as f64) * 100.0).round() as i32,
                correct,
                total,
            })
            .collect();
        // Topic name as secondary key keeps the ordering deterministic.
        scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.topic.cmp(&b.topic)));

        PerformanceSummary {
            strength_areas: scored
                .iter()
                .filter(|t| t.score >= 70)
                .take(5)
                .cloned()
                .collect(),
            weak_areas: scored
                .iter()
                .filter(|t| t.score < 50)
                .take(5)
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::types::Json;

    use crate::models::question::{AnswerValue, Difficulty, QuestionOption, QuestionType};

    fn topic_question(topic: &str) -> Question {
        Question {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            test_id: None,
            question_type: QuestionType::Mcq,
            prompt: "prompt".into(),
            options: Json(vec![
                QuestionOption {
                    text: "a".into(),
                    is_correct: true,
                },
                QuestionOption {
                    text: "b".into(),
                    is_correct: false,
                },
            ]),
            correct_answer: Json(AnswerValue::Index(0)),
            marks: Decimal::ONE,
            difficulty: Difficulty::Easy,
            topic: topic.into(),
            times_answered: 0,
            times_correct: 0,
            times_incorrect: 0,
            average_time_seconds: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn graded_answer(question_id: Uuid, answered: bool, correct: bool) -> AttemptAnswer {
        AttemptAnswer {
            question_id,
            selected_answer: answered.then(|| AnswerValue::Index(if correct { 0 } else { 1 })),
            is_correct: answered.then_some(correct),
            marks_obtained: None,
            time_taken_seconds: None,
        }
    }

    #[test]
    fn splits_topics_into_strengths_and_weak_areas() {
        // algebra: 2/2 = 100 (strength), geometry: 1/3 = 33 (weak),
        // calculus: 3/5 = 60 (neither).
        let mut questions = Vec::new();
        let mut graded = Vec::new();
        for correct in [true, true] {
            let q = topic_question("algebra");
            graded.push(graded_answer(q.id, true, correct));
            questions.push(q);
        }
        for correct in [true, false, false] {
            let q = topic_question("geometry");
            graded.push(graded_answer(q.id, true, correct));
            questions.push(q);
        }
        for correct in [true, true, true, false, false] {
            let q = topic_question("calculus");
            graded.push(graded_answer(q.id, true, correct));
            questions.push(q);
        }

        let summary = PerformanceAnalyzer::analyze(&questions, &graded);

        assert_eq!(summary.strength_areas.len(), 1);
        assert_eq!(summary.strength_areas[0].topic, "algebra");
        assert_eq!(summary.strength_areas[0].score, 100);

        assert_eq!(summary.weak_areas.len(), 1);
        assert_eq!(summary.weak_areas[0].topic, "geometry");
        assert_eq!(summary.weak_areas[0].score, 33);
    }

    #[test]
    fn unanswered_and_untopiced_questions_are_excluded() {
        let with_topic = topic_question("physics");
        let no_topic = topic_question("");
        let skipped = topic_question("physics");

        let graded = vec![
            graded_answer(with_topic.id, true, true),
            graded_answer(no_topic.id, true, true),
            graded_answer(skipped.id, false, false),
        ];
        let questions = vec![with_topic, no_topic, skipped];

        let summary = PerformanceAnalyzer::analyze(&questions, &graded);

        assert_eq!(summary.strength_areas.len(), 1);
        let physics = &summary.strength_areas[0];
        assert_eq!(physics.topic, "physics");
        // Only the answered physics question counts.
        assert_eq!(physics.total, 1);
    }

    #[test]
    fn caps_each_list_at_five_topics() {
        let mut questions = Vec::new();
        let mut graded = Vec::new();
        for i in 0..7 {
            let q = topic_question(&format!("strong-topic-{}", i));
            graded.push(graded_answer(q.id, true, true));
            questions.push(q);
        }
        for i in 0..7 {
            let q = topic_question(&format!("weak-topic-{}", i));
            graded.push(graded_answer(q.id, true, false));
            questions.push(q);
        }

        let summary = PerformanceAnalyzer::analyze(&questions, &graded);
        assert_eq!(summary.strength_areas.len(), 5);
        assert_eq!(summary.weak_areas.len(), 5);
    }

    #[test]
    fn boundary_scores_classify_correctly() {
        // 7/10 = 70 → strength, 5/10 = 50 → neither, 49% → weak.
        let mut questions = Vec::new();
        let mut graded = Vec::new();
        for i in 0..10 {
            let q = topic_question("at-seventy");
            graded.push(graded_answer(q.id, true, i < 7));
            questions.push(q);
        }
        for i in 0..10 {
            let q = topic_question("at-fifty");
            graded.push(graded_answer(q.id, true, i < 5));
            questions.push(q);
        }

        let summary = PerformanceAnalyzer::analyze(&questions, &graded);

        assert!(summary.strength_areas.iter().any(|t| t.topic == "at-seventy"));
        assert!(!summary.weak_areas.iter().any(|t| t.topic == "at-fifty"));
        assert!(!summary.strength_areas.iter().any(|t| t.topic == "at-fifty"));
    }
}
