use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use assessment_engine::dto::question_dto::QuestionView;
use assessment_engine::models::attempt::AttemptAnswer;
use assessment_engine::models::question::{
    AnswerValue, Difficulty, Question, QuestionOption, QuestionType,
};
use assessment_engine::services::performance::PerformanceAnalyzer;
use assessment_engine::services::ranking_service::{
    best_attempt_per_user, percentile_for, rank_against, SubmittedAttemptRow,
};
use assessment_engine::services::scoring::ScoringService;

fn mcq(topic: &str, correct_index: u32, marks: i64) -> Question {
    Question {
        id: Uuid::new_v4(),
        course_id: Uuid::new_v4(),
        test_id: None,
        question_type: QuestionType::Mcq,
        prompt: format!("{} question", topic),
        options: Json(
            (0..4)
                .map(|i| QuestionOption {
                    text: format!("choice {}", i),
                    is_correct: i == correct_index,
                })
                .collect(),
        ),
        correct_answer: Json(AnswerValue::Index(correct_index)),
        marks: Decimal::new(marks, 0),
        difficulty: Difficulty::Medium,
        topic: topic.to_string(),
        times_answered: 0,
        times_correct: 0,
        times_incorrect: 0,
        average_time_seconds: 0.0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn answered(question_id: Uuid, value: AnswerValue) -> AttemptAnswer {
    AttemptAnswer {
        question_id,
        selected_answer: Some(value),
        is_correct: None,
        marks_obtained: None,
        time_taken_seconds: Some(30),
    }
}

#[test]
fn grading_keys_by_question_id_regardless_of_served_order() {
    // Simulates a shuffled display: the client answers in an arbitrary order
    // and references options by their storage index from the view.
    let questions = vec![mcq("algebra", 1, 1), mcq("algebra", 2, 1), mcq("sets", 0, 2)];
    let views: Vec<QuestionView> = questions.iter().map(QuestionView::from_question).collect();

    // Answer every question correctly, reading the storage index back out of
    // the view, but submit in reverse display order.
    let mut answers: Vec<AttemptAnswer> = views
        .iter()
        .rev()
        .map(|view| {
            let source = questions.iter().find(|q| q.id == view.id).unwrap();
            let correct_index = match source.correct_answer.0 {
                AnswerValue::Index(i) => i,
                _ => unreachable!(),
            };
            answered(view.id, AnswerValue::Index(correct_index))
        })
        .collect();
    answers.reverse();

    let forward = ScoringService::score_attempt(
        &questions,
        &answers,
        Decimal::new(25, 0),
        Decimal::new(50, 0),
    );
    answers.reverse();
    let reversed = ScoringService::score_attempt(
        &questions,
        &answers,
        Decimal::new(25, 0),
        Decimal::new(50, 0),
    );

    assert_eq!(forward.percentage, 100);
    assert_eq!(reversed.percentage, 100);
    assert_eq!(forward.obtained_marks, reversed.obtained_marks);
}

#[test]
fn scored_attempt_feeds_analysis_and_ranking() {
    let questions = vec![
        mcq("limits", 0, 1),
        mcq("limits", 1, 1),
        mcq("series", 2, 1),
        mcq("series", 3, 1),
    ];
    let answers = vec![
        answered(questions[0].id, AnswerValue::Index(0)),
        answered(questions[1].id, AnswerValue::Index(1)),
        answered(questions[2].id, AnswerValue::Index(0)),
        answered(questions[3].id, AnswerValue::Index(0)),
    ];

    let score = ScoringService::score_attempt(
        &questions,
        &answers,
        Decimal::new(25, 0),
        Decimal::new(40, 0),
    );
    // 2 correct, 2 wrong at 25%: 2 - 0.5 = 1.5 of 4 → 38%.
    assert_eq!(score.obtained_marks, Decimal::new(15, 1));
    assert_eq!(score.percentage, 38);
    assert!(!score.passed);

    let summary = PerformanceAnalyzer::analyze(&questions, &score.graded);
    assert_eq!(summary.strength_areas[0].topic, "limits");
    assert_eq!(summary.weak_areas[0].topic, "series");

    // Rank against a snapshot of three earlier submissions.
    let snapshot = vec![Decimal::new(3, 0), Decimal::new(1, 0), Decimal::ONE];
    let rank = rank_against(&snapshot, score.obtained_marks);
    assert_eq!(rank, 2);
    assert_eq!(percentile_for(snapshot.len() as i64, rank), 33);
}

#[test]
fn leaderboard_prefers_higher_marks_then_faster_time() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();

    let rows = vec![
        SubmittedAttemptRow {
            user_id: a,
            attempt_number: 1,
            obtained_marks: Decimal::new(90, 0),
            percentage: 90,
            time_taken_seconds: 300,
        },
        SubmittedAttemptRow {
            user_id: b,
            attempt_number: 2,
            obtained_marks: Decimal::new(90, 0),
            percentage: 90,
            time_taken_seconds: 200,
        },
        SubmittedAttemptRow {
            user_id: c,
            attempt_number: 1,
            obtained_marks: Decimal::new(95, 0),
            percentage: 95,
            time_taken_seconds: 500,
        },
        // An older, weaker attempt from c that must not shadow the best one.
        SubmittedAttemptRow {
            user_id: c,
            attempt_number: 2,
            obtained_marks: Decimal::new(40, 0),
            percentage: 40,
            time_taken_seconds: 100,
        },
    ];

    let ordered = best_attempt_per_user(rows);
    let order: Vec<Uuid> = ordered.iter().map(|r| r.user_id).collect();
    assert_eq!(order, vec![c, b, a]);
}

#[test]
fn unanswered_questions_cost_nothing_even_with_full_penalty() {
    let questions = vec![mcq("t", 0, 5), mcq("t", 0, 5)];
    let answers = vec![
        AttemptAnswer {
            question_id: questions[0].id,
            selected_answer: None,
            is_correct: None,
            marks_obtained: None,
            time_taken_seconds: None,
        },
        AttemptAnswer {
            question_id: questions[1].id,
            selected_answer: None,
            is_correct: None,
            marks_obtained: None,
            time_taken_seconds: None,
        },
    ];

    let score = ScoringService::score_attempt(
        &questions,
        &answers,
        Decimal::new(100, 0),
        Decimal::new(50, 0),
    );

    assert_eq!(score.negative_marks, Decimal::ZERO);
    assert_eq!(score.obtained_marks, Decimal::ZERO);
    assert_eq!(score.unanswered_count, 2);
    assert_eq!(score.percentage, 0);
}
