use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::models::attempt::AttemptAnswer;
use crate::models::question::{AnswerValue, Question, QuestionType};

/// Aggregate result of grading one attempt's answers.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub total_marks: Decimal,
    pub obtained_marks: Decimal,
    pub negative_marks: Decimal,
    pub percentage: i32,
    pub correct_count: i32,
    pub incorrect_count: i32,
    pub unanswered_count: i32,
    pub passed: bool,
    pub graded: Vec<AttemptAnswer>,
}

pub struct ScoringService;

impl ScoringService {
    /// Grades an attempt's answers against the question bank. Pure and
    /// deterministic: answers are matched to questions strictly by id, so the
    /// order questions were displayed in is irrelevant. Answers whose
    /// question no longer exists are skipped entirely.
    pub fn score_attempt(
        questions: &[Question],
        answers: &[AttemptAnswer],
        negative_percentage: Decimal,
        passing_marks: Decimal,
    ) -> ScoreBreakdown {
        let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();

        let mut total_marks = Decimal::ZERO;
        let mut obtained_marks = Decimal::ZERO;
        let mut negative_marks = Decimal::ZERO;
        let mut correct_count = 0;
        let mut incorrect_count = 0;
        let mut unanswered_count = 0;
        let mut graded = Vec::with_capacity(answers.len());

        for answer in answers {
            let Some(question) = by_id.get(&answer.question_id) else {
                graded.push(answer.clone());
                continue;
            };

            total_marks += question.marks;
            let mut entry = answer.clone();

            match &answer.selected_answer {
                None => {
                    unanswered_count += 1;
                    entry.is_correct = None;
                    entry.marks_obtained = None;
                }
                Some(selected) => {
                    if answer_matches(question, selected) {
                        correct_count += 1;
                        obtained_marks += question.marks;
                        entry.is_correct = Some(true);
                        entry.marks_obtained = Some(question.marks);
                    } else {
                        incorrect_count += 1;
                        let penalty = question.marks * negative_percentage / Decimal::ONE_HUNDRED;
                        obtained_marks -= penalty;
                        negative_marks += penalty;
                        entry.is_correct = Some(false);
                        entry.marks_obtained = Some(-penalty);
                    }
                }
            }

            graded.push(entry);
        }

        let obtained_marks = obtained_marks
            .max(Decimal::ZERO)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let negative_marks =
            negative_marks.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        let percentage = if total_marks.is_zero() {
            0
        } else {
            (obtained_marks / total_marks * Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i32()
                .unwrap_or(0)
        };

        ScoreBreakdown {
            total_marks,
            obtained_marks,
            negative_marks,
            percentage,
            correct_count,
            incorrect_count,
            unanswered_count,
            passed: Decimal::from(percentage) >= passing_marks,
            graded,
        }
    }
}

/// Per-type correctness check. A selection whose shape does not match the
/// question type is an incorrect (non-null) answer, not unanswered.
fn answer_matches(question: &Question, selected: &AnswerValue) -> bool {
    match question.question_type {
        QuestionType::Mcq | QuestionType::TrueFalse => matches!(
            (selected, &question.correct_answer.0),
            (AnswerValue::Index(s), AnswerValue::Index(c)) if s == c
        ),
        QuestionType::MultipleSelect => match (selected, &question.correct_answer.0) {
            (AnswerValue::Indices(s), AnswerValue::Indices(c)) => {
                let mut selected_sorted = s.clone();
                let mut correct_sorted = c.clone();
                selected_sorted.sort_unstable();
                correct_sorted.sort_unstable();
                selected_sorted == correct_sorted
            }
            _ => false,
        },
        QuestionType::FillBlank | QuestionType::ShortAnswer => {
            match (selected, &question.correct_answer.0) {
                (AnswerValue::Text(s), AnswerValue::Text(c)) => normalized(s) == normalized(c),
                _ => false,
            }
        }
    }
}

fn normalized(text: &str) -> String {
    text.trim().to_lowercase()
}
