use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Mcq,
    TrueFalse,
    MultipleSelect,
    FillBlank,
    ShortAnswer,
}

impl QuestionType {
    /// Choice-based types carry an option list; the rest are free-text.
    pub fn is_choice_based(&self) -> bool {
        matches!(
            self,
            QuestionType::Mcq | QuestionType::TrueFalse | QuestionType::MultipleSelect
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    pub is_correct: bool,
}

/// Answer payload whose shape depends on the question type: a single option
/// index (mcq/true_false), a set of option indices (multiple_select), or
/// free text (fill_blank/short_answer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Index(u32),
    Indices(Vec<u32>),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub course_id: Uuid,
    pub test_id: Option<Uuid>,
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Json<Vec<QuestionOption>>,
    pub correct_answer: Json<AnswerValue>,
    pub marks: Decimal,
    pub difficulty: Difficulty,
    pub topic: String,
    pub times_answered: i64,
    pub times_correct: i64,
    pub times_incorrect: i64,
    pub average_time_seconds: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shape invariants that cut across fields: options are present (>= 2) iff
/// the type is choice-based, and the correct answer must match the type and
/// reference valid option indices.
pub fn validate_question_shape(
    question_type: QuestionType,
    options: &[QuestionOption],
    correct_answer: &AnswerValue,
    marks: Decimal,
) -> Result<()> {
    if marks < Decimal::ZERO {
        return Err(Error::BadRequest("Question marks cannot be negative".into()));
    }

    if question_type.is_choice_based() {
        if options.len() < 2 {
            return Err(Error::BadRequest(
                "Choice-based questions require at least 2 options".into(),
            ));
        }
        if options.iter().any(|opt| opt.text.trim().is_empty()) {
            return Err(Error::BadRequest("Option text cannot be empty".into()));
        }
    } else if !options.is_empty() {
        return Err(Error::BadRequest(
            "Text questions must not carry an option list".into(),
        ));
    }

    match question_type {
        QuestionType::Mcq | QuestionType::TrueFalse => match correct_answer {
            AnswerValue::Index(idx) if (*idx as usize) < options.len() => Ok(()),
            AnswerValue::Index(_) => Err(Error::BadRequest(
                "Correct answer index is out of range".into(),
            )),
            _ => Err(Error::BadRequest(
                "Correct answer must be a single option index".into(),
            )),
        },
        QuestionType::MultipleSelect => match correct_answer {
            AnswerValue::Indices(indices) => {
                if indices.is_empty() {
                    return Err(Error::BadRequest(
                        "Correct answer must select at least one option".into(),
                    ));
                }
                if indices.iter().any(|i| (*i as usize) >= options.len()) {
                    return Err(Error::BadRequest(
                        "Correct answer index is out of range".into(),
                    ));
                }
                let mut seen = indices.clone();
                seen.sort_unstable();
                seen.dedup();
                if seen.len() != indices.len() {
                    return Err(Error::BadRequest(
                        "Correct answer contains duplicate indices".into(),
                    ));
                }
                Ok(())
            }
            _ => Err(Error::BadRequest(
                "Correct answer must be an array of option indices".into(),
            )),
        },
        QuestionType::FillBlank | QuestionType::ShortAnswer => match correct_answer {
            AnswerValue::Text(text) if !text.trim().is_empty() => Ok(()),
            AnswerValue::Text(_) => {
                Err(Error::BadRequest("Correct answer text cannot be empty".into()))
            }
            _ => Err(Error::BadRequest("Correct answer must be text".into())),
        },
    }
}
