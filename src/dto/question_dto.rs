use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::question::{AnswerValue, Difficulty, Question, QuestionType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOptionInput {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuestionPayload {
    pub course_id: Uuid,
    pub test_id: Option<Uuid>,
    pub question_type: QuestionType,
    #[validate(length(min = 1))]
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOptionInput>,
    pub correct_answer: AnswerValue,
    #[validate(range(min = 0.0))]
    pub marks: f64,
    pub difficulty: Option<Difficulty>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateQuestionPayload {
    #[validate(length(min = 1))]
    pub prompt: Option<String>,
    pub options: Option<Vec<QuestionOptionInput>>,
    pub correct_answer: Option<AnswerValue>,
    #[validate(range(min = 0.0))]
    pub marks: Option<f64>,
    pub difficulty: Option<Difficulty>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionView {
    /// Storage index of the option; submissions reference this index even
    /// when the display order was shuffled.
    pub index: u32,
    pub text: String,
}

/// Client-facing rendering of a question. Never carries the correct answer
/// or per-option correctness flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: Uuid,
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Vec<OptionView>,
    pub marks: Decimal,
    pub difficulty: Difficulty,
    pub topic: String,
}

impl QuestionView {
    pub fn from_question(question: &Question) -> Self {
        Self {
            id: question.id,
            question_type: question.question_type,
            prompt: question.prompt.clone(),
            options: question
                .options
                .0
                .iter()
                .enumerate()
                .map(|(index, opt)| OptionView {
                    index: index as u32,
                    text: opt.text.clone(),
                })
                .collect(),
            marks: question.marks,
            difficulty: question.difficulty,
            topic: question.topic.clone(),
        }
    }
}
