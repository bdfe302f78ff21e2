pub mod engine;
pub mod session;
pub mod stats;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// A single multiple-choice question as it appears in the questions file.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    /// Only the first entry is consulted when grading.
    pub correct_answers: Vec<String>,
    pub explanation: String,
}

impl Question {
    #[cfg(test)]
    pub fn new(question: &str, options: &[&str], correct_answer: &str, explanation: &str) -> Self {
        Self {
            question: question.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_answers: vec![correct_answer.to_string()],
            explanation: explanation.to_string(),
        }
    }

    pub fn correct_answer(&self) -> &str {
        self.correct_answers
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn is_correct(&self, selected: &str) -> bool {
        selected == self.correct_answer()
    }
}

#[derive(Debug, Error)]
pub enum BankError {
    #[error("failed to read questions: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse questions: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("the question bank is empty")]
    Empty,
    #[error("question {number} has no options")]
    NoOptions { number: usize },
    #[error("question {number} has no correct answer")]
    NoCorrectAnswer { number: usize },
    #[error("question {number}: correct answer {answer:?} is not one of the options")]
    UnknownCorrectAnswer { number: usize, answer: String },
}

/// The ordered, immutable list of questions. Statistics are keyed by position
/// in this list, so reordering the file reattributes historical counts.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Result<Self, BankError> {
        if questions.is_empty() {
            return Err(BankError::Empty);
        }
        for (i, question) in questions.iter().enumerate() {
            let number = i + 1;
            if question.options.is_empty() {
                return Err(BankError::NoOptions { number });
            }
            let Some(answer) = question.correct_answers.first() else {
                return Err(BankError::NoCorrectAnswer { number });
            };
            if !question.options.contains(answer) {
                return Err(BankError::UnknownCorrectAnswer {
                    number,
                    answer: answer.clone(),
                });
            }
        }
        Ok(Self { questions })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, BankError> {
        let questions: Vec<Question> = serde_json::from_reader(reader)?;
        Self::new(questions)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, BankError> {
        Self::from_reader(std::io::BufReader::new(File::open(path)?))
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}
