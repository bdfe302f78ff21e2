use std::sync::Arc;

use thiserror::Error;

use crate::quiz::session::SessionState;
use crate::quiz::stats::{Statistics, StatsStore, StorageError, Summary};
use crate::quiz::{Question, QuestionBank};

const CORRECT_MARK: &str = "✅";
const WRONG_MARK: &str = "❌";
const COMPLETION_TEXT: &str = "You've completed all questions! 🎉";

/// Something the user did, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin,
    StartIndex(String),
    Answer(usize),
}

/// Something the chat should show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Prompt(String),
    Question {
        index: usize,
        text: String,
        options: Vec<String>,
    },
    Feedback(String),
    Completion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: SessionState,
    pub outputs: Vec<Output>,
}

impl Step {
    fn unchanged(state: SessionState) -> Self {
        Self {
            state,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
enum InputError {
    #[error("{0:?} is not a number")]
    NotANumber(String),
    #[error("{value} is outside 1..={max}")]
    OutOfRange { value: usize, max: usize },
}

pub struct QuizEngine<S> {
    bank: Arc<QuestionBank>,
    stats: Arc<Statistics<S>>,
}

impl<S: StatsStore> QuizEngine<S> {
    pub fn new(bank: Arc<QuestionBank>, stats: Arc<Statistics<S>>) -> Self {
        Self { bank, stats }
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    /// Applies `event` to `state`. Events that make no sense in the current
    /// state leave it untouched.
    ///
    /// Only answers touch storage, so only answers can fail.
    pub fn transition(&self, state: SessionState, event: Event) -> Result<Step, StorageError> {
        match (state, event) {
            (_, Event::Begin) => Ok(self.begin_session()),
            (SessionState::AwaitingStart, Event::StartIndex(raw)) => {
                Ok(self.submit_start_index(&raw))
            }
            (
                SessionState::AwaitingAnswer {
                    current_index,
                    displayed_options,
                },
                Event::Answer(option_id),
            ) => self.submit_answer(current_index, &displayed_options, option_id),
            (state, event) => {
                log::debug!("Ignoring {:?} in state {:?}", event, state);
                Ok(Step::unchanged(state))
            }
        }
    }

    pub fn begin_session(&self) -> Step {
        Step {
            state: SessionState::AwaitingStart,
            outputs: vec![Output::Prompt(format!(
                "Welcome! Please enter the question number you want to start from (1-{}):",
                self.bank.len()
            ))],
        }
    }

    pub fn submit_start_index(&self, raw: &str) -> Step {
        match self.parse_start_index(raw) {
            Ok(index) => self.present(index),
            Err(err) => {
                log::debug!("Rejected start index: {}", err);
                Step {
                    state: SessionState::AwaitingStart,
                    outputs: vec![Output::Prompt(format!(
                        "Please enter a valid number between 1 and {}.",
                        self.bank.len()
                    ))],
                }
            }
        }
    }

    /// Grades the answer, records it and moves on to the next question.
    ///
    /// # Panics
    ///
    /// If `option_id` is not one of the displayed options.
    pub fn submit_answer(
        &self,
        current_index: usize,
        displayed_options: &[String],
        option_id: usize,
    ) -> Result<Step, StorageError> {
        let selected = displayed_options.get(option_id).unwrap_or_else(|| {
            panic!(
                "option {} was never offered for question {} ({} options shown)",
                option_id,
                current_index,
                displayed_options.len()
            )
        });
        let question = self.question(current_index);

        let table = self.stats.record_answer(current_index, option_id)?;
        let summary = table.summarize(current_index, displayed_options);

        let mut step = self.present(current_index + 1);
        step.outputs.insert(
            0,
            Output::Feedback(feedback_text(question, selected, displayed_options, &summary)),
        );
        Ok(step)
    }

    fn present(&self, index: usize) -> Step {
        let Some(question) = self.bank.get(index) else {
            return Step {
                state: SessionState::Completed,
                outputs: vec![Output::Completion(COMPLETION_TEXT.to_string())],
            };
        };

        let options = question.options.clone();
        Step {
            state: SessionState::AwaitingAnswer {
                current_index: index,
                displayed_options: options.clone(),
            },
            outputs: vec![Output::Question {
                index,
                text: format!("Q{}: {}", index + 1, question.question),
                options,
            }],
        }
    }

    fn question(&self, index: usize) -> &Question {
        self.bank.get(index).unwrap_or_else(|| {
            panic!(
                "session points at question {} but the bank has {}",
                index,
                self.bank.len()
            )
        })
    }

    fn parse_start_index(&self, raw: &str) -> Result<usize, InputError> {
        let trimmed = raw.trim();
        let value: usize = trimmed
            .parse()
            .map_err(|_| InputError::NotANumber(trimmed.to_string()))?;
        let max = self.bank.len();
        if !(1..=max).contains(&value) {
            return Err(InputError::OutOfRange { value, max });
        }
        Ok(value - 1)
    }
}

fn feedback_text(question: &Question, selected: &str, options: &[String], summary: &Summary) -> String {
    let mut text = if question.is_correct(selected) {
        format!(
            "{} Correct!\n\nExplanation: {}\n",
            CORRECT_MARK, question.explanation
        )
    } else {
        format!(
            "{} Wrong!\n\nCorrect answer: {}\nExplanation: {}\n",
            WRONG_MARK,
            question.correct_answer(),
            question.explanation
        )
    };

    for (option, percentage) in options.iter().zip(&summary.percentages) {
        text.push_str(&format!("\n{} — {:.1}%", option, percentage));
    }
    text.push_str(&format!("\n\nTotal attempts: {}", summary.total_attempts));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::stats::{MemoryStats, StatsTable};

    fn bank() -> Arc<QuestionBank> {
        Arc::new(
            QuestionBank::new(vec![
                Question::new("Capital of France?", &["Berlin", "Paris", "Rome"], "Paris", "It's Paris."),
                Question::new("2 + 2?", &["3", "5", "4"], "4", "Arithmetic."),
                Question::new("Sky colour?", &["Blue", "Green"], "Blue", "Rayleigh scattering."),
            ])
            .unwrap(),
        )
    }

    fn engine() -> QuizEngine<MemoryStats> {
        QuizEngine::new(bank(), Arc::new(Statistics::new(MemoryStats::default())))
    }

    fn feedback(step: &Step) -> &str {
        match &step.outputs[0] {
            Output::Feedback(text) => text,
            other => panic!("expected feedback, got {other:?}"),
        }
    }

    fn awaiting(engine: &QuizEngine<MemoryStats>, index: usize) -> SessionState {
        SessionState::AwaitingAnswer {
            current_index: index,
            displayed_options: engine.bank().get(index).unwrap().options.clone(),
        }
    }

    #[test]
    fn begin_prompts_with_range() {
        let step = engine().transition(SessionState::Idle, Event::Begin).unwrap();

        assert_eq!(step.state, SessionState::AwaitingStart);
        assert_eq!(
            step.outputs,
            vec![Output::Prompt(
                "Welcome! Please enter the question number you want to start from (1-3):"
                    .to_string()
            )]
        );
    }

    #[test]
    fn every_valid_start_index_selects_that_question() {
        let engine = engine();
        for start in 1..=3 {
            let step = engine
                .transition(SessionState::AwaitingStart, Event::StartIndex(start.to_string()))
                .unwrap();
            assert_eq!(step.state.current_index(), Some(start - 1));

            let question = engine.bank().get(start - 1).unwrap();
            assert_eq!(
                step.outputs,
                vec![Output::Question {
                    index: start - 1,
                    text: format!("Q{}: {}", start, question.question),
                    options: question.options.clone(),
                }]
            );
        }
    }

    #[test]
    fn start_index_tolerates_whitespace() {
        let step = engine().submit_start_index(" 2\n");
        assert_eq!(step.state.current_index(), Some(1));
    }

    #[test]
    fn invalid_start_index_reprompts_without_recording() {
        let engine = engine();
        for raw in ["0", "4", "-1", "abc", "", "1.5"] {
            let step = engine
                .transition(SessionState::AwaitingStart, Event::StartIndex(raw.to_string()))
                .unwrap();
            assert_eq!(step.state, SessionState::AwaitingStart);
            assert_eq!(
                step.outputs,
                vec![Output::Prompt(
                    "Please enter a valid number between 1 and 3.".to_string()
                )]
            );
        }
        assert_eq!(engine.stats.snapshot().unwrap(), StatsTable::default());
    }

    #[test]
    fn correct_answer_is_marked_correct() {
        let engine = engine();
        let step = engine.transition(awaiting(&engine, 1), Event::Answer(2)).unwrap();

        let text = feedback(&step);
        assert!(text.starts_with("✅ Correct!"));
        assert!(text.contains("Explanation: Arithmetic."));
        assert!(text.contains("4 — 100.0%"));
        assert!(text.ends_with("Total attempts: 1"));
    }

    #[test]
    fn wrong_answer_reveals_correct_option() {
        let engine = engine();
        let step = engine.transition(awaiting(&engine, 1), Event::Answer(0)).unwrap();

        let text = feedback(&step);
        assert!(text.starts_with("❌ Wrong!"));
        assert!(text.contains("Correct answer: 4\n"));
        assert!(text.contains("3 — 100.0%"));
        assert!(text.contains("4 — 0.0%"));
    }

    #[test]
    fn feedback_includes_earlier_answers_from_other_users() {
        let engine = engine();
        for option in [1, 1, 0] {
            engine.transition(awaiting(&engine, 0), Event::Answer(option)).unwrap();
        }
        let step = engine.transition(awaiting(&engine, 0), Event::Answer(1)).unwrap();

        let text = feedback(&step);
        assert!(text.contains("Berlin — 25.0%\nParis — 75.0%\nRome — 0.0%"));
        assert!(text.ends_with("\n\nTotal attempts: 4"));
        assert_eq!(engine.stats.snapshot().unwrap().count(0, 1), 3);
    }

    #[test]
    fn answer_moves_to_next_question() {
        let engine = engine();
        let step = engine.transition(awaiting(&engine, 0), Event::Answer(1)).unwrap();

        assert_eq!(step.state, awaiting(&engine, 1));
        assert_eq!(step.outputs.len(), 2);
        assert!(matches!(step.outputs[1], Output::Question { index: 1, .. }));
    }

    #[test]
    fn last_answer_completes_session() {
        let engine = engine();
        let step = engine
            .transition(SessionState::AwaitingStart, Event::StartIndex("3".to_string()))
            .unwrap();
        assert_eq!(step.state.current_index(), Some(2));

        let step = engine.transition(step.state, Event::Answer(0)).unwrap();
        assert!(step.state.is_completed());
        assert_eq!(
            step.outputs.last(),
            Some(&Output::Completion(COMPLETION_TEXT.to_string()))
        );
        assert_eq!(engine.stats.snapshot().unwrap().count(2, 0), 1);
    }

    #[test]
    fn answer_uses_options_shown_to_user() {
        let engine = engine();
        let state = SessionState::AwaitingAnswer {
            current_index: 1,
            displayed_options: vec!["4".to_string(), "3".to_string()],
        };
        let step = engine.transition(state, Event::Answer(0)).unwrap();

        assert!(feedback(&step).starts_with("✅ Correct!"));
        assert_eq!(engine.stats.snapshot().unwrap().count(1, 0), 1);
    }

    #[test]
    fn begin_restarts_from_any_state_and_keeps_stats() {
        let engine = engine();
        engine.transition(awaiting(&engine, 0), Event::Answer(1)).unwrap();

        for state in [awaiting(&engine, 2), SessionState::Completed, SessionState::AwaitingStart] {
            let step = engine.transition(state, Event::Begin).unwrap();
            assert_eq!(step.state, SessionState::AwaitingStart);
        }
        assert_eq!(engine.stats.snapshot().unwrap().count(0, 1), 1);
    }

    #[test]
    fn events_out_of_place_are_ignored() {
        let engine = engine();
        let cases = [
            (SessionState::Idle, Event::StartIndex("1".to_string())),
            (SessionState::Completed, Event::Answer(0)),
            (SessionState::AwaitingStart, Event::Answer(0)),
            (awaiting(&engine, 0), Event::StartIndex("2".to_string())),
        ];
        for (state, event) in cases {
            let step = engine.transition(state.clone(), event).unwrap();
            assert_eq!(step, Step::unchanged(state));
        }
        assert_eq!(engine.stats.snapshot().unwrap(), StatsTable::default());
    }

    #[test]
    #[should_panic(expected = "never offered")]
    fn unknown_option_is_a_contract_violation() {
        let engine = engine();
        let _ = engine.transition(awaiting(&engine, 2), Event::Answer(2));
    }

    struct BrokenStore;

    impl StatsStore for BrokenStore {
        fn load(&self) -> Result<StatsTable, StorageError> {
            Ok(StatsTable::default())
        }

        fn persist(&mut self, _table: &StatsTable) -> Result<(), StorageError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    #[test]
    fn storage_failure_escapes_answer() {
        let engine = QuizEngine::new(bank(), Arc::new(Statistics::new(BrokenStore)));
        let state = SessionState::AwaitingAnswer {
            current_index: 0,
            displayed_options: bank().get(0).unwrap().options.clone(),
        };

        assert!(matches!(
            engine.transition(state, Event::Answer(1)),
            Err(StorageError::Io(_))
        ));
    }
}
