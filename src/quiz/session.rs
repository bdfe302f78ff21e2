/// Per-chat progress through the question bank.
///
/// Lives in the dialogue storage and is replaced wholesale by every engine
/// transition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started yet.
    #[default]
    Idle,
    AwaitingStart,
    AwaitingAnswer {
        current_index: usize,
        /// Options as they were shown, used to interpret the next answer.
        displayed_options: Vec<String>,
    },
    Completed,
}

impl SessionState {
    pub fn current_index(&self) -> Option<usize> {
        match self {
            SessionState::AwaitingAnswer { current_index, .. } => Some(*current_index),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionState::Completed)
    }
}
