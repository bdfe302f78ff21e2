use std::path::PathBuf;

const QUESTIONS_FILE_VAR: &str = "QUIZ_QUESTIONS_FILE";
const STATS_FILE_VAR: &str = "QUIZ_STATS_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub questions_file: PathBuf,
    pub stats_file: PathBuf,
}

impl Config {
    /// Reads the process environment. The bot token is picked up by teloxide
    /// itself from `TELOXIDE_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| -> PathBuf {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
                .into()
        };

        Self {
            questions_file: path(QUESTIONS_FILE_VAR, "questions.json"),
            stats_file: path(STATS_FILE_VAR, "stats.json"),
        }
    }
}
