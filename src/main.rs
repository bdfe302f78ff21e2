mod config;
mod quiz;

use std::sync::Arc;

use config::Config;
use dotenv::dotenv;
use quiz::{
    engine::{Event, Output, QuizEngine, Step},
    session::SessionState,
    stats::{JsonFileStats, Statistics, StatsStore, StorageError},
    QuestionBank,
};
use teloxide::{
    dispatching::{
        dialogue::{InMemStorage, InMemStorageError},
        UpdateHandler,
    },
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, UserId},
    utils::command::BotCommands,
};
use tokio::task::JoinError;

type QuizDialogue = Dialogue<SessionState, InMemStorage<SessionState>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type Engine = QuizEngine<JsonFileStats>;

#[derive(Clone, BotCommands)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "start the quiz (or start over)")]
    Start,
    #[command(description = "show this text")]
    Help,
}

#[tokio::main]
async fn main() {
    let env_file = dotenv();

    pretty_env_logger::init();
    log::info!("Starting quiz bot...");
    if let Err(err) = env_file {
        log::debug!("No .env file loaded: {}", err);
    }

    let config = Config::from_env();

    let bank = match QuestionBank::open(&config.questions_file) {
        Ok(bank) => Arc::new(bank),
        Err(err) => {
            log::error!(
                "Failed to load questions from {}: {}",
                config.questions_file.display(),
                err
            );
            std::process::exit(1);
        }
    };

    log::info!("Statistics are kept in {}", config.stats_file.display());
    let stats = Arc::new(Statistics::new(JsonFileStats::new(&config.stats_file)));
    if let Err(err) = stats.snapshot() {
        log::warn!("Statistics are currently unreadable, answers will fail: {}", err);
    }

    let engine: Arc<Engine> = Arc::new(QuizEngine::new(bank, stats));
    log::info!("Loaded {} questions", engine.bank().len());

    let bot = Bot::from_env();
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", err);
    }

    log::info!("Bot is running...");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![InMemStorage::<SessionState>::new(), engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(dptree::case![Command::Start].endpoint(start))
        .branch(dptree::case![Command::Help].endpoint(help));

    let message_handler = Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|user| user.id))
        .map(user_dialogue)
        .filter_map_async(session_state)
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| is_command(msg.text())).endpoint(unknown_command))
        .branch(dptree::case![SessionState::AwaitingStart].endpoint(receive_start_index))
        .branch(dptree::endpoint(unexpected_message));

    let callback_handler = Update::filter_callback_query()
        .map(|q: CallbackQuery| q.from.id)
        .map(user_dialogue)
        .filter_map_async(session_state)
        .branch(
            dptree::case![SessionState::AwaitingAnswer {
                current_index,
                displayed_options
            }]
            .endpoint(receive_answer),
        )
        .branch(dptree::endpoint(stale_answer));

    dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
}

/// Sessions belong to the user, not the chat: members of a group each run
/// their own quiz.
fn session_key(user: UserId) -> ChatId {
    ChatId(user.0 as i64)
}

fn user_dialogue(user: UserId, storage: Arc<InMemStorage<SessionState>>) -> QuizDialogue {
    QuizDialogue::new(storage, session_key(user))
}

async fn session_state(dialogue: QuizDialogue) -> Option<SessionState> {
    match dialogue.get_or_default().await {
        Ok(state) => Some(state),
        Err(err) => {
            log::error!("Failed to read session {}: {}", dialogue.chat_id().0, err);
            None
        }
    }
}

/// Stores the next state and hands back what to send. Nothing is sent for a
/// step that was not stored.
async fn commit(dialogue: &QuizDialogue, step: Step) -> Result<Vec<Output>, InMemStorageError> {
    dialogue.update(step.state).await?;
    Ok(step.outputs)
}

async fn start(
    bot: Bot,
    dialogue: QuizDialogue,
    engine: Arc<Engine>,
    state: SessionState,
    msg: Message,
) -> HandlerResult {
    let step = engine.transition(state, Event::Begin)?;

    let outputs = commit(&dialogue, step).await?;
    deliver(&bot, msg.chat.id, None, outputs).await?;
    Ok(())
}

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

fn is_command(text: Option<&str>) -> bool {
    text.is_some_and(|text| text.starts_with('/'))
}

async fn unknown_command(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, "Unknown command. Send /help to see what I can do.")
        .await?;
    Ok(())
}

async fn receive_start_index(
    bot: Bot,
    dialogue: QuizDialogue,
    engine: Arc<Engine>,
    msg: Message,
) -> HandlerResult {
    let raw = msg.text().unwrap_or_default().to_string();
    let step = engine.transition(SessionState::AwaitingStart, Event::StartIndex(raw))?;

    let outputs = commit(&dialogue, step).await?;
    deliver(&bot, msg.chat.id, None, outputs).await?;
    Ok(())
}

async fn unexpected_message(bot: Bot, state: SessionState, msg: Message) -> HandlerResult {
    let hint = if state.current_index().is_some() {
        "Please pick one of the options above."
    } else {
        "Send /start to begin the quiz."
    };
    bot.send_message(msg.chat.id, hint).await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Press {
    Accepted(usize),
    /// A button from a question that is no longer open.
    Stale,
    Malformed,
}

/// Only option ids that were offered for the open question reach the engine.
fn accept_answer(data: Option<&str>, current_index: usize, option_count: usize) -> Press {
    match data.and_then(parse_callback_data) {
        Some((question, _)) if question != current_index => Press::Stale,
        Some((_, option)) if option < option_count => Press::Accepted(option),
        _ => Press::Malformed,
    }
}

/// Runs an answer on the blocking pool, since recording it does file I/O
/// under the statistics lock. Engine panics are re-raised.
async fn record_answer_blocking<S>(
    engine: Arc<QuizEngine<S>>,
    state: SessionState,
    option_id: usize,
) -> Result<Result<Step, StorageError>, JoinError>
where
    S: StatsStore + Send + 'static,
{
    match tokio::task::spawn_blocking(move || engine.transition(state, Event::Answer(option_id)))
        .await
    {
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        joined => joined,
    }
}

async fn receive_answer(
    bot: Bot,
    dialogue: QuizDialogue,
    engine: Arc<Engine>,
    (current_index, displayed_options): (usize, Vec<String>),
    q: CallbackQuery,
) -> HandlerResult {
    let Some(message) = q.message.as_ref() else {
        log::warn!("Callback query {} carries no message", q.id);
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let chat_id = message.chat.id;
    let answered_message = message.id;

    let option_id = match accept_answer(q.data.as_deref(), current_index, displayed_options.len()) {
        Press::Accepted(option_id) => option_id,
        Press::Stale => {
            bot.answer_callback_query(q.id)
                .text("This question has already been answered.")
                .await?;
            return Ok(());
        }
        Press::Malformed => {
            log::warn!("Malformed callback data {:?} from user {}", q.data, q.from.id.0);
            bot.answer_callback_query(q.id).await?;
            return Ok(());
        }
    };
    bot.answer_callback_query(q.id).await?;

    let state = SessionState::AwaitingAnswer {
        current_index,
        displayed_options,
    };
    let step = match record_answer_blocking(engine, state, option_id).await? {
        Ok(step) => step,
        Err(err) => {
            log::error!(
                "Failed to record answer {} to question {} from user {}: {}",
                option_id,
                current_index,
                q.from.id.0,
                err
            );
            bot.send_message(
                chat_id,
                "Sorry, your answer could not be saved. Please try again.",
            )
            .await?;
            return Ok(());
        }
    };

    if step.state.is_completed() {
        log::info!("User {} finished the quiz", q.from.id.0);
    }
    let outputs = commit(&dialogue, step).await?;
    deliver(&bot, chat_id, Some(answered_message), outputs).await?;
    Ok(())
}

async fn stale_answer(bot: Bot, q: CallbackQuery) -> HandlerResult {
    bot.answer_callback_query(q.id)
        .text("There is no open question. Send /start to begin.")
        .await?;
    Ok(())
}

/// Sends engine outputs to the chat. Feedback replaces `answered`, the
/// message holding the buttons that were just pressed.
async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    answered: Option<MessageId>,
    outputs: Vec<Output>,
) -> HandlerResult {
    for output in outputs {
        match output {
            Output::Prompt(text) | Output::Completion(text) => {
                bot.send_message(chat_id, text).await?;
            }
            Output::Question {
                index,
                text,
                options,
            } => {
                bot.send_message(chat_id, text)
                    .reply_markup(options_keyboard(index, &options))
                    .await?;
            }
            Output::Feedback(text) => match answered {
                Some(message_id) => {
                    bot.edit_message_text(chat_id, message_id, text).await?;
                }
                None => {
                    bot.send_message(chat_id, text).await?;
                }
            },
        }
    }
    Ok(())
}

fn options_keyboard(question_index: usize, options: &[String]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(options.iter().enumerate().map(|(i, option)| {
        vec![InlineKeyboardButton::callback(
            format!("⚪ {}", option),
            format!("{}:{}", question_index, i),
        )]
    }))
}

fn parse_callback_data(data: &str) -> Option<(usize, usize)> {
    let (question, option) = data.split_once(':')?;
    Some((question.parse().ok()?, option.parse().ok()?))
}
