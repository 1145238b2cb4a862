use crate::chat::{ConversationLoop, TurnOutcome};
use crate::cli::commands::{Command, HELP_TEXT, is_command_line, parse_command};
use crate::llm::provider::{ChatMessage, LlmProvider, Role};
use crate::reports::ReportSource;
use crate::trace::SessionTrace;
use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};

pub const PROMPT: &str = "ask> ";

pub struct AppState<P> {
    pub model: String,
    pub chat: ConversationLoop<P>,
    pub trace: SessionTrace,
}

pub async fn run_repl<P: LlmProvider>(state: &mut AppState<P>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", banner(&state.model, state.chat.session().sources()));

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                handle_line(state, line).await;
            }
            // Ctrl-C drops the current line only.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

/// Answers `question` with one non-streamed completion.
///
/// Model failures are printed, never returned: the reply text already carries them.
pub async fn run_single_question<P: LlmProvider>(
    state: &mut AppState<P>,
    question: &str,
) -> Result<()> {
    match state.chat.ask_once(question).await {
        Some(TurnOutcome::Answered(text)) => println!("{text}"),
        Some(TurnOutcome::Failed(message)) => eprintln!("{message}"),
        None => eprintln!("Nothing to ask: the question is empty."),
    }
    Ok(())
}

async fn handle_line<P: LlmProvider>(state: &mut AppState<P>, line: &str) {
    if is_command_line(line) {
        match parse_command(line) {
            Ok(command) => run_command(state, command),
            Err(err) => println!("{}", err.message()),
        }
        return;
    }

    let outcome = state
        .chat
        .submit(line, |chunk| {
            print!("{chunk}");
            let _ = io::stdout().flush();
        })
        .await;

    match outcome {
        Some(TurnOutcome::Answered(_)) => println!(),
        Some(TurnOutcome::Failed(message)) => {
            println!();
            eprintln!("{message}");
        }
        None => {}
    }
}

fn run_command<P: LlmProvider>(state: &AppState<P>, command: Command) {
    match command {
        Command::Help => println!("{HELP_TEXT}"),
        Command::History(limit) => {
            println!("{}", render_history(state.chat.session().messages(), limit))
        }
        Command::Sources => println!("{}", render_sources(state.chat.session().sources())),
        Command::Trace => println!("{}", state.trace.file_path().display()),
    }
}

fn banner(model: &str, sources: &[ReportSource]) -> String {
    let labels = sources
        .iter()
        .map(|source| source.label.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "AlphaNode ({model}): loaded {} USDA reports ({labels}).\nAsk a question about hog markets, /help for commands, exit to leave.",
        sources.len()
    )
}

fn render_history(messages: &[ChatMessage], limit: Option<usize>) -> String {
    if messages.is_empty() {
        return "No messages yet.".to_string();
    }

    let start = limit.map_or(0, |n| messages.len().saturating_sub(n));
    messages[start..]
        .iter()
        .map(|message| {
            let speaker = match message.role {
                Role::User => "you",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            format!("{speaker}: {}", message.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_sources(sources: &[ReportSource]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(idx, source)| format!("{}. {}: {}", idx + 1, source.label, source.url))
        .collect::<Vec<_>>()
        .join("\n")
}
