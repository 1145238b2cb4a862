pub mod chat;
pub mod cli;
pub mod config;
pub mod http;
pub mod llm;
pub mod prompt;
pub mod reports;
pub mod session;
pub mod trace;

use anyhow::{Result, anyhow};
use chat::ConversationLoop;
use cli::{AppState, CliArgs, run_repl, run_single_question};
use config::AppConfig;
use http::client::HttpClient;
use http::debug::HttpDebugConfig;
use llm::openai::OpenAiProvider;
use session::initialize_session;
use std::time::{SystemTime, UNIX_EPOCH};
use trace::SessionTrace;

pub async fn run(args: CliArgs) -> Result<()> {
    let config = AppConfig::load_with_path(args.config.as_deref())?;
    let session_id = generate_session_id();
    let trace = SessionTrace::create(&session_id)?;
    let http = HttpClient::new(
        reqwest::Client::new(),
        HttpDebugConfig::from_verbose(args.verbose),
    )
    .with_trace(trace.clone());

    let llm = OpenAiProvider::new(
        http.clone(),
        config.openai_api_key.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
    )
    .map_err(|err| {
        anyhow!(
            "Assistant unavailable: {err}. Configure it in your shell or .env file (example: OPENAI_API_KEY=your_key)."
        )
    })?;

    let session = initialize_session(&http, &config.reports, Some(&trace)).await?;

    let mut app_state = AppState {
        model: llm.model().to_string(),
        chat: ConversationLoop::new(session, llm).with_trace(trace.clone()),
        trace,
    };

    match args.question.as_deref() {
        Some(question) => run_single_question(&mut app_state, question).await,
        None => run_repl(&mut app_state).await,
    }
}

fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis());
    format!("{millis:x}-{:x}", std::process::id())
}
