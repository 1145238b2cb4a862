use futures::StreamExt;

use crate::llm::provider::{LlmError, LlmProvider, Role};
use crate::prompt::build_messages;
use crate::session::Session;
use crate::trace::SessionTrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Responding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered(String),
    Failed(String),
}

impl TurnOutcome {
    /// The text stored as the assistant turn.
    pub fn reply(&self) -> &str {
        match self {
            Self::Answered(text) | Self::Failed(text) => text,
        }
    }
}

pub fn streaming_error_message(err: &LlmError) -> String {
    format!("An error occurred while generating the response: {err}")
}

pub fn completion_error_message(err: &LlmError) -> String {
    format!("An error occurred: {err}")
}

pub struct ConversationLoop<P> {
    session: Session,
    provider: P,
    trace: Option<SessionTrace>,
    state: TurnState,
}

impl<P: LlmProvider> ConversationLoop<P> {
    pub fn new(session: Session, provider: P) -> Self {
        Self {
            session,
            provider,
            trace: None,
            state: TurnState::Idle,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Runs one streamed turn. `on_chunk` sees every fragment as it arrives.
    ///
    /// Returns `None` for blank input, which leaves the conversation untouched.
    /// Otherwise exactly one user and one assistant message are appended, the
    /// latter holding the error text when the model call fails.
    pub async fn submit<F: FnMut(&str)>(
        &mut self,
        input: &str,
        mut on_chunk: F,
    ) -> Option<TurnOutcome> {
        let question = self.begin_turn(input)?;
        let messages = build_messages(&self.session, &question);

        let result = match self.provider.complete_streaming(&messages).await {
            Ok(mut stream) => {
                let mut reply = String::new();
                let mut failure = None;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(text) => {
                            on_chunk(&text);
                            reply.push_str(&text);
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(reply),
                }
            }
            Err(err) => Err(err),
        };

        Some(self.finish_turn(result.map_err(|err| streaming_error_message(&err))))
    }

    /// Runs one turn with a single-shot completion instead of a stream.
    pub async fn ask_once(&mut self, input: &str) -> Option<TurnOutcome> {
        let question = self.begin_turn(input)?;
        let messages = build_messages(&self.session, &question);

        let result = self.provider.complete(&messages).await;
        Some(self.finish_turn(result.map_err(|err| completion_error_message(&err))))
    }

    fn begin_turn(&mut self, input: &str) -> Option<String> {
        let question = input.trim();
        if question.is_empty() {
            return None;
        }

        self.state = TurnState::Responding;
        if let Some(trace) = &self.trace {
            trace.log_user_input(question);
        }
        // The question goes into history before the prompt is built, so the
        // model sees it both as a turn and inside the analysis instruction.
        self.session.append(Role::User, question);
        Some(question.to_string())
    }

    fn finish_turn(&mut self, result: Result<String, String>) -> TurnOutcome {
        let outcome = match result {
            Ok(text) => {
                if let Some(trace) = &self.trace {
                    trace.log_assistant_output(&text);
                }
                TurnOutcome::Answered(text)
            }
            Err(message) => {
                if let Some(trace) = &self.trace {
                    trace.log_assistant_error(&message);
                }
                TurnOutcome::Failed(message)
            }
        };

        self.session.append(Role::Assistant, outcome.reply());
        self.state = TurnState::Idle;
        outcome
    }
}
