use anyhow::Result;

use crate::http::client::HttpClient;
use crate::llm::provider::{ChatMessage, Role};
use crate::reports::{Report, ReportSource, fetch_reports};
use crate::trace::SessionTrace;

/// State of one interactive conversation.
///
/// The system messages are fixed at construction. Conversation messages only
/// ever grow, through [`Session::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    sources: Vec<ReportSource>,
    system_messages: Vec<ChatMessage>,
    messages: Vec<ChatMessage>,
}

impl Session {
    pub fn from_reports(reports: &[Report]) -> Self {
        Self {
            sources: reports.iter().map(|r| r.source.clone()).collect(),
            system_messages: vec![ChatMessage::system(system_context(reports))],
            messages: Vec::new(),
        }
    }

    pub fn sources(&self) -> &[ReportSource] {
        &self.sources
    }

    pub fn system_messages(&self) -> &[ChatMessage] {
        &self.system_messages
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
    }
}

/// Fetches every report and builds the session. Call once, before the first turn.
pub async fn initialize_session(
    http: &HttpClient,
    sources: &[ReportSource],
    trace: Option<&SessionTrace>,
) -> Result<Session> {
    let reports = fetch_reports(http, sources, trace).await?;
    Ok(Session::from_reports(&reports))
}

pub fn system_context(reports: &[Report]) -> String {
    reports
        .iter()
        .map(|report| format!("{}: {}\n", report.source.label, report.text))
        .collect()
}
