use crate::llm::provider::ChatMessage;
use crate::reports::ReportSource;
use crate::session::Session;

/// Full message list for one model call: hidden report context, the
/// conversation so far, then a fresh analysis instruction for `question`.
pub fn build_messages(session: &Session, question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(
        session.system_messages().len() + session.messages().len() + 1,
    );
    messages.extend_from_slice(session.system_messages());
    messages.extend_from_slice(session.messages());
    messages.push(ChatMessage::user(analysis_instruction(
        question,
        session.sources(),
    )));
    messages
}

pub fn analysis_instruction(question: &str, sources: &[ReportSource]) -> String {
    format!(
        "You are an investment analyst specializing in the agriculture sector. \
Analyze the agriculture data given and answer the question: {question}\n\
In your analysis, emphasize any trends, insights, or original ideas valuable for investors. \
Start from the latest month and compare the data to previous months and the last year. \
Make sure all quoted numbers are accurate and have exact matches in the documents for the respective months above. \
Do not include months or data without exact matches in the provided data. \
If possible, come up with an original idea or insight that could be valuable for investors. \
Produce relevant data in tables format. \
Provide references as hyperlinks to the data sources: \n{}",
        reference_list(sources)
    )
}

fn reference_list(sources: &[ReportSource]) -> String {
    sources
        .iter()
        .map(|source| format!("{}: {}", source.label, source.url))
        .collect::<Vec<_>>()
        .join("\n")
}
