//! The USDA reports that ground every conversation.

use anyhow::{Result, anyhow, bail};
use serde::Deserialize;

use crate::http::client::HttpClient;
use crate::trace::SessionTrace;

const DEFAULT_SOURCES: [(&str, &str); 3] = [
    (
        "September 2024",
        "https://downloads.usda.library.cornell.edu/usda-esmis/files/3197xm04j/6108x5070/dv141k49x/psla0924.txt",
    ),
    (
        "August 2024",
        "https://downloads.usda.library.cornell.edu/usda-esmis/files/3197xm04j/rn302t31p/5t34vb12v/psla0824.txt",
    ),
    (
        "September 2023",
        "https://downloads.usda.library.cornell.edu/usda-esmis/files/3197xm04j/7p88f226b/gx41p340x/psla0923.txt",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSource {
    pub label: String,
    pub url: String,
}

impl ReportSource {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Latest period first.
pub fn default_sources() -> Vec<ReportSource> {
    DEFAULT_SOURCES
        .iter()
        .map(|(label, url)| ReportSource::new(*label, *url))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub source: ReportSource,
    pub text: String,
}

/// Fetches every source in order. The first failure aborts the whole fetch.
pub async fn fetch_reports(
    http: &HttpClient,
    sources: &[ReportSource],
    trace: Option<&SessionTrace>,
) -> Result<Vec<Report>> {
    let mut reports = Vec::with_capacity(sources.len());
    for source in sources {
        let response = http.get_text(&source.url).await.map_err(|err| {
            anyhow!(
                "Failed to fetch report {} from {}: {err}",
                source.label,
                source.url
            )
        })?;

        if !response.is_success() {
            bail!(
                "Failed to fetch report {} from {}: HTTP status {}",
                source.label,
                source.url,
                response.status
            );
        }

        if let Some(trace) = trace {
            trace.log_report(&source.label, &source.url, response.body.len());
        }
        reports.push(Report {
            source: source.clone(),
            text: response.body,
        });
    }

    Ok(reports)
}
