use reqwest::Url;
use reqwest::header::HeaderValue;
use serde_json::Value;

const REDACTION: &str = "***REDACTED***";
const SENSITIVE_NAMES: [&str; 8] = [
    "key",
    "api_key",
    "token",
    "access_token",
    "authorization",
    "secret",
    "password",
    "openai-organization",
];
const DEFAULT_MAX_BODY_CHARS: usize = 4_000;

/// Settings for the `--verbose` dump of HTTP traffic to stderr.
///
/// The session trace file always gets the raw exchange; only this dump is
/// redacted and truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpDebugConfig {
    pub enabled: bool,
    pub redact_secrets: bool,
    pub max_body_chars: usize,
}

impl HttpDebugConfig {
    pub fn from_verbose(verbose: bool) -> Self {
        Self {
            enabled: verbose,
            redact_secrets: true,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::from_verbose(false)
    }

    pub fn display_url(&self, url: &Url) -> String {
        if !self.redact_secrets || url.query().is_none() {
            return url.to_string();
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| {
                let value = if is_sensitive(&name) {
                    REDACTION.to_string()
                } else {
                    value.into_owned()
                };
                (name.into_owned(), value)
            })
            .collect();

        let mut shown = url.clone();
        shown.query_pairs_mut().clear().extend_pairs(pairs);
        shown.to_string()
    }

    pub fn display_header(&self, name: &str, value: &HeaderValue) -> String {
        if self.redact_secrets && is_sensitive(name) {
            return REDACTION.to_string();
        }
        value.to_str().unwrap_or("<non-utf8>").to_string()
    }

    /// Body text with secret JSON fields masked, cut to `max_body_chars`.
    /// Report text is not JSON and passes through unmasked.
    pub fn display_body(&self, raw: &str) -> String {
        let body = if self.redact_secrets {
            mask_json_body(raw)
        } else {
            raw.to_string()
        };
        truncate(&body, self.max_body_chars)
    }
}

fn mask_json_body(raw: &str) -> String {
    let Ok(mut json) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    mask_json(&mut json);
    serde_json::to_string(&json).unwrap_or_else(|_| raw.to_string())
}

fn mask_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (name, item) in map {
                if is_sensitive(name) {
                    *item = Value::String(REDACTION.to_string());
                } else {
                    mask_json(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_json),
        _ => {}
    }
}

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_NAMES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn truncate(input: &str, max_chars: usize) -> String {
    let count = input.chars().count();
    if count <= max_chars {
        return input.to_string();
    }

    let kept = input.chars().take(max_chars).collect::<String>();
    format!("{kept}... <truncated {} chars>", count - max_chars)
}
