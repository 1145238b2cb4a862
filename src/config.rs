use anyhow::{Result, anyhow, bail};
use reqwest::Url;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::reports::{ReportSource, default_sources};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

const CONFIG_DIR_NAME: &str = "alphanode";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub reports: Vec<ReportSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileConfig {
    openai_api_key: Option<String>,
    openai_model: Option<String>,
    openai_base_url: Option<String>,
    reports: Option<Vec<ReportSource>>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(explicit_path: Option<&Path>) -> Result<Self> {
        let (config_path, file_config) = match explicit_path {
            Some(path) => {
                if !path.is_file() {
                    bail!("Failed to load config {}: file not found", path.display());
                }
                (path.to_path_buf(), load_file_config(path)?)
            }
            None => {
                let path = discover_config_path()?;
                let file_config = load_file_config(&path)?;
                (path, file_config)
            }
        };

        dotenvy::dotenv().ok();

        let file_api_key = file_config
            .as_ref()
            .and_then(|cfg| cfg.openai_api_key.as_ref())
            .and_then(|value| non_empty(value).map(ToOwned::to_owned));
        let file_model = file_config
            .as_ref()
            .and_then(|cfg| cfg.openai_model.as_ref())
            .and_then(|value| non_empty(value).map(ToOwned::to_owned));
        let file_base_url = file_config
            .as_ref()
            .and_then(|cfg| cfg.openai_base_url.as_ref())
            .and_then(|value| non_empty(value).map(ToOwned::to_owned));

        let reports = validate_reports(
            file_config.as_ref().and_then(|cfg| cfg.reports.as_deref()),
            &config_path,
        )?;

        Ok(Self {
            config_path,
            openai_api_key: env_non_empty("OPENAI_API_KEY").or(file_api_key),
            openai_model: env_non_empty("OPENAI_MODEL")
                .or(file_model)
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_base_url: env_non_empty("OPENAI_BASE_URL")
                .or(file_base_url)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            reports,
        })
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if trimmed.is_empty() {
            bail!("Failed to resolve config path: XDG_CONFIG_HOME is set but empty");
        }

        return Ok(PathBuf::from(trimmed)
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME));
    }

    let home = dirs::home_dir().ok_or_else(|| {
        anyhow!("Failed to resolve config path: HOME directory is unavailable")
    })?;

    Ok(home
        .join(".config")
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME))
}

fn load_file_config(config_path: &Path) -> Result<Option<RawFileConfig>> {
    if !config_path.is_file() {
        return Ok(None);
    }

    let config_text = fs::read_to_string(config_path).map_err(|err| {
        anyhow!(
            "Failed to load config {}: unable to read file: {err}",
            config_path.display()
        )
    })?;

    toml::from_str(&config_text).map(Some).map_err(|err| {
        anyhow!(
            "Failed to load config {}: {err}",
            config_path.display()
        )
    })
}

fn validate_reports(
    raw_reports: Option<&[ReportSource]>,
    config_path: &Path,
) -> Result<Vec<ReportSource>> {
    let Some(raw_reports) = raw_reports else {
        return Ok(default_sources());
    };

    if raw_reports.is_empty() {
        return Err(config_error(
            config_path,
            "reports",
            "at least one report is required",
        ));
    }

    let mut reports = Vec::with_capacity(raw_reports.len());
    for (index, raw) in raw_reports.iter().enumerate() {
        let label = non_empty(&raw.label).ok_or_else(|| {
            config_error(
                config_path,
                &format!("reports[{index}].label"),
                "label must not be empty",
            )
        })?;
        let url = non_empty(&raw.url).ok_or_else(|| {
            config_error(
                config_path,
                &format!("reports[{index}].url"),
                "url must not be empty",
            )
        })?;
        Url::parse(url).map_err(|err| {
            config_error(
                config_path,
                &format!("reports[{index}].url"),
                &format!("invalid url '{url}': {err}"),
            )
        })?;

        reports.push(ReportSource::new(label, url));
    }

    Ok(reports)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn config_error(config_path: &Path, key_path: &str, reason: &str) -> anyhow::Error {
    anyhow!(
        "Failed to load config {}: {key_path}: {reason}",
        config_path.display()
    )
}
