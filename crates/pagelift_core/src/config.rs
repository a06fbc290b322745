use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::ResolvedPaths;

pub const DEFAULT_USER_AGENT: &str = "pagelift/0.1";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_MAX_TITLE_LEN: usize = 255;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub import: ImportSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ImportSection {
    /// Fixed offset applied to parsed source dates: "UTC" or "+HH:MM"/"-HH:MM".
    pub timezone: Option<String>,
    pub max_title_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl MigrationConfig {
    /// Resolve the source-date offset: env PAGELIFT_TIMEZONE > config > UTC.
    pub fn timezone_offset(&self) -> Result<FixedOffset> {
        if let Ok(value) = env::var("PAGELIFT_TIMEZONE") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return parse_offset(trimmed);
            }
        }
        parse_offset(
            self.import
                .timezone
                .as_deref()
                .unwrap_or(DEFAULT_TIMEZONE),
        )
    }

    pub fn max_title_len(&self) -> usize {
        self.import.max_title_len.unwrap_or(DEFAULT_MAX_TITLE_LEN)
    }

    /// Resolve user agent: env PAGELIFT_USER_AGENT > config > default.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("PAGELIFT_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.http
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve HTTP timeout: env PAGELIFT_HTTP_TIMEOUT_MS > config > default.
    pub fn http_timeout_ms(&self) -> u64 {
        if let Ok(value) = env::var("PAGELIFT_HTTP_TIMEOUT_MS")
            && let Ok(parsed) = value.trim().parse::<u64>()
        {
            return parsed;
        }
        self.http.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)
    }
}

/// Load and parse a MigrationConfig from a TOML file. Returns default if the
/// file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config(paths: &ResolvedPaths) -> String {
    format!(
        "# pagelift runtime configuration (materialized by `pagelift init`)\n\
         # db_path: {}\n\n\
         [import]\n\
         timezone = \"{DEFAULT_TIMEZONE}\"\n\
         max_title_len = {DEFAULT_MAX_TITLE_LEN}\n\n\
         [http]\n\
         user_agent = \"{DEFAULT_USER_AGENT}\"\n\
         timeout_ms = {DEFAULT_HTTP_TIMEOUT_MS}\n",
        crate::runtime::normalize_for_display(&paths.db_path),
    )
}

/// Parse a fixed-offset spec: "UTC"/"Z" or "+HH:MM"/"-HH:MM".
fn parse_offset(value: &str) -> Result<FixedOffset> {
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match value.split_at_checked(1) {
        Some(("+", rest)) => (1i32, rest),
        Some(("-", rest)) => (-1i32, rest),
        _ => bail!("unsupported timezone spec: {value} (expected UTC or +HH:MM)"),
    };
    let mut parts = rest.splitn(2, ':');
    let hours = parts
        .next()
        .and_then(|part| part.parse::<i32>().ok())
        .filter(|hours| (0..=14).contains(hours));
    let minutes = parts
        .next()
        .and_then(|part| part.parse::<i32>().ok())
        .filter(|minutes| (0..=59).contains(minutes));
    let (Some(hours), Some(minutes)) = (hours, minutes) else {
        bail!("unsupported timezone spec: {value} (expected UTC or +HH:MM)");
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("offset out of range: {value}"))
}
