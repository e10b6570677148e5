use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::models::Strategy;
use crate::pipeline::{PipelineSettings, MAX_GAMES_PER_UNIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub database_url: Option<String>,
    pub store: StoreBackend,
    pub notify_pg: bool,
    pub log_format: LogFormat,
    pub generation_base_url: String,
    pub generation_api_key: Option<String>,
    pub generation_model: String,
    pub generation_vision_model: String,
    pub generation_timeout: Duration,
    pub blocked_terms: Vec<String>,
    pub pipeline: PipelineSettings,
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key}: invalid value {v:?}: {e}")),
        None => Ok(default),
    }
}

fn flag(key: &str) -> bool {
    matches!(
        var(key).as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Reject pipeline values that would make every request (or every auto-generation round) fail.
fn check_pipeline(p: &PipelineSettings) -> Result<()> {
    if !(1..=MAX_GAMES_PER_UNIT).contains(&p.games_per_unit) {
        return Err(anyhow!(
            "GAMES_PER_UNIT: must be between 1 and {MAX_GAMES_PER_UNIT}, got {}",
            p.games_per_unit
        ));
    }
    if p.additional_units == 0 {
        return Err(anyhow!("ADDITIONAL_UNITS: must be at least 1"));
    }
    if p.batch_size == 0 {
        return Err(anyhow!("UNIT_BATCH_SIZE: must be at least 1"));
    }
    if p.max_units == 0 {
        return Err(anyhow!("MAX_UNITS: must be at least 1"));
    }
    Ok(())
}

impl Settings {
    /// Read settings from the environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        let store = match var("STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => return Err(anyhow!("STORE: expected postgres or memory, got {other:?}")),
        };
        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL is required when STORE=postgres"));
        }
        let notify_pg = flag("NOTIFY_PG");
        if notify_pg && store != StoreBackend::Postgres {
            return Err(anyhow!("NOTIFY_PG requires STORE=postgres"));
        }

        let log_format = match var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let strategy = match var("GENERATION_STRATEGY") {
            Some(v) => Strategy::parse(&v).with_context(|| format!("GENERATION_STRATEGY: unknown strategy {v:?}"))?,
            None => Strategy::Parallel,
        };
        let generation_model = var("GENERATION_MODEL").unwrap_or_else(|| "gpt-4o-mini".into());
        let pipeline = PipelineSettings {
            resource_char_budget: parsed("RESOURCE_CHAR_BUDGET", 30_000)?,
            games_per_unit: parsed("GAMES_PER_UNIT", 4)?,
            batch_size: parsed("UNIT_BATCH_SIZE", 3)?,
            strategy,
            additional_units: parsed("ADDITIONAL_UNITS", 3)?,
            max_units: parsed("MAX_UNITS", 20)?,
        };
        check_pipeline(&pipeline)?;

        Ok(Self {
            port: parsed("PORT", 8081)?,
            database_url,
            store,
            notify_pg,
            log_format,
            generation_base_url: var("GENERATION_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
            generation_api_key: var("GENERATION_API_KEY"),
            generation_vision_model: var("GENERATION_VISION_MODEL").unwrap_or_else(|| generation_model.clone()),
            generation_model,
            generation_timeout: Duration::from_secs(parsed("GENERATION_TIMEOUT_SECS", 120)?),
            blocked_terms: var("BLOCKED_TERMS")
                .map(|v| v.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
                .unwrap_or_default(),
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_the_pipeline_check() {
        assert!(check_pipeline(&PipelineSettings::default()).is_ok());
    }

    #[test]
    fn unusable_pipeline_values_are_rejected() {
        let no_units = PipelineSettings {
            additional_units: 0,
            ..Default::default()
        };
        let err = check_pipeline(&no_units).unwrap_err();
        assert!(err.to_string().starts_with("ADDITIONAL_UNITS"));

        for games_per_unit in [0, MAX_GAMES_PER_UNIT + 1] {
            let settings = PipelineSettings {
                games_per_unit,
                ..Default::default()
            };
            let err = check_pipeline(&settings).unwrap_err();
            assert!(err.to_string().starts_with("GAMES_PER_UNIT"));
        }

        let settings = PipelineSettings {
            games_per_unit: MAX_GAMES_PER_UNIT,
            ..Default::default()
        };
        assert!(check_pipeline(&settings).is_ok());
    }
}
