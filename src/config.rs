//! Process configuration (loaded once at startup from a JSON file path given as the first CLI
//! argument) and per-request extraction overrides (parsed from the query string).

use serde::Deserialize;

use crate::error::{AdapterError, AdapterResult};
use crate::orchestrator::{
    self, FetchOptions, HOMEWORK_FORCED_CEILING, WEEK_FORCED_CEILING,
};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_request_timeout_sec() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_factor_sec() -> f64 {
    1.0
}
fn default_teacher_cache_ttl_sec() -> u64 {
    3600
}
fn default_week_fetch_initial() -> f64 {
    orchestrator::week_limiter_defaults().initial
}
fn default_homework_fetch_initial() -> f64 {
    orchestrator::homework_limiter_defaults().initial
}
fn default_week_forced_ceiling() -> f64 {
    WEEK_FORCED_CEILING
}
fn default_homework_forced_ceiling() -> f64 {
    HOMEWORK_FORCED_CEILING
}

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub upstream_base_url: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_factor_sec")]
    pub backoff_factor_sec: f64,

    #[serde(default = "default_teacher_cache_ttl_sec")]
    pub teacher_cache_ttl_sec: u64,

    #[serde(default = "default_week_fetch_initial")]
    pub week_fetch_initial: f64,

    #[serde(default = "default_homework_fetch_initial")]
    pub homework_fetch_initial: f64,

    /// `week_fetch`'s ceiling when a request sets `force_max_concurrency=true`.
    #[serde(default = "default_week_forced_ceiling")]
    pub week_forced_ceiling: f64,

    /// `homework_fetch`'s ceiling when a request sets `force_max_concurrency=true`.
    #[serde(default = "default_homework_forced_ceiling")]
    pub homework_forced_ceiling: f64,
}

impl Config {
    pub fn load(path: &str) -> AdapterResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::InternalError(format!("failed to read config file {path}: {e}"))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| AdapterError::InternalError(format!("failed to parse config file {path}: {e}")))
    }
}

/// Per-request overrides accepted as query-string parameters on the timetable endpoints (the
/// "config-object kwargs" shape rather than a long positional parameter list).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionOptions {
    /// Opaque identifier forwarded unchanged into upstream POST bodies (spec §6.1). Required on
    /// every timetable route; validated by `require_student_id` rather than left to a bare
    /// deserialization failure, so the 400 carries the adapter's own error taxonomy.
    pub student_id: Option<String>,
    /// `?force_max_concurrency=true` pins both fan-out stages to the configured ceiling for
    /// this request instead of adapting via the AIMD limiter.
    pub force_max_concurrency: Option<bool>,
    pub week_fetch_initial: Option<f64>,
    pub homework_fetch_initial: Option<f64>,
}

impl ExtractionOptions {
    /// Validates `student_id` is present and non-empty, returning the adapter's own `InputError`
    /// category rather than a generic query-deserialization failure.
    pub fn require_student_id(&self) -> AdapterResult<&str> {
        match self.student_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(AdapterError::InputError(
                "missing required query parameter: student_id".to_string(),
            )),
        }
    }
}

impl ExtractionOptions {
    pub fn into_fetch_options(self, config: &Config) -> FetchOptions {
        FetchOptions {
            week_fetch_initial: self.week_fetch_initial.unwrap_or(config.week_fetch_initial),
            homework_fetch_initial: self
                .homework_fetch_initial
                .unwrap_or(config.homework_fetch_initial),
            week_forced_ceiling: config.week_forced_ceiling,
            homework_forced_ceiling: config.homework_forced_ceiling,
            force_max_concurrency: self.force_max_concurrency.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            upstream_base_url: "https://example.test".to_string(),
            bind_addr: default_bind_addr(),
            request_timeout_sec: default_request_timeout_sec(),
            max_retries: default_max_retries(),
            backoff_factor_sec: default_backoff_factor_sec(),
            teacher_cache_ttl_sec: default_teacher_cache_ttl_sec(),
            week_fetch_initial: 5.0,
            homework_fetch_initial: 20.0,
            week_forced_ceiling: 10.0,
            homework_forced_ceiling: 30.0,
        }
    }

    #[test]
    fn extraction_options_fall_back_to_config_defaults() {
        let config = base_config();
        let opts = ExtractionOptions::default();
        let fetch_opts = opts.into_fetch_options(&config);
        assert_eq!(fetch_opts.week_fetch_initial, 5.0);
        assert!(!fetch_opts.force_max_concurrency);
    }

    #[test]
    fn extraction_options_override_config_defaults() {
        let config = base_config();
        let opts = ExtractionOptions {
            student_id: Some("12345".to_string()),
            force_max_concurrency: Some(true),
            week_fetch_initial: Some(9.0),
            homework_fetch_initial: None,
        };
        let fetch_opts = opts.into_fetch_options(&config);
        assert_eq!(fetch_opts.week_fetch_initial, 9.0);
        assert_eq!(fetch_opts.homework_fetch_initial, 20.0);
        assert!(fetch_opts.force_max_concurrency);
    }

    #[test]
    fn missing_student_id_is_rejected() {
        assert!(ExtractionOptions::default().require_student_id().is_err());
        let empty = ExtractionOptions {
            student_id: Some(String::new()),
            ..ExtractionOptions::default()
        };
        assert!(empty.require_student_id().is_err());
    }

    #[test]
    fn present_student_id_is_accepted() {
        let opts = ExtractionOptions {
            student_id: Some("stu-1".to_string()),
            ..ExtractionOptions::default()
        };
        assert_eq!(opts.require_student_id().unwrap(), "stu-1");
    }
}
