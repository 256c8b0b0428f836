//! Configuration types.
//!
//! Every struct has sensible defaults; `from_env()` overlays `INBOX_*`
//! environment variables on top of them.

use std::str::FromStr;
use std::time::Duration;

use crate::analyzers::EmailCategory;
use crate::error::ConfigError;

/// Email processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound for a single analyzer call. Expired calls are dropped and
    /// recorded as failures.
    pub analyzer_timeout: Duration,
    /// Categorizer result that triggers the event detector.
    pub event_trigger: EmailCategory,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            analyzer_timeout: Duration::from_secs(30),
            event_trigger: EmailCategory::Event,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&process_env)
    }

    fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            analyzer_timeout: var_millis(vars, "INBOX_ANALYZER_TIMEOUT_MS")?
                .unwrap_or(defaults.analyzer_timeout),
            event_trigger: var_parse(vars, "INBOX_EVENT_TRIGGER_CATEGORY")?
                .unwrap_or(defaults.event_trigger),
        })
    }
}

/// Per-call switches for the email processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Short-circuit emails that already carry an `analyzed_at` timestamp.
    pub skip_analyzed: bool,
    /// Persist the analysis and its side effects.
    pub save_to_database: bool,
    /// Create action records for actionable emails (needs `save_to_database`).
    pub create_actions: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            skip_analyzed: true,
            save_to_database: true,
            create_actions: true,
        }
    }
}

/// Batch processor options.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Emails processed concurrently per chunk.
    pub batch_size: usize,
    /// Pause between chunks, to stay under the analyzer service rate limit.
    pub delay_between_batches: Duration,
    /// Hard cap on emails taken from the input.
    pub max_emails: usize,
    /// Upper bound for one email's whole pipeline run.
    pub item_timeout: Option<Duration>,
    /// Upper bound for the whole batch, measured from its start.
    pub deadline: Option<Duration>,
    pub process: ProcessOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            delay_between_batches: Duration::from_millis(100),
            max_emails: 500,
            item_timeout: Some(Duration::from_secs(120)),
            deadline: None,
            process: ProcessOptions::default(),
        }
    }
}

impl BatchOptions {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&process_env)
    }

    fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let batch_size: usize =
            var_parse(vars, "INBOX_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_BATCH_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            batch_size,
            delay_between_batches: var_millis(vars, "INBOX_BATCH_DELAY_MS")?
                .unwrap_or(defaults.delay_between_batches),
            max_emails: var_parse(vars, "INBOX_MAX_EMAILS")?.unwrap_or(defaults.max_emails),
            item_timeout: var_millis(vars, "INBOX_ITEM_TIMEOUT_MS")?.or(defaults.item_timeout),
            deadline: var_millis(vars, "INBOX_BATCH_DEADLINE_MS")?.or(defaults.deadline),
            process: ProcessOptions {
                skip_analyzed: var_parse(vars, "INBOX_SKIP_ANALYZED")?
                    .unwrap_or(defaults.process.skip_analyzed),
                save_to_database: var_parse(vars, "INBOX_SAVE_TO_DATABASE")?
                    .unwrap_or(defaults.process.save_to_database),
                create_actions: var_parse(vars, "INBOX_CREATE_ACTIONS")?
                    .unwrap_or(defaults.process.create_actions),
            },
        })
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Read and parse an optional variable.
fn var_parse<T>(
    vars: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    vars(key).map(|raw| parse_value(key, &raw)).transpose()
}

fn var_millis(
    vars: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(var_parse::<u64>(vars, key)?.map(Duration::from_millis))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn batch_defaults() {
        let options = BatchOptions::default();
        assert_eq!(options.batch_size, 10);
        assert_eq!(options.delay_between_batches, Duration::from_millis(100));
        assert!(options.process.skip_analyzed);
        assert!(options.deadline.is_none());
    }

    #[test]
    fn processor_defaults_trigger_on_events() {
        let config = ProcessorConfig::default();
        assert_eq!(config.event_trigger, EmailCategory::Event);
        assert_eq!(config.analyzer_timeout, Duration::from_secs(30));
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<usize>("INBOX_BATCH_SIZE", "ten").unwrap_err();
        assert!(err.to_string().contains("INBOX_BATCH_SIZE"));
        assert!(err.to_string().contains("ten"));
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn processor_from_vars_overlays_defaults() {
        let config = ProcessorConfig::from_vars(&vars(&[
            ("INBOX_ANALYZER_TIMEOUT_MS", "2500"),
            ("INBOX_EVENT_TRIGGER_CATEGORY", "client_work"),
        ]))
        .unwrap();
        assert_eq!(config.analyzer_timeout, Duration::from_millis(2500));
        assert_eq!(config.event_trigger, EmailCategory::ClientWork);

        let config = ProcessorConfig::from_vars(&vars(&[])).unwrap();
        assert_eq!(config.analyzer_timeout, Duration::from_secs(30));
    }

    #[test]
    fn processor_from_vars_rejects_unknown_category() {
        let unknown = vars(&[("INBOX_EVENT_TRIGGER_CATEGORY", "gossip")]);
        let err = ProcessorConfig::from_vars(&unknown).unwrap_err();
        assert!(err.to_string().contains("INBOX_EVENT_TRIGGER_CATEGORY"));
    }

    #[test]
    fn batch_from_vars_reads_every_field() {
        let options = BatchOptions::from_vars(&vars(&[
            ("INBOX_BATCH_SIZE", "4"),
            ("INBOX_BATCH_DELAY_MS", "0"),
            ("INBOX_MAX_EMAILS", "50"),
            ("INBOX_ITEM_TIMEOUT_MS", "9000"),
            ("INBOX_BATCH_DEADLINE_MS", "60000"),
            ("INBOX_SKIP_ANALYZED", "false"),
            ("INBOX_SAVE_TO_DATABASE", "true"),
            ("INBOX_CREATE_ACTIONS", "false"),
        ]))
        .unwrap();
        assert_eq!(options.batch_size, 4);
        assert_eq!(options.delay_between_batches, Duration::ZERO);
        assert_eq!(options.max_emails, 50);
        assert_eq!(options.item_timeout, Some(Duration::from_secs(9)));
        assert_eq!(options.deadline, Some(Duration::from_secs(60)));
        assert!(!options.process.skip_analyzed);
        assert!(options.process.save_to_database);
        assert!(!options.process.create_actions);
    }

    #[test]
    fn batch_from_vars_rejects_zero_batch_size() {
        let err = BatchOptions::from_vars(&vars(&[("INBOX_BATCH_SIZE", "0")])).unwrap_err();
        assert!(err.to_string().contains("INBOX_BATCH_SIZE"));
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn batch_from_vars_rejects_garbage() {
        let err = BatchOptions::from_vars(&vars(&[("INBOX_MAX_EMAILS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("INBOX_MAX_EMAILS"));
    }

    #[test]
    fn parse_value_accepts_categories_and_bools() {
        let category: EmailCategory = parse_value("K", "newsletter").unwrap();
        assert_eq!(category, EmailCategory::Newsletter);
        let flag: bool = parse_value("K", " false ").unwrap();
        assert!(!flag);
    }
}
