//! Configuration management for the single-instance-mode engine

use crate::{
    jobs::JobSchedule,
    state::MatchSettings,
    Error, Result,
};
use chrono::NaiveTime;
use serde::Deserialize;
use std::{collections::HashSet, time::Duration};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub sim: SimConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Resource types whose writes are intercepted and matched
    #[serde(default = "default_resource_types")]
    pub resource_types: Vec<String>,
    /// One bulk-matching worker on single-node deployments
    #[serde(default = "default_true")]
    pub single_node: bool,
    /// Explicit bulk-matching worker count. Overrides `single_node` sizing.
    #[serde(default)]
    pub match_workers: Option<usize>,
    #[serde(default)]
    pub job: MatchJobConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            resource_types: default_resource_types(),
            single_node: true,
            match_workers: None,
            job: MatchJobConfig::default(),
        }
    }
}

/// Periodic candidate re-detection
#[derive(Debug, Clone, Deserialize)]
pub struct MatchJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// UTC time of day (`HH:MM`) for the daily run
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    /// Run every N minutes instead of daily
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    /// Drop existing (non-ignored) candidate edges before each run
    #[serde(default)]
    pub clear_existing: bool,
}

impl Default for MatchJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_at: default_daily_at(),
            interval_minutes: None,
            clear_existing: false,
        }
    }
}

impl MatchJobConfig {
    pub fn schedule(&self) -> Result<JobSchedule> {
        if let Some(minutes) = self.interval_minutes {
            if minutes == 0 {
                return Err(Error::Configuration(
                    "sim.job.interval_minutes must be greater than 0".to_string(),
                ));
            }
            return Ok(JobSchedule::Interval(Duration::from_secs(minutes * 60)));
        }
        let at = NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M").map_err(|e| {
            Error::Configuration(format!(
                "sim.job.daily_at '{}' is not a valid HH:MM time: {}",
                self.daily_at, e
            ))
        })?;
        Ok(JobSchedule::Daily { at })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON formatting for logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_resource_types() -> Vec<String> {
    vec!["Patient".to_string()]
}

fn default_daily_at() -> String {
    "00:00".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `.env`, an optional `sim` config file and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(config::File::with_name("sim").required(false))
            // Example: SIM__SIM__RESOURCE_TYPES=Patient,Person
            .add_source(Self::environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from TOML text layered over the defaults
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(config::Config::builder()
            .set_default("sim.resource_types", default_resource_types())?
            .set_default("sim.single_node", default_true())?
            .set_default("sim.job.enabled", default_true())?
            .set_default("sim.job.daily_at", default_daily_at())?
            .set_default("sim.job.clear_existing", false)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?)
    }

    pub(crate) fn environment() -> config::Environment {
        config::Environment::with_prefix("SIM")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("sim.resource_types")
            .try_parsing(true)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource_type in &self.sim.resource_types {
            let name = resource_type.trim();
            if name.is_empty() {
                return Err(Error::Configuration(
                    "sim.resource_types contains an empty entry".to_string(),
                ));
            }
            if !seen.insert(name) {
                return Err(Error::Configuration(format!(
                    "sim.resource_types lists '{}' more than once",
                    name
                )));
            }
        }

        if self.sim.match_workers == Some(0) {
            return Err(Error::Configuration(
                "sim.match_workers must be greater than 0".to_string(),
            ));
        }

        self.sim.job.schedule()?;
        Ok(())
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            single_node: self.sim.single_node,
            match_workers: self.sim.match_workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.sim.resource_types, vec!["Patient"]);
        assert!(config.sim.single_node);
        assert!(config.sim.job.enabled);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.sim.job.schedule().unwrap(),
            JobSchedule::daily_at_midnight()
        );
        config.validate().unwrap();
    }

    #[test]
    fn file_values_override_defaults() {
        let config = Config::from_toml(
            r#"
            [sim]
            resource_types = ["Patient", "Person"]
            single_node = false
            match_workers = 3

            [sim.job]
            interval_minutes = 30
            clear_existing = true

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.sim.resource_types, vec!["Patient", "Person"]);
        assert_eq!(config.match_settings().worker_count(), 3);
        assert!(config.sim.job.clear_existing);
        assert_eq!(
            config.sim.job.schedule().unwrap(),
            JobSchedule::Interval(Duration::from_secs(1800))
        );
        assert!(config.logging.json);
    }

    #[test]
    fn environment_lists_are_split() {
        let mut vars = config::Map::new();
        vars.insert(
            "SIM__SIM__RESOURCE_TYPES".to_string(),
            "Patient,Person".to_string(),
        );
        vars.insert("SIM__SIM__MATCH_WORKERS".to_string(), "2".to_string());

        let config: Config = Config::defaults()
            .unwrap()
            .add_source(Config::environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.sim.resource_types, vec!["Patient", "Person"]);
        assert_eq!(config.sim.match_workers, Some(2));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sim.resource_types = vec!["Patient".into(), " Patient ".into()];
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = Config::default();
        config.sim.resource_types = vec!["  ".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sim.match_workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sim.job.interval_minutes = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sim.job.daily_at = "25:99".into();
        assert!(config.validate().is_err());
    }
}
