use std::str::FromStr;
use std::time::Duration;

use lms_core::model::RegressionPolicy;

use crate::error::ConfigError;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_url: String,
    /// `None` runs the cache in local-only mode.
    pub redis_url: Option<String>,
    pub cache_prefix: String,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub fallback_max_entries: usize,
    pub health_interval: Duration,
    pub regression_policy: RegressionPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite://lms.sqlite3".into(),
            redis_url: None,
            cache_prefix: "lms".into(),
            cache_ttl: Duration::from_secs(300),
            cache_timeout: Duration::from_millis(2000),
            fallback_max_entries: 10_000,
            health_interval: Duration::from_secs(5),
            regression_policy: RegressionPolicy::KeepCompleted,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                |
    /// |----------------------------------|------------------------|
    /// | `LMS_DB_URL`                     | `sqlite://lms.sqlite3` |
    /// | `LMS_REDIS_URL`                  | unset (local-only)     |
    /// | `LMS_CACHE_PREFIX`               | `lms`                  |
    /// | `LMS_CACHE_TTL_SECS`             | `300`                  |
    /// | `LMS_CACHE_TIMEOUT_MS`           | `2000`                 |
    /// | `LMS_FALLBACK_MAX_ENTRIES`       | `10000`                |
    /// | `LMS_CACHE_HEALTH_INTERVAL_SECS` | `5`                    |
    /// | `LMS_REOPEN_ON_REGRESSION`       | `false`                |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for values that do not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for values that do not parse, and for a
    /// zero remote timeout or health interval.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let reopen: bool = parse_or(&get, "LMS_REOPEN_ON_REGRESSION", false)?;

        Ok(Self {
            db_url: get("LMS_DB_URL").unwrap_or(defaults.db_url),
            redis_url: get("LMS_REDIS_URL"),
            cache_prefix: get("LMS_CACHE_PREFIX").unwrap_or(defaults.cache_prefix),
            cache_ttl: Duration::from_secs(parse_or(&get, "LMS_CACHE_TTL_SECS", 300)?),
            cache_timeout: Duration::from_millis(parse_nonzero_or(
                &get,
                "LMS_CACHE_TIMEOUT_MS",
                2000,
            )?),
            fallback_max_entries: parse_or(
                &get,
                "LMS_FALLBACK_MAX_ENTRIES",
                defaults.fallback_max_entries,
            )?,
            health_interval: Duration::from_secs(parse_nonzero_or(
                &get,
                "LMS_CACHE_HEALTH_INTERVAL_SECS",
                5,
            )?),
            regression_policy: if reopen {
                RegressionPolicy::Reopen
            } else {
                RegressionPolicy::KeepCompleted
            },
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, raw }),
    }
}

/// Like `parse_or`, but zero is rejected.
fn parse_nonzero_or(
    get: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_or(get, var, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            raw: get(var).unwrap_or_default(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn values_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("LMS_REDIS_URL", "redis://cache:6379"),
            ("LMS_CACHE_TTL_SECS", " 60 "),
            ("LMS_CACHE_TIMEOUT_MS", "250"),
            ("LMS_REOPEN_ON_REGRESSION", "true"),
        ]))
        .unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_timeout, Duration::from_millis(250));
        assert_eq!(config.regression_policy, RegressionPolicy::Reopen);
    }

    #[test]
    fn blank_redis_url_means_local_only() {
        let config = AppConfig::from_lookup(lookup(&[("LMS_REDIS_URL", "  ")])).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn unparsable_value_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("LMS_CACHE_TTL_SECS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "LMS_CACHE_TTL_SECS",
                raw: "soon".into()
            }
        );
    }

    #[test]
    fn zero_health_interval_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("LMS_CACHE_HEALTH_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "LMS_CACHE_HEALTH_INTERVAL_SECS",
                raw: "0".into()
            }
        );
    }

    #[test]
    fn zero_remote_timeout_is_rejected() {
        let err =
            AppConfig::from_lookup(lookup(&[("LMS_CACHE_TIMEOUT_MS", " 0 ")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "LMS_CACHE_TIMEOUT_MS",
                raw: " 0 ".into()
            }
        );
    }
}
