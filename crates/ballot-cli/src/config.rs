//! Environment configuration for `ballot-worker`.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use ballot_core::app::WorkerConfig;
use ballot_mysql::MySqlSettings;
use ballot_redis::RedisSettings;
use thiserror::Error;

use crate::telemetry::LogFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub redis: RedisSettings,
    pub mysql: MySqlSettings,
    pub worker: WorkerConfig,
    pub host: String,
    pub port: u16,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let redis = RedisSettings {
            host: env.string("REDIS_HOST", "localhost"),
            port: env.parse("REDIS_PORT", 6379, "port")?,
            db: env.parse("REDIS_DB", 0, "database index")?,
            password: env.get("REDIS_PASSWORD"),
            ..RedisSettings::default()
        };

        let mysql = MySqlSettings {
            host: env.string("MYSQL_HOST", "localhost"),
            port: env.parse("MYSQL_PORT", 3306, "port")?,
            user: env.string("MYSQL_USER", "root"),
            password: env.string("MYSQL_PASSWORD", "rootpass"),
            database: env.string("MYSQL_DATABASE", "voting"),
            max_connections: env.parse("MYSQL_MAX_CONNECTIONS", 10, "connection count")?,
            ..MySqlSettings::default()
        };

        let queue_key = env.string("VOTE_QUEUE", "votes");
        if queue_key.trim().is_empty() {
            return Err(ConfigError::Empty { var: "VOTE_QUEUE" });
        }

        let worker = WorkerConfig {
            queue_key,
            poll_interval: Duration::from_secs(env.parse("POLL_INTERVAL_SECS", 1, "seconds")?),
            queue_error_backoff: Duration::from_secs(env.parse(
                "QUEUE_ERROR_BACKOFF_SECS",
                5,
                "seconds",
            )?),
            persist_retry_delay: Duration::from_millis(env.parse(
                "PERSIST_RETRY_DELAY_MS",
                1000,
                "milliseconds",
            )?),
            max_persist_attempts: env.parse_opt("MAX_PERSIST_ATTEMPTS", "attempt count")?,
        };

        let log_format = match env.get("LOG_FORMAT").as_deref() {
            None | Some("plain") | Some("text") => LogFormat::Plain,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    expected: "log format (plain|json)",
                });
            }
        };

        Ok(Self {
            redis,
            mysql,
            worker,
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 8080, "port")?,
            shutdown_grace: Duration::from_secs(env.parse("SHUTDOWN_GRACE_SECS", 10, "seconds")?),
            log_format,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::Invalid {
            var: "HOST",
            value: self.host.clone(),
            expected: "IP address",
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and empty are the same thing.
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        Ok(self.parse_opt(var, expected)?.unwrap_or(default))
    }

    fn parse_opt<T: FromStr>(
        &self,
        var: &'static str,
        expected: &'static str,
    ) -> Result<Option<T>, ConfigError> {
        match self.get(var) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid {
                    var,
                    value: raw,
                    expected,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<WorkerSettings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerSettings::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.redis.host, "localhost");
        assert_eq!(s.redis.port, 6379);
        assert_eq!(s.redis.password, None);
        assert_eq!(s.mysql.user, "root");
        assert_eq!(s.mysql.password, "rootpass");
        assert_eq!(s.mysql.database, "voting");
        assert_eq!(s.mysql.max_connections, 10);
        assert_eq!(s.worker.queue_key, "votes");
        assert_eq!(s.worker.poll_interval, Duration::from_secs(1));
        assert_eq!(s.worker.queue_error_backoff, Duration::from_secs(5));
        assert_eq!(s.worker.persist_retry_delay, Duration::from_millis(1000));
        assert_eq!(s.worker.max_persist_attempts, None);
        assert_eq!(s.shutdown_grace, Duration::from_secs(10));
        assert_eq!(s.log_format, LogFormat::Plain);
        assert_eq!(s.listen_addr().unwrap().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn overrides_are_applied() {
        let s = settings(&[
            ("REDIS_HOST", "redis"),
            ("REDIS_DB", "3"),
            ("REDIS_PASSWORD", "secret"),
            ("VOTE_QUEUE", "ballots"),
            ("MYSQL_PORT", "3307"),
            ("PORT", "9090"),
            ("MAX_PERSIST_ATTEMPTS", "5"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(s.redis.host, "redis");
        assert_eq!(s.redis.db, 3);
        assert_eq!(s.redis.password.as_deref(), Some("secret"));
        assert_eq!(s.worker.queue_key, "ballots");
        assert_eq!(s.mysql.port, 3307);
        assert_eq!(s.port, 9090);
        assert_eq!(s.worker.max_persist_attempts, Some(5));
        assert_eq!(s.log_format, LogFormat::Json);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let s = settings(&[("REDIS_PORT", ""), ("VOTE_QUEUE", "")]).unwrap();
        assert_eq!(s.redis.port, 6379);
        assert_eq!(s.worker.queue_key, "votes");
    }

    #[test]
    fn unparseable_number_is_an_error() {
        let err = settings(&[("REDIS_PORT", "sixty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "REDIS_PORT", .. }));
        assert!(err.to_string().contains("sixty"));
    }

    #[test]
    fn unknown_log_format_is_an_error() {
        assert!(settings(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn bad_host_is_reported_on_bind() {
        let s = settings(&[("HOST", "not a host")]).unwrap();
        assert!(s.listen_addr().is_err());
    }
}
