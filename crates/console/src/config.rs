use std::path::PathBuf;
use std::time::Duration;

use cobra_core::admission::{AdmissionConfig, MAX_CONCURRENT, QUEUE_TIMEOUT_SECS};
use cobra_core::dispatch::DELIVERY_INTERVAL_SECS;
use cobra_core::poller::JobProgressPoller;
use cobra_core::validation::{BatchValidator, VALIDATION_CHUNK};

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set (or is blank).
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Console configuration loaded from environment variables.
///
/// Secrets have no defaults; everything else falls back to values suitable
/// for local development.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub evolution_api_url: String,
    pub evolution_api_key: String,
    pub automation_generate_url: String,
    pub automation_send_url: String,
    pub automation_secret: String,
    pub result_store_url: String,
    pub admission: AdmissionConfig,
    pub validator: BatchValidator,
    pub poller: JobProgressPoller,
    /// Delay between admission re-checks while waiting in the queue.
    pub admission_retry: Duration,
    /// How often the stale-slot sweeper runs.
    pub sweep_interval: Duration,
    pub delivery_interval_secs: u64,
    pub jobs_file: PathBuf,
}

impl ConsoleConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `EVOLUTION_API_URL`       | `http://localhost:8080` |
    /// | `EVOLUTION_API_KEY`       | required                |
    /// | `AUTOMATION_GENERATE_URL` | required                |
    /// | `AUTOMATION_SEND_URL`     | required                |
    /// | `AUTOMATION_SECRET`       | required                |
    /// | `RESULT_STORE_URL`        | `http://localhost:8090` |
    /// | `MAX_CONCURRENT`          | `3`                     |
    /// | `QUEUE_TIMEOUT_SECS`      | `300`                   |
    /// | `VALIDATION_CHUNK`        | `5`                     |
    /// | `VALIDATION_SPACING_MS`   | `200`                   |
    /// | `REGISTRY_TIMEOUT_SECS`   | `5`                     |
    /// | `POLL_INTERVAL_SECS`      | `5`                     |
    /// | `POLL_MAX_WAIT_SECS`      | unset (poll forever)    |
    /// | `ADMISSION_RETRY_SECS`    | `3`                     |
    /// | `SWEEP_INTERVAL_SECS`     | `30`                    |
    /// | `DELIVERY_INTERVAL_SECS`  | `21`                    |
    /// | `JOBS_FILE`               | `jobs.json`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let admission = AdmissionConfig {
            max_concurrent: vars.positive("MAX_CONCURRENT", MAX_CONCURRENT as u64)? as usize,
            timeout: chrono::Duration::seconds(
                vars.parsed("QUEUE_TIMEOUT_SECS", QUEUE_TIMEOUT_SECS)?,
            ),
        };

        let validator = BatchValidator {
            chunk_size: vars.parsed("VALIDATION_CHUNK", VALIDATION_CHUNK)?,
            query_timeout: Duration::from_secs(vars.parsed("REGISTRY_TIMEOUT_SECS", 5)?),
            query_spacing: Duration::from_millis(vars.parsed("VALIDATION_SPACING_MS", 200)?),
        };

        let poller = JobProgressPoller {
            interval: Duration::from_secs(vars.positive("POLL_INTERVAL_SECS", 5)?),
            max_wait: vars
                .optional::<u64>("POLL_MAX_WAIT_SECS")?
                .map(Duration::from_secs),
        };

        Ok(Self {
            evolution_api_url: vars.or("EVOLUTION_API_URL", "http://localhost:8080"),
            evolution_api_key: vars.required("EVOLUTION_API_KEY")?,
            automation_generate_url: vars.required("AUTOMATION_GENERATE_URL")?,
            automation_send_url: vars.required("AUTOMATION_SEND_URL")?,
            automation_secret: vars.required("AUTOMATION_SECRET")?,
            result_store_url: vars.or("RESULT_STORE_URL", "http://localhost:8090"),
            admission,
            validator,
            poller,
            admission_retry: Duration::from_secs(vars.parsed("ADMISSION_RETRY_SECS", 3)?),
            sweep_interval: Duration::from_secs(vars.positive("SWEEP_INTERVAL_SECS", 30)?),
            delivery_interval_secs: vars.parsed("DELIVERY_INTERVAL_SECS", DELIVERY_INTERVAL_SECS)?,
            jobs_file: PathBuf::from(vars.or("JOBS_FILE", "jobs.json")),
        })
    }
}

/// Typed accessors over a variable lookup. Blank values count as unset.
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn optional<T: std::str::FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { var: key, value }),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    /// Like [`Self::parsed`] but rejects zero (intervals and slot counts).
    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parsed(key, default)? {
            0 => Err(ConfigError::Invalid {
                var: key,
                value: "0".into(),
            }),
            n => Ok(n),
        }
    }
}
