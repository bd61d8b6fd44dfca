//! Run configuration from environment variables.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `CCSBATCH_SPEC` | spec file (or first positional argument) | required |
//! | `CCSBATCH_INPUT` | dataset directory or single dataset file | spec file's directory |
//! | `CCSBATCH_OUTPUT` | root for per-dataset output directories | each input's directory |
//! | `CCSBATCH_DATABASE_URL` | result store | `sqlite://ccsbatch.db` |
//! | `CCSBATCH_ENGINE` | analysis engine executable | `ccs-engine` |
//! | `CCSBATCH_MAX_JOBS` | concurrency bound | available parallelism |
//! | `CCSBATCH_REANALYZE` | re-run jobs with existing results | `false` |
//! | `CCSBATCH_FORCE` | skip bad spec lines instead of failing | `false` |
//! | `CCSBATCH_TIMEOUT_SECS` | per-job timeout | none |
//! | `CCSBATCH_EXTENSION` | instrument file extension | `mzML` |
//! | `CCSBATCH_LOG_FORMAT` | `json` or `pretty` | `pretty` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use ccsbatch_infra::jobs::SchedulerConfig;
use ccsbatch_observability::LogFormat;
use ccsbatch_spec::ParseOptions;
use ccsbatch_spec::parser::DEFAULT_EXTENSION;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://ccsbatch.db";
pub const DEFAULT_ENGINE: &str = "ccs-engine";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no spec file given (set CCSBATCH_SPEC or pass it as the first argument)")]
    MissingSpec,
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub spec_path: PathBuf,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub database_url: String,
    pub engine: PathBuf,
    pub max_jobs: Option<usize>,
    pub reanalyze: bool,
    pub force: bool,
    pub job_timeout: Option<Duration>,
    pub extension: String,
    pub log_format: LogFormat,
}

impl RunConfig {
    /// Read the process environment; `args` are the command line arguments
    /// without the program name.
    pub fn from_env(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        Self::from_lookup(args, |key| std::env::var(key).ok())
    }

    /// Like [`RunConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(
        args: impl IntoIterator<Item = String>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let spec_path = args
            .into_iter()
            .next()
            .or_else(|| var("CCSBATCH_SPEC"))
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingSpec)?;

        let input = var("CCSBATCH_INPUT").map(PathBuf::from).unwrap_or_else(|| {
            spec_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let max_jobs = match var("CCSBATCH_MAX_JOBS") {
            Some(value) => {
                let n: usize = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                    invalid("CCSBATCH_MAX_JOBS", &value, e.to_string())
                })?;
                if n == 0 {
                    return Err(invalid("CCSBATCH_MAX_JOBS", &value, "must be at least 1"));
                }
                Some(n)
            }
            None => None,
        };

        let job_timeout = match var("CCSBATCH_TIMEOUT_SECS") {
            Some(value) => {
                let secs: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                    invalid("CCSBATCH_TIMEOUT_SECS", &value, e.to_string())
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let log_format = match var("CCSBATCH_LOG_FORMAT") {
            Some(value) => value
                .parse()
                .map_err(|e: ccsbatch_observability::ParseLogFormatError| {
                    invalid("CCSBATCH_LOG_FORMAT", &value, e.to_string())
                })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            spec_path,
            input,
            output: var("CCSBATCH_OUTPUT").map(PathBuf::from),
            database_url: var("CCSBATCH_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            engine: var("CCSBATCH_ENGINE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE)),
            max_jobs,
            reanalyze: flag("CCSBATCH_REANALYZE", var("CCSBATCH_REANALYZE"))?,
            force: flag("CCSBATCH_FORCE", var("CCSBATCH_FORCE"))?,
            job_timeout,
            extension: var("CCSBATCH_EXTENSION").unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            log_format,
        })
    }

    pub fn parse_options(&self) -> ParseOptions {
        let options = ParseOptions::new(&self.input)
            .with_force(self.force)
            .with_extension(&self.extension);
        match &self.output {
            Some(output) => options.with_output(output),
            None => options,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let config = SchedulerConfig::default()
            .with_name("ccsbatch")
            .with_reanalyze(self.reanalyze)
            .with_job_timeout(self.job_timeout);
        match self.max_jobs {
            Some(max) => config.with_max_concurrency(max),
            None => config,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn flag(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, &value, "expected true or false")),
    }
}
