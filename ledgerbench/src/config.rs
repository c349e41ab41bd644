//! Configuration for the benchmark harness.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables prefixed with `LEDGERBENCH__`
//! 2. The run parameters `CONNS`, `REQUESTS`, `RAMPING_DURATION`, `CONSECUTIVE_DURATION`,
//!    `RAMPS_COUNT`, `SCALE_FACTOR`, `TEST_RUN` and `CONVEX_URL` without a prefix
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Prefixed variables use double underscores (`__`) to denote nested configuration structures.
//! For example:
//!
//! - `LEDGERBENCH__RETRY__MAX_ATTEMPTS=3` lowers the number of attempts per transaction
//! - `LEDGERBENCH__THRESHOLDS__PROFILE=strict` selects the strict pass criteria
//!
//! # YAML Configuration File
//!
//! ```yaml
//! convex_url: http://127.0.0.1:3210
//! conns: 50
//! ramps_count: 5
//! scale_factor: 10
//!
//! retry:
//!   max_attempts: 5
//!   base_delay: 10ms
//!   max_delay: 100ms
//!
//! thresholds:
//!   profile: custom
//!   max_failure_rate: 0.05
//!   max_p95: 500ms
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, ensure};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::driver::{LoadConfig, Scenario};
use crate::executor::RetryPolicy;
use crate::report::Thresholds;
use crate::scale::ScaleModel;
use crate::seeder::SeedingConfig;
use crate::teardown::TeardownConfig;

const ENV_PREFIX: &str = "LEDGERBENCH__";

/// Run parameters that are also read from unprefixed environment variables.
const RUN_KEYS: &[&str] = &[
    "CONVEX_URL",
    "CONNS",
    "REQUESTS",
    "RAMPING_DURATION",
    "CONSECUTIVE_DURATION",
    "RAMPS_COUNT",
    "SCALE_FACTOR",
    "TEST_RUN",
];

/// Harness configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the deployment. Required unless the in-process store is used.
    pub convex_url: Option<String>,

    /// Peak number of concurrent workers.
    pub conns: usize,
    /// Transactions attempted per iteration.
    pub requests: usize,
    /// Length of each ramp stage in seconds.
    pub ramping_duration: u64,
    /// Length of each hold stage in seconds.
    pub consecutive_duration: u64,
    pub ramps_count: u32,
    pub scale_factor: u32,
    /// Label of the run, printed with the report.
    pub test_run: String,

    /// Seed for the transaction parameters. A random seed is logged when unset.
    pub seed: Option<u64>,

    /// Timeout of a single HTTP request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    pub retry: RetryPolicy,
    pub load: LoadConfig,
    pub seeding: SeedingConfig,
    pub teardown: TeardownConfig,
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            convex_url: None,
            conns: 10,
            requests: 10,
            ramping_duration: 1,
            consecutive_duration: 600,
            ramps_count: 1,
            scale_factor: 10,
            test_run: "default".to_owned(),
            seed: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            load: LoadConfig::default(),
            seeding: SeedingConfig::default(),
            teardown: TeardownConfig::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `path`)
    /// 3. Unprefixed run parameters from the environment
    /// 4. Environment variables (prefixed with `LEDGERBENCH__`)
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the resulting values are out of range.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::raw().only(RUN_KEYS))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.conns >= 1, "`conns` must be at least 1");
        ensure!(self.requests >= 1, "`requests` must be at least 1");
        ensure!(self.ramps_count >= 1, "`ramps_count` must be at least 1");
        ensure!(self.scale_factor >= 1, "`scale_factor` must be at least 1");
        ensure!(
            self.retry.max_attempts >= 1,
            "`retry.max_attempts` must be at least 1"
        );
        ensure!(
            self.seeding.account_batch_size >= 1,
            "`seeding.account_batch_size` must be at least 1"
        );
        ensure!(
            self.teardown.batch_size >= 1,
            "`teardown.batch_size` must be at least 1"
        );

        let limits = self.thresholds.limits();
        ensure!(
            (0.0..=1.0).contains(&limits.max_failure_rate),
            "`thresholds.max_failure_rate` must be between 0 and 1"
        );
        Ok(())
    }

    pub fn scale(&self) -> ScaleModel {
        ScaleModel::new(self.scale_factor)
    }

    pub fn scenario(&self) -> Scenario {
        Scenario::ramping(
            self.conns,
            self.ramps_count,
            Duration::from_secs(self.ramping_duration),
            Duration::from_secs(self.consecutive_duration),
        )
        .with_graceful_ramp_down(self.load.graceful_ramp_down)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::driver::Stage;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.convex_url, None);
            assert_eq!(config.conns, 10);
            assert_eq!(config.requests, 10);
            assert_eq!(config.scale_factor, 10);
            assert_eq!(config.test_run, "default");
            assert_eq!(config.retry, RetryPolicy::default());
            assert_eq!(config.thresholds, Thresholds::Default);
            assert_eq!(config.scenario().duration(), Duration::from_secs(601));

            Ok(())
        });
    }

    #[test]
    fn run_parameters_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CONVEX_URL", "http://127.0.0.1:3210");
            jail.set_env("CONNS", "10");
            jail.set_env("RAMPS_COUNT", "3");
            jail.set_env("RAMPING_DURATION", "5");
            jail.set_env("CONSECUTIVE_DURATION", "20");
            jail.set_env("SCALE_FACTOR", "2");
            jail.set_env("TEST_RUN", "nightly");

            let config = Config::load(None).unwrap();

            assert_eq!(config.convex_url.as_deref(), Some("http://127.0.0.1:3210"));
            assert_eq!(config.scale().accounts(), 200_000);
            assert_eq!(config.test_run, "nightly");

            let scenario = config.scenario();
            assert_eq!(
                scenario.stages[..2],
                [
                    Stage {
                        duration: Duration::from_secs(5),
                        target: 4
                    },
                    Stage {
                        duration: Duration::from_secs(20),
                        target: 4
                    },
                ]
            );
            assert_eq!(scenario.peak(), 10);

            Ok(())
        });
    }

    #[test]
    fn nested_settings_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LEDGERBENCH__RETRY__MAX_ATTEMPTS", "3");
            jail.set_env("LEDGERBENCH__RETRY__MAX_DELAY", "50ms");
            jail.set_env("LEDGERBENCH__THRESHOLDS__PROFILE", "strict");
            jail.set_env("LEDGERBENCH__TEARDOWN__BATCH_SIZE", "100");

            let config = Config::load(None).unwrap();

            assert_eq!(config.retry.max_attempts, 3);
            assert_eq!(config.retry.max_delay, Duration::from_millis(50));
            assert_eq!(config.retry.base_delay, Duration::from_millis(10));
            assert_eq!(config.thresholds, Thresholds::Strict);
            assert_eq!(config.teardown.batch_size, 100);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            convex_url: http://localhost:3210
            conns: 50
            seed: 42
            load:
                iteration_budget: 500ms
            seeding:
                history_records: 0
            thresholds:
                profile: custom
                max_failure_rate: 0.05
                max_p95: 250ms
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.convex_url.as_deref(), Some("http://localhost:3210"));
            assert_eq!(config.conns, 50);
            assert_eq!(config.seed, Some(42));
            assert_eq!(config.load.iteration_budget, Duration::from_millis(500));
            assert_eq!(config.load.graceful_ramp_down, Duration::from_secs(30));
            assert_eq!(config.seeding.history_records, 0);
            assert_eq!(config.seeding.account_batch_size, 5000);
            assert_eq!(
                config.thresholds,
                Thresholds::Custom {
                    max_failure_rate: 0.05,
                    max_p95: Duration::from_millis(250)
                }
            );

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            conns: 50
            scale_factor: 3
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("CONNS", "5");
            jail.set_env("LEDGERBENCH__SCALE_FACTOR", "4");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.conns, 5);
            assert_eq!(config.scale_factor, 4);

            Ok(())
        });
    }

    #[test]
    fn rejects_out_of_range_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SCALE_FACTOR", "0");
            assert!(Config::load(None).is_err());

            jail.set_env("SCALE_FACTOR", "1");
            jail.set_env("LEDGERBENCH__RETRY__MAX_ATTEMPTS", "0");
            assert!(Config::load(None).is_err());

            Ok(())
        });
    }
}
