//! Runner configuration.
//!
//! Values are layered in this order, later sources overriding earlier ones:
//! built-in defaults, an optional config file (any format the `config`
//! crate understands, picked by extension), then `CCIP_READ_*` environment
//! variables such as `CCIP_READ_MAX_ATTEMPTS=5`.

use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use eyre::{bail, Context, Result};
use serde::Deserialize;

use crate::{runner::DEFAULT_MAX_ATTEMPTS, CcipReadRunner, HttpFetcher};

/// Prefix of the environment variables read by [`load_settings`].
pub const ENV_PREFIX: &str = "CCIP_READ";

/// Configuration for [`CcipReadRunner`] and
/// [`crate::middleware::CcipReadMiddleware`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CcipReadConf {
    /// Whether calls made through the middleware follow off-chain lookups
    pub enabled: bool,
    /// Loop iterations allowed per call, shared by every lookup the call
    /// triggers
    pub max_attempts: u32,
    /// Timeout of a single gateway request
    pub request_timeout_secs: u64,
}

impl Default for CcipReadConf {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout_secs: 10,
        }
    }
}

impl CcipReadConf {
    /// Timeout of a single gateway request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// An HTTP fetcher honouring the configured timeout.
    pub fn build_fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::new(self.request_timeout()).context("Failed to build gateway HTTP client")
    }

    /// A runner over `caller` using the configured limits.
    pub fn build_runner<C>(&self, caller: C) -> Result<CcipReadRunner<C>> {
        self.validate()?;
        Ok(CcipReadRunner::new(
            caller,
            self.build_fetcher()?,
            self.max_attempts,
        ))
    }
}

/// Load a [`CcipReadConf`] from `path` (if given) and the environment.
pub fn load_settings(path: Option<&Path>) -> Result<CcipReadConf> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    let conf: CcipReadConf = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to load config sources")?
        .try_deserialize()
        .context("Config deserialization error")?;
    conf.validate()?;
    Ok(conf)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let conf = CcipReadConf::default();
        assert!(conf.enabled);
        assert_eq!(conf.max_attempts, 20);
        assert_eq!(conf.request_timeout(), Duration::from_secs(10));
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let conf = CcipReadConf {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(conf.validate().is_err());
        assert!(conf.build_runner(()).is_err());
    }

    // Environment variables are process wide, so file and env layering are
    // checked in one test.
    #[test]
    fn file_then_env_layering() {
        let file = config_file(r#"{ "max_attempts": 7, "request_timeout_secs": 3 }"#);

        let conf = load_settings(Some(file.path())).unwrap();
        assert_eq!(
            conf,
            CcipReadConf {
                enabled: true,
                max_attempts: 7,
                request_timeout_secs: 3,
            }
        );

        std::env::set_var("CCIP_READ_MAX_ATTEMPTS", "4");
        std::env::set_var("CCIP_READ_ENABLED", "false");
        let conf = load_settings(Some(file.path()));
        std::env::remove_var("CCIP_READ_MAX_ATTEMPTS");
        std::env::remove_var("CCIP_READ_ENABLED");
        let conf = conf.unwrap();
        assert_eq!(conf.max_attempts, 4);
        assert!(!conf.enabled);
        assert_eq!(conf.request_timeout_secs, 3);

        let zero = config_file(r#"{ "max_attempts": 0 }"#);
        assert!(load_settings(Some(zero.path())).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_settings(Some(Path::new("/nonexistent/ccip-read.json"))).is_err());
    }
}
