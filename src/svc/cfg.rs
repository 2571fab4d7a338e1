//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::svc::crd::calculator::SecretPolicy;

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
pub const DEFAULT_REQUEUE: u64 = 10;
pub const DEFAULT_SECRET_POLICY: &str = "create";

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "listen")]
    pub listen: SocketAddr,
    /// delay in seconds before a failed reconciliation is scheduled again
    #[serde(rename = "requeue")]
    pub requeue: u64,
    #[serde(rename = "secret-policy")]
    pub secret_policy: SecretPolicy,
}

impl Operator {
    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue)
    }
}

// -----------------------------------------------------------------------------
// Jaeger structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Jaeger {
    #[serde(rename = "endpoint")]
    pub endpoint: String,
}

// -----------------------------------------------------------------------------
// ConfigurationError enum

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("failed to load configuration, {0}")]
    Build(ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "operator")]
    pub operator: Operator,
    #[serde(rename = "jaeger", default)]
    pub jaeger: Option<Jaeger>,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = ConfigurationError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        let builder = Self::defaults()?.add_source(File::from(path).required(true));

        Self::build(builder)
    }
}

impl Configuration {
    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigurationError> {
        Ok(Config::builder()
            .set_default("operator.listen", DEFAULT_LISTEN)
            .map_err(|err| ConfigurationError::Default("operator.listen".into(), err))?
            .set_default("operator.requeue", DEFAULT_REQUEUE as i64)
            .map_err(|err| ConfigurationError::Default("operator.requeue".into(), err))?
            .set_default("operator.secret-policy", DEFAULT_SECRET_POLICY)
            .map_err(|err| ConfigurationError::Default("operator.secret-policy".into(), err))?
            .add_source(
                Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_"))
                    .separator("__"),
            ))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigurationError> {
        builder
            .build()
            .map_err(ConfigurationError::Build)?
            .try_deserialize()
            .map_err(ConfigurationError::Cast)
    }

    pub fn try_default() -> Result<Self, ConfigurationError> {
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!(
                "{}/.config/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
            paths.push(PathBuf::from(format!(
                "{}/.local/share/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
        }

        paths.push(PathBuf::from("config"));

        let builder = paths.into_iter().fold(Self::defaults()?, |builder, path| {
            builder.add_source(File::from(path).required(false))
        });

        Self::build(builder)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_without_any_file() {
        let config = Configuration::build(Configuration::defaults().unwrap()).unwrap();

        assert_eq!(config.operator.listen, DEFAULT_LISTEN.parse().unwrap());
        assert_eq!(config.operator.requeue(), Duration::from_secs(DEFAULT_REQUEUE));
        assert_eq!(config.operator.secret_policy, SecretPolicy::Create);
        assert_eq!(config.jaeger, None);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[operator]
listen = "127.0.0.1:9000"
secret-policy = "overwrite"

[jaeger]
endpoint = "127.0.0.1:6831"
"#
        )
        .unwrap();

        let config = Configuration::try_from(file.path().to_path_buf()).unwrap();

        assert_eq!(config.operator.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.operator.requeue, DEFAULT_REQUEUE);
        assert_eq!(config.operator.secret_policy, SecretPolicy::Overwrite);
        assert_eq!(
            config.jaeger,
            Some(Jaeger {
                endpoint: "127.0.0.1:6831".to_string()
            })
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(Configuration::try_from(path).is_err());
    }

    #[test]
    fn unknown_secret_policy_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[operator]\nsecret-policy = \"replace-all\"").unwrap();

        assert!(matches!(
            Configuration::try_from(file.path().to_path_buf()),
            Err(ConfigurationError::Cast(_))
        ));
    }
}
