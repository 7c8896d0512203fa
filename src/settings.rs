//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An
//! example configuration file can be found in the `configs/` directory located in the repository
//! root.

use std::{fmt, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::optimizer::{AdamConfig, SgdConfig};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    #[serde(default)]
    pub client: ClientSettings,
    #[validate]
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: PathBuf) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path))?;
        config.merge(Environment::with_prefix("fedavg").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[validate(schema(function = "validate_client"))]
#[serde(default)]
/// Client settings.
pub struct ClientSettings {
    /// The identifier of the client, used to tell clients apart in logs.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// user_id = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_CLIENT__USER_ID=3
    /// ```
    pub user_id: u32,

    /// The learning rate used to turn parameter differences into gradients, and to apply global
    /// gradients. Must be positive. Defaults to `0.1`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// learning_rate = 0.1
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_CLIENT__LEARNING_RATE=0.1
    /// ```
    pub learning_rate: f64,

    /// Whether to upload gradients instead of raw parameters. Defaults to `true`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// send_gradient = true
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_CLIENT__SEND_GRADIENT=true
    /// ```
    pub send_gradient: bool,

    /// Whether the aggregator applies the global update itself. If so, every global state is
    /// loaded as absolute parameters. Otherwise every global state but the first one is a
    /// global gradient that the client applies with the optimizer
    /// [`ClientSettings::optimizer_type_for_global_grad`]. Defaults to `true`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// server_side_update = false
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_CLIENT__SERVER_SIDE_UPDATE=false
    /// ```
    pub server_side_update: bool,

    /// The optimizer applying global gradients: `sgd`, `adam` or `none`. Only used if
    /// [`ClientSettings::server_side_update`] is `false`. Defaults to `sgd`.
    ///
    /// The name is checked when the client is created rather than when the settings are
    /// loaded.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// optimizer_type_for_global_grad = "adam"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_CLIENT__OPTIMIZER_TYPE_FOR_GLOBAL_GRAD=adam
    /// ```
    pub optimizer_type_for_global_grad: String,

    /// Hyperparameters of the `sgd` optimizer.
    #[validate]
    pub sgd: SgdConfig,

    /// Hyperparameters of the `adam` optimizer.
    #[validate]
    pub adam: AdamConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_id: 0,
            learning_rate: 0.1,
            send_gradient: true,
            server_side_update: true,
            optimizer_type_for_global_grad: "sgd".to_string(),
            sgd: SgdConfig::default(),
            adam: AdamConfig::default(),
        }
    }
}

fn validate_client(s: &ClientSettings) -> Result<(), ValidationError> {
    if s.learning_rate > 0. && s.learning_rate.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("learning rate must be positive"))
    }
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[serde(default)]
/// Settings of the in-process simulation.
pub struct SimulationSettings {
    /// The number of clients. Defaults to `4`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [simulation]
    /// clients = 4
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_SIMULATION__CLIENTS=4
    /// ```
    #[validate(range(min = 1))]
    pub clients: usize,

    /// The number of rounds. Defaults to `10`.
    #[validate(range(min = 1))]
    pub rounds: usize,

    /// The number of local training steps per client and round. Defaults to `5`.
    pub local_steps: usize,

    /// The number of samples held by each client. Defaults to `32`.
    #[validate(range(min = 1))]
    pub samples: usize,

    /// The seed of the data generator. Defaults to `0`.
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            clients: 4,
            rounds: 10,
            local_steps: 5,
            samples: 32,
            seed: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDAVG_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.6/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: EnvFilter::new("info"),
        }
    }
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.6/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_new() {
        let settings = Settings::new(PathBuf::from("configs/client.toml")).unwrap();
        assert!(!settings.client.server_side_update);
        assert_eq!(settings.client.optimizer_type_for_global_grad, "sgd");
        assert!(Settings::new(PathBuf::from("")).is_err());
    }

    #[test]
    fn test_client_settings_default_is_valid() {
        assert!(ClientSettings::default().validate().is_ok());
        assert!(SimulationSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_client() {
        assert!(validate_client(&ClientSettings::default()).is_ok());
        assert!(validate_client(&ClientSettings {
            learning_rate: 0.,
            ..ClientSettings::default()
        })
        .is_err());
        assert!(validate_client(&ClientSettings {
            learning_rate: f64::INFINITY,
            ..ClientSettings::default()
        })
        .is_err());
    }

    #[test]
    fn test_nested_optimizer_settings_are_validated() {
        let settings = ClientSettings {
            sgd: SgdConfig {
                nesterov: true,
                ..SgdConfig::default()
            },
            ..ClientSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
