use crate::config::{Data, Network};
use config as config_rs;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, net::IpAddr, path::Path};

/// This struct aims to represent the configuration file as it appears on
/// disk.
///
/// Most importantly, optional elements of the configuration file are
/// represented as `Option`s here. This allows us to create a dedicated
/// step for filling in default values for absent configuration options.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct File {
    pub relay: Option<Relay>,
    pub exchange: Option<Exchange>,
    pub broker: Option<Broker>,
    pub wallet: Option<Wallet>,
    pub data: Option<Data>,
    pub logging: Option<Logging>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Relay {
    pub bind_address: Option<IpAddr>,
    pub bind_port: Option<u16>,
    pub connect_address: Option<IpAddr>,
    pub connect_port: Option<u16>,
}

/// Timeouts are given in seconds.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Exchange {
    pub step_count: Option<u32>,
    pub handshake_timeout: Option<u64>,
    pub step_timeout: Option<u64>,
    pub required_confirmations: Option<u32>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Broker {
    pub resubmit_interval: Option<u64>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Wallet {
    pub network: Network,
}

impl File {
    pub fn default() -> Self {
        File {
            relay: None,
            exchange: None,
            broker: None,
            wallet: None,
            data: None,
            logging: None,
        }
    }

    pub fn read<D>(config_file: D) -> Result<Self, config_rs::ConfigError>
    where
        D: AsRef<OsStr>,
    {
        let config_file = Path::new(&config_file);

        let mut config = config_rs::Config::new();
        config.merge(config_rs::File::from(config_file))?;
        config.try_into()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Logging {
    pub level: Option<Level>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LevelFilter> for Level {
    fn from(level: LevelFilter) -> Self {
        match level {
            LevelFilter::Off => Level::Error, // We don't support suppressing all logs.
            LevelFilter::Error => Level::Error,
            LevelFilter::Warn => Level::Warn,
            LevelFilter::Info => Level::Info,
            LevelFilter::Debug => Level::Debug,
            LevelFilter::Trace => Level::Trace,
        }
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => LevelFilter::Error,
            Level::Warn => LevelFilter::Warn,
            Level::Info => LevelFilter::Info,
            Level::Debug => LevelFilter::Debug,
            Level::Trace => LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use spectral::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn full_config_deserializes_correctly() {
        let contents = r#"
[relay]
bind_address = "0.0.0.0"
bind_port = 9939
connect_address = "127.0.0.1"
connect_port = 9939

[exchange]
step_count = 20
handshake_timeout = 60
step_timeout = 45
required_confirmations = 3

[broker]
resubmit_interval = 15

[wallet]
network = "regtest"

[data]
dir = "/tmp/stepswap/"

[logging]
level = "Debug"
"#;
        let file = File {
            relay: Some(Relay {
                bind_address: Some("0.0.0.0".parse().unwrap()),
                bind_port: Some(9939),
                connect_address: Some("127.0.0.1".parse().unwrap()),
                connect_port: Some(9939),
            }),
            exchange: Some(Exchange {
                step_count: Some(20),
                handshake_timeout: Some(60),
                step_timeout: Some(45),
                required_confirmations: Some(3),
            }),
            broker: Some(Broker {
                resubmit_interval: Some(15),
            }),
            wallet: Some(Wallet {
                network: Network::Regtest,
            }),
            data: Some(Data {
                dir: PathBuf::from("/tmp/stepswap/"),
            }),
            logging: Some(Logging {
                level: Some(Level::Debug),
            }),
        };

        let config = toml::from_str::<File>(contents);
        assert_that(&config).is_ok().is_equal_to(file);
    }

    #[test]
    fn config_with_defaults_roundtrip() {
        // we start with the default config file
        let default_file = File::default();

        // convert to settings, this populates all empty fields with defaults
        let effective_settings = Settings::from_config_file_and_defaults(default_file).unwrap();

        // write settings back to file
        let file_with_effective_settings = File::from(effective_settings);

        let serialized = toml::to_string(&file_with_effective_settings).unwrap();
        let file = toml::from_str::<File>(&serialized).unwrap();

        assert_eq!(file, file_with_effective_settings)
    }

    #[test]
    fn network_deserializes_correctly() {
        let file_contents = vec![
            r#"network = "main""#,
            r#"network = "test""#,
            r#"network = "regtest""#,
        ];

        let expected = vec![
            Wallet {
                network: Network::Main,
            },
            Wallet {
                network: Network::Test,
            },
            Wallet {
                network: Network::Regtest,
            },
        ];

        let actual = file_contents
            .into_iter()
            .map(toml::from_str)
            .collect::<Result<Vec<Wallet>, toml::de::Error>>()
            .unwrap();

        assert_eq!(actual, expected);
    }
}
