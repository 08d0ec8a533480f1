use crate::config::{file, Data, File, Network};
use crate::exchange;
use anyhow::Context;
use log::LevelFilter;
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

const DEFAULT_RELAY_PORT: u16 = 9939;
const DEFAULT_STEP_COUNT: u32 = 10;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 90;
const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 1;
const DEFAULT_RESUBMIT_INTERVAL_SECS: u64 = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub relay: Relay,
    pub exchange: Exchange,
    pub broker: Broker,
    pub wallet: Wallet,
    pub data: Data,
    pub logging: Logging,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relay {
    pub bind: SocketAddr,
    pub connect: SocketAddr,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Exchange {
    pub step_count: u32,
    pub handshake_timeout: Duration,
    pub step_timeout: Duration,
    pub required_confirmations: u32,
}

impl Exchange {
    pub fn timeouts(&self) -> exchange::Timeouts {
        exchange::Timeouts {
            handshake: self.handshake_timeout,
            step: self.step_timeout,
            required_confirmations: self.required_confirmations,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Broker {
    pub resubmit_interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wallet {
    pub network: Network,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Logging {
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
        }
    }
}

impl Settings {
    pub fn from_config_file_and_defaults(config_file: File) -> anyhow::Result<Self> {
        let File {
            relay,
            exchange,
            broker,
            wallet,
            data,
            logging,
        } = config_file;

        Ok(Self {
            relay: {
                let relay = relay.unwrap_or(file::Relay {
                    bind_address: None,
                    bind_port: None,
                    connect_address: None,
                    connect_port: None,
                });

                let any: IpAddr = "0.0.0.0".parse().expect("to be valid static string");
                let localhost: IpAddr = "127.0.0.1".parse().expect("to be valid static string");

                Relay {
                    bind: SocketAddr::new(
                        relay.bind_address.unwrap_or(any),
                        relay.bind_port.unwrap_or(DEFAULT_RELAY_PORT),
                    ),
                    connect: SocketAddr::new(
                        relay.connect_address.unwrap_or(localhost),
                        relay.connect_port.unwrap_or(DEFAULT_RELAY_PORT),
                    ),
                }
            },
            exchange: {
                let exchange = exchange.unwrap_or(file::Exchange {
                    step_count: None,
                    handshake_timeout: None,
                    step_timeout: None,
                    required_confirmations: None,
                });

                let step_count = exchange.step_count.unwrap_or(DEFAULT_STEP_COUNT);
                anyhow::ensure!(step_count >= 1, "exchange.step_count must be at least 1");

                Exchange {
                    step_count,
                    handshake_timeout: Duration::from_secs(
                        exchange
                            .handshake_timeout
                            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
                    ),
                    step_timeout: Duration::from_secs(
                        exchange.step_timeout.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
                    ),
                    required_confirmations: exchange
                        .required_confirmations
                        .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS),
                }
            },
            broker: Broker {
                resubmit_interval: Duration::from_secs(
                    broker
                        .and_then(|broker| broker.resubmit_interval)
                        .unwrap_or(DEFAULT_RESUBMIT_INTERVAL_SECS),
                ),
            },
            wallet: Wallet {
                network: wallet
                    .map(|wallet| wallet.network)
                    .unwrap_or(Network::Regtest),
            },
            data: {
                let default_data_dir =
                    crate::data_dir().context("unable to determine default data path")?;
                data.unwrap_or(Data {
                    dir: default_data_dir,
                })
            },
            logging: {
                match logging {
                    None => Logging::default(),
                    Some(inner) => match inner {
                        file::Logging { level: None } => Logging::default(),
                        file::Logging { level: Some(level) } => Logging {
                            level: level.into(),
                        },
                    },
                }
            },
        })
    }
}

impl From<Settings> for File {
    fn from(settings: Settings) -> Self {
        let Settings {
            relay,
            exchange,
            broker,
            wallet,
            data,
            logging: Logging { level },
        } = settings;

        File {
            relay: Some(file::Relay {
                bind_address: Some(relay.bind.ip()),
                bind_port: Some(relay.bind.port()),
                connect_address: Some(relay.connect.ip()),
                connect_port: Some(relay.connect.port()),
            }),
            exchange: Some(file::Exchange {
                step_count: Some(exchange.step_count),
                handshake_timeout: Some(exchange.handshake_timeout.as_secs()),
                step_timeout: Some(exchange.step_timeout.as_secs()),
                required_confirmations: Some(exchange.required_confirmations),
            }),
            broker: Some(file::Broker {
                resubmit_interval: Some(broker.resubmit_interval.as_secs()),
            }),
            wallet: Some(file::Wallet {
                network: wallet.network,
            }),
            data: Some(data),
            logging: Some(file::Logging {
                level: Some(level.into()),
            }),
        }
    }
}
